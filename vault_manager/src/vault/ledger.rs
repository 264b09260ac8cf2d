//! Per-strategy debt records and the registration lifecycle

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::constants::MAX_QUEUE;
use crate::error::{VaultError, VaultResult};
use crate::journal::{JournalEntry, LogType};
use crate::types::{Role, RoleTable};
use crate::vault::{require_role, Env, Vault};

/// The vault's ledger view of one strategy
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyRecord {
    /// Timestamp the strategy was added; doubles as the active flag
    pub activation: u64,
    /// Timestamp of the last settled report
    pub last_report: u64,
    /// Asset units the vault believes this strategy holds
    pub current_debt: U256,
    /// Allocator ceiling for `current_debt`
    pub max_debt: U256,
}

impl StrategyRecord {
    pub fn activation(&mut self, timestamp: u64) -> &mut Self {
        self.activation = timestamp;
        self
    }

    pub fn last_report(&mut self, timestamp: u64) -> &mut Self {
        self.last_report = timestamp;
        self
    }

    pub fn current_debt(&mut self, debt: U256) -> &mut Self {
        self.current_debt = debt;
        self
    }

    pub fn max_debt(&mut self, limit: U256) -> &mut Self {
        self.max_debt = limit;
        self
    }
}

impl Vault {
    /// Registers a strategy so the allocator can fund it.
    ///
    /// The strategy must exist in the environment and report the vault's own
    /// underlying asset; a mismatched asset can never be priced on this
    /// ledger.
    pub fn add_strategy(
        &mut self,
        env: &mut Env,
        roles: &RoleTable,
        caller: Address,
        strategy: Address,
    ) -> VaultResult<()> {
        require_role(roles, caller, Role::StrategyManager)?;
        let now = env.clock.now();
        self.guarded(now, LogType::StrategyChange, |vault| {
            let target = env
                .strategies
                .strategy_mut(strategy)
                .ok_or(VaultError::InactiveStrategy(strategy))?;
            let strategy_asset = target.underlying_asset();
            if strategy_asset != vault.asset {
                return Err(VaultError::AssetMismatch {
                    strategy,
                    strategy_asset,
                    vault_asset: vault.asset,
                });
            }
            if vault.strategies.contains_key(&strategy) {
                return Err(VaultError::AlreadyActive(strategy));
            }

            let mut record = StrategyRecord::default();
            record.activation(now).last_report(now);
            vault.strategies.insert(strategy, record);
            if vault.default_queue.len() < MAX_QUEUE {
                vault.default_queue.push(strategy);
            }
            if let Some(policy) = env.queue_policy.as_deref_mut() {
                policy.strategy_added(vault.address, strategy);
            }
            vault.journal.record(
                JournalEntry::new(now, Ok(()), LogType::StrategyChange)
                    .strategy(strategy)
                    .note("strategy added"),
            );
            Ok(())
        })
    }

    /// Removes a strategy that has been fully unwound. Refuses while any
    /// debt remains on the record; use [`Vault::force_revoke_strategy`] to
    /// write that debt off instead.
    pub fn revoke_strategy(
        &mut self,
        env: &mut Env,
        roles: &RoleTable,
        caller: Address,
        strategy: Address,
    ) -> VaultResult<()> {
        require_role(roles, caller, Role::StrategyManager)?;
        self.remove_strategy(env, strategy, false)
    }

    /// Emergency removal: writes the strategy's remaining debt off as a
    /// realized loss and drops the record.
    pub fn force_revoke_strategy(
        &mut self,
        env: &mut Env,
        roles: &RoleTable,
        caller: Address,
        strategy: Address,
    ) -> VaultResult<()> {
        require_role(roles, caller, Role::EmergencyManager)?;
        self.remove_strategy(env, strategy, true)
    }

    fn remove_strategy(&mut self, env: &mut Env, strategy: Address, force: bool) -> VaultResult<()> {
        let now = env.clock.now();
        self.guarded(now, LogType::StrategyChange, |vault| {
            let record = vault
                .strategies
                .get(&strategy)
                .ok_or(VaultError::InactiveStrategy(strategy))?;
            let debt = record.current_debt;
            if !debt.is_zero() {
                if !force {
                    return Err(VaultError::LimitExceeded(format!(
                        "strategy {} still carries {} debt",
                        strategy, debt
                    )));
                }
                // Written off: holders eat it through price-per-share.
                vault.total_debt = vault.total_debt.saturating_sub(debt);
            }

            vault.strategies.remove(&strategy);
            vault.default_queue.retain(|queued| *queued != strategy);
            if let Some(policy) = env.queue_policy.as_deref_mut() {
                policy.strategy_removed(vault.address, strategy);
            }
            let note = if force && !debt.is_zero() {
                format!("strategy force-revoked, {} debt written off", debt)
            } else {
                "strategy revoked".to_string()
            };
            vault.journal.record(
                JournalEntry::new(now, Ok(()), LogType::StrategyChange)
                    .strategy(strategy)
                    .amount(debt)
                    .note(note),
            );
            Ok(())
        })
    }

    /// Sets the allocator ceiling for one strategy's debt
    pub fn set_max_debt_for(
        &mut self,
        roles: &RoleTable,
        caller: Address,
        strategy: Address,
        limit: U256,
        now: u64,
    ) -> VaultResult<()> {
        require_role(roles, caller, Role::DebtManager)?;
        self.guarded(now, LogType::Config, |vault| {
            let record = vault
                .strategies
                .get_mut(&strategy)
                .ok_or(VaultError::InactiveStrategy(strategy))?;
            record.max_debt(limit);
            vault.journal.record(
                JournalEntry::new(now, Ok(()), LogType::Config)
                    .strategy(strategy)
                    .amount(limit)
                    .note("strategy max debt updated"),
            );
            Ok(())
        })
    }
}
