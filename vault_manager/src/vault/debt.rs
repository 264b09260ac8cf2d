//! Debt allocation between the idle reserve and strategies
//!
//! `update_debt` is the only way funds move between `total_idle` and a
//! strategy. Amounts actually moved are measured as vault balance deltas
//! around the strategy call, so a strategy that silently short-changes a
//! withdrawal cannot desynchronize the ledger.

use alloy_primitives::{Address, U256};
use log::debug;

use crate::error::{arithmetic_err, VaultError, VaultResult};
use crate::journal::{JournalEntry, LogType};
use crate::types::{Role, RoleTable};
use crate::vault::{require_role, Env, Vault};

/// The share of `assets_needed` that would surface as a realized loss if
/// withdrawn from `strategy` right now.
///
/// A strategy whose reported value dropped below its booked debt spreads
/// that shortfall pro rata over every unit withdrawn. Withdrawing while
/// under water realizes the withdrawer's slice of the loss.
pub(crate) fn assess_loss_share(
    env: &mut Env,
    vault: Address,
    strategy: Address,
    current_debt: U256,
    assets_needed: U256,
) -> VaultResult<U256> {
    let target = env
        .strategies
        .strategy_mut(strategy)
        .ok_or(VaultError::InactiveStrategy(strategy))?;
    let value = target.value_held_for(vault)?;
    if current_debt.is_zero() || value >= current_debt {
        return Ok(U256::ZERO);
    }
    let withdrawing = assets_needed.min(current_debt);
    let recoverable = withdrawing
        .checked_mul(value)
        .ok_or(arithmetic_err("overflow assessing unrealized loss"))?
        / current_debt;
    Ok(withdrawing.saturating_sub(recoverable))
}

impl Vault {
    /// The loss a full or partial withdrawal from `strategy` would realize
    pub fn assess_unrealized_loss(
        &self,
        env: &mut Env,
        strategy: Address,
        assets_needed: U256,
    ) -> VaultResult<U256> {
        let record = self
            .strategies
            .get(&strategy)
            .ok_or(VaultError::InactiveStrategy(strategy))?;
        assess_loss_share(env, self.address, strategy, record.current_debt, assets_needed)
    }

    /// Moves a strategy's debt toward `target_debt`, pushing idle funds out
    /// or recalling allocated ones. Returns the strategy's debt afterwards.
    pub fn update_debt(
        &mut self,
        env: &mut Env,
        roles: &RoleTable,
        caller: Address,
        strategy: Address,
        target_debt: U256,
    ) -> VaultResult<U256> {
        require_role(roles, caller, Role::DebtManager)?;
        let now = env.clock.now();
        self.guarded(now, LogType::DebtUpdate, |vault| {
            let record = vault
                .strategies
                .get(&strategy)
                .ok_or(VaultError::InactiveStrategy(strategy))?;
            let current_debt = record.current_debt;
            let max_debt = record.max_debt;

            // A shutdown vault only ever recalls.
            let new_debt = if vault.shutdown { U256::ZERO } else { target_debt };
            if new_debt == current_debt {
                return Err(VaultError::ZeroResult);
            }

            let settled = if new_debt < current_debt {
                vault.recall_debt(env, strategy, current_debt, new_debt)?
            } else {
                vault.extend_debt(env, strategy, current_debt, new_debt, max_debt)?
            };

            vault.journal.record(
                JournalEntry::new(now, Ok(()), LogType::DebtUpdate)
                    .strategy(strategy)
                    .amount(settled)
                    .note(format!("debt moved from {} toward {}", current_debt, new_debt)),
            );
            Ok(settled)
        })
    }

    /// Recall path: pull assets back until the strategy's debt reaches
    /// `new_debt`, or as far as its withdrawal capacity allows.
    fn recall_debt(
        &mut self,
        env: &mut Env,
        strategy: Address,
        current_debt: U256,
        new_debt: U256,
    ) -> VaultResult<U256> {
        let mut to_withdraw = current_debt.saturating_sub(new_debt);

        // Refill the idle floor first if it has been breached; that need
        // overrides the requested target (but never exceeds the debt).
        if self
            .total_idle
            .saturating_add(to_withdraw)
            < self.minimum_total_idle
        {
            to_withdraw = self
                .minimum_total_idle
                .saturating_sub(self.total_idle)
                .min(current_debt);
        }

        let capacity = {
            let target = env
                .strategies
                .strategy_mut(strategy)
                .ok_or(VaultError::InactiveStrategy(strategy))?;
            target.max_withdraw_capacity(self.address)
        };
        if capacity.is_zero() {
            return Err(VaultError::ZeroResult);
        }
        to_withdraw = to_withdraw.min(capacity);

        // The allocator never realizes losses; that is a report decision.
        let loss = assess_loss_share(env, self.address, strategy, current_debt, to_withdraw)?;
        if !loss.is_zero() {
            return Err(VaultError::UnrealizedLossBlock(strategy));
        }

        let before = env.asset.balance_of(self.address);
        {
            let target = env
                .strategies
                .strategy_mut(strategy)
                .ok_or(VaultError::InactiveStrategy(strategy))?;
            target.withdraw(to_withdraw, self.address, self.address)?;
        }
        let withdrawn = env
            .asset
            .balance_of(self.address)
            .saturating_sub(before);

        self.total_idle = self
            .total_idle
            .checked_add(withdrawn)
            .ok_or(arithmetic_err("overflow crediting recalled debt"))?;
        let reduction = withdrawn.min(current_debt);
        let settled = current_debt.saturating_sub(reduction);
        self.total_debt = self.total_debt.saturating_sub(reduction);
        if let Some(record) = self.strategies.get_mut(&strategy) {
            record.current_debt(settled);
        }
        debug!(
            "recalled {} from strategy {}, debt now {}",
            withdrawn, strategy, settled
        );
        Ok(settled)
    }

    /// Extend path: push idle assets out until debt reaches `new_debt`,
    /// bounded by the strategy ceiling, its deposit capacity, and the idle
    /// floor.
    fn extend_debt(
        &mut self,
        env: &mut Env,
        strategy: Address,
        current_debt: U256,
        new_debt: U256,
        max_debt: U256,
    ) -> VaultResult<U256> {
        if new_debt > max_debt {
            return Err(VaultError::LimitExceeded(format!(
                "target debt {} exceeds strategy ceiling {}",
                new_debt, max_debt
            )));
        }

        let mut to_deposit = new_debt.saturating_sub(current_debt);

        let capacity = {
            let target = env
                .strategies
                .strategy_mut(strategy)
                .ok_or(VaultError::InactiveStrategy(strategy))?;
            target.max_deposit_capacity(self.address)
        };
        if capacity.is_zero() {
            return Err(VaultError::ZeroResult);
        }
        to_deposit = to_deposit.min(capacity);

        if self.total_idle <= self.minimum_total_idle {
            return Err(VaultError::InsufficientBalance(format!(
                "idle reserve {} is at or below the {} floor",
                self.total_idle, self.minimum_total_idle
            )));
        }
        to_deposit = to_deposit.min(self.total_idle - self.minimum_total_idle);
        if to_deposit.is_zero() {
            return Err(VaultError::ZeroResult);
        }

        let before = env.asset.balance_of(self.address);
        {
            let target = env
                .strategies
                .strategy_mut(strategy)
                .ok_or(VaultError::InactiveStrategy(strategy))?;
            target.deposit(to_deposit, self.address)?;
        }
        let debited = before.saturating_sub(env.asset.balance_of(self.address));

        self.total_idle = self.total_idle.saturating_sub(debited);
        let settled = current_debt
            .checked_add(debited)
            .ok_or(arithmetic_err("overflow extending strategy debt"))?;
        self.total_debt = self
            .total_debt
            .checked_add(debited)
            .ok_or(arithmetic_err("overflow extending total debt"))?;
        if let Some(record) = self.strategies.get_mut(&strategy) {
            record.current_debt(settled);
        }
        debug!(
            "allocated {} to strategy {}, debt now {}",
            debited, strategy, settled
        );
        Ok(settled)
    }
}
