//! The vault service object
//!
//! One `Vault` owns the entire ledger of §3-style state: idle and allocated
//! assets, the per-strategy debt records, the share ledger and the profit
//! unlock schedule. External collaborators are handed in per call through
//! an [`Env`] bundle; privileged calls additionally take the caller and a
//! role capability table. Every mutating entry point runs through
//! [`Vault::guarded`], which holds the reentrancy gate and rolls the state
//! back wholesale when the operation fails, so failures are all-or-nothing.

pub(crate) mod accounting;
pub(crate) mod debt;
pub(crate) mod ledger;
pub(crate) mod lock;
pub(crate) mod report;
pub(crate) mod shares;
pub(crate) mod withdraw;

use std::collections::HashMap;

use alloy_primitives::{Address, U256};
use log::info;

use crate::constants::MAX_PROFIT_UNLOCK_TIME;
use crate::error::{VaultError, VaultResult};
use crate::journal::{Journal, JournalEntry, LogType};
use crate::providers::{
    Accountant, AssetToken, Clock, ProtocolFeeSource, QueuePolicy, StrategySet,
};
use crate::types::{InitArgs, Role, RoleTable, Rounding, StrategyQueryData, VaultQueryData};

pub use ledger::StrategyRecord;

use lock::Gate;
use shares::ShareLedger;

/// Collaborator bundle handed into every vault operation that needs the
/// outside world. The vault never stores any of these.
pub struct Env<'a> {
    pub clock: &'a dyn Clock,
    pub asset: &'a mut dyn AssetToken,
    pub strategies: &'a mut dyn StrategySet,
    pub accountant: Option<&'a mut dyn Accountant>,
    pub queue_policy: Option<&'a mut dyn QueuePolicy>,
    pub fee_source: Option<&'a dyn ProtocolFeeSource>,
}

/// Tokenized pooled-capital vault
#[derive(Clone)]
pub struct Vault {
    /// Identity the vault holds asset and share balances under
    address: Address,
    /// The one underlying asset, fixed for the vault's lifetime
    asset: Address,
    /// Decimals of the underlying asset
    decimals: u8,

    /// Maximum total assets accepted through deposits
    deposit_limit: U256,
    /// Idle reserve floor the debt allocator must maintain
    minimum_total_idle: U256,
    /// Profit vesting window in seconds; 0 disables profit locking
    profit_max_unlock_time: u64,

    /// Asset units held directly, available for instant withdrawal
    total_idle: U256,
    /// Ledger belief of asset units allocated across strategies
    total_debt: U256,
    /// One-way shutdown flag
    shutdown: bool,

    /// Per-strategy debt records, keyed by strategy identity
    strategies: HashMap<Address, StrategyRecord>,
    /// Registration-ordered fallback withdrawal queue
    default_queue: Vec<Address>,

    /// Share balances and allowances
    shares: ShareLedger,

    /// When all currently-locked shares become fully vested
    full_profit_unlock_date: u64,
    /// Locked shares vesting per second, scaled by `MAX_BPS_EXTENDED`
    profit_unlocking_rate: U256,
    /// Last time vested shares were actually burned
    last_profit_update: u64,

    /// Last time the protocol fee was assessed
    last_protocol_fee_assessment: u64,

    journal: Journal,
    gate: Gate,
}

impl Vault {
    /// Spawns a vault around a single underlying asset
    pub fn new(args: InitArgs, now: u64) -> VaultResult<Self> {
        if args.profit_max_unlock_time > MAX_PROFIT_UNLOCK_TIME {
            return Err(VaultError::LimitExceeded(format!(
                "profit unlock window {} exceeds the {} second cap",
                args.profit_max_unlock_time, MAX_PROFIT_UNLOCK_TIME
            )));
        }
        info!(
            "spawning vault {} for asset {} with deposit limit {}",
            args.vault, args.asset, args.deposit_limit
        );
        Ok(Self {
            address: args.vault,
            asset: args.asset,
            decimals: args.decimals,
            deposit_limit: args.deposit_limit,
            minimum_total_idle: args.minimum_total_idle,
            profit_max_unlock_time: args.profit_max_unlock_time,
            total_idle: U256::ZERO,
            total_debt: U256::ZERO,
            shutdown: false,
            strategies: HashMap::new(),
            default_queue: Vec::new(),
            shares: ShareLedger::new(),
            full_profit_unlock_date: 0,
            profit_unlocking_rate: U256::ZERO,
            last_profit_update: now,
            last_protocol_fee_assessment: now,
            journal: Journal::new(),
            gate: Gate::default(),
        })
    }

    /// Runs one mutating operation under the reentrancy gate.
    ///
    /// On failure the entire vault state is restored from the snapshot taken
    /// at entry and the failure is journaled, so a failed operation leaves
    /// nothing behind but its journal entry.
    pub(crate) fn guarded<T>(
        &mut self,
        now: u64,
        log_type: LogType,
        f: impl FnOnce(&mut Self) -> VaultResult<T>,
    ) -> VaultResult<T> {
        self.gate.try_lock()?;
        let snapshot = self.clone();
        let result = f(self);
        if let Err(err) = &result {
            *self = snapshot;
            self.journal
                .record(JournalEntry::new(now, Err(err.clone()), log_type));
        }
        self.gate.release();
        result
    }

    // VIEWS

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn asset(&self) -> Address {
        self.asset
    }

    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    pub fn total_idle(&self) -> U256 {
        self.total_idle
    }

    pub fn total_debt(&self) -> U256 {
        self.total_debt
    }

    /// The system's view of total assets: idle reserve plus ledger debt
    pub fn total_assets(&self) -> U256 {
        self.total_idle.saturating_add(self.total_debt)
    }

    /// Raw minted supply, including locked shares
    pub fn total_supply(&self) -> U256 {
        self.shares.total_supply()
    }

    pub fn balance_of(&self, holder: Address) -> U256 {
        self.shares.balance_of(holder)
    }

    pub fn allowance(&self, owner: Address, spender: Address) -> U256 {
        self.shares.allowance(owner, spender)
    }

    /// Share allowance plumbing for third-party redemptions
    pub fn approve(&mut self, owner: Address, spender: Address, value: U256) {
        self.shares.approve(owner, spender, value);
    }

    pub fn deposit_limit(&self) -> U256 {
        self.deposit_limit
    }

    pub fn minimum_total_idle(&self) -> U256 {
        self.minimum_total_idle
    }

    pub fn profit_max_unlock_time(&self) -> u64 {
        self.profit_max_unlock_time
    }

    pub fn full_profit_unlock_date(&self) -> u64 {
        self.full_profit_unlock_date
    }

    pub fn profit_unlocking_rate(&self) -> U256 {
        self.profit_unlocking_rate
    }

    pub fn last_profit_update(&self) -> u64 {
        self.last_profit_update
    }

    pub fn default_queue(&self) -> &[Address] {
        &self.default_queue
    }

    pub fn strategy_record(&self, strategy: Address) -> Option<StrategyQueryData> {
        self.strategies.get(&strategy).map(StrategyQueryData::from)
    }

    /// Assets corresponding to one whole share at current effective supply
    pub fn price_per_share(&self, now: u64) -> VaultResult<U256> {
        let one_share = U256::from(10u64).pow(U256::from(self.decimals));
        self.convert_to_assets(one_share, Rounding::Down, now)
    }

    pub fn query(&self, now: u64) -> VaultResult<VaultQueryData> {
        Ok(VaultQueryData {
            total_idle: self.total_idle,
            total_debt: self.total_debt,
            total_assets: self.total_assets(),
            total_supply: self.total_supply(),
            price_per_share: self.price_per_share(now)?,
            shutdown: self.shutdown,
        })
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    // CONFIGURATION

    /// Shuts the vault down. One-way: deposits are rejected afterwards and
    /// every debt target is forced to zero.
    pub fn shutdown_vault(
        &mut self,
        roles: &RoleTable,
        caller: Address,
        now: u64,
    ) -> VaultResult<()> {
        require_role(roles, caller, Role::EmergencyManager)?;
        if self.shutdown {
            // Monotonic; repeating the call changes nothing.
            return Ok(());
        }
        self.guarded(now, LogType::Shutdown, |vault| {
            vault.shutdown = true;
            vault.journal.record(
                JournalEntry::new(now, Ok(()), LogType::Shutdown).note("vault was shut down"),
            );
            Ok(())
        })
    }

    pub fn set_deposit_limit(
        &mut self,
        roles: &RoleTable,
        caller: Address,
        value: U256,
        now: u64,
    ) -> VaultResult<()> {
        require_role(roles, caller, Role::ConfigManager)?;
        self.guarded(now, LogType::Config, |vault| {
            vault.deposit_limit = value;
            vault.journal.record(
                JournalEntry::new(now, Ok(()), LogType::Config)
                    .amount(value)
                    .note("deposit limit updated"),
            );
            Ok(())
        })
    }

    pub fn set_minimum_total_idle(
        &mut self,
        roles: &RoleTable,
        caller: Address,
        value: U256,
        now: u64,
    ) -> VaultResult<()> {
        require_role(roles, caller, Role::ConfigManager)?;
        self.guarded(now, LogType::Config, |vault| {
            vault.minimum_total_idle = value;
            vault.journal.record(
                JournalEntry::new(now, Ok(()), LogType::Config)
                    .amount(value)
                    .note("minimum total idle updated"),
            );
            Ok(())
        })
    }

    /// Changes the profit vesting window. Setting 0 burns the currently
    /// locked balance and clears the schedule, releasing all pending profit
    /// into price-per-share at once.
    pub fn set_profit_max_unlock_time(
        &mut self,
        roles: &RoleTable,
        caller: Address,
        value: u64,
        now: u64,
    ) -> VaultResult<()> {
        require_role(roles, caller, Role::ConfigManager)?;
        if value > MAX_PROFIT_UNLOCK_TIME {
            return Err(VaultError::LimitExceeded(format!(
                "profit unlock window {} exceeds the {} second cap",
                value, MAX_PROFIT_UNLOCK_TIME
            )));
        }
        self.guarded(now, LogType::Config, |vault| {
            if value == 0 {
                let locked = vault.shares.balance_of(vault.address);
                if !locked.is_zero() {
                    vault.shares.burn(vault.address, locked)?;
                }
                vault.profit_unlocking_rate = U256::ZERO;
                vault.full_profit_unlock_date = 0;
            }
            vault.profit_max_unlock_time = value;
            vault.journal.record(
                JournalEntry::new(now, Ok(()), LogType::Config)
                    .amount(U256::from(value))
                    .note("profit unlock window updated"),
            );
            Ok(())
        })
    }
}

/// Returns `Err` unless `caller` holds `role` in the capability table
pub(crate) fn require_role(roles: &RoleTable, caller: Address, role: Role) -> VaultResult<()> {
    if !roles.has(caller, role) {
        return Err(VaultError::Unauthorized);
    }
    Ok(())
}


#[cfg(test)]
impl Vault {
    pub(crate) fn gate_held(&self) -> bool {
        self.gate.is_held()
    }

    /// Books an already-credited asset amount as idle
    pub(crate) fn force_idle_add(&mut self, amount: U256) {
        self.total_idle = self.total_idle.saturating_add(amount);
    }

    /// Overwrites idle, debt and supply for conversion-math tests
    pub(crate) fn force_books(&mut self, idle: U256, debt: U256, supply: U256) {
        self.total_idle = idle;
        self.total_debt = debt;
        self.shares = ShareLedger::new();
        self.shares
            .mint(Address::repeat_byte(0x99), supply)
            .expect("forced supply fits");
    }
}
