//! Shared vault types: rounding, roles, fee config, init and query data

use std::collections::{BTreeSet, HashMap};

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::vault::StrategyRecord;

/// Rounding mode for asset/share conversions.
/// Rounding always resolves in the vault's favor, never the caller's.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rounding {
    Down,
    Up,
}

/// Roles gating the privileged vault operations
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    /// May register and revoke strategies
    StrategyManager,
    /// May rebalance strategy debt and adjust per-strategy debt caps
    DebtManager,
    /// May process strategy reports
    Reporter,
    /// May shut the vault down and force-revoke strategies
    EmergencyManager,
    /// May change deposit limit, idle floor and profit unlock window
    ConfigManager,
}

/// Capability table handed into each privileged call.
/// Storage and administration of the table live outside the vault core.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RoleTable {
    grants: HashMap<Address, BTreeSet<Role>>,
}

impl RoleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants a role; builder-style so tables can be assembled inline
    pub fn grant(mut self, who: Address, role: Role) -> Self {
        self.grants.entry(who).or_default().insert(role);
        self
    }

    pub fn has(&self, who: Address, role: Role) -> bool {
        self.grants
            .get(&who)
            .map(|roles| roles.contains(&role))
            .unwrap_or(false)
    }
}

/// Snapshot of the external protocol fee configuration
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeConfig {
    /// Annualized protocol fee in basis points
    pub fee_bps: u16,
    /// Timestamp of the last fee change, in seconds
    pub last_change: u64,
    /// Recipient of minted protocol fee shares
    pub recipient: Address,
}

/// Arguments for spawning a vault
#[derive(Clone, Debug)]
pub struct InitArgs {
    /// Identity the vault holds asset and share balances under
    pub vault: Address,
    /// The one underlying asset this vault accounts in
    pub asset: Address,
    /// Decimals of the underlying asset, echoed on query surfaces
    pub decimals: u8,
    /// Maximum total assets accepted through deposits
    pub deposit_limit: U256,
    /// Idle reserve floor the debt allocator must maintain
    pub minimum_total_idle: U256,
    /// Profit vesting window in seconds; 0 disables profit locking
    pub profit_max_unlock_time: u64,
}

/// Query projection of a strategy record
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyQueryData {
    pub activation: u64,
    pub last_report: u64,
    pub current_debt: U256,
    pub max_debt: U256,
}

impl From<&StrategyRecord> for StrategyQueryData {
    fn from(value: &StrategyRecord) -> Self {
        Self {
            activation: value.activation,
            last_report: value.last_report,
            current_debt: value.current_debt,
            max_debt: value.max_debt,
        }
    }
}

/// Query projection of the vault ledger
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultQueryData {
    pub total_idle: U256,
    pub total_debt: U256,
    pub total_assets: U256,
    pub total_supply: U256,
    pub price_per_share: U256,
    pub shutdown: bool,
}

/// Settlement facts emitted by `process_report`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementSummary {
    pub strategy: Address,
    pub gain: U256,
    pub loss: U256,
    pub total_fees: U256,
    pub protocol_fees: U256,
    pub total_refunds: U256,
    pub new_debt: U256,
}
