//! Vault error taxonomy

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Vault Manager Result
pub type VaultResult<T> = Result<T, VaultError>;

/// Vault Manager Errors
///
/// Every failed entry point aborts atomically with one of these; no partial
/// ledger mutation survives a failure. Losses from slippage or non-compliant
/// transfers are not errors and are absorbed into the relevant party's
/// accounting instead.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum VaultError {
    /// Deposit/mint above the deposit limit, or a debt target above max debt
    #[error("limit exceeded: {0}")]
    LimitExceeded(String),
    /// The operation would produce zero shares or assets
    #[error("operation resolves to zero shares or assets")]
    ZeroResult,
    /// Insufficient shares, allowance or liquidity
    #[error("insufficient balance: {0}")]
    InsufficientBalance(String),
    /// Operation on an unregistered or revoked strategy
    #[error("strategy {0} is not active on this vault")]
    InactiveStrategy(Address),
    /// Deposit attempted after shutdown
    #[error("vault is shut down")]
    ShutdownViolation,
    /// Debt decrease attempted while the strategy shows an unrecognized loss
    #[error("strategy {0} has unrealised losses that must be reported first")]
    UnrealizedLossBlock(Address),
    /// The withdrawal waterfall could not source enough liquidity
    #[error("withdrawal queue exhausted, {missing} assets could not be sourced")]
    QueueExhausted { missing: U256 },
    /// Role or ownership check failed
    #[error("caller is not authorized for this operation")]
    Unauthorized,
    /// The reentrancy gate is already held
    #[error("a state-mutating operation is already in progress")]
    Locked,
    /// Registration of a strategy that already has an active record
    #[error("strategy {0} is already registered")]
    AlreadyActive(Address),
    /// The strategy's declared underlying asset is not the vault's asset
    #[error("strategy {strategy} manages asset {strategy_asset}, vault holds {vault_asset}")]
    AssetMismatch {
        strategy: Address,
        strategy_asset: Address,
        vault_asset: Address,
    },
    /// Arithmetic error
    #[error("arithmetic error: {0}")]
    Arithmetic(String),
}

pub fn arithmetic_err<S: AsRef<str>>(s: S) -> VaultError {
    VaultError::Arithmetic(s.as_ref().to_string())
}
