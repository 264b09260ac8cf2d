//! Capability traits for the vault's external collaborators
//!
//! The vault core never reaches into strategies, tokens or policies
//! directly; everything external sits behind one of these traits and is
//! handed in per call. Their internals are opaque to the core — only the
//! pre/post-conditions documented here are relied upon, and every amount
//! the vault credits or debits is measured as an observed balance delta
//! rather than trusted from a return value.

use alloy_primitives::{Address, U256};

use crate::error::VaultResult;
use crate::types::FeeConfig;

/// Time source. Mutating vault operations read the clock once on entry;
/// views take an explicit timestamp instead so projections stay pure.
#[cfg_attr(test, mockall::automock)]
pub trait Clock {
    /// Current time in seconds
    fn now(&self) -> u64;
}

/// The vault's one underlying asset.
/// `transfer` moves whatever the token actually moves; callers that care
/// about the delivered amount must compare `balance_of` around the call.
#[cfg_attr(test, mockall::automock)]
pub trait AssetToken {
    fn balance_of(&self, holder: Address) -> U256;
    fn transfer(&mut self, from: Address, to: Address, value: U256) -> VaultResult<()>;
}

/// A yield-generating sub-strategy the vault can allocate debt to
#[cfg_attr(test, mockall::automock)]
pub trait Strategy {
    /// The asset this strategy accepts; must match the vault's
    fn underlying_asset(&self) -> Address;
    /// Asset value of the vault's position, priced by the strategy itself.
    /// May run the strategy's own accrual as a side effect.
    fn value_held_for(&mut self, vault: Address) -> VaultResult<U256>;
    /// Assets the strategy would accept from the vault right now
    fn max_deposit_capacity(&self, vault: Address) -> U256;
    /// Assets the strategy could return to the vault right now
    fn max_withdraw_capacity(&self, vault: Address) -> U256;
    /// Pulls `assets` from the vault; returns the strategy shares issued
    fn deposit(&mut self, assets: U256, vault: Address) -> VaultResult<U256>;
    /// Sends `assets` to `receiver`, burning from `owner`'s position;
    /// returns the strategy shares burned
    fn withdraw(&mut self, assets: U256, receiver: Address, owner: Address) -> VaultResult<U256>;
}

/// Fee and refund policy consulted once per report
#[cfg_attr(test, mockall::automock)]
pub trait Accountant {
    /// Returns `(total_fees, total_refunds)` for a settlement.
    /// Both are trusted opaque inputs to the settlement arithmetic.
    fn settle(&mut self, strategy: Address, gain: U256, loss: U256) -> (U256, U256);
    /// Identity that receives fee shares and holds refundable shares
    fn account(&self) -> Address;
}

/// Pluggable ordering policy for the withdrawal waterfall
#[cfg_attr(test, mockall::automock)]
pub trait QueuePolicy {
    /// Preferred pull order, at most `MAX_QUEUE` strategies
    fn preferred_order(&self, vault: Address) -> Vec<Address>;
    /// When true, caller-supplied orders are ignored
    fn overrides_caller_order(&self, vault: Address) -> bool;
    fn strategy_added(&mut self, vault: Address, strategy: Address);
    fn strategy_removed(&mut self, vault: Address, strategy: Address);
}

/// Source of the protocol-level fee configuration
#[cfg_attr(test, mockall::automock)]
pub trait ProtocolFeeSource {
    fn current_fee_config(&self) -> FeeConfig;
}

/// Resolves strategy identities to live strategy handles.
/// Not mocked; tests use [`StrategyMap`] filled with mock strategies.
pub trait StrategySet {
    fn strategy_mut(&mut self, strategy: Address) -> Option<&mut dyn Strategy>;
}

/// Default `StrategySet` over boxed strategies
#[derive(Default)]
pub struct StrategyMap {
    inner: std::collections::HashMap<Address, Box<dyn Strategy>>,
}

impl StrategyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, address: Address, strategy: Box<dyn Strategy>) {
        self.inner.insert(address, strategy);
    }

    pub fn remove(&mut self, address: Address) -> Option<Box<dyn Strategy>> {
        self.inner.remove(&address)
    }

    pub fn contains(&self, address: Address) -> bool {
        self.inner.contains_key(&address)
    }
}

impl StrategySet for StrategyMap {
    fn strategy_mut(&mut self, strategy: Address) -> Option<&mut dyn Strategy> {
        self.inner
            .get_mut(&strategy)
            .map(|boxed| &mut **boxed as &mut dyn Strategy)
    }
}
