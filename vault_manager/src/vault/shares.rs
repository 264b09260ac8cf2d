//! Internal share ledger
//!
//! Balances and allowances for the vault's claim tokens. This is the
//! minimal bookkeeping the accounting engine itself needs — mint, burn,
//! internal moves and allowance spending. The public fungible-token
//! surface (transfer, permit and friends) lives outside the core.

use std::collections::HashMap;

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::error::{arithmetic_err, VaultError, VaultResult};

/// Share balances and allowances, owned exclusively by the vault
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ShareLedger {
    total_supply: U256,
    balances: HashMap<Address, U256>,
    allowances: HashMap<(Address, Address), U256>,
}

impl ShareLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw minted supply, including locked-but-unvested shares
    pub fn total_supply(&self) -> U256 {
        self.total_supply
    }

    pub fn balance_of(&self, holder: Address) -> U256 {
        self.balances.get(&holder).copied().unwrap_or_default()
    }

    pub fn allowance(&self, owner: Address, spender: Address) -> U256 {
        self.allowances
            .get(&(owner, spender))
            .copied()
            .unwrap_or_default()
    }

    pub fn approve(&mut self, owner: Address, spender: Address, value: U256) {
        self.allowances.insert((owner, spender), value);
    }

    /// Issues new shares to `to`
    pub fn mint(&mut self, to: Address, value: U256) -> VaultResult<()> {
        self.total_supply = self
            .total_supply
            .checked_add(value)
            .ok_or_else(|| arithmetic_err("share supply overflowed"))?;
        let balance = self.balances.entry(to).or_default();
        *balance = balance
            .checked_add(value)
            .ok_or_else(|| arithmetic_err("share balance overflowed"))?;
        Ok(())
    }

    /// Destroys shares held by `from`
    pub fn burn(&mut self, from: Address, value: U256) -> VaultResult<()> {
        let balance = self.balance_of(from);
        if balance < value {
            return Err(VaultError::InsufficientBalance(format!(
                "burning {} shares from a balance of {}",
                value, balance
            )));
        }
        self.balances.insert(from, balance - value);
        self.total_supply -= value;
        Ok(())
    }

    /// Moves shares between holders without touching supply
    pub fn transfer(&mut self, from: Address, to: Address, value: U256) -> VaultResult<()> {
        let from_balance = self.balance_of(from);
        if from_balance < value {
            return Err(VaultError::InsufficientBalance(format!(
                "moving {} shares from a balance of {}",
                value, from_balance
            )));
        }
        self.balances.insert(from, from_balance - value);
        let to_balance = self.balances.entry(to).or_default();
        *to_balance = to_balance
            .checked_add(value)
            .ok_or_else(|| arithmetic_err("share balance overflowed"))?;
        Ok(())
    }

    /// Spends a third-party allowance; `U256::MAX` approvals never shrink
    pub fn spend_allowance(
        &mut self,
        owner: Address,
        spender: Address,
        value: U256,
    ) -> VaultResult<()> {
        let current = self.allowance(owner, spender);
        if current < value {
            return Err(VaultError::InsufficientBalance(format!(
                "spending {} of a {} share allowance",
                value, current
            )));
        }
        if current != U256::MAX {
            self.allowances.insert((owner, spender), current - value);
        }
        Ok(())
    }
}
