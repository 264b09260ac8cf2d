//! Share/asset conversion and the profit unlock schedule
//!
//! Conversions always round in the vault's favor: share prices are quoted
//! against the effective supply, which excludes vault-held locked shares
//! that have already vested by the clock but have not been burned yet.
//! Rounding both a forward and a reverse conversion therefore never lets a
//! caller extract more than they put in.

use alloy_primitives::{Address, U256};
use log::debug;

use crate::constants::max_bps_extended;
use crate::error::{arithmetic_err, VaultError, VaultResult};
use crate::journal::{JournalEntry, LogType};
use crate::types::Rounding;
use crate::vault::{Env, Vault};

/// `value * numerator / denominator` with overflow surfaced as an error
pub(crate) fn mul_div(
    value: U256,
    numerator: U256,
    denominator: U256,
    rounding: Rounding,
) -> VaultResult<U256> {
    if denominator.is_zero() {
        return Err(arithmetic_err("division by zero in share conversion"));
    }
    let product = value
        .checked_mul(numerator)
        .ok_or(arithmetic_err("overflow in share conversion"))?;
    let quotient = product / denominator;
    match rounding {
        Rounding::Down => Ok(quotient),
        Rounding::Up => {
            if (product % denominator).is_zero() {
                Ok(quotient)
            } else {
                quotient
                    .checked_add(U256::from(1u64))
                    .ok_or(arithmetic_err("overflow rounding up share conversion"))
            }
        }
    }
}

impl Vault {
    /// Locked shares that have vested by `now` but are still minted.
    ///
    /// Once the schedule's end date passes, the whole vault-held balance is
    /// reported so a single burn flushes any rate-truncation dust.
    pub fn unlocked_shares(&self, now: u64) -> U256 {
        if self.full_profit_unlock_date == 0 {
            return U256::ZERO;
        }
        if now >= self.full_profit_unlock_date {
            return self.shares.balance_of(self.address);
        }
        let elapsed = U256::from(now.saturating_sub(self.last_profit_update));
        self.profit_unlocking_rate.saturating_mul(elapsed) / max_bps_extended()
    }

    /// Supply used for pricing: raw supply minus already-vested locked shares
    pub(crate) fn effective_supply(&self, now: u64) -> U256 {
        self.shares
            .total_supply()
            .saturating_sub(self.unlocked_shares(now))
    }

    pub fn convert_to_shares(
        &self,
        assets: U256,
        rounding: Rounding,
        now: u64,
    ) -> VaultResult<U256> {
        let supply = self.effective_supply(now);
        if supply.is_zero() {
            // Seed price is 1:1.
            return Ok(assets);
        }
        let total_assets = self.total_assets();
        if total_assets.is_zero() {
            // Supply with nothing behind it; nothing to price against.
            return Ok(U256::ZERO);
        }
        mul_div(assets, supply, total_assets, rounding)
    }

    pub fn convert_to_assets(
        &self,
        shares: U256,
        rounding: Rounding,
        now: u64,
    ) -> VaultResult<U256> {
        let supply = self.effective_supply(now);
        if supply.is_zero() {
            return Ok(shares);
        }
        mul_div(shares, self.total_assets(), supply, rounding)
    }

    /// Burns whatever has vested by `now` off the vault's own balance.
    ///
    /// Called at the top of every operation that prices shares, so the
    /// minted supply never lags the effective supply across a mutation.
    pub(crate) fn burn_unlocked_shares(&mut self, now: u64) -> VaultResult<()> {
        let unlocked = self.unlocked_shares(now);
        if !unlocked.is_zero() {
            let held = self.shares.balance_of(self.address);
            self.shares.burn(self.address, unlocked.min(held))?;
        }
        if self.full_profit_unlock_date != 0 && now >= self.full_profit_unlock_date {
            // Schedule fully drained.
            self.profit_unlocking_rate = U256::ZERO;
            self.full_profit_unlock_date = 0;
        }
        self.last_profit_update = now;
        Ok(())
    }

    /// Re-derives the vesting schedule after a report changed the locked
    /// balance. `previously_locked` is what remained of the old schedule and
    /// `newly_locked` is what the report just added; the new window is their
    /// remaining-time-weighted average.
    pub(crate) fn reprogram_unlock(
        &mut self,
        previously_locked: U256,
        newly_locked: U256,
        now: u64,
    ) -> VaultResult<()> {
        let total_locked = previously_locked.saturating_add(newly_locked);
        if total_locked.is_zero() || self.profit_max_unlock_time == 0 {
            self.profit_unlocking_rate = U256::ZERO;
            self.full_profit_unlock_date = 0;
            return Ok(());
        }

        let remaining = U256::from(
            self.full_profit_unlock_date
                .saturating_sub(now),
        );
        let window = U256::from(self.profit_max_unlock_time);
        let weighted = previously_locked
            .checked_mul(remaining)
            .ok_or(arithmetic_err("overflow weighting old unlock schedule"))?
            .checked_add(
                newly_locked
                    .checked_mul(window)
                    .ok_or(arithmetic_err("overflow weighting new unlock schedule"))?,
            )
            .ok_or(arithmetic_err("overflow combining unlock schedules"))?;
        let new_period = weighted / total_locked;

        if new_period.is_zero() {
            // Degenerate average; flush everything on the next touch.
            self.profit_unlocking_rate = U256::ZERO;
            self.full_profit_unlock_date = now;
            return Ok(());
        }

        self.profit_unlocking_rate = total_locked
            .checked_mul(max_bps_extended())
            .ok_or(arithmetic_err("overflow deriving unlock rate"))?
            / new_period;
        let period: u64 = new_period
            .try_into()
            .map_err(|_| arithmetic_err("unlock period exceeds u64"))?;
        self.full_profit_unlock_date = now.saturating_add(period);
        self.last_profit_update = now;
        Ok(())
    }

    /// Assets the vault will still accept through `deposit`
    pub fn max_deposit(&self) -> U256 {
        if self.shutdown {
            return U256::ZERO;
        }
        self.deposit_limit.saturating_sub(self.total_assets())
    }

    /// Shares corresponding to [`Vault::max_deposit`] at current price
    pub fn max_mint(&self, now: u64) -> VaultResult<U256> {
        self.convert_to_shares(self.max_deposit(), Rounding::Down, now)
    }

    /// Moves `assets` from `caller` into the vault and mints shares to
    /// `receiver` at the pre-credit price. Returns the shares minted.
    pub fn deposit(
        &mut self,
        env: &mut Env,
        caller: Address,
        receiver: Address,
        assets: U256,
    ) -> VaultResult<U256> {
        let now = env.clock.now();
        self.guarded(now, LogType::Deposit, |vault| {
            vault.burn_unlocked_shares(now)?;
            let credited = vault.pull_assets(env, caller, assets)?;
            let shares = vault.convert_to_shares(credited, Rounding::Down, now)?;
            if shares.is_zero() {
                return Err(VaultError::ZeroResult);
            }
            vault.credit_deposit(receiver, credited, shares, now)?;
            Ok(shares)
        })
    }

    /// Share-denominated deposit: mints exactly `shares` when the asset
    /// transfer credits the full quoted amount, otherwise falls back to
    /// pricing the credited amount so fee-on-transfer assets cannot mint
    /// unbacked shares.
    pub fn mint(
        &mut self,
        env: &mut Env,
        caller: Address,
        receiver: Address,
        shares: U256,
    ) -> VaultResult<U256> {
        let now = env.clock.now();
        self.guarded(now, LogType::Deposit, |vault| {
            vault.burn_unlocked_shares(now)?;
            if shares.is_zero() {
                return Err(VaultError::ZeroResult);
            }
            let assets = vault.convert_to_assets(shares, Rounding::Up, now)?;
            let credited = vault.pull_assets(env, caller, assets)?;
            let minted = if credited == assets {
                shares
            } else {
                vault.convert_to_shares(credited, Rounding::Down, now)?
            };
            if minted.is_zero() {
                return Err(VaultError::ZeroResult);
            }
            vault.credit_deposit(receiver, credited, minted, now)?;
            Ok(credited)
        })
    }

    /// Transfers assets in and returns the balance delta actually credited
    fn pull_assets(&self, env: &mut Env, caller: Address, assets: U256) -> VaultResult<U256> {
        if self.shutdown {
            return Err(VaultError::ShutdownViolation);
        }
        if assets.is_zero() {
            return Err(VaultError::ZeroResult);
        }
        if assets > self.max_deposit() {
            return Err(VaultError::LimitExceeded(format!(
                "deposit of {} exceeds remaining capacity {}",
                assets,
                self.max_deposit()
            )));
        }
        let before = env.asset.balance_of(self.address);
        env.asset.transfer(caller, self.address, assets)?;
        let credited = env
            .asset
            .balance_of(self.address)
            .saturating_sub(before);
        if credited.is_zero() {
            return Err(VaultError::ZeroResult);
        }
        // Supply without assets behind it would let this credit dilute
        // itself to a zero share price; reject instead.
        let supply = self.shares.total_supply();
        if !supply.is_zero() && credited >= self.total_assets().saturating_add(credited) {
            return Err(VaultError::LimitExceeded(
                "deposit would reprice outstanding shares from nothing".to_string(),
            ));
        }
        Ok(credited)
    }

    fn credit_deposit(
        &mut self,
        receiver: Address,
        credited: U256,
        shares: U256,
        now: u64,
    ) -> VaultResult<()> {
        self.shares.mint(receiver, shares)?;
        self.total_idle = self
            .total_idle
            .checked_add(credited)
            .ok_or(arithmetic_err("overflow crediting idle reserve"))?;
        debug!(
            "deposit credited {} assets for {} shares to {}",
            credited, shares, receiver
        );
        self.journal.record(
            JournalEntry::new(now, Ok(()), LogType::Deposit)
                .amount(credited)
                .note(format!("minted {} shares to {}", shares, receiver)),
        );
        Ok(())
    }
}
