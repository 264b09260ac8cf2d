//! Redemption and the withdrawal waterfall
//!
//! Redemptions are served from the idle reserve first. When that does not
//! cover the request, the waterfall walks a withdrawal queue and pulls from
//! strategies in order, realizing each strategy's pro-rata unrealized loss
//! on the withdrawer and charging withdrawal slippage to them as well.
//! Holders who exit through the idle reserve alone never touch either.

use alloy_primitives::{Address, U256};
use log::debug;

use crate::constants::{redeem_all, MAX_QUEUE};
use crate::error::{arithmetic_err, VaultError, VaultResult};
use crate::journal::{JournalEntry, LogType};
use crate::types::Rounding;
use crate::vault::{Env, Vault};

impl Vault {
    /// Shares `owner` can redeem right now: their full balance
    pub fn max_redeem(&self, owner: Address) -> U256 {
        self.shares.balance_of(owner)
    }

    /// Assets `owner` can withdraw right now: their position, capped by the
    /// idle reserve plus what the default queue can actually deliver
    pub fn max_withdraw(&self, env: &mut Env, owner: Address) -> VaultResult<U256> {
        let now = env.clock.now();
        let owner_assets =
            self.convert_to_assets(self.shares.balance_of(owner), Rounding::Down, now)?;
        let mut reachable = self.total_idle;
        for strategy in &self.default_queue {
            let record = match self.strategies.get(strategy) {
                Some(record) => record,
                None => continue,
            };
            let capacity = match env.strategies.strategy_mut(*strategy) {
                Some(target) => target.max_withdraw_capacity(self.address),
                None => U256::ZERO,
            };
            reachable = reachable.saturating_add(record.current_debt.min(capacity));
        }
        Ok(owner_assets.min(reachable))
    }

    /// Burns `shares` from `owner` and sends the corresponding assets to
    /// `receiver`. Passing [`redeem_all`](crate::constants::redeem_all)
    /// redeems the owner's entire balance. Returns the assets delivered.
    pub fn redeem(
        &mut self,
        env: &mut Env,
        caller: Address,
        receiver: Address,
        owner: Address,
        shares: U256,
        queue: Option<&[Address]>,
    ) -> VaultResult<U256> {
        let now = env.clock.now();
        self.guarded(now, LogType::Withdraw, |vault| {
            vault.burn_unlocked_shares(now)?;
            let shares = if shares == redeem_all() {
                vault.shares.balance_of(owner)
            } else {
                shares
            };
            let assets = vault.convert_to_assets(shares, Rounding::Down, now)?;
            vault.settle_redemption(env, caller, receiver, owner, shares, assets, queue, now)
        })
    }

    /// Asset-denominated exit: burns the rounded-up share count needed to
    /// deliver `assets` to `receiver`. Returns the shares burned.
    pub fn withdraw(
        &mut self,
        env: &mut Env,
        caller: Address,
        receiver: Address,
        owner: Address,
        assets: U256,
        queue: Option<&[Address]>,
    ) -> VaultResult<U256> {
        let now = env.clock.now();
        self.guarded(now, LogType::Withdraw, |vault| {
            vault.burn_unlocked_shares(now)?;
            let shares = vault.convert_to_shares(assets, Rounding::Up, now)?;
            vault.settle_redemption(env, caller, receiver, owner, shares, assets, queue, now)?;
            Ok(shares)
        })
    }

    /// Queue used for one redemption: the policy's order when it insists,
    /// else the caller's override, else the registration-ordered default
    fn resolve_queue(&self, env: &mut Env, caller_queue: Option<&[Address]>) -> Vec<Address> {
        // An empty caller order means "no preference", same as none at all.
        let caller_queue = caller_queue.filter(|queue| !queue.is_empty());
        let mut queue = match (&mut env.queue_policy, caller_queue) {
            (Some(policy), _) if policy.overrides_caller_order(self.address) => {
                policy.preferred_order(self.address)
            }
            (_, Some(queue)) => queue.to_vec(),
            (Some(policy), None) => {
                let preferred = policy.preferred_order(self.address);
                if preferred.is_empty() {
                    self.default_queue.clone()
                } else {
                    preferred
                }
            }
            (None, None) => self.default_queue.clone(),
        };
        queue.truncate(MAX_QUEUE);
        queue
    }

    #[allow(clippy::too_many_arguments)]
    fn settle_redemption(
        &mut self,
        env: &mut Env,
        caller: Address,
        receiver: Address,
        owner: Address,
        shares: U256,
        assets: U256,
        queue: Option<&[Address]>,
        now: u64,
    ) -> VaultResult<U256> {
        if shares.is_zero() || assets.is_zero() {
            return Err(VaultError::ZeroResult);
        }
        if self.shares.balance_of(owner) < shares {
            return Err(VaultError::InsufficientBalance(format!(
                "owner {} holds fewer than {} shares",
                owner, shares
            )));
        }
        if caller != owner {
            self.shares.spend_allowance(owner, caller, shares)?;
        }

        let mut requested = assets;
        let mut curr_idle = self.total_idle;

        if requested > curr_idle {
            let mut curr_debt = self.total_debt;
            let queue = self.resolve_queue(env, queue);
            for strategy in queue {
                if curr_idle >= requested {
                    break;
                }
                let record_debt = self
                    .strategies
                    .get(&strategy)
                    .map(|record| record.current_debt)
                    .ok_or(VaultError::InactiveStrategy(strategy))?;

                let needed = requested.saturating_sub(curr_idle);
                let mut to_pull = needed.min(record_debt);
                let mut strategy_debt = record_debt;

                // The withdrawer's slice of this strategy's unrealized loss
                // is realized here, before capacity clipping, and comes off
                // what they receive.
                let loss_share = crate::vault::debt::assess_loss_share(
                    env,
                    self.address,
                    strategy,
                    record_debt,
                    to_pull,
                )?;
                if !loss_share.is_zero() {
                    to_pull = to_pull.saturating_sub(loss_share);
                    requested = requested.saturating_sub(loss_share);
                    strategy_debt = strategy_debt.saturating_sub(loss_share);
                    curr_debt = curr_debt.saturating_sub(loss_share);
                }

                let capacity = match env.strategies.strategy_mut(strategy) {
                    Some(target) => target.max_withdraw_capacity(self.address),
                    None => U256::ZERO,
                };
                to_pull = to_pull.min(strategy_debt).min(capacity);
                if to_pull.is_zero() {
                    if let Some(record) = self.strategies.get_mut(&strategy) {
                        record.current_debt(strategy_debt);
                    }
                    continue;
                }

                let before = env.asset.balance_of(self.address);
                {
                    let target = env
                        .strategies
                        .strategy_mut(strategy)
                        .ok_or(VaultError::InactiveStrategy(strategy))?;
                    target.withdraw(to_pull, self.address, self.address)?;
                }
                let withdrawn = env
                    .asset
                    .balance_of(self.address)
                    .saturating_sub(before);

                // Slippage below the requested pull is charged to the
                // withdrawer, not socialized.
                if withdrawn < to_pull {
                    requested = requested.saturating_sub(to_pull.saturating_sub(withdrawn));
                }

                let reduction = strategy_debt.min(withdrawn.max(to_pull));
                strategy_debt = strategy_debt.saturating_sub(reduction);
                curr_debt = curr_debt.saturating_sub(reduction);
                curr_idle = curr_idle.saturating_add(withdrawn);
                if let Some(record) = self.strategies.get_mut(&strategy) {
                    record.current_debt(strategy_debt);
                }
                debug!(
                    "waterfall pulled {} from {} toward a {} redemption",
                    withdrawn, strategy, assets
                );
            }

            if curr_idle < requested {
                return Err(VaultError::QueueExhausted {
                    missing: requested.saturating_sub(curr_idle),
                });
            }
            self.total_debt = curr_debt;
        }

        self.shares.burn(owner, shares)?;
        self.total_idle = curr_idle
            .checked_sub(requested)
            .ok_or(arithmetic_err("idle reserve underflow on redemption"))?;
        env.asset.transfer(self.address, receiver, requested)?;

        self.journal.record(
            JournalEntry::new(now, Ok(()), LogType::Withdraw)
                .amount(requested)
                .note(format!("burned {} shares held by {}", shares, owner)),
        );
        Ok(requested)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{addr, TestRig};

    fn funded_rig(deposit: u64) -> (TestRig, Address, Address) {
        let mut rig = TestRig::new();
        let user = addr(0x10);
        rig.token.set_balance(user, U256::from(deposit));
        rig.deposit(user, user, U256::from(deposit)).unwrap();
        let strategy = rig.spawn_strategy(addr(0xa1));
        rig.add_strategy(strategy).unwrap();
        rig.set_max_debt(strategy, U256::MAX).unwrap();
        (rig, user, strategy)
    }

    #[test]
    fn redeem_from_idle_only() {
        let (mut rig, user, _) = funded_rig(1_000);
        let assets = rig.redeem(user, user, user, U256::from(400u64)).unwrap();
        assert_eq!(assets, U256::from(400u64));
        assert_eq!(rig.vault.total_idle(), U256::from(600u64));
        assert_eq!(rig.token.balance_of(user), U256::from(400u64));
        assert_eq!(rig.vault.balance_of(user), U256::from(600u64));
    }

    #[test]
    fn redeem_all_sentinel_takes_the_whole_balance() {
        let (mut rig, user, _) = funded_rig(1_000);
        let assets = rig.redeem(user, user, user, redeem_all()).unwrap();
        assert_eq!(assets, U256::from(1_000u64));
        assert_eq!(rig.vault.total_supply(), U256::ZERO);
        assert_eq!(rig.vault.total_idle(), U256::ZERO);
    }

    #[test]
    fn zero_share_redeem_is_rejected() {
        let (mut rig, user, _) = funded_rig(1_000);
        assert_eq!(
            rig.redeem(user, user, user, U256::ZERO),
            Err(VaultError::ZeroResult)
        );
    }

    #[test]
    fn third_party_redeem_spends_allowance() {
        let (mut rig, user, _) = funded_rig(1_000);
        let spender = addr(0x33);

        assert!(matches!(
            rig.redeem(spender, spender, user, U256::from(100u64)),
            Err(VaultError::InsufficientBalance(_))
        ));

        rig.vault.approve(user, spender, U256::from(100u64));
        rig.redeem(spender, spender, user, U256::from(100u64)).unwrap();
        assert_eq!(rig.token.balance_of(spender), U256::from(100u64));
        assert_eq!(rig.vault.allowance(user, spender), U256::ZERO);
    }

    #[test]
    fn waterfall_pulls_from_strategies_in_order() {
        let (mut rig, user, first) = funded_rig(1_000);
        let second = rig.spawn_strategy(addr(0xa2));
        rig.add_strategy(second).unwrap();
        rig.set_max_debt(second, U256::MAX).unwrap();

        rig.update_debt(first, U256::from(400u64)).unwrap();
        rig.update_debt(second, U256::from(400u64)).unwrap();
        // 200 idle, 400 + 400 allocated.

        let assets = rig.redeem(user, user, user, U256::from(700u64)).unwrap();
        assert_eq!(assets, U256::from(700u64));
        // 200 idle + all 400 of the first strategy + 100 of the second.
        assert_eq!(rig.strategy_value(first), U256::ZERO);
        assert_eq!(rig.strategy_value(second), U256::from(300u64));
        assert_eq!(rig.vault.total_debt(), U256::from(300u64));
        assert_eq!(rig.vault.total_idle(), U256::ZERO);
    }

    #[test]
    fn caller_queue_overrides_the_default_order() {
        let (mut rig, user, first) = funded_rig(1_000);
        let second = rig.spawn_strategy(addr(0xa2));
        rig.add_strategy(second).unwrap();
        rig.set_max_debt(second, U256::MAX).unwrap();
        rig.update_debt(first, U256::from(400u64)).unwrap();
        rig.update_debt(second, U256::from(400u64)).unwrap();

        let assets = rig
            .redeem_with_queue(user, user, user, U256::from(500u64), &[second, first])
            .unwrap();
        assert_eq!(assets, U256::from(500u64));
        // Idle covered 200; the rest came from `second` first.
        assert_eq!(rig.strategy_value(second), U256::from(100u64));
        assert_eq!(rig.strategy_value(first), U256::from(400u64));
    }

    #[test]
    fn empty_caller_queue_falls_back_to_the_default() {
        let (mut rig, user, strategy) = funded_rig(1_000);
        rig.update_debt(strategy, U256::from(800u64)).unwrap();

        // 200 idle cannot cover 500; the shortfall comes from the default
        // queue even though the caller passed an empty order.
        let assets = rig
            .redeem_with_queue(user, user, user, U256::from(500u64), &[])
            .unwrap();
        assert_eq!(assets, U256::from(500u64));
        assert_eq!(rig.vault.total_debt(), U256::from(500u64));
    }

    #[test]
    fn queue_exhaustion_fails_and_rolls_back() {
        let (mut rig, user, strategy) = funded_rig(1_000);
        rig.update_debt(strategy, U256::from(800u64)).unwrap();
        rig.set_strategy_withdraw_capacity(strategy, U256::from(100u64));

        let err = rig.redeem(user, user, user, U256::from(500u64)).unwrap_err();
        assert!(matches!(err, VaultError::QueueExhausted { .. }));
        // Roll back: ledger and share balance untouched.
        assert_eq!(rig.vault.total_idle(), U256::from(200u64));
        assert_eq!(rig.vault.total_debt(), U256::from(800u64));
        assert_eq!(rig.vault.balance_of(user), U256::from(1_000u64));
    }

    #[test]
    fn stale_queue_entry_fails_the_redemption() {
        let (mut rig, user, strategy) = funded_rig(1_000);
        rig.update_debt(strategy, U256::from(800u64)).unwrap();

        let ghost = addr(0xdd);
        let err = rig
            .redeem_with_queue(user, user, user, U256::from(500u64), &[ghost])
            .unwrap_err();
        assert_eq!(err, VaultError::InactiveStrategy(ghost));
        assert_eq!(rig.vault.balance_of(user), U256::from(1_000u64));
    }

    #[test]
    fn unrealized_loss_lands_on_the_withdrawer() {
        let (mut rig, user, strategy) = funded_rig(1_000);
        rig.update_debt(strategy, U256::from(500u64)).unwrap();
        // Strategy loses 100 of its 500.
        rig.burn_strategy_assets(strategy, U256::from(100u64));

        // Full exit: 500 idle plus 400 recoverable; the 100 loss is
        // realized against the redeemer.
        let assets = rig.redeem(user, user, user, redeem_all()).unwrap();
        assert_eq!(assets, U256::from(900u64));
        assert_eq!(rig.vault.total_supply(), U256::ZERO);
        assert_eq!(rig.vault.total_debt(), U256::ZERO);
        assert_eq!(rig.vault.total_idle(), U256::ZERO);
    }

    #[test]
    fn partial_withdrawal_realizes_pro_rata_loss() {
        let (mut rig, user, strategy) = funded_rig(1_000);
        let other = addr(0x11);
        rig.token.set_balance(other, U256::from(1_000u64));
        rig.deposit(other, other, U256::from(1_000u64)).unwrap();

        rig.update_debt(strategy, U256::from(2_000u64)).unwrap();
        rig.burn_strategy_assets(strategy, U256::from(200u64)); // 10% down

        // user redeems half the vault: pulls 900 of debt, realizing their
        // 100 slice of the shortfall.
        let assets = rig.redeem(user, user, user, redeem_all()).unwrap();
        assert_eq!(assets, U256::from(900u64));
        // The other holder's 100 slice stays unrealized on the ledger.
        assert_eq!(rig.vault.total_debt(), U256::from(1_000u64));
        assert_eq!(rig.strategy_value(strategy), U256::from(900u64));
    }

    #[test]
    fn withdraw_burns_rounded_up_shares() {
        let (mut rig, user, _) = funded_rig(1_000);
        // Donate so one share is worth 1.5 assets.
        rig.simulate_airdrop_to_idle(U256::from(500u64));

        let shares = rig.withdraw(user, user, user, U256::from(150u64)).unwrap();
        assert_eq!(shares, U256::from(100u64));
        assert_eq!(rig.token.balance_of(user), U256::from(150u64));
    }

    #[test]
    fn max_withdraw_reflects_reachable_assets() {
        let (mut rig, user, strategy) = funded_rig(1_000);
        rig.update_debt(strategy, U256::from(800u64)).unwrap();
        rig.set_strategy_withdraw_capacity(strategy, U256::from(100u64));

        // 200 idle + min(800 debt, 100 capacity).
        assert_eq!(rig.max_withdraw(user).unwrap(), U256::from(300u64));
        assert_eq!(rig.vault.max_redeem(user), U256::from(1_000u64));
    }
}
