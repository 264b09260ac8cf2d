//! Strategy reports: gain/loss settlement, fees, refunds and profit locking
//!
//! A report reconciles one strategy's reported value against its booked
//! debt. Gains are minted to the vault itself as locked shares and vested
//! over the unlock window so price-per-share rises smoothly; losses and
//! fees first cancel against whatever is still locked before they touch
//! holders. Fee shares are minted at the post-settlement price so the fee
//! recipients are paid out of the settled books, not ahead of them.

use alloy_primitives::{Address, U256};
use log::{debug, info};

use crate::constants::{
    max_bps, PROTOCOL_FEE_ASSESSMENT_PERIOD, SECONDS_PER_YEAR,
};
use crate::error::{arithmetic_err, VaultError, VaultResult};
use crate::journal::{JournalEntry, LogType};
use crate::types::{Role, RoleTable, Rounding, SettlementSummary};
use crate::vault::{require_role, Env, Vault};

impl Vault {
    /// Settles one strategy's report against the ledger. Returns a summary
    /// of the settlement.
    pub fn process_report(
        &mut self,
        env: &mut Env,
        roles: &RoleTable,
        caller: Address,
        strategy: Address,
    ) -> VaultResult<SettlementSummary> {
        require_role(roles, caller, Role::Reporter)?;
        let now = env.clock.now();
        self.guarded(now, LogType::Report, |vault| {
            let record = vault
                .strategies
                .get(&strategy)
                .ok_or(VaultError::InactiveStrategy(strategy))?;
            let current_debt = record.current_debt;

            let reported_value = {
                let target = env
                    .strategies
                    .strategy_mut(strategy)
                    .ok_or(VaultError::InactiveStrategy(strategy))?;
                target.value_held_for(vault.address)?
            };

            vault.burn_unlocked_shares(now)?;

            let (gain, loss) = if reported_value >= current_debt {
                (reported_value - current_debt, U256::ZERO)
            } else {
                (U256::ZERO, current_debt - reported_value)
            };

            // Performance fees and refunds come from the accountant;
            // protocol fees are assessed on the vault's own clock.
            let (mut total_fees, total_refunds, accountant_addr) =
                match env.accountant.as_deref_mut() {
                    Some(accountant) => {
                        let (fees, refunds) = accountant.settle(strategy, gain, loss);
                        (fees, refunds, Some(accountant.account()))
                    }
                    None => (U256::ZERO, U256::ZERO, None),
                };
            let (protocol_fees, protocol_recipient) = vault.assess_protocol_fees(env, now);
            total_fees = total_fees
                .checked_add(protocol_fees)
                .ok_or(arithmetic_err("overflow combining fee charges"))?;

            // Shares to burn against the locked buffer, priced before any of
            // this report's mutations move price-per-share.
            let charge = loss
                .checked_add(total_fees)
                .ok_or(arithmetic_err("overflow combining report charges"))?;
            let shares_to_burn = vault.convert_to_shares(charge, Rounding::Down, now)?;

            let mut previously_locked = vault.shares.balance_of(vault.address);
            let mut newly_locked = U256::ZERO;

            // Refunds arrive as vault shares donated back from the
            // accountant's balance and join the locked buffer.
            if !total_refunds.is_zero() {
                if let Some(account) = accountant_addr {
                    let refund_shares = vault
                        .convert_to_shares(total_refunds, Rounding::Down, now)?
                        .min(vault.shares.balance_of(account));
                    if !refund_shares.is_zero() {
                        vault.shares.transfer(account, vault.address, refund_shares)?;
                        newly_locked = newly_locked.saturating_add(refund_shares);
                    }
                }
            }

            if !gain.is_zero() {
                // Priced before the debt credit so minting the gain's worth
                // of shares leaves price-per-share exactly where it was.
                if vault.profit_max_unlock_time != 0 {
                    let locked_for_gain = vault.convert_to_shares(gain, Rounding::Down, now)?;
                    vault.shares.mint(vault.address, locked_for_gain)?;
                    newly_locked = newly_locked.saturating_add(locked_for_gain);
                }
                vault.total_debt = vault
                    .total_debt
                    .checked_add(gain)
                    .ok_or(arithmetic_err("overflow crediting reported gain"))?;
                if let Some(record) = vault.strategies.get_mut(&strategy) {
                    let settled = record.current_debt.saturating_add(gain);
                    record.current_debt(settled);
                }
            } else if !loss.is_zero() {
                vault.total_debt = vault.total_debt.saturating_sub(loss);
                if let Some(record) = vault.strategies.get_mut(&strategy) {
                    let settled = record.current_debt.saturating_sub(loss);
                    record.current_debt(settled);
                }
            }

            // Losses and fees cancel against locked shares, newest first,
            // so fresh profit shields holders before older vesting does.
            if !shares_to_burn.is_zero() {
                let burnable = shares_to_burn.min(previously_locked.saturating_add(newly_locked));
                if !burnable.is_zero() {
                    vault.shares.burn(vault.address, burnable)?;
                    let from_new = burnable.min(newly_locked);
                    newly_locked = newly_locked.saturating_sub(from_new);
                    previously_locked =
                        previously_locked.saturating_sub(burnable.saturating_sub(from_new));
                }
            }

            // Fee shares are minted after the burn, at the settled price.
            if !total_fees.is_zero() {
                let accountant_cut = total_fees.saturating_sub(protocol_fees);
                if !accountant_cut.is_zero() {
                    if let Some(account) = accountant_addr {
                        let fee_shares =
                            vault.convert_to_shares(accountant_cut, Rounding::Down, now)?;
                        vault.shares.mint(account, fee_shares)?;
                    }
                }
                if !protocol_fees.is_zero() {
                    if let Some(recipient) = protocol_recipient {
                        let fee_shares =
                            vault.convert_to_shares(protocol_fees, Rounding::Down, now)?;
                        vault.shares.mint(recipient, fee_shares)?;
                    }
                }
            }

            vault.reprogram_unlock(previously_locked, newly_locked, now)?;
            if let Some(record) = vault.strategies.get_mut(&strategy) {
                record.last_report(now);
            }

            let settled_debt = vault
                .strategies
                .get(&strategy)
                .map(|record| record.current_debt)
                .unwrap_or_default();
            info!(
                "report settled for {}: gain {}, loss {}, fees {}, refunds {}",
                strategy, gain, loss, total_fees, total_refunds
            );
            vault.journal.record(
                JournalEntry::new(now, Ok(()), LogType::Report)
                    .strategy(strategy)
                    .amount(if loss.is_zero() { gain } else { loss })
                    .note(format!(
                        "gain {}, loss {}, fees {}, refunds {}",
                        gain, loss, total_fees, total_refunds
                    )),
            );

            Ok(SettlementSummary {
                strategy,
                gain,
                loss,
                total_fees,
                protocol_fees,
                total_refunds,
                new_debt: settled_debt,
            })
        })
    }

    /// Annualized protocol fee on total assets since it was last assessed.
    /// Skipped entirely when the window is shorter than the assessment
    /// period, and a config change resets the accrual start.
    fn assess_protocol_fees(&mut self, env: &Env, now: u64) -> (U256, Option<Address>) {
        let config = match env.fee_source {
            Some(source) => source.current_fee_config(),
            None => return (U256::ZERO, None),
        };
        if config.fee_bps == 0 {
            return (U256::ZERO, None);
        }
        let accrual_start = self.last_protocol_fee_assessment.max(config.last_change);
        let elapsed = now.saturating_sub(accrual_start);
        if elapsed < PROTOCOL_FEE_ASSESSMENT_PERIOD {
            return (U256::ZERO, None);
        }
        let charged_seconds = U256::from(elapsed.min(SECONDS_PER_YEAR));
        let fee = self
            .total_assets()
            .saturating_mul(U256::from(config.fee_bps))
            .saturating_mul(charged_seconds)
            / (max_bps() * U256::from(SECONDS_PER_YEAR));
        self.last_protocol_fee_assessment = now;
        debug!("assessed {} protocol fee over {} seconds", fee, elapsed);
        (fee, Some(config.recipient))
    }
}
