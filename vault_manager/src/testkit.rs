//! Shared test fixtures: a manual clock, an in-memory asset token, simulated
//! strategies with failure knobs, and a `TestRig` bundling them around one
//! vault with a fully granted role table.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use alloy_primitives::{Address, U256};

use crate::error::{VaultError, VaultResult};
use crate::providers::{
    Accountant, AssetToken, Clock, ProtocolFeeSource, Strategy, StrategyMap,
};
use crate::types::{FeeConfig, InitArgs, Role, RoleTable, SettlementSummary};
use crate::vault::{Env, Vault};

pub(crate) fn addr(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

/// Clock the test advances by hand
pub(crate) struct ManualClock {
    current: Cell<u64>,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self {
            current: Cell::new(start),
        }
    }

    pub fn now(&self) -> u64 {
        self.current.get()
    }

    pub fn advance(&self, seconds: u64) {
        self.current.set(self.current.get() + seconds);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.current.get()
    }
}

#[derive(Default)]
struct TokenState {
    balances: HashMap<Address, U256>,
    fee_bps: u16,
}

/// In-memory asset ledger, shared between the rig and its strategies so a
/// strategy moving funds is visible to the vault's balance-delta checks
#[derive(Clone, Default)]
pub(crate) struct SimToken {
    state: Rc<RefCell<TokenState>>,
}

impl SimToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance_of(&self, holder: Address) -> U256 {
        self.state
            .borrow()
            .balances
            .get(&holder)
            .copied()
            .unwrap_or_default()
    }

    pub fn set_balance(&self, holder: Address, value: U256) {
        self.state.borrow_mut().balances.insert(holder, value);
    }

    /// Models fee-on-transfer assets; the fee disappears in flight
    pub fn set_transfer_fee_bps(&self, fee_bps: u16) {
        self.state.borrow_mut().fee_bps = fee_bps;
    }

    pub fn credit(&self, holder: Address, value: U256) {
        let mut state = self.state.borrow_mut();
        let entry = state.balances.entry(holder).or_default();
        *entry = entry.saturating_add(value);
    }

    pub fn burn_units(&self, holder: Address, value: U256) {
        let mut state = self.state.borrow_mut();
        let entry = state.balances.entry(holder).or_default();
        *entry = entry.saturating_sub(value);
    }

    fn move_units(&self, from: Address, to: Address, value: U256) -> VaultResult<()> {
        let fee_bps = self.state.borrow().fee_bps;
        let held = self.balance_of(from);
        if held < value {
            return Err(VaultError::InsufficientBalance(format!(
                "{} holds {} of the asset, {} required",
                from, held, value
            )));
        }
        let fee = value.saturating_mul(U256::from(fee_bps)) / U256::from(10_000u64);
        self.burn_units(from, value);
        self.credit(to, value.saturating_sub(fee));
        Ok(())
    }
}

impl AssetToken for SimToken {
    fn balance_of(&self, holder: Address) -> U256 {
        SimToken::balance_of(self, holder)
    }

    fn transfer(&mut self, from: Address, to: Address, value: U256) -> VaultResult<()> {
        self.move_units(from, to, value)
    }
}

#[derive(Debug)]
struct StrategyKnobs {
    deposit_cap: U256,
    withdraw_cap: Option<U256>,
    slippage: U256,
}

impl Default for StrategyKnobs {
    fn default() -> Self {
        Self {
            deposit_cap: U256::MAX,
            withdraw_cap: None,
            slippage: U256::ZERO,
        }
    }
}

/// Strategy simulated as a plain token balance with adjustable limits
#[derive(Clone)]
pub(crate) struct SimStrategy {
    address: Address,
    asset: Address,
    token: SimToken,
    knobs: Rc<RefCell<StrategyKnobs>>,
}

impl SimStrategy {
    fn new(address: Address, asset: Address, token: SimToken) -> Self {
        Self {
            address,
            asset,
            token,
            knobs: Rc::new(RefCell::new(StrategyKnobs::default())),
        }
    }

    fn set_deposit_cap(&self, cap: U256) {
        self.knobs.borrow_mut().deposit_cap = cap;
    }

    fn set_withdraw_cap(&self, cap: U256) {
        self.knobs.borrow_mut().withdraw_cap = Some(cap);
    }

    fn set_slippage(&self, slippage: U256) {
        self.knobs.borrow_mut().slippage = slippage;
    }
}

impl Strategy for SimStrategy {
    fn underlying_asset(&self) -> Address {
        self.asset
    }

    fn value_held_for(&mut self, _vault: Address) -> VaultResult<U256> {
        Ok(self.token.balance_of(self.address))
    }

    fn max_deposit_capacity(&self, _vault: Address) -> U256 {
        self.knobs.borrow().deposit_cap
    }

    fn max_withdraw_capacity(&self, _vault: Address) -> U256 {
        self.knobs
            .borrow()
            .withdraw_cap
            .unwrap_or_else(|| self.token.balance_of(self.address))
    }

    fn deposit(&mut self, assets: U256, vault: Address) -> VaultResult<U256> {
        self.token.move_units(vault, self.address, assets)?;
        Ok(assets)
    }

    fn withdraw(&mut self, assets: U256, receiver: Address, _owner: Address) -> VaultResult<U256> {
        let slippage = self.knobs.borrow().slippage;
        let held = self.token.balance_of(self.address);
        let delivered = assets.saturating_sub(slippage).min(held);
        self.token.move_units(self.address, receiver, delivered)?;
        Ok(delivered)
    }
}

/// Accountant charging a flat performance fee on gains and an optional
/// fixed refund
pub(crate) struct SimAccountant {
    address: Address,
    performance_fee_bps: u16,
    refund: U256,
}

impl Accountant for SimAccountant {
    fn settle(&mut self, _strategy: Address, gain: U256, _loss: U256) -> (U256, U256) {
        let fees =
            gain.saturating_mul(U256::from(self.performance_fee_bps)) / U256::from(10_000u64);
        (fees, self.refund)
    }

    fn account(&self) -> Address {
        self.address
    }
}

pub(crate) struct SimFeeSource {
    config: FeeConfig,
}

impl ProtocolFeeSource for SimFeeSource {
    fn current_fee_config(&self) -> FeeConfig {
        self.config
    }
}

/// One vault with every collaborator it needs, wired to a shared token
pub(crate) struct TestRig {
    pub clock: ManualClock,
    pub token: SimToken,
    pub strategies: StrategyMap,
    pub sims: HashMap<Address, SimStrategy>,
    pub accountant: SimAccountant,
    pub fee_source: Option<SimFeeSource>,
    pub vault: Vault,
    pub roles: RoleTable,
    pub strategy_manager: Address,
    pub debt_manager: Address,
    pub reporter: Address,
    pub emergency: Address,
    pub config_manager: Address,
}

impl TestRig {
    pub fn new() -> Self {
        Self::build(U256::MAX)
    }

    pub fn with_deposit_limit(limit: U256) -> Self {
        Self::build(limit)
    }

    fn build(deposit_limit: U256) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        // Nonzero genesis: activation timestamps double as active flags, so
        // the rig must never register anything at time zero.
        let genesis = 1_000;
        let strategy_manager = addr(0x02);
        let debt_manager = addr(0x03);
        let reporter = addr(0x04);
        let emergency = addr(0x05);
        let config_manager = addr(0x06);
        let args = InitArgs {
            vault: addr(0xf0),
            asset: addr(0xee),
            decimals: 18,
            deposit_limit,
            minimum_total_idle: U256::ZERO,
            profit_max_unlock_time: 1_000,
        };
        let vault = Vault::new(args, genesis).expect("rig init args are valid");
        let roles = RoleTable::new()
            .grant(strategy_manager, Role::StrategyManager)
            .grant(debt_manager, Role::DebtManager)
            .grant(reporter, Role::Reporter)
            .grant(emergency, Role::EmergencyManager)
            .grant(config_manager, Role::ConfigManager);
        Self {
            clock: ManualClock::new(genesis),
            token: SimToken::new(),
            strategies: StrategyMap::new(),
            sims: HashMap::new(),
            accountant: SimAccountant {
                address: addr(0xcc),
                performance_fee_bps: 0,
                refund: U256::ZERO,
            },
            fee_source: None,
            vault,
            roles,
            strategy_manager,
            debt_manager,
            reporter,
            emergency,
            config_manager,
        }
    }

    /// Splits the rig into the vault and an [`Env`] over everything else
    pub fn split(&mut self) -> (&mut Vault, Env<'_>) {
        let env = Env {
            clock: &self.clock,
            asset: &mut self.token,
            strategies: &mut self.strategies,
            accountant: Some(&mut self.accountant),
            queue_policy: None,
            fee_source: self
                .fee_source
                .as_ref()
                .map(|source| source as &dyn ProtocolFeeSource),
        };
        (&mut self.vault, env)
    }

    // STRATEGY FIXTURES

    pub fn spawn_strategy(&mut self, address: Address) -> Address {
        let asset = self.vault.asset();
        self.spawn_strategy_with_asset(address, asset)
    }

    pub fn spawn_strategy_with_asset(&mut self, address: Address, asset: Address) -> Address {
        let sim = SimStrategy::new(address, asset, self.token.clone());
        self.strategies.insert(address, Box::new(sim.clone()));
        self.sims.insert(address, sim);
        address
    }

    pub fn strategy_value(&self, strategy: Address) -> U256 {
        self.token.balance_of(strategy)
    }

    pub fn burn_strategy_assets(&self, strategy: Address, amount: U256) {
        self.token.burn_units(strategy, amount);
    }

    pub fn airdrop_to_strategy(&self, strategy: Address, amount: U256) {
        self.token.credit(strategy, amount);
    }

    pub fn set_strategy_deposit_capacity(&self, strategy: Address, cap: U256) {
        self.sims[&strategy].set_deposit_cap(cap);
    }

    pub fn set_strategy_withdraw_capacity(&self, strategy: Address, cap: U256) {
        self.sims[&strategy].set_withdraw_cap(cap);
    }

    pub fn set_strategy_slippage(&self, strategy: Address, slippage: U256) {
        self.sims[&strategy].set_slippage(slippage);
    }

    // ACCOUNTANT AND FEES

    pub fn accountant_address(&self) -> Address {
        self.accountant.address
    }

    pub fn set_performance_fee_bps(&mut self, fee_bps: u16) {
        self.accountant.performance_fee_bps = fee_bps;
    }

    pub fn set_refund_amount(&mut self, refund: U256) {
        self.accountant.refund = refund;
    }

    pub fn set_protocol_fee(&mut self, config: FeeConfig) {
        self.fee_source = Some(SimFeeSource { config });
    }

    // VAULT OPERATION WRAPPERS

    pub fn deposit(
        &mut self,
        caller: Address,
        receiver: Address,
        assets: U256,
    ) -> VaultResult<U256> {
        let (vault, mut env) = self.split();
        vault.deposit(&mut env, caller, receiver, assets)
    }

    pub fn mint(&mut self, caller: Address, receiver: Address, shares: U256) -> VaultResult<U256> {
        let (vault, mut env) = self.split();
        vault.mint(&mut env, caller, receiver, shares)
    }

    pub fn redeem(
        &mut self,
        caller: Address,
        receiver: Address,
        owner: Address,
        shares: U256,
    ) -> VaultResult<U256> {
        let (vault, mut env) = self.split();
        vault.redeem(&mut env, caller, receiver, owner, shares, None)
    }

    pub fn redeem_with_queue(
        &mut self,
        caller: Address,
        receiver: Address,
        owner: Address,
        shares: U256,
        queue: &[Address],
    ) -> VaultResult<U256> {
        let (vault, mut env) = self.split();
        vault.redeem(&mut env, caller, receiver, owner, shares, Some(queue))
    }

    pub fn withdraw(
        &mut self,
        caller: Address,
        receiver: Address,
        owner: Address,
        assets: U256,
    ) -> VaultResult<U256> {
        let (vault, mut env) = self.split();
        vault.withdraw(&mut env, caller, receiver, owner, assets, None)
    }

    pub fn max_withdraw(&mut self, owner: Address) -> VaultResult<U256> {
        let (vault, mut env) = self.split();
        vault.max_withdraw(&mut env, owner)
    }

    pub fn add_strategy(&mut self, strategy: Address) -> VaultResult<()> {
        let caller = self.strategy_manager;
        let roles = self.roles.clone();
        let (vault, mut env) = self.split();
        vault.add_strategy(&mut env, &roles, caller, strategy)
    }

    pub fn revoke_strategy(&mut self, strategy: Address) -> VaultResult<()> {
        let caller = self.strategy_manager;
        let roles = self.roles.clone();
        let (vault, mut env) = self.split();
        vault.revoke_strategy(&mut env, &roles, caller, strategy)
    }

    pub fn force_revoke_strategy(&mut self, strategy: Address) -> VaultResult<()> {
        let caller = self.emergency;
        let roles = self.roles.clone();
        let (vault, mut env) = self.split();
        vault.force_revoke_strategy(&mut env, &roles, caller, strategy)
    }

    pub fn set_max_debt(&mut self, strategy: Address, limit: U256) -> VaultResult<()> {
        let now = self.clock.now();
        let roles = self.roles.clone();
        self.vault
            .set_max_debt_for(&roles, self.debt_manager, strategy, limit, now)
    }

    pub fn update_debt(&mut self, strategy: Address, target: U256) -> VaultResult<U256> {
        let caller = self.debt_manager;
        let roles = self.roles.clone();
        let (vault, mut env) = self.split();
        vault.update_debt(&mut env, &roles, caller, strategy, target)
    }

    pub fn assess_unrealized_loss(
        &mut self,
        strategy: Address,
        assets_needed: U256,
    ) -> VaultResult<U256> {
        let (vault, mut env) = self.split();
        vault.assess_unrealized_loss(&mut env, strategy, assets_needed)
    }

    pub fn process_report(&mut self, strategy: Address) -> VaultResult<SettlementSummary> {
        let caller = self.reporter;
        let roles = self.roles.clone();
        let (vault, mut env) = self.split();
        vault.process_report(&mut env, &roles, caller, strategy)
    }

    // BOOK MANIPULATION

    /// Credits assets to the vault and books them as idle, as if donated
    /// and recognized
    pub fn simulate_airdrop_to_idle(&mut self, amount: U256) {
        let vault_addr = self.vault.address();
        self.token.credit(vault_addr, amount);
        self.vault.force_idle_add(amount);
    }

    /// Overwrites the books directly for conversion-math tests
    pub fn force_books(&mut self, idle: U256, debt: U256, supply: U256) {
        self.vault.force_books(idle, debt, supply);
    }
}
