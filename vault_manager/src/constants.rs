//! Vault Manager's Constants

use alloy_primitives::U256;

/// Basis point scale used for fee arithmetic
pub const MAX_BPS: u128 = 10_000; // 100%
pub fn max_bps() -> U256 {
    U256::from(MAX_BPS)
}

/// Extended fixed-point scale used by the profit-unlock rate
pub const MAX_BPS_EXTENDED: u128 = 1_000_000_000_000; // e12
pub fn max_bps_extended() -> U256 {
    U256::from(MAX_BPS_EXTENDED)
}

/// Maximum number of strategies a withdrawal queue may hold
pub const MAX_QUEUE: usize = 10;

/// Upper bound for the profit unlock window, denominated in seconds
pub const MAX_PROFIT_UNLOCK_TIME: u64 = 31_556_952; // one year

/// Seconds in a year, used to annualize the protocol fee
pub const SECONDS_PER_YEAR: u64 = 31_556_952;

/// Minimum elapsed time between two protocol fee assessments, in seconds
pub const PROTOCOL_FEE_ASSESSMENT_PERIOD: u64 = 86_400; // one day

/// Maximum number of entries retained by the vault journal
pub const MAX_JOURNAL_ENTRIES: usize = 1_000;

/// Sentinel share amount meaning "the owner's entire balance"
pub fn redeem_all() -> U256 {
    U256::MAX
}
