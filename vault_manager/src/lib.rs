mod constants;
mod error;
mod journal;
mod providers;
#[cfg(test)]
pub(crate) mod testkit;
mod types;
mod vault;

pub use constants::redeem_all;
pub use error::{VaultError, VaultResult};
pub use journal::{Journal, JournalEntry, LogType};
pub use providers::{
    Accountant, AssetToken, Clock, ProtocolFeeSource, QueuePolicy, Strategy, StrategyMap,
    StrategySet,
};
pub use types::{
    FeeConfig, InitArgs, Role, RoleTable, Rounding, SettlementSummary, StrategyQueryData,
    VaultQueryData,
};
pub use vault::{Env, StrategyRecord, Vault};
