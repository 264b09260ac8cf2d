//! Vault operation journal
//!
//! Structured record of everything the vault did or refused to do. Entries
//! are built with a builder, committed into a bounded ring owned by the
//! vault, and are the queryable counterpart of the `log` diagnostics.

use std::collections::VecDeque;

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::constants::MAX_JOURNAL_ENTRIES;
use crate::error::VaultResult;

/// Category of a journal entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogType {
    Deposit,
    Withdraw,
    DebtUpdate,
    Report,
    StrategyChange,
    ProfitUnlock,
    Shutdown,
    Config,
    Info,
}

/// Journal entry
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JournalEntry {
    pub timestamp: u64,
    pub entry: VaultResult<()>,
    pub log_type: LogType,
    pub strategy: Option<Address>,
    pub amount: Option<U256>,
    pub note: Option<String>,
}

/// Builder for journal entries
impl JournalEntry {
    /// Create a new instance of a journal entry
    /// Fills the `timestamp`, `entry` and `log_type` fields
    pub fn new(timestamp: u64, entry: VaultResult<()>, log_type: LogType) -> Self {
        Self {
            timestamp,
            entry,
            log_type,
            strategy: None,
            amount: None,
            note: None,
        }
    }

    /// Fills the `strategy` field of the entry
    pub fn strategy(mut self, strategy: Address) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Fills the `amount` field of the entry
    pub fn amount(mut self, amount: U256) -> Self {
        self.amount = Some(amount);
        self
    }

    /// Fills the `note` field of the entry
    pub fn note<S: AsRef<str>>(mut self, text: S) -> Self {
        self.note = Some(text.as_ref().to_string());
        self
    }
}

/// Bounded journal ring owned by a vault
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Journal {
    entries: VecDeque<JournalEntry>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commits an entry, evicting the oldest one once the ring is full
    pub fn record(&mut self, entry: JournalEntry) {
        if self.entries.len() == MAX_JOURNAL_ENTRIES {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn entries(&self) -> impl Iterator<Item = &JournalEntry> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&JournalEntry> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
