//! Vault Reentrancy Gate
//!
//! Every state-mutating entry point holds this gate for its full duration.
//! The execution model is single-threaded and cooperative, so the gate is
//! not about threads: it stops an external collaborator invoked mid-flight
//! (a strategy, the accountant, a token) from re-entering a public entry
//! point before the current one has finished mutating the ledger.
//!
//! ```plain
//! Gate State Machine:
//!
//!              ┌──────────┐
//!         ┌────► Released │◄───┐
//!         │    └──────────┘    │
//!         │         │          │
//!       release  try_lock      │
//!         │         │          │
//!         │         ▼          │
//!         │    ┌─────────┐     │
//!         └────┤  Held   ├─────┘
//!              └─────────┘
//! ```
//!
//! Unlike a timeout lock there is no automatic recovery: operations are
//! synchronous and either run to completion or abort, so a held gate at
//! entry is always a reentrancy attempt and is rejected outright.

use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};

/// Reentrancy gate held for the duration of one mutating operation
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Gate {
    held: bool,
}

impl Gate {
    /// Acquires the gate.
    ///
    /// # Returns
    /// * `Ok(())` - Gate successfully acquired
    /// * `Err(VaultError::Locked)` - An operation is already in progress
    pub fn try_lock(&mut self) -> VaultResult<()> {
        if self.held {
            return Err(VaultError::Locked);
        }
        self.held = true;
        Ok(())
    }

    /// Releases the gate at the end of an operation
    pub fn release(&mut self) {
        self.held = false;
    }

    pub fn is_held(&self) -> bool {
        self.held
    }
}
