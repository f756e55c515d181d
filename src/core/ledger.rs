//! Checkpoint ledger: the durable record of completed runs.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::error::LedgerError;
use crate::core::run::RunIndex;

/// One completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Index of the completed run.
    pub run_index: RunIndex,
    /// When the completion was recorded.
    pub completed_at: DateTime<Utc>,
}

impl CheckpointRecord {
    /// Record stamped with the current time.
    #[must_use]
    pub fn now(run_index: RunIndex) -> Self {
        Self {
            run_index,
            completed_at: Utc::now(),
        }
    }
}

/// Append-only store of completed run indices.
///
/// Written only from the scheduler's post-completion path, never from workers.
pub trait CheckpointLedger: Send {
    /// Read the set of already completed runs. Called once at startup in resume mode.
    ///
    /// # Errors
    ///
    /// [`LedgerError`] if existing state cannot be read or belongs to another sweep.
    fn load(&mut self) -> Result<BTreeSet<RunIndex>, LedgerError>;

    /// Durably record a completed run. Once this returns `Ok` the index survives a crash.
    ///
    /// # Errors
    ///
    /// [`LedgerError`] if the record may not have been persisted.
    fn record(&mut self, run_index: RunIndex) -> Result<(), LedgerError>;

    /// Remove all persisted state.
    ///
    /// # Errors
    ///
    /// [`LedgerError`] if the state exists but cannot be removed.
    fn delete(&mut self) -> Result<(), LedgerError>;
}

impl<L: CheckpointLedger + ?Sized> CheckpointLedger for Box<L> {
    fn load(&mut self) -> Result<BTreeSet<RunIndex>, LedgerError> {
        (**self).load()
    }

    fn record(&mut self, run_index: RunIndex) -> Result<(), LedgerError> {
        (**self).record(run_index)
    }

    fn delete(&mut self) -> Result<(), LedgerError> {
        (**self).delete()
    }
}
