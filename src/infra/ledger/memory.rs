//! In-process checkpoint ledger.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::error::LedgerError;
use crate::core::ledger::{CheckpointLedger, CheckpointRecord};
use crate::core::run::RunIndex;

#[derive(Debug, Default)]
struct LedgerState {
    records: Vec<CheckpointRecord>,
    failures_left: u32,
    failing: bool,
    loads: usize,
    deleted: bool,
}

/// Ledger kept in memory. Clones share state, so a test can keep one handle for
/// inspection while the scheduler owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl MemoryLedger {
    /// Empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger that already lists `indices` as completed.
    #[must_use]
    pub fn with_completed(indices: impl IntoIterator<Item = RunIndex>) -> Self {
        let ledger = Self::new();
        ledger
            .state
            .lock()
            .records
            .extend(indices.into_iter().map(CheckpointRecord::now));
        ledger
    }

    /// Fail the next `count` calls to `record`.
    pub fn fail_next_records(&self, count: u32) {
        self.state.lock().failures_left = count;
    }

    /// Fail every `record` call until reset.
    pub fn set_failing(&self, failing: bool) {
        self.state.lock().failing = failing;
    }

    /// Recorded indices in record order.
    #[must_use]
    pub fn recorded(&self) -> Vec<RunIndex> {
        self.state.lock().records.iter().map(|r| r.run_index).collect()
    }

    /// How often `load` was called.
    #[must_use]
    pub fn load_count(&self) -> usize {
        self.state.lock().loads
    }

    /// Whether `delete` was called since the last record.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.state.lock().deleted
    }
}

impl CheckpointLedger for MemoryLedger {
    fn load(&mut self) -> Result<BTreeSet<RunIndex>, LedgerError> {
        let mut state = self.state.lock();
        state.loads += 1;
        Ok(state.records.iter().map(|r| r.run_index).collect())
    }

    fn record(&mut self, run_index: RunIndex) -> Result<(), LedgerError> {
        let mut state = self.state.lock();
        if state.failing {
            return Err(LedgerError::Unavailable("memory ledger set to fail".into()));
        }
        if state.failures_left > 0 {
            state.failures_left -= 1;
            return Err(LedgerError::Unavailable("injected record failure".into()));
        }
        state.deleted = false;
        state.records.push(CheckpointRecord::now(run_index));
        Ok(())
    }

    fn delete(&mut self) -> Result<(), LedgerError> {
        let mut state = self.state.lock();
        state.records.clear();
        state.deleted = true;
        Ok(())
    }
}
