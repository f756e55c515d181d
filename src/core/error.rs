//! Error types for sweep scheduling.

use std::time::Duration;

use thiserror::Error;

use crate::core::run::RunIndex;
use crate::core::worker_pool::PoolError;

/// Failure raised by the user computation for a single run.
///
/// Always isolated to its run: the run is marked `Failed` and the sweep continues.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ComputationError {
    /// The computation reported a failure.
    #[error("computation failed: {0}")]
    Failed(String),
    /// The computation panicked; the panic was caught at the worker boundary.
    #[error("computation panicked: {0}")]
    Panicked(String),
    /// The computation exceeded its time limit and was killed.
    #[error("computation timed out after {0:?}")]
    TimedOut(Duration),
    /// The computation could not be started.
    #[error("failed to launch computation: {0}")]
    Launch(String),
}

impl ComputationError {
    /// Convenience constructor for [`ComputationError::Failed`].
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

/// Failure of the persistent storage backend or of the proxy in front of it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    /// The backend rejected a write.
    #[error("backend write failed for run {run_index}: {reason}")]
    Backend {
        /// Run whose request failed.
        run_index: RunIndex,
        /// Backend-provided reason.
        reason: String,
    },
    /// A `Direct` proxy was called from two contexts at the same time.
    #[error("direct storage was called concurrently")]
    Contended,
    /// The queue writer is gone (closed or crashed).
    #[error("storage writer has shut down")]
    WriterClosed,
    /// I/O failure outside a specific write (open, flush, spawn).
    #[error("storage I/O error: {0}")]
    Io(String),
    /// No backend is known for the requested target.
    #[error("unsupported storage target: {0}")]
    UnsupportedTarget(String),
}

/// Failure of the checkpoint ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Reading or writing the ledger file failed.
    #[error("ledger I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A record in the middle of the ledger cannot be parsed.
    #[error("ledger is corrupt at line {line}: {reason}")]
    Corrupt {
        /// 1-based line number.
        line: usize,
        /// Parser message.
        reason: String,
    },
    /// The ledger was written by a different sweep definition.
    #[error(
        "ledger belongs to sweep `{found}` ({found_runs} runs), expected `{expected}` ({expected_runs} runs)"
    )]
    SweepMismatch {
        /// Sweep name in the ledger header.
        found: String,
        /// Run count in the ledger header.
        found_runs: u64,
        /// Sweep name being resumed.
        expected: String,
        /// Run count of the sweep being resumed.
        expected_runs: u64,
    },
    /// Encoding a record failed.
    #[error("ledger serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    /// Injected or backend-specific failure.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Failure while sampling host resources. Never fatal: admission treats it as "admit".
#[derive(Debug, Error)]
pub enum ResourceMonitorError {
    /// A probe source could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// Source that failed.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A probe source had an unexpected format.
    #[error("unexpected format in {path}: {reason}")]
    Parse {
        /// Source that failed.
        path: String,
        /// What was wrong.
        reason: String,
    },
    /// Injected failure (tests, hosts without a probe).
    #[error("resource probe unavailable: {0}")]
    Unavailable(String),
}

/// Errors that abort a sweep before or while it starts.
///
/// Per-run failures never surface here; they end up in the sweep report.
#[derive(Debug, Error)]
pub enum SweepError {
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A required collaborator was not supplied.
    #[error("missing collaborator: {0}")]
    MissingCollaborator(&'static str),
    /// `run` was called on a scheduler that already ran.
    #[error("scheduler has already run")]
    AlreadyRun,
    /// The ledger could not be loaded on resume.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// The worker pool could not be created.
    #[error(transparent)]
    Pool(#[from] PoolError),
    /// The storage proxy could not be created.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// The inline runtime could not be created.
    #[error("failed to build runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
