//! Worker pool executing runs on dedicated worker threads.
//!
//! Every worker is a named OS thread owning a single-threaded tokio runtime, so an async
//! [`RunExecutor`](crate::core::RunExecutor) can be driven without touching the caller's
//! runtime.
//!
//! # Key Features
//!
//! - **FIFO dispatch**: one shared bounded channel; no priorities, no preemption
//! - **Failure isolation**: computation errors and panics become `Failed` runs
//! - **Storage hand-off**: workers submit results to the storage proxy themselves
//! - **Clean shutdown**: in-flight runs finish, idle workers exit, stragglers are detached
//!
//! # Example
//!
//! ```rust,ignore
//! use sweep_scheduler::config::WorkerPoolConfig;
//! use sweep_scheduler::core::WorkerPool;
//!
//! let (report_tx, report_rx) = crossbeam_channel::unbounded();
//! let pool = WorkerPool::new(
//!     WorkerPoolConfig::new().with_worker_count(4),
//!     executor,
//!     storage,
//!     report_tx,
//! )?;
//!
//! let handle = pool.submit(unit)?;
//! let report = report_rx.recv()?;
//! pool.shutdown(Duration::from_secs(2));
//! ```

mod native;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::core::error::ComputationError;
use crate::core::run::RunIndex;
use crate::core::storage::StoreTicket;

pub use native::{SlotState, WorkerPool};
pub(crate) use native::execute_unit;

/// Errors that can occur when using a `WorkerPool`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The dispatch queue is full; no more runs can be accepted right now.
    QueueFull,

    /// The pool has been shut down.
    PoolShutdown,

    /// Configuration validation failed.
    InvalidConfig(String),

    /// Internal error (thread spawn failure, runtime creation, etc.).
    Internal(String),
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFull => write!(f, "run queue is full"),
            Self::PoolShutdown => write!(f, "pool has been shut down"),
            Self::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for PoolError {}

/// Statistics about pool utilization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of worker threads.
    pub worker_count: usize,

    /// Currently executing runs.
    pub active_runs: u64,

    /// Runs waiting in the dispatch queue.
    pub queued_runs: u64,

    /// Runs whose computation succeeded.
    pub completed_runs: u64,

    /// Runs whose computation failed or panicked.
    pub failed_runs: u64,

    /// Total runs submitted.
    pub submitted_runs: u64,
}

/// Internal counters for pool statistics (thread-safe).
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub active_runs: AtomicU64,
    pub queued_runs: AtomicU64,
    pub completed_runs: AtomicU64,
    pub failed_runs: AtomicU64,
    pub submitted_runs: AtomicU64,
}

impl PoolCounters {
    /// Get a snapshot of current statistics.
    pub fn snapshot(&self, worker_count: usize) -> PoolStats {
        PoolStats {
            worker_count,
            active_runs: self.active_runs.load(Ordering::Relaxed),
            queued_runs: self.queued_runs.load(Ordering::Relaxed),
            completed_runs: self.completed_runs.load(Ordering::Relaxed),
            failed_runs: self.failed_runs.load(Ordering::Relaxed),
            submitted_runs: self.submitted_runs.load(Ordering::Relaxed),
        }
    }
}

/// What happened to a run on the worker side.
#[derive(Debug)]
pub enum RunOutcome<R> {
    /// The computation returned a result, which was handed to storage.
    Computed {
        /// The result, shared with the storage request.
        result: Arc<R>,
        /// Outcome of the storage write.
        ticket: StoreTicket,
    },
    /// The computation failed; its error payload was handed to storage.
    Failed {
        /// Why the computation failed.
        error: ComputationError,
        /// Outcome of the error-payload write.
        ticket: StoreTicket,
    },
}

/// Message from a worker to the scheduler once a run has left the worker.
#[derive(Debug)]
pub struct RunReport<R> {
    /// Run that finished.
    pub index: RunIndex,
    /// Worker that executed it.
    pub worker_id: usize,
    /// Computation and storage outcome.
    pub outcome: RunOutcome<R>,
}

/// Acknowledgement of an accepted submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunHandle {
    /// Run that was accepted.
    pub index: RunIndex,
}
