//! # Sweep Scheduler
//!
//! A resource-aware run scheduler for parameter sweeps that can be interrupted and resumed.
//!
//! A sweep is a set of independent runs of one computation, each run fed with its own
//! parameter assignment. This crate decides *when* and *where* every run executes and makes
//! sure each one ends up stored exactly once, even when runs execute concurrently and the
//! process is interrupted halfway through.
//!
//! ## Core Problem Solved
//!
//! Scientific parameter sweeps have a few awkward properties:
//!
//! - **Shared, non-concurrent storage**: the result store (an HDF5 file, a JSONL file, a
//!   database handle) usually must not be written from several contexts at once
//! - **Long sweeps crash**: a power cut after 3 days must not cost 3 days of compute
//! - **Shared hosts**: a sweep must back off when the machine runs out of CPU, memory or swap
//! - **User code fails**: one broken parameter combination must not take down the sweep
//!
//! ## Key Features
//!
//! - **Worker Pool**: dedicated OS threads, each with its own single-threaded tokio runtime
//! - **Storage Proxy**: `Direct`, `Lock` and `Queue` wrap modes serialize backend writes
//! - **Checkpoint Ledger**: append-only, fsync'd JSONL ledger for crash-safe resume
//! - **Admission Control**: CPU/memory/swap caps with a liveness fallback
//! - **Failure Isolation**: errors and panics become `Failed` runs, never a crashed sweep
//!
//! ## Example
//!
//! ```rust,ignore
//! use sweep_scheduler::config::{SweepConfig, WrapMode};
//! use sweep_scheduler::core::{from_fn, ParameterGrid, Scheduler};
//! use sweep_scheduler::infra::backend::JsonlBackend;
//!
//! let grid = ParameterGrid::new("lif_network")
//!     .with_default("tau_ms", 10.0)
//!     .explore("input_rate", [1.0, 2.0, 4.0, 8.0])
//!     .explore("seed", [1, 2, 3])
//!     .cartesian();
//!
//! let config = SweepConfig::new()
//!     .with_worker_count(4)
//!     .with_use_pool(true)
//!     .with_wrap_mode(WrapMode::Queue)
//!     .with_cpu_cap(90.0);
//!
//! let report = Scheduler::new(config, from_fn(|unit| simulate(&unit.parameters)))
//!     .with_source(grid)
//!     .with_backend(JsonlBackend::new("results/lif_network.jsonl"))
//!     .run()?;
//!
//! assert!(report.is_success());
//! ```
//!
//! For complete scenarios, see `tests/sweep_scenarios_test.rs`.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling abstractions: runs, admission, storage, ledger, pool and scheduler.
pub mod core;
/// Configuration models for pools and sweeps.
pub mod config;
/// Infrastructure adapters for storage backends, ledgers, probes and executors.
pub mod infra;
/// Runtime integration (OS signals).
pub mod runtime;
/// Shared utilities.
pub mod util;
