//! Tests for error types

use std::time::Duration;

use sweep_scheduler::core::{
    ComputationError, LedgerError, PoolError, ResourceMonitorError, StorageError, SweepError,
};

#[test]
fn test_computation_error_display() {
    assert_eq!(
        ComputationError::Panicked("index out of bounds".into()).to_string(),
        "computation panicked: index out of bounds"
    );
    assert_eq!(
        ComputationError::TimedOut(Duration::from_secs(2)).to_string(),
        "computation timed out after 2s"
    );
    assert_eq!(
        ComputationError::Launch("sim: not found".into()).to_string(),
        "failed to launch computation: sim: not found"
    );
}

#[test]
fn test_storage_error_display() {
    let err = StorageError::Backend {
        run_index: 7,
        reason: "disk full".into(),
    };
    assert_eq!(err.to_string(), "backend write failed for run 7: disk full");
    assert_eq!(
        StorageError::Contended.to_string(),
        "direct storage was called concurrently"
    );
}

#[test]
fn test_ledger_error_display() {
    let err = LedgerError::SweepMismatch {
        found: "old".into(),
        found_runs: 4,
        expected: "new".into(),
        expected_runs: 8,
    };
    assert_eq!(
        err.to_string(),
        "ledger belongs to sweep `old` (4 runs), expected `new` (8 runs)"
    );

    let io: LedgerError = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
    assert!(matches!(io, LedgerError::Io(_)));
}

#[test]
fn test_pool_error_display() {
    assert_eq!(PoolError::QueueFull.to_string(), "run queue is full");
    assert_eq!(PoolError::PoolShutdown.to_string(), "pool has been shut down");
}

#[test]
fn test_sweep_error_conversions() {
    let err: SweepError = PoolError::InvalidConfig("worker_count must be greater than 0".into()).into();
    assert!(matches!(err, SweepError::Pool(_)));

    let err: SweepError = LedgerError::Corrupt {
        line: 3,
        reason: "expected value".into(),
    }
    .into();
    assert_eq!(err.to_string(), "ledger is corrupt at line 3: expected value");

    assert_eq!(
        SweepError::MissingCollaborator("storage backend").to_string(),
        "missing collaborator: storage backend"
    );
}

#[test]
fn test_resource_monitor_error_display() {
    let err = ResourceMonitorError::Parse {
        path: "/proc/stat".into(),
        reason: "missing aggregate cpu line".into(),
    };
    assert_eq!(
        err.to_string(),
        "unexpected format in /proc/stat: missing aggregate cpu line"
    );
}
