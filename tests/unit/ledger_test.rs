//! Tests for checkpoint ledgers

use std::collections::BTreeSet;
use std::fs;

use sweep_scheduler::core::{CheckpointLedger, LedgerError};
use sweep_scheduler::infra::ledger::{FileLedger, LedgerHeader, MemoryLedger};
use tempfile::tempdir;

#[test]
fn test_file_ledger_creates_parent_dirs_and_header() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested/continue/lif.ledger.jsonl");
    let mut ledger = FileLedger::open(&path, "lif", 12);

    assert!(!path.exists(), "opening must not touch the disk");
    ledger.record(4).unwrap();
    ledger.record(1).unwrap();

    let contents = fs::read_to_string(&path).unwrap();
    let mut lines = contents.lines();
    let header: LedgerHeader = serde_json::from_str(lines.next().unwrap()).unwrap();
    assert_eq!(header.sweep, "lif");
    assert_eq!(header.total_runs, 12);
    assert_eq!(lines.count(), 2);
    assert!(contents.ends_with('\n'));
}

#[test]
fn test_file_ledger_resume_sees_previous_records() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sweep.ledger.jsonl");
    {
        let mut ledger = FileLedger::open(&path, "sweep", 5);
        for idx in [0, 2, 3] {
            ledger.record(idx).unwrap();
        }
    }

    let mut resumed = FileLedger::open(&path, "sweep", 5);
    assert_eq!(resumed.load().unwrap(), BTreeSet::from([0, 2, 3]));
    resumed.record(1).unwrap();
    assert_eq!(resumed.load().unwrap(), BTreeSet::from([0, 1, 2, 3]));
}

#[test]
fn test_file_ledger_duplicate_records_are_harmless() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("dup.ledger.jsonl");
    let mut ledger = FileLedger::open(&path, "dup", 3);
    ledger.record(2).unwrap();
    ledger.record(2).unwrap();
    assert_eq!(ledger.load().unwrap(), BTreeSet::from([2]));
}

#[test]
fn test_file_ledger_crash_mid_append() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("crash.ledger.jsonl");
    let mut ledger = FileLedger::open(&path, "crash", 4);
    ledger.record(0).unwrap();
    ledger.record(1).unwrap();
    drop(ledger);

    // Simulate a crash halfway through writing the third record.
    let mut contents = fs::read_to_string(&path).unwrap();
    contents.push_str("{\"run_index\":2,\"compl");
    fs::write(&path, contents).unwrap();

    let mut resumed = FileLedger::open(&path, "crash", 4);
    assert_eq!(resumed.load().unwrap(), BTreeSet::from([0, 1]));
    resumed.record(3).unwrap();
    assert_eq!(resumed.load().unwrap(), BTreeSet::from([0, 1, 3]));
}

#[test]
fn test_file_ledger_rejects_other_sweep() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("shared.ledger.jsonl");
    FileLedger::open(&path, "alpha", 10).record(0).unwrap();

    let err = FileLedger::open(&path, "beta", 10).load().unwrap_err();
    assert!(matches!(err, LedgerError::SweepMismatch { .. }), "{err}");

    let err = FileLedger::open(&path, "alpha", 11).load().unwrap_err();
    assert!(matches!(err, LedgerError::SweepMismatch { .. }), "{err}");
}

#[test]
fn test_file_ledger_delete_then_record_starts_fresh() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("fresh.ledger.jsonl");
    let mut ledger = FileLedger::open(&path, "fresh", 2);
    ledger.record(0).unwrap();
    ledger.delete().unwrap();
    assert!(!path.exists());
    ledger.delete().unwrap();

    ledger.record(1).unwrap();
    assert_eq!(ledger.load().unwrap(), BTreeSet::from([1]));
}

#[test]
fn test_memory_ledger_through_trait_object() {
    let handle = MemoryLedger::with_completed([3]);
    let mut boxed: Box<dyn CheckpointLedger> = Box::new(handle.clone());

    assert_eq!(boxed.load().unwrap(), BTreeSet::from([3]));
    boxed.record(5).unwrap();
    handle.set_failing(true);
    assert!(matches!(boxed.record(6), Err(LedgerError::Unavailable(_))));
    handle.set_failing(false);

    assert_eq!(handle.recorded(), vec![3, 5]);
    assert_eq!(handle.load_count(), 1);
}
