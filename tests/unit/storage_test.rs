//! Tests for the storage proxy and file backends

use std::sync::Arc;

use sweep_scheduler::config::WrapMode;
use sweep_scheduler::core::{
    RequestKind, RunIndex, StorageBackend, StorageError, StorageProxy, StorageRequest,
};
use sweep_scheduler::infra::backend::{backend_for_path, EntryKind, JsonlBackend, MemoryBackend};
use tempfile::tempdir;

/// Backend that panics on a chosen run.
struct PanickyBackend {
    panic_on: RunIndex,
    written: Vec<RunIndex>,
}

impl StorageBackend<u32> for PanickyBackend {
    fn write(&mut self, run_index: RunIndex, _result: &u32) -> Result<(), StorageError> {
        assert!(run_index != self.panic_on, "backend exploded on run {run_index}");
        self.written.push(run_index);
        Ok(())
    }

    fn write_error(&mut self, run_index: RunIndex, _error: &str) -> Result<(), StorageError> {
        self.written.push(run_index);
        Ok(())
    }
}

#[test]
fn test_request_kind() {
    assert_eq!(StorageRequest::result(1, Arc::new(5u32)).kind(), RequestKind::Result);
    assert_eq!(StorageRequest::<u32>::error(1, "boom").kind(), RequestKind::Error);
}

#[test]
fn test_every_mode_stores_results_and_errors() {
    for mode in [WrapMode::Direct, WrapMode::Lock, WrapMode::Queue] {
        let backend = MemoryBackend::<u32>::new();
        let proxy: StorageProxy<u32> =
            StorageProxy::new(mode, Box::new(backend.clone()), 4).unwrap();
        assert_eq!(proxy.mode(), mode);

        proxy.store(StorageRequest::result(0, Arc::new(10))).unwrap();
        proxy.store(StorageRequest::error(1, "diverged")).unwrap();
        proxy.store(StorageRequest::result(2, Arc::new(30))).unwrap();

        assert_eq!(proxy.close().unwrap(), 3, "mode {mode:?}");
        assert_eq!(backend.result_indices(), vec![0, 2]);
        assert_eq!(backend.error_indices(), vec![1]);
        assert_eq!(backend.flushes(), 1);
    }
}

#[test]
fn test_backend_rejection_is_returned_to_caller() {
    for mode in [WrapMode::Lock, WrapMode::Queue] {
        let backend = MemoryBackend::<u32>::new().with_failure(3);
        let proxy: StorageProxy<u32> =
            StorageProxy::new(mode, Box::new(backend.clone()), 4).unwrap();
        let err = proxy.store(StorageRequest::result(3, Arc::new(1))).unwrap_err();
        assert!(matches!(err, StorageError::Backend { run_index: 3, .. }), "{err}");
        proxy.store(StorageRequest::result(4, Arc::new(1))).unwrap();
        proxy.close().unwrap();
        assert_eq!(backend.result_indices(), vec![4]);
    }
}

#[test]
fn test_backend_panic_fails_only_that_request() {
    for mode in [WrapMode::Lock, WrapMode::Queue] {
        let backend = PanickyBackend {
            panic_on: 1,
            written: Vec::new(),
        };
        let proxy: StorageProxy<u32> = StorageProxy::new(mode, Box::new(backend), 4).unwrap();
        proxy.store(StorageRequest::result(0, Arc::new(1))).unwrap();
        assert!(proxy.store(StorageRequest::result(1, Arc::new(1))).is_err());
        proxy.store(StorageRequest::result(2, Arc::new(1))).unwrap();
        assert_eq!(proxy.close().unwrap(), 3);
    }
}

#[test]
fn test_submissions_after_close_fail() {
    let proxy: StorageProxy<u32> =
        StorageProxy::new(WrapMode::Queue, Box::new(MemoryBackend::new()), 2).unwrap();
    proxy.close().unwrap();
    assert_eq!(proxy.close().unwrap(), 0);
    assert_eq!(
        proxy.store(StorageRequest::result(0, Arc::new(1))),
        Err(StorageError::WriterClosed)
    );
}

#[test]
fn test_jsonl_backend_through_proxy() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("out/results.jsonl");
    let backend = backend_for_path::<serde_json::Value>(&path).unwrap();
    let proxy = StorageProxy::new(WrapMode::Queue, backend, 8).unwrap();

    proxy
        .store(StorageRequest::result(0, Arc::new(serde_json::json!({"rate": 1.5}))))
        .unwrap();
    proxy.store(StorageRequest::error(1, "diverged")).unwrap();
    proxy.close().unwrap();

    let entries = JsonlBackend::load_entries(&path).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].run, "run_00000000");
    assert_eq!(entries[0].kind, EntryKind::Result);
    assert_eq!(entries[0].payload["rate"], serde_json::json!(1.5));
    assert_eq!(entries[1].kind, EntryKind::Error);
    assert_eq!(entries[1].payload, serde_json::json!("diverged"));
}
