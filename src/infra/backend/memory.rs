//! In-memory storage backend that records every call.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::core::error::StorageError;
use crate::core::run::RunIndex;
use crate::core::storage::StorageBackend;

/// One call observed by a [`MemoryBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall<R> {
    /// `write` was called.
    Result {
        /// Run written.
        run_index: RunIndex,
        /// Value written.
        result: R,
    },
    /// `write_error` was called.
    Error {
        /// Run written.
        run_index: RunIndex,
        /// Error payload written.
        error: String,
    },
}

impl<R> BackendCall<R> {
    /// Run this call belongs to.
    pub const fn run_index(&self) -> RunIndex {
        match self {
            Self::Result { run_index, .. } | Self::Error { run_index, .. } => *run_index,
        }
    }
}

#[derive(Debug)]
struct Shared<R> {
    calls: Mutex<Vec<BackendCall<R>>>,
    in_call: AtomicBool,
    overlapped: AtomicBool,
    flushes: Mutex<usize>,
    fail_on: Mutex<HashSet<RunIndex>>,
}

/// Backend keeping calls in memory.
///
/// Detects overlapping calls, which must never happen behind a storage proxy, and can
/// inject latency and per-run failures. Clones share state.
#[derive(Debug)]
pub struct MemoryBackend<R> {
    shared: Arc<Shared<R>>,
    latency: Option<Duration>,
}

impl<R> Clone for MemoryBackend<R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            latency: self.latency,
        }
    }
}

impl<R> Default for MemoryBackend<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> MemoryBackend<R> {
    /// Empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                calls: Mutex::new(Vec::new()),
                in_call: AtomicBool::new(false),
                overlapped: AtomicBool::new(false),
                flushes: Mutex::new(0),
                fail_on: Mutex::new(HashSet::new()),
            }),
            latency: None,
        }
    }

    /// Sleep this long inside every call, widening any overlap window.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Reject writes for `run_index`.
    #[must_use]
    pub fn with_failure(self, run_index: RunIndex) -> Self {
        self.shared.fail_on.lock().insert(run_index);
        self
    }

    /// Whether two calls were ever in progress at the same time.
    #[must_use]
    pub fn overlap_detected(&self) -> bool {
        self.shared.overlapped.load(Ordering::Acquire)
    }

    /// Number of `flush` calls.
    #[must_use]
    pub fn flushes(&self) -> usize {
        *self.shared.flushes.lock()
    }

    /// Total number of write calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.shared.calls.lock().len()
    }

    /// Runs written through `write`, in call order.
    #[must_use]
    pub fn result_indices(&self) -> Vec<RunIndex> {
        self.shared
            .calls
            .lock()
            .iter()
            .filter(|c| matches!(c, BackendCall::Result { .. }))
            .map(BackendCall::run_index)
            .collect()
    }

    /// Runs written through `write_error`, in call order.
    #[must_use]
    pub fn error_indices(&self) -> Vec<RunIndex> {
        self.shared
            .calls
            .lock()
            .iter()
            .filter(|c| matches!(c, BackendCall::Error { .. }))
            .map(BackendCall::run_index)
            .collect()
    }

    fn enter(&self) {
        if self.shared.in_call.swap(true, Ordering::AcqRel) {
            self.shared.overlapped.store(true, Ordering::Release);
        }
        if let Some(latency) = self.latency {
            std::thread::sleep(latency);
        }
    }

    fn exit(&self) {
        self.shared.in_call.store(false, Ordering::Release);
    }

    fn push(&self, run_index: RunIndex, call: BackendCall<R>) -> Result<(), StorageError> {
        self.enter();
        let outcome = if self.shared.fail_on.lock().contains(&run_index) {
            Err(StorageError::Backend {
                run_index,
                reason: "injected backend failure".into(),
            })
        } else {
            self.shared.calls.lock().push(call);
            Ok(())
        };
        self.exit();
        outcome
    }
}

impl<R: Clone> MemoryBackend<R> {
    /// Every successful call in order.
    #[must_use]
    pub fn calls(&self) -> Vec<BackendCall<R>> {
        self.shared.calls.lock().clone()
    }
}

impl<R> StorageBackend<R> for MemoryBackend<R>
where
    R: Clone + Send + 'static,
{
    fn write(&mut self, run_index: RunIndex, result: &R) -> Result<(), StorageError> {
        self.push(
            run_index,
            BackendCall::Result {
                run_index,
                result: result.clone(),
            },
        )
    }

    fn write_error(&mut self, run_index: RunIndex, error: &str) -> Result<(), StorageError> {
        self.push(
            run_index,
            BackendCall::Error {
                run_index,
                error: error.to_string(),
            },
        )
    }

    fn flush(&mut self) -> Result<(), StorageError> {
        *self.shared.flushes.lock() += 1;
        Ok(())
    }
}
