//! Storage proxy serializing access to a non-concurrent result backend.
//!
//! The backend is owned by the proxy and never exposed. Whatever the wrap mode,
//! backend calls never overlap and each request reaches the backend once.
//!
//! - **Direct**: the caller invokes the backend itself. Only valid with a single execution
//!   context; an overlapping call fails with [`StorageError::Contended`].
//! - **Lock**: a fair (FIFO) mutex gates the backend.
//! - **Queue**: callers enqueue onto a bounded channel drained by one writer thread.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::{FairMutex, Mutex};
use tracing::{debug, error, info, warn};

use crate::config::WrapMode;
use crate::core::error::StorageError;
use crate::core::run::RunIndex;

/// Kind of a storage request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// A computed result.
    Result,
    /// An error payload for a failed run.
    Error,
}

/// Body of a storage request.
#[derive(Debug)]
pub enum StoragePayload<R> {
    /// Result produced by the computation.
    Result(Arc<R>),
    /// Error message of a failed computation.
    Error(String),
}

/// One write destined for the backend, consumed exactly once.
#[derive(Debug)]
pub struct StorageRequest<R> {
    /// Run the request belongs to.
    pub run_index: RunIndex,
    /// What to write.
    pub payload: StoragePayload<R>,
}

impl<R> StorageRequest<R> {
    /// Request storing a result.
    pub const fn result(run_index: RunIndex, result: Arc<R>) -> Self {
        Self {
            run_index,
            payload: StoragePayload::Result(result),
        }
    }

    /// Request storing an error payload.
    pub fn error(run_index: RunIndex, error: impl Into<String>) -> Self {
        Self {
            run_index,
            payload: StoragePayload::Error(error.into()),
        }
    }

    /// Kind of this request.
    pub const fn kind(&self) -> RequestKind {
        match self.payload {
            StoragePayload::Result(_) => RequestKind::Result,
            StoragePayload::Error(_) => RequestKind::Error,
        }
    }
}

/// Persistent sink for run results. Not safe to call from several contexts at once.
pub trait StorageBackend<R>: Send + 'static {
    /// Persist the result of a run.
    ///
    /// `Ok` means the result is durable: the scheduler checkpoints the run as soon as
    /// this returns, so a backend must not hold the result only in memory.
    ///
    /// # Errors
    ///
    /// Any [`StorageError`] marks that run `Failed`.
    fn write(&mut self, run_index: RunIndex, result: &R) -> Result<(), StorageError>;

    /// Persist the error payload of a failed run.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the payload cannot be written.
    fn write_error(&mut self, run_index: RunIndex, error: &str) -> Result<(), StorageError>;

    /// Make previous writes durable.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when flushing fails.
    fn flush(&mut self) -> Result<(), StorageError> {
        Ok(())
    }
}

type BoxedBackend<R> = Box<dyn StorageBackend<R>>;

/// Handle on the outcome of a submitted request.
#[derive(Debug)]
pub struct StoreTicket {
    state: TicketState,
}

#[derive(Debug)]
enum TicketState {
    Ready(Result<(), StorageError>),
    Pending(Receiver<Result<(), StorageError>>),
}

impl StoreTicket {
    pub(crate) const fn ready(result: Result<(), StorageError>) -> Self {
        Self {
            state: TicketState::Ready(result),
        }
    }

    const fn pending(rx: Receiver<Result<(), StorageError>>) -> Self {
        Self {
            state: TicketState::Pending(rx),
        }
    }

    /// Block until the backend call for this request has finished.
    ///
    /// # Errors
    ///
    /// The backend's [`StorageError`], or [`StorageError::WriterClosed`] if the writer went
    /// away before answering.
    pub fn wait(self) -> Result<(), StorageError> {
        match self.state {
            TicketState::Ready(result) => result,
            TicketState::Pending(rx) => rx.recv().unwrap_or(Err(StorageError::WriterClosed)),
        }
    }
}

struct QueuedWrite<R> {
    request: StorageRequest<R>,
    reply: Sender<Result<(), StorageError>>,
}

enum Gate<R> {
    Direct(Mutex<BoxedBackend<R>>),
    Lock(FairMutex<BoxedBackend<R>>),
    Queue {
        tx: Mutex<Option<Sender<QueuedWrite<R>>>>,
        writer: Mutex<Option<JoinHandle<BoxedBackend<R>>>>,
    },
}

/// Single logical sink for run results in front of a [`StorageBackend`].
pub struct StorageProxy<R> {
    mode: WrapMode,
    gate: Gate<R>,
    calls: Arc<AtomicU64>,
    closed: AtomicBool,
}

impl<R> std::fmt::Debug for StorageProxy<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageProxy")
            .field("mode", &self.mode)
            .field("calls", &self.calls.load(Ordering::Relaxed))
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<R> StorageProxy<R>
where
    R: Send + Sync + 'static,
{
    /// Wrap `backend` in the given mode. `queue_depth` bounds the Queue-mode channel.
    ///
    /// # Errors
    ///
    /// [`StorageError::Io`] if the Queue-mode writer thread cannot be spawned.
    pub fn new(
        mode: WrapMode,
        backend: BoxedBackend<R>,
        queue_depth: usize,
    ) -> Result<Self, StorageError> {
        let calls = Arc::new(AtomicU64::new(0));
        let gate = match mode {
            WrapMode::Direct => Gate::Direct(Mutex::new(backend)),
            WrapMode::Lock => Gate::Lock(FairMutex::new(backend)),
            WrapMode::Queue => {
                let (tx, rx) = bounded(queue_depth.max(1));
                let writer = spawn_writer(backend, rx, Arc::clone(&calls))
                    .map_err(|e| StorageError::Io(e.to_string()))?;
                Gate::Queue {
                    tx: Mutex::new(Some(tx)),
                    writer: Mutex::new(Some(writer)),
                }
            }
        };
        debug!(mode = ?mode, queue_depth = queue_depth, "Storage proxy created");
        Ok(Self {
            mode,
            gate,
            calls,
            closed: AtomicBool::new(false),
        })
    }

    /// Wrap mode chosen at construction.
    #[must_use]
    pub const fn mode(&self) -> WrapMode {
        self.mode
    }

    /// Number of backend calls made so far.
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Acquire)
    }

    /// Hand a request to the proxy.
    ///
    /// Direct and Lock modes call the backend before returning. Queue mode only blocks while
    /// the channel is full; the backend outcome arrives through the ticket.
    pub fn submit(&self, request: StorageRequest<R>) -> StoreTicket {
        if self.closed.load(Ordering::Acquire) {
            return StoreTicket::ready(Err(StorageError::WriterClosed));
        }
        match &self.gate {
            Gate::Direct(backend) => {
                let Some(mut backend) = backend.try_lock() else {
                    warn!(run_index = request.run_index, "Direct storage called concurrently");
                    return StoreTicket::ready(Err(StorageError::Contended));
                };
                StoreTicket::ready(apply(&mut **backend, &request, &self.calls))
            }
            Gate::Lock(backend) => {
                let mut backend = backend.lock();
                StoreTicket::ready(apply(&mut **backend, &request, &self.calls))
            }
            Gate::Queue { tx, .. } => {
                let Some(tx) = tx.lock().clone() else {
                    return StoreTicket::ready(Err(StorageError::WriterClosed));
                };
                let (reply, rx) = bounded(1);
                match tx.send(QueuedWrite { request, reply }) {
                    Ok(()) => StoreTicket::pending(rx),
                    Err(_) => StoreTicket::ready(Err(StorageError::WriterClosed)),
                }
            }
        }
    }

    /// Store a request and wait for the backend call to finish.
    ///
    /// # Errors
    ///
    /// See [`StoreTicket::wait`].
    pub fn store(&self, request: StorageRequest<R>) -> Result<(), StorageError> {
        self.submit(request).wait()
    }

    /// Drain pending writes, stop the writer and flush the backend.
    ///
    /// Returns the total number of backend calls. Later submissions fail with
    /// [`StorageError::WriterClosed`]. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// [`StorageError::WriterClosed`] if the writer thread panicked, or the backend's flush
    /// error.
    pub fn close(&self) -> Result<u64, StorageError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(self.calls());
        }
        match &self.gate {
            Gate::Direct(backend) => backend.lock().flush()?,
            Gate::Lock(backend) => backend.lock().flush()?,
            Gate::Queue { tx, writer } => {
                tx.lock().take();
                let handle = writer.lock().take();
                if let Some(handle) = handle {
                    let mut backend = handle.join().map_err(|_| {
                        error!("Storage writer thread panicked");
                        StorageError::WriterClosed
                    })?;
                    backend.flush()?;
                }
            }
        }
        let calls = self.calls();
        info!(mode = ?self.mode, calls = calls, "Storage proxy closed");
        Ok(calls)
    }
}

impl<R> Drop for StorageProxy<R> {
    fn drop(&mut self) {
        // Disconnect the writer so it exits; joining is left to `close`.
        if let Gate::Queue { tx, .. } = &self.gate {
            tx.lock().take();
        }
    }
}

/// Perform one backend call. A panicking backend fails only this request.
fn apply<R: 'static>(
    backend: &mut dyn StorageBackend<R>,
    request: &StorageRequest<R>,
    calls: &AtomicU64,
) -> Result<(), StorageError> {
    let run_index = request.run_index;
    let outcome = catch_unwind(AssertUnwindSafe(|| match &request.payload {
        StoragePayload::Result(result) => backend.write(run_index, result),
        StoragePayload::Error(message) => backend.write_error(run_index, message),
    }));
    calls.fetch_add(1, Ordering::AcqRel);
    match outcome {
        Ok(result) => {
            if let Err(e) = &result {
                warn!(run_index = run_index, error = %e, "Backend write failed");
            }
            result
        }
        Err(_) => {
            error!(run_index = run_index, "Backend panicked during write");
            Err(StorageError::Backend {
                run_index,
                reason: "backend panicked".into(),
            })
        }
    }
}

fn spawn_writer<R>(
    mut backend: BoxedBackend<R>,
    rx: Receiver<QueuedWrite<R>>,
    calls: Arc<AtomicU64>,
) -> std::io::Result<JoinHandle<BoxedBackend<R>>>
where
    R: Send + Sync + 'static,
{
    thread::Builder::new()
        .name("sweep-storage-writer".into())
        .spawn(move || {
            debug!("Storage writer started");
            for queued in &rx {
                let result = apply(&mut *backend, &queued.request, &calls);
                // The submitter may have dropped its ticket; the write still happened.
                let _ = queued.reply.send(result);
            }
            debug!("Storage writer exiting");
            backend
        })
}
