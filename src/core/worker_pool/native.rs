//! Native implementation of `WorkerPool` using OS threads.
//!
//! This implementation spawns dedicated OS threads that each have their own
//! single-threaded tokio runtime, so long computations never block the caller.
//!
//! # Design Principles
//!
//! - **No polling**: workers block on the dispatch channel
//! - **Run to completion**: a started run always finishes; shutdown never interrupts it
//! - **Clean shutdown**: dropping the sender unblocks workers once the queue is drained

use std::any::Any;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tokio::runtime::Runtime;
use tracing::{debug, error, info, warn};

use crate::config::WorkerPoolConfig;
use crate::core::error::ComputationError;
use crate::core::executor::RunExecutor;
use crate::core::run::{RunStatus, RunUnit};
use crate::core::storage::{StorageProxy, StorageRequest};

use super::{PoolCounters, PoolError, PoolStats, RunHandle, RunOutcome, RunReport};

/// Lifecycle state of one worker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Waiting for a run.
    Idle,
    /// Executing a run.
    Running,
    /// The worker thread has exited.
    Terminated,
}

impl SlotState {
    const fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Running => 1,
            Self::Terminated => 2,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Running,
            _ => Self::Terminated,
        }
    }
}

/// Worker pool with dedicated OS threads for CPU-bound runs.
///
/// Workers pull runs FIFO from a bounded channel, execute them, hand the result (or
/// error payload) to the storage proxy, and report back on the report channel.
pub struct WorkerPool<R, E>
where
    R: Send + Sync + 'static,
    E: RunExecutor<R>,
{
    /// Pool configuration.
    config: WorkerPoolConfig,

    /// Run sender (to workers). Option allows clean shutdown by dropping.
    unit_tx: Mutex<Option<Sender<RunUnit>>>,

    /// Pool statistics counters (lock-free atomics).
    counters: Arc<PoolCounters>,

    /// Per-worker slot state.
    slots: Arc<Vec<AtomicU8>>,

    /// Shutdown flag (lock-free atomic).
    shutdown: AtomicBool,

    /// Worker thread handles.
    workers: Mutex<Vec<JoinHandle<()>>>,

    _marker: PhantomData<(fn() -> R, E)>,
}

impl<R, E> WorkerPool<R, E>
where
    R: Send + Sync + 'static,
    E: RunExecutor<R>,
{
    /// Create a new worker pool and spawn `config.worker_count` worker threads.
    ///
    /// Each worker submits its outcome to `storage` and then sends a [`RunReport`] on
    /// `reports`.
    ///
    /// # Errors
    ///
    /// - `PoolError::InvalidConfig` if the configuration is invalid
    /// - `PoolError::Internal` if a worker thread cannot be spawned
    pub fn new(
        config: WorkerPoolConfig,
        executor: E,
        storage: Arc<StorageProxy<R>>,
        reports: Sender<RunReport<R>>,
    ) -> Result<Self, PoolError> {
        config.validate().map_err(PoolError::InvalidConfig)?;

        let (unit_tx, unit_rx) = bounded::<RunUnit>(config.max_queue_depth);
        let counters = Arc::new(PoolCounters::default());
        let slots: Arc<Vec<AtomicU8>> = Arc::new(
            (0..config.worker_count)
                .map(|_| AtomicU8::new(SlotState::Idle.as_u8()))
                .collect(),
        );

        let mut workers = Vec::with_capacity(config.worker_count);
        for worker_id in 0..config.worker_count {
            let ctx = WorkerContext {
                worker_id,
                unit_rx: unit_rx.clone(),
                executor: executor.clone(),
                storage: Arc::clone(&storage),
                reports: reports.clone(),
                counters: Arc::clone(&counters),
                slots: Arc::clone(&slots),
            };
            match spawn_worker(ctx, config.thread_stack_size) {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    // Already spawned workers exit once the sender is dropped.
                    drop(unit_tx);
                    error!(worker_id = worker_id, error = %e, "Failed to spawn worker thread");
                    return Err(PoolError::Internal(format!(
                        "failed to spawn worker {worker_id}: {e}"
                    )));
                }
            }
        }

        info!(
            worker_count = config.worker_count,
            max_queue_depth = config.max_queue_depth,
            "WorkerPool initialized with dedicated OS threads"
        );

        Ok(Self {
            config,
            unit_tx: Mutex::new(Some(unit_tx)),
            counters,
            slots,
            shutdown: AtomicBool::new(false),
            workers: Mutex::new(workers),
            _marker: PhantomData,
        })
    }

    /// Submit a run for execution.
    ///
    /// The enqueue is non-blocking; it fails immediately if the queue is full.
    ///
    /// # Errors
    ///
    /// - `PoolError::QueueFull` if the dispatch queue is full
    /// - `PoolError::PoolShutdown` if the pool has been shut down
    pub fn submit(&self, mut unit: RunUnit) -> Result<RunHandle, PoolError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(PoolError::PoolShutdown);
        }

        let index = unit.index;
        unit.set_status(RunStatus::Running);

        let unit_tx_guard = self.unit_tx.lock();
        let Some(unit_tx) = unit_tx_guard.as_ref() else {
            return Err(PoolError::PoolShutdown);
        };

        // Count before sending so a fast worker never decrements below zero.
        self.counters.queued_runs.fetch_add(1, Ordering::Relaxed);
        match unit_tx.try_send(unit) {
            Ok(()) => {
                self.counters.submitted_runs.fetch_add(1, Ordering::Relaxed);
                debug!(run_index = index, "Run submitted to worker pool");
                Ok(RunHandle { index })
            }
            Err(TrySendError::Full(_)) => {
                self.counters.queued_runs.fetch_sub(1, Ordering::Relaxed);
                warn!(run_index = index, "Worker pool queue is full");
                Err(PoolError::QueueFull)
            }
            Err(TrySendError::Disconnected(_)) => {
                self.counters.queued_runs.fetch_sub(1, Ordering::Relaxed);
                Err(PoolError::PoolShutdown)
            }
        }
    }

    /// Number of worker threads.
    #[must_use]
    pub const fn worker_count(&self) -> usize {
        self.config.worker_count
    }

    /// Get current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot(self.config.worker_count)
    }

    /// Current state of every worker slot, indexed by worker id.
    #[must_use]
    pub fn slot_states(&self) -> Vec<SlotState> {
        self.slots
            .iter()
            .map(|slot| SlotState::from_u8(slot.load(Ordering::Acquire)))
            .collect()
    }

    /// Shut down the pool.
    ///
    /// Stops accepting runs, lets workers finish everything already queued, and joins them
    /// until `timeout` elapses. Workers still busy after that are detached and logged.
    /// Returns `true` if every worker was joined.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return true;
        }

        info!("Shutting down worker pool");

        // Drop the sender so workers exit once the queue is empty
        self.unit_tx.lock().take();

        let deadline = Instant::now() + timeout;
        let mut workers = self.workers.lock();
        let worker_count = workers.len();
        let mut all_joined = true;

        for (idx, worker) in workers.drain(..).enumerate() {
            // Join through a helper thread so the wait can time out
            let (tx, rx) = crossbeam_channel::bounded(1);
            let join_thread = thread::spawn(move || {
                let result = worker.join();
                let _ = tx.send(result.is_ok());
            });

            match rx.recv_deadline(deadline) {
                Ok(true) => {
                    debug!(worker_id = idx, "Worker joined successfully");
                    let _ = join_thread.join();
                }
                Ok(false) => {
                    warn!(worker_id = idx, "Worker panicked");
                    let _ = join_thread.join();
                }
                Err(_) => {
                    warn!(worker_id = idx, "Worker did not exit within timeout - detaching");
                    all_joined = false;
                }
            }
        }

        info!(
            worker_count = worker_count,
            all_joined = all_joined,
            "Worker pool shut down complete"
        );
        all_joined
    }
}

impl<R, E> Drop for WorkerPool<R, E>
where
    R: Send + Sync + 'static,
    E: RunExecutor<R>,
{
    fn drop(&mut self) {
        // Disconnect workers but never join in Drop; `shutdown` is the graceful path.
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            self.unit_tx.lock().take();
            debug!("WorkerPool dropped without explicit shutdown - workers will be detached");
        }
    }
}

/// Everything a worker thread owns.
struct WorkerContext<R, E> {
    worker_id: usize,
    unit_rx: Receiver<RunUnit>,
    executor: E,
    storage: Arc<StorageProxy<R>>,
    reports: Sender<RunReport<R>>,
    counters: Arc<PoolCounters>,
    slots: Arc<Vec<AtomicU8>>,
}

impl<R, E> WorkerContext<R, E> {
    fn set_slot(&self, state: SlotState) {
        if let Some(slot) = self.slots.get(self.worker_id) {
            slot.store(state.as_u8(), Ordering::Release);
        }
    }
}

/// Spawn a worker thread.
fn spawn_worker<R, E>(ctx: WorkerContext<R, E>, stack_size: usize) -> std::io::Result<JoinHandle<()>>
where
    R: Send + Sync + 'static,
    E: RunExecutor<R>,
{
    thread::Builder::new()
        .name(format!("sweep-worker-{}", ctx.worker_id))
        .stack_size(stack_size)
        .spawn(move || worker_loop(&ctx))
}

fn worker_loop<R, E>(ctx: &WorkerContext<R, E>)
where
    R: Send + Sync + 'static,
    E: RunExecutor<R>,
{
    let worker_id = ctx.worker_id;
    debug!(worker_id = worker_id, "Worker thread started");

    // Each worker has its own single-threaded tokio runtime
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(worker_id = worker_id, error = %e, "Failed to create worker runtime");
            ctx.set_slot(SlotState::Terminated);
            return;
        }
    };

    // Blocks until a run arrives; ends once the sender is dropped and the queue is empty
    for unit in &ctx.unit_rx {
        ctx.counters.queued_runs.fetch_sub(1, Ordering::Relaxed);
        ctx.counters.active_runs.fetch_add(1, Ordering::Relaxed);
        ctx.set_slot(SlotState::Running);

        let index = unit.index;
        debug!(worker_id = worker_id, run_index = index, "Worker executing run");

        let outcome = execute_unit(&rt, &ctx.executor, &unit, &ctx.storage);
        match &outcome {
            RunOutcome::Computed { .. } => {
                ctx.counters.completed_runs.fetch_add(1, Ordering::Relaxed);
                debug!(worker_id = worker_id, run_index = index, "Worker completed run");
            }
            RunOutcome::Failed { error, .. } => {
                ctx.counters.failed_runs.fetch_add(1, Ordering::Relaxed);
                warn!(worker_id = worker_id, run_index = index, error = %error, "Run failed");
            }
        }

        ctx.counters.active_runs.fetch_sub(1, Ordering::Relaxed);
        ctx.set_slot(SlotState::Idle);

        let report = RunReport {
            index,
            worker_id,
            outcome,
        };
        if ctx.reports.send(report).is_err() {
            debug!(worker_id = worker_id, run_index = index, "Report receiver gone");
        }
    }

    ctx.set_slot(SlotState::Terminated);
    debug!(worker_id = worker_id, "Worker thread exiting");
}

/// Execute one run and hand its outcome to storage.
///
/// Errors and panics of the computation are converted to [`RunOutcome::Failed`] with an
/// error payload submitted in place of the result. Shared by pool workers and inline
/// execution.
pub(crate) fn execute_unit<R, E>(
    rt: &Runtime,
    executor: &E,
    unit: &RunUnit,
    storage: &StorageProxy<R>,
) -> RunOutcome<R>
where
    R: Send + Sync + 'static,
    E: RunExecutor<R>,
{
    let computed = catch_unwind(AssertUnwindSafe(|| rt.block_on(executor.execute(unit))))
        .unwrap_or_else(|payload| Err(ComputationError::Panicked(panic_message(payload.as_ref()))));

    match computed {
        Ok(result) => {
            let result = Arc::new(result);
            let ticket = storage.submit(StorageRequest::result(unit.index, Arc::clone(&result)));
            RunOutcome::Computed { result, ticket }
        }
        Err(error) => {
            let ticket = storage.submit(StorageRequest::error(unit.index, error.to_string()));
            RunOutcome::Failed { error, ticket }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}
