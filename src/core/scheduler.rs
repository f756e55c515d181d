//! Sweep scheduler: admission, dispatch, collection and checkpointing.
//!
//! The scheduler is the single coordinating context of a sweep. It walks the
//! states `Building → Admitting → Draining → Finished`:
//!
//! - **Building**: enumerate runs, subtract the ledger's completed set, open storage
//! - **Admitting**: FIFO by index, wait for a free slot and for the resource monitor,
//!   then dispatch to the worker pool or execute inline
//! - **Draining**: wait for in-flight runs, optionally bounded by a drain timeout
//! - **Finished**: shut down workers, close storage, clean up and report
//!
//! Every completion is checkpointed from this thread only, after its storage write
//! succeeded. Per-run failures never abort the sweep.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs;
use std::io::ErrorKind;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};
use tokio::runtime::Runtime;
use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::config::SweepConfig;
use crate::core::error::SweepError;
use crate::core::executor::{PostProcessor, RunExecutor};
use crate::core::interrupt::InterruptHandle;
use crate::core::ledger::CheckpointLedger;
use crate::core::monitor::{Admission, ResourceMonitor, ResourceProbe};
use crate::core::params::ParameterSource;
use crate::core::run::{run_name, Parameters, RunIndex, RunStatus, RunUnit};
use crate::core::storage::{StorageBackend, StorageProxy};
use crate::core::worker_pool::{execute_unit, RunOutcome, RunReport, WorkerPool};
use crate::infra::ledger::FileLedger;
use crate::infra::procfs::ProcProbe;

const LEDGER_RETRY_BACKOFF: Duration = Duration::from_millis(10);
const WORKER_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Lifecycle state of a [`Scheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Collecting collaborators and enumerating runs.
    Building,
    /// Admitting and dispatching runs.
    Admitting,
    /// Waiting for in-flight runs.
    Draining,
    /// Done; the report has been produced.
    Finished,
}

/// A failed run and its error payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedRun {
    /// Run index.
    pub index: RunIndex,
    /// Computation or storage error message.
    pub error: String,
}

/// Overall result of a sweep session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepOutcome {
    /// Every run of this session completed.
    Success,
    /// All runs finished but some failed.
    PartialFailure {
        /// Failed runs in completion order.
        failed: Vec<FailedRun>,
    },
    /// Interrupted, drain timeout elapsed, or workers lost before draining completed.
    Aborted {
        /// Runs that failed before the abort.
        failed: Vec<FailedRun>,
        /// Runs that never reached a terminal status.
        unfinished: Vec<RunIndex>,
    },
}

/// Summary of one scheduler session.
#[derive(Debug)]
pub struct SweepReport<R> {
    /// Sweep name.
    pub sweep: String,
    /// Session id, also present on every log line of the session.
    pub session: Uuid,
    /// Overall outcome.
    pub status: SweepOutcome,
    /// Final status of every run handled in this session.
    pub statuses: BTreeMap<RunIndex, RunStatus>,
    /// Results of runs completed in this session, by index.
    pub results: BTreeMap<RunIndex, Arc<R>>,
    /// Runs skipped because the ledger already listed them.
    pub skipped: BTreeSet<RunIndex>,
    /// Completed runs whose ledger record failed; a resume runs them again.
    pub unrecorded: Vec<RunIndex>,
    /// Whether admission fell back to one run at a time.
    pub degraded: bool,
    /// Wall time of the session.
    pub elapsed: Duration,
}

impl<R> SweepReport<R> {
    /// Whether every run of this session completed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == SweepOutcome::Success
    }

    /// Failed runs, whatever the outcome.
    #[must_use]
    pub fn failed(&self) -> &[FailedRun] {
        match &self.status {
            SweepOutcome::Success => &[],
            SweepOutcome::PartialFailure { failed } | SweepOutcome::Aborted { failed, .. } => {
                failed.as_slice()
            }
        }
    }

    /// Number of runs completed in this session.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.statuses
            .values()
            .filter(|s| **s == RunStatus::Completed)
            .count()
    }
}

/// Where admitted runs execute.
enum Dispatch<R, E>
where
    R: Send + Sync + 'static,
    E: RunExecutor<R>,
{
    Pool(WorkerPool<R, E>),
    Inline { runtime: Runtime, executor: E },
}

/// Mutable bookkeeping of one session.
struct Session<R> {
    sweep: String,
    units: BTreeMap<RunIndex, RunUnit>,
    results: BTreeMap<RunIndex, Arc<R>>,
    failed: Vec<FailedRun>,
    unrecorded: Vec<RunIndex>,
    in_flight: usize,
    degraded: bool,
    ledger: Option<Box<dyn CheckpointLedger>>,
    ledger_retries: u32,
    post_processor: Option<Box<dyn PostProcessor<R>>>,
    immediate_postproc: bool,
}

impl<R> Session<R> {
    fn collect(&mut self, report: RunReport<R>) {
        self.in_flight = self.in_flight.saturating_sub(1);
        let RunReport {
            index,
            worker_id,
            outcome,
        } = report;
        match outcome {
            RunOutcome::Computed { result, ticket } => match ticket.wait() {
                Ok(()) => self.complete(index, result),
                Err(e) => self.fail(index, format!("storage failed: {e}")),
            },
            RunOutcome::Failed { error, ticket } => {
                if let Err(e) = ticket.wait() {
                    warn!(run_index = index, error = %e, "Error payload could not be stored");
                }
                self.fail(index, error.to_string());
            }
        }
        debug!(
            run_index = index,
            worker_id = worker_id,
            in_flight = self.in_flight,
            "Collected run"
        );
    }

    fn complete(&mut self, index: RunIndex, result: Arc<R>) {
        self.set_status(index, RunStatus::Completed);
        self.record(index);
        if self.immediate_postproc {
            self.post_process(index, &result);
        }
        self.results.insert(index, result);
    }

    fn fail(&mut self, index: RunIndex, error: String) {
        warn!(run_index = index, error = %error, "Run failed");
        self.set_status(index, RunStatus::Failed);
        self.failed.push(FailedRun { index, error });
    }

    fn set_status(&mut self, index: RunIndex, status: RunStatus) {
        if let Some(unit) = self.units.get_mut(&index) {
            unit.set_status(status);
        }
    }

    /// Checkpoint a completion, retrying transient ledger failures.
    fn record(&mut self, index: RunIndex) {
        let Some(ledger) = self.ledger.as_mut() else {
            return;
        };
        let attempts = self.ledger_retries.saturating_add(1);
        for attempt in 1..=attempts {
            match ledger.record(index) {
                Ok(()) => return,
                Err(e) => {
                    warn!(
                        run_index = index,
                        attempt = attempt,
                        attempts = attempts,
                        error = %e,
                        "Ledger record failed"
                    );
                    if attempt < attempts {
                        std::thread::sleep(LEDGER_RETRY_BACKOFF * attempt);
                    }
                }
            }
        }
        error!(
            run_index = index,
            "Run completed but was not checkpointed; a resume will run it again"
        );
        self.unrecorded.push(index);
    }

    fn post_process(&mut self, index: RunIndex, result: &R) {
        let (Some(post), Some(unit)) = (self.post_processor.as_mut(), self.units.get(&index)) else {
            return;
        };
        if catch_unwind(AssertUnwindSafe(|| post.on_completed(unit, result))).is_err() {
            error!(run_index = index, "Post-processor panicked");
        }
    }

    fn post_process_all(&mut self) {
        let completed: Vec<(RunIndex, Arc<R>)> = self
            .results
            .iter()
            .map(|(index, result)| (*index, Arc::clone(result)))
            .collect();
        for (index, result) in completed {
            self.post_process(index, &result);
        }
    }

    fn unfinished(&self) -> Vec<RunIndex> {
        self.units
            .values()
            .filter(|unit| !unit.status().is_terminal())
            .map(|unit| unit.index)
            .collect()
    }
}

/// Outcome of waiting for one report.
enum Received<R> {
    Report(RunReport<R>),
    TimedOut,
    Disconnected,
}

fn receive<R>(rx: &Receiver<RunReport<R>>, deadline: Option<Instant>) -> Received<R> {
    match deadline {
        Some(deadline) => match rx.recv_deadline(deadline) {
            Ok(report) => Received::Report(report),
            Err(RecvTimeoutError::Timeout) => Received::TimedOut,
            Err(RecvTimeoutError::Disconnected) => Received::Disconnected,
        },
        None => rx
            .recv()
            .map_or(Received::Disconnected, Received::Report),
    }
}

/// Coordinates one sweep from enumeration to report.
///
/// `run` blocks the calling thread and drives its own runtimes; do not call it from
/// inside an async context.
///
/// # Example
///
/// ```rust,ignore
/// let report = Scheduler::new(SweepConfig::new().with_use_pool(true), executor)
///     .with_source(grid)
///     .with_backend(JsonlBackend::new("results.jsonl"))
///     .run()?;
/// ```
pub struct Scheduler<R, E>
where
    R: Send + Sync + 'static,
    E: RunExecutor<R>,
{
    config: SweepConfig,
    executor: E,
    source: Option<Box<dyn ParameterSource>>,
    backend: Option<Box<dyn StorageBackend<R>>>,
    ledger: Option<Box<dyn CheckpointLedger>>,
    probe: Option<Arc<dyn ResourceProbe>>,
    post_processor: Option<Box<dyn PostProcessor<R>>>,
    interrupt: InterruptHandle,
    state: SchedulerState,
}

impl<R, E> Scheduler<R, E>
where
    R: Send + Sync + 'static,
    E: RunExecutor<R>,
{
    /// Scheduler for `executor` configured by `config`.
    pub fn new(config: SweepConfig, executor: E) -> Self {
        Self {
            config,
            executor,
            source: None,
            backend: None,
            ledger: None,
            probe: None,
            post_processor: None,
            interrupt: InterruptHandle::new(),
            state: SchedulerState::Building,
        }
    }

    /// Set the parameter source (required).
    #[must_use]
    pub fn with_source<S: ParameterSource + 'static>(mut self, source: S) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Set the storage backend (required).
    #[must_use]
    pub fn with_backend<B: StorageBackend<R>>(mut self, backend: B) -> Self {
        self.backend = Some(Box::new(backend));
        self
    }

    /// Set an already boxed storage backend, e.g. from
    /// [`backend_for_path`](crate::infra::backend::backend_for_path).
    #[must_use]
    pub fn with_boxed_backend(mut self, backend: Box<dyn StorageBackend<R>>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Use a custom ledger instead of the file ledger under `continue_dir`.
    #[must_use]
    pub fn with_ledger<L: CheckpointLedger + 'static>(mut self, ledger: L) -> Self {
        self.ledger = Some(Box::new(ledger));
        self
    }

    /// Use a custom resource probe instead of procfs.
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn ResourceProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Call `post_processor` for every completed run.
    #[must_use]
    pub fn with_post_processor<P: PostProcessor<R> + 'static>(mut self, post_processor: P) -> Self {
        self.post_processor = Some(Box::new(post_processor));
        self
    }

    /// Handle that stops admission when triggered.
    #[must_use]
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SchedulerState {
        self.state
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &SweepConfig {
        &self.config
    }

    fn transition(&mut self, next: SchedulerState) {
        info!(from = ?self.state, to = ?next, "Scheduler state change");
        self.state = next;
    }

    /// Run the sweep to completion, interruption or drain timeout.
    ///
    /// # Errors
    ///
    /// Only startup problems: invalid configuration or parameter source, missing
    /// collaborators, an unreadable or foreign ledger, or failure to start workers or
    /// storage. Per-run failures are reported in [`SweepReport`].
    pub fn run(&mut self) -> Result<SweepReport<R>, SweepError> {
        if self.state != SchedulerState::Building {
            return Err(SweepError::AlreadyRun);
        }
        let started = Instant::now();

        self.config.validate().map_err(SweepError::InvalidConfig)?;
        let source = self
            .source
            .take()
            .ok_or(SweepError::MissingCollaborator("parameter source"))?;
        source
            .validate()
            .map_err(|e| SweepError::InvalidConfig(format!("parameter source invalid: {e}")))?;
        let backend = self
            .backend
            .take()
            .ok_or(SweepError::MissingCollaborator("storage backend"))?;

        let sweep = source.name().to_string();
        let session_id = Uuid::new_v4();
        let span = info_span!("sweep", sweep = %sweep, session = %session_id);
        let _guard = span.enter();

        let runs = source.enumerate();
        let total = runs.len() as u64;
        let mut seen = BTreeSet::new();
        if let Some((duplicate, _)) = runs.iter().find(|(index, _)| !seen.insert(*index)) {
            return Err(SweepError::InvalidConfig(format!(
                "parameter source yielded run index {duplicate} more than once"
            )));
        }

        let mut ledger = self.open_ledger(&sweep, total);
        let done = match ledger.as_mut() {
            Some(ledger) => ledger.load()?,
            None => BTreeSet::new(),
        };
        let (units, skipped) = partition_runs(runs, &done);
        info!(
            total_runs = total,
            pending = units.len(),
            skipped = skipped.len(),
            continuable = self.config.continuable,
            use_pool = self.config.pool.use_pool,
            wrap_mode = ?self.config.pool.wrap_mode,
            "Sweep built"
        );

        let probe: Arc<dyn ResourceProbe> = match self.probe.take() {
            Some(probe) => probe,
            None => Arc::new(ProcProbe::new()),
        };
        let monitor = ResourceMonitor::new(self.config.pool.caps(), probe)
            .with_poll_interval(self.config.poll_interval())
            .with_grace_period(self.config.admission_grace());

        let storage_depth = self.config.pool.worker_count.saturating_mul(4);
        let storage = Arc::new(StorageProxy::new(
            self.config.pool.wrap_mode,
            backend,
            storage_depth,
        )?);

        let (report_tx, report_rx) = unbounded();
        let dispatch = if self.config.pool.use_pool {
            Dispatch::Pool(WorkerPool::new(
                self.config.worker_pool_config(),
                self.executor.clone(),
                Arc::clone(&storage),
                report_tx,
            )?)
        } else {
            drop(report_tx);
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            Dispatch::Inline {
                runtime,
                executor: self.executor.clone(),
            }
        };

        let mut session = Session {
            sweep,
            units,
            results: BTreeMap::new(),
            failed: Vec::new(),
            unrecorded: Vec::new(),
            in_flight: 0,
            degraded: false,
            ledger,
            ledger_retries: self.config.ledger_retries,
            post_processor: self.post_processor.take(),
            immediate_postproc: self.config.immediate_postproc,
        };

        self.transition(SchedulerState::Admitting);
        let mut aborted = self.admit_all(&mut session, &dispatch, &monitor, &storage, &report_rx);

        self.transition(SchedulerState::Draining);
        aborted |= self.drain(&mut session, &report_rx);
        aborted |= self.interrupt.is_interrupted();
        if !session.immediate_postproc {
            session.post_process_all();
        }

        self.transition(SchedulerState::Finished);
        let grace = if aborted && session.in_flight > 0 {
            Duration::ZERO
        } else {
            WORKER_SHUTDOWN_GRACE
        };
        if let Dispatch::Pool(pool) = &dispatch {
            pool.shutdown(grace);
        }
        match storage.close() {
            Ok(calls) => debug!(backend_calls = calls, "Storage closed"),
            Err(e) => error!(error = %e, "Closing storage failed"),
        }
        if self.config.clean_up_runs {
            self.clean_up(&session);
        }

        let status = if aborted {
            SweepOutcome::Aborted {
                failed: session.failed.clone(),
                unfinished: session.unfinished(),
            }
        } else if session.failed.is_empty() {
            SweepOutcome::Success
        } else {
            SweepOutcome::PartialFailure {
                failed: session.failed.clone(),
            }
        };

        self.finish_ledger(&mut session, &status);

        let report = SweepReport {
            sweep: session.sweep.clone(),
            session: session_id,
            statuses: session
                .units
                .iter()
                .map(|(index, unit)| (*index, unit.status()))
                .collect(),
            results: std::mem::take(&mut session.results),
            skipped,
            unrecorded: std::mem::take(&mut session.unrecorded),
            degraded: session.degraded,
            elapsed: started.elapsed(),
            status,
        };

        info!(
            completed = report.completed(),
            failed = report.failed().len(),
            skipped = report.skipped.len(),
            unrecorded = report.unrecorded.len(),
            degraded = report.degraded,
            elapsed_ms = u64::try_from(report.elapsed.as_millis()).unwrap_or(u64::MAX),
            outcome = ?report.status,
            "Sweep finished"
        );
        Ok(report)
    }

    fn open_ledger(&mut self, sweep: &str, total: u64) -> Option<Box<dyn CheckpointLedger>> {
        if !self.config.continuable {
            if self.ledger.take().is_some() {
                debug!("Ignoring supplied ledger because the sweep is not continuable");
            }
            return None;
        }
        let ledger: Box<dyn CheckpointLedger> = match self.ledger.take() {
            Some(ledger) => ledger,
            None => Box::new(FileLedger::open(self.config.ledger_path(sweep), sweep, total)),
        };
        Some(ledger)
    }

    /// Admit and dispatch every pending run. Returns `true` if the sweep was aborted.
    fn admit_all(
        &self,
        session: &mut Session<R>,
        dispatch: &Dispatch<R, E>,
        monitor: &ResourceMonitor,
        storage: &StorageProxy<R>,
        reports: &Receiver<RunReport<R>>,
    ) -> bool {
        let capacity = match dispatch {
            Dispatch::Pool(pool) => pool.worker_count(),
            Dispatch::Inline { .. } => 1,
        };
        let mut pending: VecDeque<RunIndex> = session.units.keys().copied().collect();

        while let Some(&index) = pending.front() {
            if self.interrupt.is_interrupted() {
                info!(remaining = pending.len(), "Interrupted, no further runs will be admitted");
                return true;
            }

            // Wait for a free slot.
            let limit = if session.degraded { 1 } else { capacity };
            while session.in_flight >= limit {
                match receive(reports, None) {
                    Received::Report(report) => session.collect(report),
                    Received::TimedOut | Received::Disconnected => {
                        error!("All workers exited with runs in flight");
                        return true;
                    }
                }
            }
            while let Ok(report) = reports.try_recv() {
                session.collect(report);
            }

            let admission = monitor.wait_for_admission_with(
                || {
                    while let Ok(report) = reports.try_recv() {
                        session.collect(report);
                    }
                    session.in_flight
                },
                &self.interrupt,
            );
            match admission {
                Ok(Admission::Granted | Admission::Forced) => {}
                Ok(Admission::Interrupted) => {
                    info!(remaining = pending.len(), "Interrupted while waiting for admission");
                    return true;
                }
                Err(timeout) => {
                    if !session.degraded {
                        warn!(
                            in_flight = timeout.in_flight,
                            waited_ms = u64::try_from(timeout.waited.as_millis()).unwrap_or(u64::MAX),
                            "Sustained resource overload, degrading to one run at a time"
                        );
                        session.degraded = true;
                    }
                    while session.in_flight > 0 {
                        match receive(reports, None) {
                            Received::Report(report) => session.collect(report),
                            Received::TimedOut | Received::Disconnected => {
                                error!("All workers exited with runs in flight");
                                return true;
                            }
                        }
                    }
                    continue;
                }
            }

            pending.pop_front();
            self.dispatch(session, dispatch, storage, index);
        }
        false
    }

    fn dispatch(
        &self,
        session: &mut Session<R>,
        dispatch: &Dispatch<R, E>,
        storage: &StorageProxy<R>,
        index: RunIndex,
    ) {
        let Some(unit) = session.units.get_mut(&index) else {
            return;
        };
        if unit.scratch_dir().is_none() {
            if let Some(dir) = self.config.scratch_dir(&session.sweep, &run_name(index)) {
                match fs::create_dir_all(&dir) {
                    Ok(()) => unit.set_scratch_dir(dir),
                    Err(e) => warn!(run_index = index, error = %e, "Could not create scratch directory"),
                }
            }
        }
        unit.set_status(RunStatus::Running);
        let unit = unit.clone();

        match dispatch {
            Dispatch::Pool(pool) => match pool.submit(unit) {
                Ok(handle) => {
                    session.in_flight += 1;
                    debug!(run_index = handle.index, in_flight = session.in_flight, "Run dispatched");
                }
                Err(e) => {
                    error!(run_index = index, error = %e, "Dispatch failed");
                    session.fail(index, format!("dispatch failed: {e}"));
                }
            },
            Dispatch::Inline { runtime, executor } => {
                debug!(run_index = index, "Executing run inline");
                let outcome = execute_unit(runtime, executor, &unit, storage);
                session.in_flight += 1;
                session.collect(RunReport {
                    index,
                    worker_id: 0,
                    outcome,
                });
            }
        }
    }

    /// Wait for in-flight runs. Returns `true` if the drain timeout elapsed first.
    fn drain(&self, session: &mut Session<R>, reports: &Receiver<RunReport<R>>) -> bool {
        let deadline = self.config.drain_timeout().map(|timeout| Instant::now() + timeout);
        if session.in_flight > 0 {
            info!(in_flight = session.in_flight, "Draining in-flight runs");
        }
        while session.in_flight > 0 {
            match receive(reports, deadline) {
                Received::Report(report) => session.collect(report),
                Received::TimedOut => {
                    warn!(in_flight = session.in_flight, "Drain timeout elapsed with runs in flight");
                    return true;
                }
                Received::Disconnected => {
                    error!(in_flight = session.in_flight, "All workers exited with runs in flight");
                    return true;
                }
            }
        }
        false
    }

    /// Remove scratch directories of runs that reached a terminal status.
    fn clean_up(&self, session: &Session<R>) {
        let mut removed = 0usize;
        for unit in session.units.values().filter(|u| u.status().is_terminal()) {
            let Some(dir) = unit.scratch_dir() else {
                continue;
            };
            match fs::remove_dir_all(dir) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(run_index = unit.index, error = %e, "Could not remove scratch directory"),
            }
        }
        if let Some(root) = &self.config.scratch_root {
            // Only succeeds once every run directory is gone.
            let _ = fs::remove_dir(root.join(&session.sweep));
        }
        debug!(removed = removed, "Cleaned up run scratch directories");
    }

    fn finish_ledger(&self, session: &mut Session<R>, status: &SweepOutcome) {
        let Some(ledger) = session.ledger.as_mut() else {
            return;
        };
        if *status == SweepOutcome::Success && session.unrecorded.is_empty() {
            if self.config.delete_continue {
                if let Err(e) = ledger.delete() {
                    warn!(error = %e, "Could not delete checkpoint ledger");
                }
            }
        } else {
            info!("Checkpoint ledger kept; run the sweep again to resume");
        }
    }
}

/// Split enumerated runs into pending units and indices already checkpointed.
fn partition_runs(
    runs: Vec<(RunIndex, Parameters)>,
    done: &BTreeSet<RunIndex>,
) -> (BTreeMap<RunIndex, RunUnit>, BTreeSet<RunIndex>) {
    let mut units = BTreeMap::new();
    let mut skipped = BTreeSet::new();
    for (index, parameters) in runs {
        if done.contains(&index) {
            skipped.insert(index);
        } else {
            units.insert(index, RunUnit::new(index, parameters));
        }
    }
    (units, skipped)
}
