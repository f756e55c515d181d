//! Core sweep abstractions: runs, parameter sources, admission, storage, ledger,
//! worker pool and the scheduler tying them together.

pub mod error;
pub mod executor;
pub mod interrupt;
pub mod ledger;
pub mod monitor;
pub mod params;
pub mod run;
pub mod scheduler;
pub mod storage;
pub mod worker_pool;

pub use error::{
    AppResult, ComputationError, LedgerError, ResourceMonitorError, StorageError, SweepError,
};
pub use executor::{
    from_async_fn, from_fn, AsyncFnExecutor, FnExecutor, PostProcessor, RunExecutor, RunFuture,
};
pub use interrupt::InterruptHandle;
pub use ledger::{CheckpointLedger, CheckpointRecord};
pub use monitor::{
    Admission, AdmissionTimeout, FixedProbe, ResourceCaps, ResourceMonitor, ResourceProbe,
    ResourceSnapshot, NO_LIMIT,
};
pub use params::{Combination, ParameterGrid, ParameterSource};
pub use run::{run_name, Parameters, RunIndex, RunStatus, RunUnit};
pub use scheduler::{FailedRun, Scheduler, SchedulerState, SweepOutcome, SweepReport};
pub use storage::{
    RequestKind, StorageBackend, StoragePayload, StorageProxy, StorageRequest, StoreTicket,
};
pub use worker_pool::{
    PoolError, PoolStats, RunHandle, RunOutcome, RunReport, SlotState, WorkerPool,
};
