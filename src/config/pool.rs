//! Pool and sweep configuration structures.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::monitor::{ResourceCaps, NO_LIMIT};

/// How the storage backend is protected against concurrent calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WrapMode {
    /// No protection; only valid without a worker pool.
    Direct,
    /// Fair mutual exclusion around every backend call.
    #[default]
    Lock,
    /// Dedicated writer thread fed by a bounded channel.
    Queue,
}

impl FromStr for WrapMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" | "none" => Ok(Self::Direct),
            "lock" => Ok(Self::Lock),
            "queue" => Ok(Self::Queue),
            other => Err(format!(
                "invalid wrap mode '{other}'. expected one of: direct, lock, queue"
            )),
        }
    }
}

/// Execution and resource-cap settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of concurrent workers when the pool is used.
    pub worker_count: usize,
    /// Run on a worker pool instead of inline on the scheduler thread.
    pub use_pool: bool,
    /// CPU cap in percent; 100 means no limit.
    pub cpu_cap: f64,
    /// Memory cap in percent; 100 means no limit.
    pub memory_cap: f64,
    /// Swap cap in percent; 100 means no limit.
    pub swap_cap: f64,
    /// Storage protection mode.
    pub wrap_mode: WrapMode,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get(),
            use_pool: false,
            cpu_cap: NO_LIMIT,
            memory_cap: NO_LIMIT,
            swap_cap: NO_LIMIT,
            wrap_mode: WrapMode::default(),
        }
    }
}

impl PoolConfig {
    /// Validate pool configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        for (name, cap) in [
            ("cpu_cap", self.cpu_cap),
            ("memory_cap", self.memory_cap),
            ("swap_cap", self.swap_cap),
        ] {
            if !cap.is_finite() || cap <= 0.0 || cap > NO_LIMIT {
                return Err(format!("{name} must be in (0, 100], got {cap}"));
            }
        }
        if self.use_pool && self.wrap_mode == WrapMode::Direct {
            return Err(
                "wrap_mode `direct` cannot be combined with a worker pool; use `lock` or `queue`"
                    .into(),
            );
        }
        Ok(())
    }

    /// Caps as used by the resource monitor.
    #[must_use]
    pub const fn caps(&self) -> ResourceCaps {
        ResourceCaps {
            cpu: self.cpu_cap,
            memory: self.memory_cap,
            swap: self.swap_cap,
        }
    }
}

/// Configuration for the dedicated-thread worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Number of worker threads.
    pub worker_count: usize,
    /// Maximum runs waiting in the dispatch channel.
    pub max_queue_depth: usize,
    /// Stack size of each worker thread in bytes.
    pub thread_stack_size: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerPoolConfig {
    /// One worker per CPU, queue depth equal to the worker count, 2 MiB stacks.
    #[must_use]
    pub fn new() -> Self {
        let workers = num_cpus::get();
        Self {
            worker_count: workers,
            max_queue_depth: workers,
            thread_stack_size: DEFAULT_STACK_SIZE,
        }
    }

    /// Set the number of worker threads.
    #[must_use]
    pub const fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    /// Set the dispatch channel capacity.
    #[must_use]
    pub const fn with_max_queue_depth(mut self, depth: usize) -> Self {
        self.max_queue_depth = depth;
        self
    }

    /// Set the worker thread stack size.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, bytes: usize) -> Self {
        self.thread_stack_size = bytes;
        self
    }

    /// Validate worker pool settings.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        if self.max_queue_depth == 0 {
            return Err("max_queue_depth must be greater than 0".into());
        }
        if self.thread_stack_size < MIN_STACK_SIZE {
            return Err(format!(
                "thread_stack_size must be at least {MIN_STACK_SIZE} bytes"
            ));
        }
        Ok(())
    }
}

const DEFAULT_STACK_SIZE: usize = 2 * 1024 * 1024;
const MIN_STACK_SIZE: usize = 64 * 1024;

/// Environment variables read by [`SweepConfig::from_env`].
const ENV_KEYS: &[&str] = &[
    "SWEEP_WORKER_COUNT",
    "SWEEP_USE_POOL",
    "SWEEP_CPU_CAP",
    "SWEEP_MEMORY_CAP",
    "SWEEP_SWAP_CAP",
    "SWEEP_WRAP_MODE",
    "SWEEP_CONTINUABLE",
    "SWEEP_CONTINUE_DIR",
    "SWEEP_DELETE_CONTINUE",
    "SWEEP_CLEAN_UP_RUNS",
    "SWEEP_IMMEDIATE_POSTPROC",
    "SWEEP_POLL_INTERVAL_MS",
    "SWEEP_ADMISSION_GRACE_MS",
    "SWEEP_DRAIN_TIMEOUT_MS",
    "SWEEP_LEDGER_RETRIES",
    "SWEEP_THREAD_STACK_SIZE",
    "SWEEP_SCRATCH_ROOT",
];

/// Complete configuration of one sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Execution and resource-cap settings.
    pub pool: PoolConfig,
    /// Keep a checkpoint ledger and resume from it.
    pub continuable: bool,
    /// Directory holding ledger files.
    pub continue_dir: PathBuf,
    /// Delete the ledger after a fully successful sweep.
    pub delete_continue: bool,
    /// Remove per-run scratch directories when the sweep finishes.
    pub clean_up_runs: bool,
    /// Post-process each run as soon as it completes instead of after draining.
    pub immediate_postproc: bool,
    /// Interval between resource samples while waiting for admission.
    pub poll_interval_ms: u64,
    /// How long admission waits before forcing a start or degrading.
    pub admission_grace_ms: u64,
    /// Upper bound on the drain phase; `None` waits indefinitely.
    pub drain_timeout_ms: Option<u64>,
    /// Extra attempts for a failed ledger record.
    pub ledger_retries: u32,
    /// Worker thread stack size in bytes.
    pub thread_stack_size: usize,
    /// Parent directory for per-run scratch directories; `None` disables them.
    pub scratch_root: Option<PathBuf>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            continuable: true,
            continue_dir: PathBuf::from("continue"),
            delete_continue: true,
            clean_up_runs: true,
            immediate_postproc: false,
            poll_interval_ms: 100,
            admission_grace_ms: 5_000,
            drain_timeout_ms: None,
            ledger_retries: 3,
            thread_stack_size: DEFAULT_STACK_SIZE,
            scratch_root: None,
        }
    }
}

impl SweepConfig {
    /// Defaults: one worker per CPU, pool off, no caps, Lock mode, continuable.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the worker count.
    #[must_use]
    pub const fn with_worker_count(mut self, count: usize) -> Self {
        self.pool.worker_count = count;
        self
    }

    /// Enable or disable the worker pool.
    #[must_use]
    pub const fn with_use_pool(mut self, use_pool: bool) -> Self {
        self.pool.use_pool = use_pool;
        self
    }

    /// Set the CPU cap.
    #[must_use]
    pub const fn with_cpu_cap(mut self, cap: f64) -> Self {
        self.pool.cpu_cap = cap;
        self
    }

    /// Set the memory cap.
    #[must_use]
    pub const fn with_memory_cap(mut self, cap: f64) -> Self {
        self.pool.memory_cap = cap;
        self
    }

    /// Set the swap cap.
    #[must_use]
    pub const fn with_swap_cap(mut self, cap: f64) -> Self {
        self.pool.swap_cap = cap;
        self
    }

    /// Set the storage wrap mode.
    #[must_use]
    pub const fn with_wrap_mode(mut self, mode: WrapMode) -> Self {
        self.pool.wrap_mode = mode;
        self
    }

    /// Enable or disable checkpointing.
    #[must_use]
    pub const fn with_continuable(mut self, continuable: bool) -> Self {
        self.continuable = continuable;
        self
    }

    /// Set the ledger directory.
    #[must_use]
    pub fn with_continue_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.continue_dir = dir.into();
        self
    }

    /// Keep or delete the ledger after a successful sweep.
    #[must_use]
    pub const fn with_delete_continue(mut self, delete: bool) -> Self {
        self.delete_continue = delete;
        self
    }

    /// Remove per-run scratch directories at the end.
    #[must_use]
    pub const fn with_clean_up_runs(mut self, clean_up: bool) -> Self {
        self.clean_up_runs = clean_up;
        self
    }

    /// Post-process runs immediately.
    #[must_use]
    pub const fn with_immediate_postproc(mut self, immediate: bool) -> Self {
        self.immediate_postproc = immediate;
        self
    }

    /// Set the admission polling interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = duration_millis(interval);
        self
    }

    /// Set the admission grace period.
    #[must_use]
    pub fn with_admission_grace(mut self, grace: Duration) -> Self {
        self.admission_grace_ms = duration_millis(grace);
        self
    }

    /// Bound the drain phase.
    #[must_use]
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout_ms = Some(duration_millis(timeout));
        self
    }

    /// Set the number of ledger retries.
    #[must_use]
    pub const fn with_ledger_retries(mut self, retries: u32) -> Self {
        self.ledger_retries = retries;
        self
    }

    /// Set the worker thread stack size.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, bytes: usize) -> Self {
        self.thread_stack_size = bytes;
        self
    }

    /// Create per-run scratch directories under `root`.
    #[must_use]
    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }

    /// Validate all settings.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        self.pool.validate().map_err(|e| format!("pool invalid: {e}"))?;
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be greater than 0".into());
        }
        if self.continuable && self.continue_dir.as_os_str().is_empty() {
            return Err("continue_dir must not be empty when continuable".into());
        }
        if self.drain_timeout_ms == Some(0) {
            return Err("drain_timeout_ms must be greater than 0 when set".into());
        }
        self.worker_pool_config().validate()
    }

    /// Parse sweep configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns the parse or validation failure.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from `SWEEP_*` environment variables, loading `.env` first.
    ///
    /// Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns a description of the first unparseable or invalid value.
    pub fn from_env() -> Result<Self, String> {
        // A missing .env file is fine.
        let _ = dotenvy::dotenv();
        let mut envs = HashMap::new();
        for key in ENV_KEYS {
            if let Ok(value) = std::env::var(key) {
                envs.insert((*key).to_string(), value);
            }
        }
        Self::from_env_map(&envs)
    }

    /// Build configuration from an explicit variable map.
    ///
    /// # Errors
    ///
    /// Returns a description of the first unparseable or invalid value.
    pub fn from_env_map(envs: &HashMap<String, String>) -> Result<Self, String> {
        let mut cfg = Self::default();
        let get = |key: &str| {
            envs.get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(v) = get("SWEEP_WORKER_COUNT") {
            cfg.pool.worker_count = parse_var("SWEEP_WORKER_COUNT", &v)?;
        }
        if let Some(v) = get("SWEEP_USE_POOL") {
            cfg.pool.use_pool = parse_bool("SWEEP_USE_POOL", &v)?;
        }
        if let Some(v) = get("SWEEP_CPU_CAP") {
            cfg.pool.cpu_cap = parse_var("SWEEP_CPU_CAP", &v)?;
        }
        if let Some(v) = get("SWEEP_MEMORY_CAP") {
            cfg.pool.memory_cap = parse_var("SWEEP_MEMORY_CAP", &v)?;
        }
        if let Some(v) = get("SWEEP_SWAP_CAP") {
            cfg.pool.swap_cap = parse_var("SWEEP_SWAP_CAP", &v)?;
        }
        if let Some(v) = get("SWEEP_WRAP_MODE") {
            cfg.pool.wrap_mode = v.parse().map_err(|e| format!("SWEEP_WRAP_MODE: {e}"))?;
        }
        if let Some(v) = get("SWEEP_CONTINUABLE") {
            cfg.continuable = parse_bool("SWEEP_CONTINUABLE", &v)?;
        }
        if let Some(v) = get("SWEEP_CONTINUE_DIR") {
            cfg.continue_dir = PathBuf::from(v);
        }
        if let Some(v) = get("SWEEP_DELETE_CONTINUE") {
            cfg.delete_continue = parse_bool("SWEEP_DELETE_CONTINUE", &v)?;
        }
        if let Some(v) = get("SWEEP_CLEAN_UP_RUNS") {
            cfg.clean_up_runs = parse_bool("SWEEP_CLEAN_UP_RUNS", &v)?;
        }
        if let Some(v) = get("SWEEP_IMMEDIATE_POSTPROC") {
            cfg.immediate_postproc = parse_bool("SWEEP_IMMEDIATE_POSTPROC", &v)?;
        }
        if let Some(v) = get("SWEEP_POLL_INTERVAL_MS") {
            cfg.poll_interval_ms = parse_var("SWEEP_POLL_INTERVAL_MS", &v)?;
        }
        if let Some(v) = get("SWEEP_ADMISSION_GRACE_MS") {
            cfg.admission_grace_ms = parse_var("SWEEP_ADMISSION_GRACE_MS", &v)?;
        }
        if let Some(v) = get("SWEEP_DRAIN_TIMEOUT_MS") {
            cfg.drain_timeout_ms = Some(parse_var("SWEEP_DRAIN_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = get("SWEEP_LEDGER_RETRIES") {
            cfg.ledger_retries = parse_var("SWEEP_LEDGER_RETRIES", &v)?;
        }
        if let Some(v) = get("SWEEP_THREAD_STACK_SIZE") {
            cfg.thread_stack_size = parse_var("SWEEP_THREAD_STACK_SIZE", &v)?;
        }
        if let Some(v) = get("SWEEP_SCRATCH_ROOT") {
            cfg.scratch_root = Some(PathBuf::from(v));
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Admission polling interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Admission grace period.
    #[must_use]
    pub const fn admission_grace(&self) -> Duration {
        Duration::from_millis(self.admission_grace_ms)
    }

    /// Drain timeout, if any.
    #[must_use]
    pub fn drain_timeout(&self) -> Option<Duration> {
        self.drain_timeout_ms.map(Duration::from_millis)
    }

    /// Ledger file for the named sweep.
    #[must_use]
    pub fn ledger_path(&self, sweep: &str) -> PathBuf {
        self.continue_dir.join(format!("{sweep}.ledger.jsonl"))
    }

    /// Scratch directory of one run, if scratch directories are enabled.
    #[must_use]
    pub fn scratch_dir(&self, sweep: &str, run_name: &str) -> Option<PathBuf> {
        self.scratch_root
            .as_deref()
            .map(|root: &Path| root.join(sweep).join(run_name))
    }

    /// Worker pool settings derived from this sweep.
    #[must_use]
    pub const fn worker_pool_config(&self) -> WorkerPoolConfig {
        WorkerPoolConfig {
            worker_count: self.pool.worker_count,
            max_queue_depth: self.pool.worker_count,
            thread_stack_size: self.thread_stack_size,
        }
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn parse_var<T>(key: &str, value: &str) -> Result<T, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| format!("invalid {key}='{value}': {e}"))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(format!("invalid {key}='{value}': expected a boolean")),
    }
}
