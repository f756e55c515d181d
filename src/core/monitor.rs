//! Resource-cap admission control.
//!
//! The monitor is advisory: it samples host load before a run is started and
//! throttles new starts, but it reserves nothing. Two runs admitted back to back
//! may together push the host over a cap.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::error::ResourceMonitorError;
use crate::core::interrupt::InterruptHandle;

/// Cap value meaning "no limit".
pub const NO_LIMIT: f64 = 100.0;

/// Point-in-time host load, each field a percentage in `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    /// CPU busy percentage.
    pub cpu_percent: f64,
    /// Physical memory in use.
    pub memory_percent: f64,
    /// Swap in use.
    pub swap_percent: f64,
}

impl ResourceSnapshot {
    /// Build a snapshot.
    #[must_use]
    pub const fn new(cpu_percent: f64, memory_percent: f64, swap_percent: f64) -> Self {
        Self {
            cpu_percent,
            memory_percent,
            swap_percent,
        }
    }
}

/// CPU, memory and swap caps in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceCaps {
    /// CPU cap.
    pub cpu: f64,
    /// Memory cap.
    pub memory: f64,
    /// Swap cap.
    pub swap: f64,
}

impl Default for ResourceCaps {
    fn default() -> Self {
        Self::unlimited()
    }
}

impl ResourceCaps {
    /// All caps at 100.
    #[must_use]
    pub const fn unlimited() -> Self {
        Self {
            cpu: NO_LIMIT,
            memory: NO_LIMIT,
            swap: NO_LIMIT,
        }
    }

    /// Whether no cap restricts anything, so sampling can be skipped.
    #[must_use]
    pub fn is_unlimited(&self) -> bool {
        self.cpu >= NO_LIMIT && self.memory >= NO_LIMIT && self.swap >= NO_LIMIT
    }

    /// Names of the caps the snapshot is at or above. A cap of 100 never triggers.
    #[must_use]
    pub fn exceeded(&self, snapshot: &ResourceSnapshot) -> Vec<&'static str> {
        let checks = [
            ("cpu", snapshot.cpu_percent, self.cpu),
            ("memory", snapshot.memory_percent, self.memory),
            ("swap", snapshot.swap_percent, self.swap),
        ];
        checks
            .into_iter()
            .filter(|&(_, value, cap)| cap < NO_LIMIT && value >= cap)
            .map(|(name, _, _)| name)
            .collect()
    }
}

/// Source of resource snapshots.
pub trait ResourceProbe: Send + Sync {
    /// Take one sample.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceMonitorError`] when the host cannot be read.
    fn sample(&self) -> Result<ResourceSnapshot, ResourceMonitorError>;
}

/// Probe returning a settable snapshot.
#[derive(Debug, Default)]
pub struct FixedProbe {
    snapshot: Mutex<ResourceSnapshot>,
    failing: Mutex<bool>,
}

impl FixedProbe {
    /// Probe that always reports `snapshot`.
    #[must_use]
    pub fn new(snapshot: ResourceSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            failing: Mutex::new(false),
        }
    }

    /// Replace the reported snapshot.
    pub fn set(&self, snapshot: ResourceSnapshot) {
        *self.snapshot.lock() = snapshot;
    }

    /// Make subsequent samples fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }
}

impl ResourceProbe for FixedProbe {
    fn sample(&self) -> Result<ResourceSnapshot, ResourceMonitorError> {
        if *self.failing.lock() {
            return Err(ResourceMonitorError::Unavailable("fixed probe set to fail".into()));
        }
        Ok(*self.snapshot.lock())
    }
}

/// Result of waiting for admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// All caps are respected.
    Granted,
    /// A cap is still exceeded but nothing is running; admitted to keep the sweep alive.
    Forced,
    /// Interruption was requested while waiting.
    Interrupted,
}

/// The grace period elapsed with runs still in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionTimeout {
    /// How long admission was attempted.
    pub waited: Duration,
    /// Runs in flight when it gave up.
    pub in_flight: usize,
}

impl std::fmt::Display for AdmissionTimeout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "admission timed out after {:?} with {} runs in flight",
            self.waited, self.in_flight
        )
    }
}

impl std::error::Error for AdmissionTimeout {}

/// Decides whether a new run may start given current host load.
pub struct ResourceMonitor {
    caps: ResourceCaps,
    probe: Arc<dyn ResourceProbe>,
    poll_interval: Duration,
    grace_period: Duration,
}

impl std::fmt::Debug for ResourceMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceMonitor")
            .field("caps", &self.caps)
            .field("poll_interval", &self.poll_interval)
            .field("grace_period", &self.grace_period)
            .finish_non_exhaustive()
    }
}

impl ResourceMonitor {
    /// Create a monitor with a 100ms poll interval and a 5s grace period.
    pub fn new(caps: ResourceCaps, probe: Arc<dyn ResourceProbe>) -> Self {
        Self {
            caps,
            probe,
            poll_interval: Duration::from_millis(100),
            grace_period: Duration::from_secs(5),
        }
    }

    /// Set the interval between samples while waiting.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set how long admission waits before the liveness rule kicks in.
    #[must_use]
    pub const fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    /// Configured caps.
    #[must_use]
    pub const fn caps(&self) -> ResourceCaps {
        self.caps
    }

    /// Take a snapshot from the probe.
    ///
    /// # Errors
    ///
    /// Propagates the probe's [`ResourceMonitorError`].
    pub fn sample(&self) -> Result<ResourceSnapshot, ResourceMonitorError> {
        self.probe.sample()
    }

    /// Whether all caps are currently respected. Sampling errors admit.
    #[must_use]
    pub fn admit(&self) -> bool {
        if self.caps.is_unlimited() {
            return true;
        }
        match self.sample() {
            Ok(snapshot) => {
                let exceeded = self.caps.exceeded(&snapshot);
                if !exceeded.is_empty() {
                    debug!(
                        cpu = snapshot.cpu_percent,
                        memory = snapshot.memory_percent,
                        swap = snapshot.swap_percent,
                        exceeded = ?exceeded,
                        "Resource cap exceeded, holding admission"
                    );
                }
                exceeded.is_empty()
            }
            Err(e) => {
                warn!(error = %e, "Resource sampling failed, admitting run");
                true
            }
        }
    }

    /// Block until a run may start, with a fixed number of runs in flight.
    ///
    /// Polls [`admit`](Self::admit) every poll interval. Once the grace period has elapsed
    /// with `in_flight == 0` the run is admitted anyway ([`Admission::Forced`]); with runs in
    /// flight an [`AdmissionTimeout`] is returned so the caller can degrade.
    ///
    /// # Errors
    ///
    /// [`AdmissionTimeout`] when the grace period elapsed while runs were in flight.
    pub fn wait_for_admission(
        &self,
        in_flight: usize,
        interrupt: &InterruptHandle,
    ) -> Result<Admission, AdmissionTimeout> {
        self.wait_for_admission_with(|| in_flight, interrupt)
    }

    /// Like [`wait_for_admission`](Self::wait_for_admission), but asks `in_flight` for the
    /// current count on every poll. Runs finishing during the grace period therefore lead
    /// to [`Admission::Forced`] instead of a timeout.
    ///
    /// # Errors
    ///
    /// [`AdmissionTimeout`] when the grace period elapsed while runs were still in flight.
    pub fn wait_for_admission_with<F>(
        &self,
        mut in_flight: F,
        interrupt: &InterruptHandle,
    ) -> Result<Admission, AdmissionTimeout>
    where
        F: FnMut() -> usize,
    {
        let started = Instant::now();
        loop {
            if interrupt.is_interrupted() {
                return Ok(Admission::Interrupted);
            }
            if self.admit() {
                return Ok(Admission::Granted);
            }

            let waited = started.elapsed();
            if waited >= self.grace_period {
                let in_flight = in_flight();
                if in_flight == 0 {
                    warn!(
                        waited_ms = u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
                        "Resource caps still exceeded with nothing running, forcing admission"
                    );
                    return Ok(Admission::Forced);
                }
                return Err(AdmissionTimeout { waited, in_flight });
            }

            // Keep the caller's bookkeeping current while waiting.
            in_flight();
            std::thread::sleep(self.poll_interval.min(self.grace_period - waited));
        }
    }
}
