//! Run units: one parameter assignment plus its execution lifecycle.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Stable, 0-based position of a run inside its sweep.
pub type RunIndex = u64;

/// Insertion-ordered mapping of parameter name to value.
pub type Parameters = IndexMap<String, serde_json::Value>;

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Built but not yet dispatched.
    Pending,
    /// Dispatched to a worker or executing inline.
    Running,
    /// Result stored successfully.
    Completed,
    /// Computation or storage failed.
    Failed,
}

impl RunStatus {
    /// Whether this status is final.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Canonical name of a run, e.g. `run_00000042`.
#[must_use]
pub fn run_name(index: RunIndex) -> String {
    format!("run_{index:08}")
}

/// A single run of the sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunUnit {
    /// Position in the sweep.
    pub index: RunIndex,
    /// Parameter assignment for this run.
    pub parameters: Parameters,
    status: RunStatus,
    scratch_dir: Option<PathBuf>,
}

impl RunUnit {
    /// Create a pending run.
    #[must_use]
    pub const fn new(index: RunIndex, parameters: Parameters) -> Self {
        Self {
            index,
            parameters,
            status: RunStatus::Pending,
            scratch_dir: None,
        }
    }

    /// Attach a per-run scratch directory.
    #[must_use]
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> RunStatus {
        self.status
    }

    /// Scratch directory for ephemeral per-run files, if the sweep has a scratch root.
    #[must_use]
    pub fn scratch_dir(&self) -> Option<&Path> {
        self.scratch_dir.as_deref()
    }

    /// Canonical run name.
    #[must_use]
    pub fn name(&self) -> String {
        run_name(self.index)
    }

    /// Look up a parameter by name.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&serde_json::Value> {
        self.parameters.get(name)
    }

    pub(crate) fn set_status(&mut self, status: RunStatus) {
        self.status = status;
    }

    pub(crate) fn set_scratch_dir(&mut self, dir: PathBuf) {
        self.scratch_dir = Some(dir);
    }
}
