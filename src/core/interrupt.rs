//! Cooperative interruption of a running sweep.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable flag asking the scheduler to stop admitting runs.
///
/// In-flight runs are never killed; the sweep drains them and reports `Aborted`.
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle {
    flag: Arc<AtomicBool>,
}

impl InterruptHandle {
    /// Create an unset handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request interruption. Idempotent.
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Whether interruption has been requested.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}
