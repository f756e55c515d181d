//! Runtime integration: OS signals driving the scheduler's interrupt handle.

#[cfg(feature = "signal")]
pub mod signal;

#[cfg(feature = "signal")]
pub use signal::{install_ctrl_c, run_interruptible};
