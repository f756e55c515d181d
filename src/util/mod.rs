//! Shared utilities.

pub mod fs;
pub mod telemetry;

pub use fs::sync_parent_dir;
pub use telemetry::*;
