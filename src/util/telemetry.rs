//! Telemetry helpers for structured logging.

use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "sweep_scheduler=info";

/// Install a default `fmt` subscriber filtered by `RUST_LOG`.
///
/// Users can install their own subscriber instead; this helper does nothing if one is
/// already set. Every scheduler log line carries the `sweep` and `session` span fields.
pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_is_idempotent() {
        init_tracing();
        init_tracing();
        tracing::info!("telemetry initialized twice");
    }
}
