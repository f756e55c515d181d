//! Translate SIGINT/SIGTERM (Ctrl-C elsewhere) into a sweep interrupt.
//!
//! The first signal stops admission; runs already in flight finish and are
//! checkpointed. Once installed, the handler replaces the default one for the rest
//! of the process: later signals are logged and do not terminate it.

use std::io;
use std::thread::{self, JoinHandle};

use anyhow::Context;
use tracing::{info, warn};

use crate::core::error::AppResult;
use crate::core::executor::RunExecutor;
use crate::core::interrupt::InterruptHandle;
use crate::core::scheduler::{Scheduler, SweepReport};

/// Spawn a thread that waits for termination signals and triggers `handle`.
///
/// The thread owns a small current-thread runtime, so this works whether or not the
/// caller runs inside tokio. It keeps listening after the first signal.
///
/// # Errors
///
/// Returns an error if the thread or its runtime cannot be created, or if the
/// signal handlers cannot be registered.
pub fn install_ctrl_c(handle: InterruptHandle) -> io::Result<JoinHandle<()>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    #[cfg(unix)]
    let listener = {
        use tokio::signal::unix::{signal, SignalKind};
        let _enter = runtime.enter();
        let sigint = signal(SignalKind::interrupt())?;
        let sigterm = signal(SignalKind::terminate())?;
        (sigint, sigterm)
    };

    thread::Builder::new()
        .name("sweep-signal".into())
        .spawn(move || {
            runtime.block_on(async move {
                #[cfg(unix)]
                let (mut sigint, mut sigterm) = listener;
                loop {
                    #[cfg(unix)]
                    let name = tokio::select! {
                        Some(()) = sigint.recv() => "SIGINT",
                        Some(()) = sigterm.recv() => "SIGTERM",
                        else => break,
                    };

                    #[cfg(not(unix))]
                    let name = match tokio::signal::ctrl_c().await {
                        Ok(()) => "ctrl-c",
                        Err(e) => {
                            warn!(error = %e, "Failed to listen for ctrl-c");
                            break;
                        }
                    };

                    if handle.is_interrupted() {
                        warn!(signal = name, "Sweep already interrupted, still waiting for in-flight runs");
                    } else {
                        info!(signal = name, "Received signal, waiting for in-flight runs");
                        handle.interrupt();
                    }
                }
            });
        })
}

/// Run `scheduler` with SIGINT/SIGTERM wired to its interrupt handle.
///
/// Entry point for binaries driving a single sweep. An interrupted sweep is still a
/// report (`Aborted`), not an error.
///
/// # Errors
///
/// Fails if the signal handlers cannot be installed or the sweep cannot start.
pub fn run_interruptible<R, E>(scheduler: &mut Scheduler<R, E>) -> AppResult<SweepReport<R>>
where
    R: Send + Sync + 'static,
    E: RunExecutor<R>,
{
    install_ctrl_c(scheduler.interrupt_handle()).context("failed to install signal handlers")?;
    let report = scheduler.run().context("sweep could not start")?;
    info!(sweep = %report.sweep, status = ?report.status, "Sweep finished");
    Ok(report)
}
