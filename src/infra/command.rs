//! Executor running each run in a child process.
//!
//! The child receives the run parameters as a JSON object on stdin and the run
//! identity in `SWEEP_RUN_INDEX`, `SWEEP_RUN_NAME` and (when set) `SWEEP_SCRATCH_DIR`.
//! Whatever it prints on stdout is parsed as the JSON result; empty output is `null`.
//! A non-zero exit fails the run with stderr as the reason.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, trace, warn};
use wait_timeout::ChildExt;

use crate::core::error::ComputationError;
use crate::core::executor::RunExecutor;
use crate::core::run::RunUnit;

/// Runs an external program once per run.
///
/// Execution blocks the calling thread, which is fine on pool workers and inline
/// execution since both own their thread.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    program: PathBuf,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandExecutor {
    /// Executor for `program` with no arguments and no timeout.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: None,
        }
    }

    /// Append arguments.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Kill the child and fail the run after `timeout`.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn run(&self, unit: &RunUnit) -> Result<Value, ComputationError> {
        let input = serde_json::to_vec(&unit.parameters)
            .map_err(|e| ComputationError::Launch(format!("cannot encode parameters: {e}")))?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env("SWEEP_RUN_INDEX", unit.index.to_string())
            .env("SWEEP_RUN_NAME", unit.name())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = unit.scratch_dir() {
            command.env("SWEEP_SCRATCH_DIR", dir);
            if dir.is_dir() {
                command.current_dir(dir);
            }
        }

        let start = Instant::now();
        let mut child = command.spawn().map_err(|e| {
            ComputationError::Launch(format!("{}: {e}", self.program.display()))
        })?;
        debug!(run_index = unit.index, pid = child.id(), "Spawned run process");

        // Feed stdin and drain both pipes concurrently so a chatty child cannot block.
        let stdin = child.stdin.take();
        let feeder = thread::spawn(move || {
            if let Some(mut stdin) = stdin {
                let _ = stdin.write_all(&input);
            }
        });
        let stdout = spawn_reader(child.stdout.take());
        let stderr = spawn_reader(child.stderr.take());

        let status = match self.timeout {
            Some(limit) => match child.wait_timeout(limit) {
                Ok(Some(status)) => status,
                Ok(None) => {
                    warn!(run_index = unit.index, timeout_ms = duration_ms(limit), "Run process timed out, killing");
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(ComputationError::TimedOut(limit));
                }
                Err(e) => return Err(ComputationError::failed(format!("wait failed: {e}"))),
            },
            None => child
                .wait()
                .map_err(|e| ComputationError::failed(format!("wait failed: {e}")))?,
        };
        let _ = feeder.join();
        let stdout = join_reader(stdout);
        let stderr = join_reader(stderr);

        debug!(
            run_index = unit.index,
            elapsed_ms = duration_ms(start.elapsed()),
            success = status.success(),
            "Run process finished"
        );
        trace!(run_index = unit.index, stdout = %stdout, stderr = %stderr, "Run process output");

        if !status.success() {
            return Err(ComputationError::failed(format!(
                "process exited with {status}: {}",
                stderr.trim()
            )));
        }

        let output = stdout.trim();
        if output.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(output)
            .map_err(|e| ComputationError::failed(format!("invalid JSON on stdout: {e}")))
    }
}

#[async_trait]
impl RunExecutor<Value> for CommandExecutor {
    async fn execute(&self, unit: &RunUnit) -> Result<Value, ComputationError> {
        self.run(unit)
    }
}

fn spawn_reader<T>(pipe: Option<T>) -> Option<JoinHandle<String>>
where
    T: Read + Send + 'static,
{
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut output = String::new();
            let _ = pipe.read_to_string(&mut output);
            output
        })
    })
}

fn join_reader(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
