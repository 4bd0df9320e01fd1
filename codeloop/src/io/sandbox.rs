//! Code execution through an interpreter subprocess.
//!
//! The [`CodeRunner`] trait decouples the loop from process spawning. Tests use
//! scripted runners that return predetermined results.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::core::types::{EMPTY_OUTPUT, ExecutionResult, ExecutionStatus, TIMED_OUT};
use crate::io::process::{CommandOutput, Echo, run_command_with_timeout};

pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 1_000_000;

/// Abstraction over code execution backends.
pub trait CodeRunner {
    /// Run `code` once. Failures are reported in the result, never as errors.
    fn run(&self, code: &str) -> ExecutionResult;
}

/// Runs code as `<runtime> -c <code>` with a wall-clock timeout.
///
/// No isolation is applied beyond the OS process boundary: the code can touch
/// the filesystem and network like any other process.
#[derive(Debug, Clone)]
pub struct SandboxExecutor {
    runtime_path: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
    echo: Echo,
    envs: Vec<(OsString, OsString)>,
}

impl SandboxExecutor {
    pub fn new(runtime_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            runtime_path: runtime_path.into(),
            timeout,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
            echo: Echo::Silent,
            envs: Vec::new(),
        }
    }

    pub fn with_echo(mut self, echo: Echo) -> Self {
        self.echo = echo;
        self
    }

    pub fn with_output_limit(mut self, output_limit_bytes: usize) -> Self {
        self.output_limit_bytes = output_limit_bytes;
        self
    }

    /// Set an environment variable for every execution.
    pub fn with_env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }
}

impl CodeRunner for SandboxExecutor {
    #[instrument(skip_all, fields(runtime = %self.runtime_path.display(), timeout_secs = self.timeout.as_secs()))]
    fn run(&self, code: &str) -> ExecutionResult {
        let mut cmd = Command::new(&self.runtime_path);
        cmd.arg("-c").arg(code);
        cmd.envs(self.envs.iter().map(|(k, v)| (k, v)));

        match run_command_with_timeout(cmd, self.timeout, self.output_limit_bytes, self.echo) {
            Ok(output) => {
                let result = result_from_output(&output);
                info!(status = ?result.status, "code execution finished");
                result
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "code execution failed to run");
                ExecutionResult::new(
                    ExecutionStatus::Crashed,
                    format!("Code execution error: {err:#}"),
                )
            }
        }
    }
}

/// Run `code` once with `runtime_path`, without echoing output.
pub fn run(code: &str, runtime_path: impl Into<PathBuf>, timeout: Duration) -> ExecutionResult {
    SandboxExecutor::new(runtime_path, timeout).run(code)
}

fn result_from_output(output: &CommandOutput) -> ExecutionResult {
    let stdout = output.stdout.trim();
    let stderr = output.stderr.trim();
    let notice = output.truncated_notice();

    if output.timed_out {
        let partial = [stdout, stderr]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        let text = if partial.is_empty() {
            TIMED_OUT.to_string()
        } else {
            format!("{TIMED_OUT}\n\nOutput before timeout:\n{partial}")
        };
        return ExecutionResult::new(ExecutionStatus::TimedOut, with_notice(text, notice));
    }

    if !output.status.success() {
        let exit = match output.status.code() {
            Some(code) => format!("Process exited with status {code}"),
            None => "Process terminated by a signal".to_string(),
        };
        let text = if !stderr.is_empty() {
            stderr.to_string()
        } else if !stdout.is_empty() {
            format!("{stdout}\n\n{exit}")
        } else {
            exit
        };
        return ExecutionResult::new(ExecutionStatus::Crashed, with_notice(text, notice));
    }

    if !stdout.is_empty() {
        return ExecutionResult::new(
            ExecutionStatus::Output,
            with_notice(stdout.to_string(), notice),
        );
    }
    if !stderr.is_empty() {
        return ExecutionResult::new(
            ExecutionStatus::Output,
            with_notice(stderr.to_string(), notice),
        );
    }
    ExecutionResult::new(ExecutionStatus::Empty, EMPTY_OUTPUT)
}

fn with_notice(text: String, notice: Option<String>) -> String {
    match notice {
        Some(notice) => format!("{text}\n{notice}"),
        None => text,
    }
}
