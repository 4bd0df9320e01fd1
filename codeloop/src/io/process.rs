//! Helpers for running child processes with timeouts and concurrent line capture.

use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Where captured lines are mirrored while the child runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Echo {
    /// Capture only.
    Silent,
    /// Mirror stdout lines to our stdout and stderr lines to our stderr.
    Console,
}

#[derive(Debug, Clone, Copy)]
enum StreamKind {
    Stdout,
    Stderr,
}

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn truncated_notice(&self) -> Option<String> {
        if self.stdout_truncated == 0 && self.stderr_truncated == 0 {
            return None;
        }
        Some(format!(
            "[output truncated: stdout {} bytes, stderr {} bytes]",
            self.stdout_truncated, self.stderr_truncated
        ))
    }
}

/// Run a command with a timeout, reading stdout and stderr line by line on two threads.
///
/// Each reader owns its buffer and keeps at most `output_limit_bytes`, while still draining the
/// pipe so the child never blocks on a full buffer. The child runs in its own process group; on
/// timeout the whole group is killed and the child reaped, then both readers are joined so lines
/// flushed before the kill are kept.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
    echo: Echo,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    // Own process group, so a timeout also reaches processes the child started.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = thread::spawn(move || {
        read_lines_limited(stdout, output_limit_bytes, echo, StreamKind::Stdout)
    });
    let stderr_handle = thread::spawn(move || {
        read_lines_limited(stderr, output_limit_bytes, echo, StreamKind::Stderr)
    });

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            kill_process_tree(&mut child);
            child.wait().context("wait command after kill")?
        }
    };

    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

/// Kill the child's process group, falling back to the child alone.
///
/// Descendants holding the output pipes would otherwise keep the readers blocked.
#[cfg(unix)]
fn kill_process_tree(child: &mut Child) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let group = i32::try_from(child.id()).map(Pid::from_raw);
    match group {
        Ok(group) => match killpg(group, Signal::SIGKILL) {
            Ok(()) => return,
            Err(e) => warn!(err = %e, "killing process group after timeout failed"),
        },
        Err(e) => warn!(err = %e, "child pid out of range for a process group"),
    }
    kill_child(child);
}

#[cfg(not(unix))]
fn kill_process_tree(child: &mut Child) {
    kill_child(child);
}

fn kill_child(child: &mut Child) {
    if let Err(e) = child.kill() {
        // The child may have exited between the deadline and the kill.
        warn!(err = %e, "kill after timeout failed");
    }
}

fn join_output(handle: thread::JoinHandle<Result<(String, usize)>>) -> Result<(String, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

/// Read a stream line by line with a size limit, optionally echoing each line.
fn read_lines_limited<R: Read>(
    reader: R,
    limit: usize,
    echo: Echo,
    kind: StreamKind,
) -> Result<(String, usize)> {
    let mut buf_reader = BufReader::new(reader);
    let mut collected = Vec::new();
    let mut truncated = 0usize;

    loop {
        let mut line = Vec::new();
        let n = buf_reader
            .read_until(b'\n', &mut line)
            .context("read line")?;
        if n == 0 {
            break;
        }

        if echo == Echo::Console {
            echo_line(kind, &line);
        }

        let remaining = limit.saturating_sub(collected.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            collected.extend_from_slice(&line[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((String::from_utf8_lossy(&collected).into_owned(), truncated))
}

fn echo_line(kind: StreamKind, line: &[u8]) {
    let result = match kind {
        StreamKind::Stdout => {
            let mut out = std::io::stdout().lock();
            out.write_all(line).and_then(|()| out.flush())
        }
        StreamKind::Stderr => {
            let mut err = std::io::stderr().lock();
            err.write_all(line).and_then(|()| err.flush())
        }
    };
    if let Err(e) = result {
        warn!(err = %e, "failed to echo child output");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_both_streams() {
        let output = run_command_with_timeout(
            sh("echo out; echo err 1>&2"),
            Duration::from_secs(5),
            1000,
            Echo::Silent,
        )
        .expect("run");
        assert!(output.status.success());
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
        assert!(!output.timed_out);
        assert!(output.truncated_notice().is_none());
    }

    #[test]
    fn limits_captured_bytes_but_drains_pipe() {
        let output = run_command_with_timeout(
            sh("i=0; while [ $i -lt 100 ]; do echo 0123456789; i=$((i+1)); done"),
            Duration::from_secs(5),
            22,
            Echo::Silent,
        )
        .expect("run");
        assert!(output.status.success());
        assert_eq!(output.stdout.len(), 22);
        assert_eq!(output.stdout_truncated, 1100 - 22);
        assert!(output.truncated_notice().is_some());
    }

    #[test]
    fn timeout_kills_background_descendants() {
        let started = std::time::Instant::now();
        let output = run_command_with_timeout(
            sh("sleep 8 & echo started; while :; do :; done"),
            Duration::from_secs(1),
            1000,
            Echo::Silent,
        )
        .expect("run");
        assert!(output.timed_out);
        assert_eq!(output.stdout, "started\n");
        assert!(started.elapsed() < Duration::from_secs(5), "{:?}", started.elapsed());
    }

    #[test]
    fn spawn_failure_is_an_error() {
        let err = run_command_with_timeout(
            Command::new("/definitely/not/a/runtime"),
            Duration::from_secs(1),
            100,
            Echo::Silent,
        )
        .unwrap_err();
        assert!(err.to_string().contains("spawn command"));
    }
}
