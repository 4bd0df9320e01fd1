//! Sandbox executor tests against a real shell runtime.

#![cfg(unix)]

use std::process::Command;
use std::time::{Duration, Instant};

use codeloop::core::types::{EXECUTION_FAILED, ExecutionStatus, TIMED_OUT};
use codeloop::io::process::{Echo, run_command_with_timeout};
use codeloop::io::sandbox::{CodeRunner, DEFAULT_OUTPUT_LIMIT_BYTES, SandboxExecutor, run};

#[test]
fn runaway_program_is_killed_at_the_timeout() {
    let temp = tempfile::tempdir().expect("tempdir");
    let pid_file = temp.path().join("pid");
    let code = format!("echo $$ > '{}'; while :; do :; done", pid_file.display());

    let started = Instant::now();
    let result = run(&code, "sh", Duration::from_secs(1));
    let elapsed = started.elapsed();

    assert_eq!(result.status, ExecutionStatus::TimedOut);
    assert_eq!(result.output, TIMED_OUT);
    assert!(elapsed < Duration::from_secs(5), "took {elapsed:?}");

    #[cfg(target_os = "linux")]
    {
        let pid = std::fs::read_to_string(&pid_file).expect("pid file");
        let proc_dir = std::path::Path::new("/proc").join(pid.trim());
        assert!(!proc_dir.exists(), "process {} still alive", pid.trim());
    }
}

#[test]
fn background_children_do_not_outlive_the_timeout() {
    let started = Instant::now();
    let result = run("sleep 8 & while :; do :; done", "sh", Duration::from_secs(1));
    let elapsed = started.elapsed();

    assert_eq!(result.status, ExecutionStatus::TimedOut);
    assert!(elapsed < Duration::from_secs(5), "run blocked for {elapsed:?}");
}

#[test]
fn heavy_output_on_both_streams_does_not_deadlock() {
    // About 180 KiB per stream, far beyond a pipe buffer.
    let script = "i=0; while [ $i -lt 2000 ]; do \
        echo \"stdout line $i ..........................................................................\"; \
        echo \"stderr line $i ..........................................................................\" 1>&2; \
        i=$((i+1)); done";
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(script);

    let timeout = Duration::from_secs(30);
    let started = Instant::now();
    let output = run_command_with_timeout(cmd, timeout, DEFAULT_OUTPUT_LIMIT_BYTES, Echo::Silent)
        .expect("run");

    assert!(!output.timed_out);
    assert!(started.elapsed() < timeout);
    assert!(output.status.success());
    assert!(output.stdout.len() > 64 * 1024);
    assert!(output.stderr.len() > 64 * 1024);
    assert_eq!(output.stdout.lines().count(), 2000);
    assert_eq!(output.stderr.lines().count(), 2000);
    assert!(output.stdout.lines().all(|line| line.starts_with("stdout line")));
    assert!(output.stderr.lines().last().is_some_and(|line| line.starts_with("stderr line 1999")));
}

#[test]
fn output_flushed_before_the_timeout_is_kept() {
    let result = run(
        "echo 'progress before the hang'; exec sleep 30",
        "sh",
        Duration::from_secs(1),
    );
    assert_eq!(result.status, ExecutionStatus::TimedOut);
    assert!(result.output.starts_with(TIMED_OUT));
    assert!(result.output.contains("progress before the hang"));
}

#[test]
fn oversized_output_is_capped_with_a_notice() {
    let executor = SandboxExecutor::new("sh", Duration::from_secs(5)).with_output_limit(64);
    let result = executor.run("i=0; while [ $i -lt 100 ]; do echo line-$i; i=$((i+1)); done");

    assert_eq!(result.status, ExecutionStatus::Output);
    assert!(result.output.starts_with("line-0"));
    assert!(!result.output.contains("line-99"));
    assert!(result.output.contains("[output truncated: stdout"));
}

#[test]
fn short_output_normalizes_to_failure_but_dates_survive() {
    let short = run("echo 42", "sh", Duration::from_secs(5)).normalized();
    assert_eq!(short.status, ExecutionStatus::Output);
    assert_eq!(short.output, EXECUTION_FAILED);

    let date = run("echo 2024-01-01", "sh", Duration::from_secs(5)).normalized();
    assert_eq!(date.output, "2024-01-01");
}
