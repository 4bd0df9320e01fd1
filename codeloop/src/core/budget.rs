//! Run budget for bounding the code/execute/judge loop.

use std::time::{Duration, Instant};

/// Which bound stopped the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exhausted {
    /// `max_iterations` negative verdicts were recorded.
    Iterations { max_iterations: u32 },
    /// The wall-clock deadline passed.
    Time { max_run: Duration },
}

/// Iteration and optional wall-clock bound for one run.
#[derive(Debug, Clone, Copy)]
pub struct RunBudget {
    max_iterations: u32,
    max_run: Option<Duration>,
    started: Instant,
}

impl RunBudget {
    pub fn new(max_iterations: u32, max_run: Option<Duration>) -> Self {
        Self::starting_at(max_iterations, max_run, Instant::now())
    }

    pub fn starting_at(max_iterations: u32, max_run: Option<Duration>, started: Instant) -> Self {
        Self {
            max_iterations,
            max_run,
            started,
        }
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Check whether another iteration may start after `completed` iterations.
    pub fn check(&self, completed: u32) -> Result<(), Exhausted> {
        self.check_at(completed, Instant::now())
    }

    pub fn check_at(&self, completed: u32, now: Instant) -> Result<(), Exhausted> {
        if completed >= self.max_iterations {
            return Err(Exhausted::Iterations {
                max_iterations: self.max_iterations,
            });
        }
        if let Some(max_run) = self.max_run {
            let elapsed = now
                .checked_duration_since(self.started)
                .unwrap_or(Duration::from_secs(0));
            if elapsed >= max_run {
                return Err(Exhausted::Time { max_run });
            }
        }
        Ok(())
    }
}
