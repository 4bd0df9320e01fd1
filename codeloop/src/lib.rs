//! Autonomous write-code, run-it, judge-it loop.
//!
//! A run restates an objective as a task, then iterates: a model writes
//! instructions and code, the code is executed under a timeout, and the
//! result is judged by a classifier or an operator. Each iteration is logged
//! to an append-only memory whose most recent entries feed the next one.
//!
//! - **[`core`]**: Pure logic (code extraction, truncation, budgets, shared types).
//! - **[`io`]**: Side effects (model HTTP calls, child processes, SQLite, console).
//!
//! [`orchestrator`] drives the state machine over the `io` traits, and
//! [`verdict`] holds the two interchangeable judging strategies.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrator;
pub mod render;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod verdict;
