//! Stable exit codes for codeloop CLI commands.

/// Command succeeded, or the run ended on a positive verdict.
pub const OK: i32 = 0;
/// Invalid config, unreadable files, or other setup errors.
pub const INVALID: i32 = 1;
/// The run used its whole budget without a positive verdict.
pub const EXHAUSTED: i32 = 2;
/// The operator closed input during a manual verdict.
pub const INTERRUPTED: i32 = 130;
