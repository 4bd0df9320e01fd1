//! Diagnostic tracing for debugging the loop.
//!
//! Tracing goes to stderr and is controlled by `RUST_LOG`. The console view of
//! a run (streamed model output, execution output, verdicts) goes to stdout and
//! is unaffected by it; see [`crate::render`].

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`, defaulting to `warn`. Output is compact, on stderr.
///
/// # Example
/// ```bash
/// RUST_LOG=codeloop=debug codeloop run
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
