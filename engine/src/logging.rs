//! Diagnostic tracing for plan runs.
//!
//! Tracing is for debugging the engine (`RUST_LOG`, stderr). Step output and
//! the run summary are product output and are written independently of it.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber.
///
/// Reads `RUST_LOG`, defaulting to `warn`. Compact format on stderr.
///
/// # Example
/// ```bash
/// RUST_LOG=plan_engine=debug plan-engine run plan.json --execute
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
