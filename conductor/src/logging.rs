//! Tracing setup for the conductor binary.
//!
//! Diagnostics go to stderr through `tracing`; operator output (summary
//! tables, status lines) is printed to stdout by the CLI. The persisted state
//! file and per-session agent logs are product artifacts and are written
//! regardless of `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "conductor=info,warn";

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`; defaults to `conductor=info,warn`. Compact format on
/// stderr.
///
/// # Example
/// ```bash
/// RUST_LOG=conductor=debug conductor run PRD.md
/// ```
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
