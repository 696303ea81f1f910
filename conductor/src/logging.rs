//! Development-time tracing.
//!
//! Tracing output is for diagnosing the engine itself: it goes to stderr and
//! is filtered by `RUST_LOG`. What the user reads goes through
//! [`crate::reporter::Reporter`], and run logs under `logs/runs/` are written
//! regardless of the filter.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber. Defaults to `warn` when `RUST_LOG` is unset.
///
/// ```bash
/// RUST_LOG=conductor=debug conductor run demo
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
