//! Structured logging infrastructure for ipv7 nodes.
//!
//! Centralized logging initialization with environment-based filtering and an
//! optional JSON output mode for log aggregation.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the logging system with human-readable output.
///
/// Log level is configured via the `RUST_LOG` environment variable and
/// defaults to `info`.
///
/// # Example
/// ```no_run
/// use ipv7_core::logging;
///
/// logging::init();
/// tracing::info!("node started");
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}

/// Initialize the logging system with JSON output.
///
/// Suitable for log aggregation when a node daemon runs unattended.
pub fn init_json() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().with_target(true))
        .init();
}
