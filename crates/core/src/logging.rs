//! Tracing setup for hypercornd and embedders of the node.
//!
//! Node crates log with structured fields (`feed`, `index`, `issuer`) and
//! never install a subscriber themselves; the process that owns the node
//! picks the output format from [`NodeConfig::log_format`].
//!
//! [`NodeConfig::log_format`]: crate::NodeConfig

use crate::config::LogFormat;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Directives used when `RUST_LOG` is unset. Per-entry feed traffic logs
/// at `debug` and stays hidden.
const DEFAULT_DIRECTIVES: &str = "info";

fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}

/// Human-readable output for running a node from a terminal.
///
/// ```no_run
/// hypercorn_core::logging::init();
/// tracing::info!(feed = "9f2c..", "Node listening");
/// ```
pub fn init() {
    let _ = try_init_with(LogFormat::Pretty);
}

/// One JSON object per event, for collectors.
pub fn init_json() {
    let _ = try_init_with(LogFormat::Json);
}

/// Install the subscriber for `format`. A second call is a no-op.
pub fn init_with(format: LogFormat) {
    let _ = try_init_with(format);
}

/// Like [`init_with`], reporting when a global subscriber already exists.
pub fn try_init_with(format: LogFormat) -> Result<(), TryInitError> {
    let registry = tracing_subscriber::registry().with(default_filter());
    match format {
        LogFormat::Pretty => registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .try_init(),
    }
}
