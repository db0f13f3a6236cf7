//! # Logging
//!
//! Tracing subscriber setup: `EnvFilter` from `RUST_LOG` (default
//! `vault_engine_controller=info`), text or JSON output.

use crate::config::LogFormat;

const DEFAULT_FILTER: &str = "vault_engine_controller=info";

/// Install the global tracing subscriber
///
/// Returns an error if a global subscriber is already installed.
pub fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_FILTER.into());

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder
            .json()
            .with_current_span(true)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {e}")),
        LogFormat::Text => builder
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {e}")),
    }
}
