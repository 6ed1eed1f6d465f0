//! Structured logging
//!
//! JSON lines on stdout, filtered by `service.log_level` (any `EnvFilter`
//! directive, e.g. `info,cms_kernel::audit=info,sqlx=warn`). Extended audit
//! events are emitted under the [`AUDIT_TARGET`](crate::crud::AUDIT_TARGET)
//! target so they can be routed separately.

use tracing_subscriber::EnvFilter;

use crate::{
    config::Config,
    error::{Error, Result},
};

/// Filter for `log_level`, falling back to `info` when it does not parse
fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global JSON subscriber
///
/// Fails when a global subscriber is already installed.
pub fn init_tracing(config: &Config) -> Result<()> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter(&config.service.log_level))
        .try_init()
        .map_err(|e| Error::Internal(format!("failed to install tracing subscriber: {}", e)))?;

    tracing::info!(
        service = %config.service.name,
        environment = %config.service.environment,
        "Tracing initialized"
    );

    Ok(())
}

/// Log the shutdown; the fmt subscriber writes synchronously, so there is
/// nothing to flush
pub fn shutdown_tracing() {
    tracing::info!("Tracing shutdown complete");
}
