// Logging module for structured logging using the tracing crate

use tracing_subscriber::EnvFilter;

use crate::error::ProxyError;

/// Initialize the tracing subscriber for structured logging.
///
/// Filtering follows `RUST_LOG` and defaults to `info`. JSON output is
/// for log-aggregation deployments; the plain formatter is for humans.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_subscriber(json: bool) -> Result<(), ProxyError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    result.map_err(|e| ProxyError::Config(format!("failed to initialize logging: {}", e)))
}
