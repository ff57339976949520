//! Bootstrap utilities for the fieri binary.

use std::future::Future;

use backon::Retryable;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use super::retry::connection_backoff;
use crate::config::LOG_ENV_VAR;

/// Initialize tracing with the FIERI_LOG environment variable.
///
/// Defaults to "info" level if FIERI_LOG is not set.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Connect to a backend with exponential backoff retry.
///
/// # Arguments
/// * `backend` - Human-readable name for logging (e.g., "storage", "messaging")
/// * `connect` - Async function that attempts to establish a connection
///
/// # Returns
/// The connected client on success, or the last error after max retries.
pub async fn connect_with_retry<T, E, F, Fut>(backend: &str, connect: F) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let result = connect
        .retry(connection_backoff())
        .notify(|e: &E, delay| {
            warn!(backend = backend, error = %e, delay = ?delay, "Connection failed, retrying");
        })
        .await;

    match &result {
        Ok(_) => info!(backend = backend, "Connected"),
        Err(e) => error!(backend = backend, error = %e, "Giving up on connection"),
    }
    result
}
