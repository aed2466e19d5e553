//! Deadlines used across the transport and helpers to enforce them.

use std::future::Future;
use std::time::Duration;

use crate::error::{DimError, Result};

/// Default bound on a single RPC
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a client waits for a daemon to come up
pub const SPAWN_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a client probes for an already-running daemon before spawning
pub const ATTACH_TIMEOUT: Duration = Duration::from_millis(500);

/// How long a client waits for a stopped daemon to exit before killing it
pub const KILL_TIMEOUT: Duration = Duration::from_secs(1);

/// How long a finalizing daemon waits for connections to drain
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Delay between readiness probes while waiting on a daemon
pub const PROBE_INTERVAL: Duration = Duration::from_millis(10);

/// Run `fut` with a deadline, mapping expiry to [`DimError::Timeout`].
pub async fn with_timeout_error<F, T>(fut: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(DimError::Timeout),
    }
}
