//! Shutdown signal handling.

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{Error, Result};

pub const SIGINT: i32 = 2;
pub const SIGTERM: i32 = 15;

/// Wait for SIGINT or SIGTERM and return its number.
pub async fn wait_for_shutdown_signal() -> Result<i32> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate())
            .map_err(|e| Error::Other(format!("SIGTERM handler failed: {e}")))?;

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.map_err(|e| Error::Other(format!("Ctrl+C handler failed: {e}")))?;
                Ok(SIGINT)
            }
            _ = term.recv() => Ok(SIGTERM),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .map_err(|e| Error::Other(format!("Ctrl+C handler failed: {e}")))?;
        Ok(SIGINT)
    }
}

/// Cancel `token` when a shutdown signal arrives.
///
/// Resolves to the signal number, or `None` if the token was cancelled first.
pub async fn cancel_on_signal(token: CancellationToken) -> Result<Option<i32>> {
    tokio::select! {
        _ = token.cancelled() => Ok(None),
        signal = wait_for_shutdown_signal() => {
            let signal = signal?;
            info!(signal, "shutdown signal received; stopping recording");
            token.cancel();
            Ok(Some(signal))
        }
    }
}

/// Exit status a shell reports for a process killed by `signal`.
pub fn exit_code_for_signal(signal: i32) -> i32 {
    128 + signal
}
