//! Availability pre-check.
//!
//! Some sites briefly advertise only low resolutions right after a broadcast
//! starts. When a high-resolution quality is requested we give the listing a
//! few probe intervals to catch up before recording starts anyway.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::monitor::StreamMonitor;
use crate::{Error, Result};

/// Label fragment that marks a high-resolution quality request.
pub const HIGH_RESOLUTION_MARKER: &str = "1080";

/// Number of checks before giving up and recording at whatever is available.
pub const MAX_AVAILABILITY_CHECKS: u32 = 3;

/// Result of the pre-check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// No high-resolution quality was requested.
    Unconstrained,
    /// The requested high resolution is advertised.
    Advertised { checks: u32 },
    /// Still not advertised after every check; recording proceeds anyway.
    GaveUp { checks: u32 },
}

/// Whether any comma-separated label in `target_stream` asks for high resolution.
pub fn requests_high_resolution(target_stream: &str) -> bool {
    target_stream
        .split(',')
        .any(|label| label.trim().contains(HIGH_RESOLUTION_MARKER))
}

/// Wait (bounded) until the monitor advertises a high-resolution quality.
///
/// Never waits more than [`MAX_AVAILABILITY_CHECKS`] × `interval`.
pub async fn wait_for_quality(
    monitor: &StreamMonitor,
    target_stream: &str,
    interval: Duration,
    cancellation_token: &CancellationToken,
) -> Result<Availability> {
    if !requests_high_resolution(target_stream) {
        return Ok(Availability::Unconstrained);
    }

    for check in 1..=MAX_AVAILABILITY_CHECKS {
        let advertised = monitor.stream_qualities();
        if advertised
            .iter()
            .any(|quality| quality.contains(HIGH_RESOLUTION_MARKER))
        {
            return Ok(Availability::Advertised { checks: check });
        }

        info!(
            check,
            max_checks = MAX_AVAILABILITY_CHECKS,
            ?advertised,
            "{HIGH_RESOLUTION_MARKER} is not advertised yet; waiting for the listing to catch up"
        );
        tokio::select! {
            _ = cancellation_token.cancelled() => return Err(Error::Interrupted),
            _ = tokio::time::sleep(interval) => {}
        }
    }

    Ok(Availability::GaveUp {
        checks: MAX_AVAILABILITY_CHECKS,
    })
}
