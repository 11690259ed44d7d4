//! Outer scheduling loop.
//!
//! Each cycle starts a fresh monitor, waits for its first probe, runs the
//! availability pre-check and then attaches the recorder a few times in a
//! row so a flapping stream is picked up again quickly. Errors end the cycle,
//! never the loop; only cancellation does.

mod signals;

pub use signals::{SIGINT, SIGTERM, cancel_on_signal, exit_code_for_signal, wait_for_shutdown_signal};

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::monitor::{StatusProbe, StreamMonitor, StreamMonitorConfig};
use crate::recorder::{RecordOutcome, Recorder, wait_for_quality};
use crate::{Error, Result};

/// Pause between consecutive recorder attempts within one cycle.
const REATTACH_PAUSE: Duration = Duration::from_secs(1);

/// Number of recorder attempts per cycle: `ceil(interval / 3s)`, at least one.
pub fn record_attempts(check_interval: Duration) -> u32 {
    let attempts = (check_interval.as_secs_f64() / 3.0).ceil();
    if attempts.is_finite() && attempts >= 1.0 {
        attempts.min(f64::from(u32::MAX)) as u32
    } else {
        1
    }
}

/// What one cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub attempts: u32,
    pub recordings: u32,
}

pub struct Scheduler {
    probe: Arc<dyn StatusProbe>,
    monitor_config: StreamMonitorConfig,
    check_interval: Duration,
    recorder: Recorder,
}

impl Scheduler {
    pub fn new(
        probe: Arc<dyn StatusProbe>,
        monitor_config: StreamMonitorConfig,
        check_interval: Duration,
        recorder: Recorder,
    ) -> Self {
        Self {
            probe,
            monitor_config,
            check_interval,
            recorder,
        }
    }

    /// Run cycles until `cancellation_token` fires.
    pub async fn run(&mut self, cancellation_token: &CancellationToken) {
        info!(interval = ?self.check_interval, "scheduler started");
        loop {
            match self.run_cycle(cancellation_token).await {
                Ok(report) => debug!(?report, "cycle finished"),
                Err(e) if e.is_interrupted() => break,
                Err(e) => error!(error = %e, "recording cycle failed; retrying after cooldown"),
            }

            tokio::select! {
                _ = cancellation_token.cancelled() => break,
                _ = tokio::time::sleep(self.check_interval) => {}
            }
        }
        info!("scheduler stopped");
    }

    /// One monitor lifetime: probe, pre-check, record, stop.
    pub async fn run_cycle(&mut self, cancellation_token: &CancellationToken) -> Result<CycleReport> {
        let monitor = Arc::new(StreamMonitor::start(
            self.probe.clone(),
            self.monitor_config.clone(),
            &[],
        ));
        let result = self.attach(&monitor, cancellation_token).await;
        monitor.stop().await;
        result
    }

    async fn attach(
        &mut self,
        monitor: &Arc<StreamMonitor>,
        cancellation_token: &CancellationToken,
    ) -> Result<CycleReport> {
        tokio::select! {
            _ = cancellation_token.cancelled() => return Err(Error::Interrupted),
            _ = monitor.wait_until_probed() => {}
        }

        let mut report = CycleReport {
            attempts: record_attempts(self.check_interval),
            recordings: 0,
        };
        if !monitor.is_online() {
            debug!("stream is offline");
            return Ok(report);
        }

        let availability = wait_for_quality(
            monitor,
            &self.recorder.config().target_stream,
            self.check_interval,
            cancellation_token,
        )
        .await?;
        debug!(?availability, "availability pre-check done");

        for attempt in 1..=report.attempts {
            debug!(attempt, attempts = report.attempts, "attaching recorder");
            if let RecordOutcome::Completed(_) = self.recorder.record(monitor, cancellation_token).await? {
                report.recordings += 1;
            }
            tokio::select! {
                _ = cancellation_token.cancelled() => return Err(Error::Interrupted),
                _ = tokio::time::sleep(REATTACH_PAUSE) => {}
            }
        }
        Ok(report)
    }
}
