//! Stream monitor service.
//!
//! Owns the polling task, the lifecycle history and the event bus. The poll
//! task is the only writer of the history in steady state; readers copy
//! snapshots out under a short read lock.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::events::{EventBus, Subscriber, Topic};
use super::history::{BroadcastSnapshot, LifecycleState, LifecycleTracker};
use super::probe::StatusProbe;

/// Configuration for the stream monitor.
#[derive(Debug, Clone)]
pub struct StreamMonitorConfig {
    /// Delay between probes.
    pub poll_interval: Duration,
    /// Sleep one extra `poll_interval` after a probe that found the stream online.
    pub extra_interval_while_online: bool,
}

impl StreamMonitorConfig {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            extra_interval_while_online: true,
        }
    }
}

impl Default for StreamMonitorConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(15))
    }
}

struct MonitorShared {
    probe: Arc<dyn StatusProbe>,
    tracker: RwLock<LifecycleTracker>,
    bus: EventBus,
    probed: watch::Sender<bool>,
    /// Held from probe start until its events are published, so results
    /// apply in the order the probes were started.
    probe_lock: AsyncMutex<()>,
}

impl MonitorShared {
    /// Run one probe and apply it. Probe failures leave the state untouched.
    async fn poll_once(&self) {
        let _serialized = self.probe_lock.lock().await;
        let report = match self.probe.probe().await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "stream probe failed; keeping previous state");
                self.probed.send_replace(true);
                return;
            }
        };

        // Publish outside the tracker lock so subscribers reading the history never block us.
        let events = self.tracker.write().observe(&report, Local::now());
        for event in events {
            self.bus.publish(event.topic(), event);
        }
        self.probed.send_replace(true);
    }

    fn is_online(&self) -> bool {
        self.tracker.read().state().is_online()
    }
}

/// Watches one broadcast source in the background.
pub struct StreamMonitor {
    shared: Arc<MonitorShared>,
    config: StreamMonitorConfig,
    cancellation_token: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StreamMonitor {
    /// Start polling immediately in a background task.
    ///
    /// `initial_subscribers` are registered before the first probe so they
    /// observe the very first transition. Must be called inside a tokio runtime.
    pub fn start(
        probe: Arc<dyn StatusProbe>,
        config: StreamMonitorConfig,
        initial_subscribers: &[(Subscriber, Topic)],
    ) -> Self {
        let (probed, _) = watch::channel(false);
        let shared = Arc::new(MonitorShared {
            probe,
            tracker: RwLock::new(LifecycleTracker::new()),
            bus: EventBus::new(),
            probed,
            probe_lock: AsyncMutex::new(()),
        });
        for (subscriber, topic) in initial_subscribers {
            shared.bus.subscribe(subscriber, *topic);
        }

        let cancellation_token = CancellationToken::new();
        let task = tokio::spawn(Self::poll_loop(
            shared.clone(),
            config.clone(),
            cancellation_token.clone(),
        ));

        Self {
            shared,
            config,
            cancellation_token,
            task: Mutex::new(Some(task)),
        }
    }

    async fn poll_loop(
        shared: Arc<MonitorShared>,
        config: StreamMonitorConfig,
        cancellation_token: CancellationToken,
    ) {
        info!(interval = ?config.poll_interval, "stream monitor started");
        while !cancellation_token.is_cancelled() {
            // A probe in flight is allowed to finish; only the sleeps are interruptible.
            shared.poll_once().await;

            let mut pause = config.poll_interval;
            if config.extra_interval_while_online && shared.is_online() {
                pause += config.poll_interval;
            }
            tokio::select! {
                _ = cancellation_token.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }
        debug!("stream monitor poll loop exited");
    }

    /// Wait until the first probe has completed (successfully or not).
    pub async fn wait_until_probed(&self) {
        let mut rx = self.shared.probed.subscribe();
        // The sender lives as long as `self`, so this cannot fail while we are borrowed.
        let _ = rx.wait_for(|probed| *probed).await;
    }

    /// Probe right now, outside the regular schedule.
    ///
    /// Waits for a poll already in flight, then applies its own result.
    pub async fn refresh(&self) {
        self.shared.poll_once().await;
    }

    /// Stop the poll loop and wait for it to exit. Idempotent.
    pub async fn stop(&self) {
        self.cancellation_token.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "stream monitor task ended abnormally");
            }
            info!("stream monitor stopped");
        }
    }

    pub fn config(&self) -> &StreamMonitorConfig {
        &self.config
    }

    pub fn state(&self) -> LifecycleState {
        self.shared.tracker.read().state()
    }

    pub fn is_online(&self) -> bool {
        self.shared.is_online()
    }

    /// Latest snapshot of the current episode, `None` while offline.
    pub fn current_metadata(&self) -> Option<BroadcastSnapshot> {
        self.shared.tracker.read().current().last().cloned()
    }

    /// Latest snapshot of the most recently completed episode.
    pub fn last_metadata(&self) -> Option<BroadcastSnapshot> {
        self.shared.tracker.read().last().last().cloned()
    }

    pub fn current_history(&self) -> Vec<BroadcastSnapshot> {
        self.shared.tracker.read().current().to_vec()
    }

    pub fn last_history(&self) -> Vec<BroadcastSnapshot> {
        self.shared.tracker.read().last().to_vec()
    }

    /// Quality labels advertised by the most recent online probe.
    pub fn stream_qualities(&self) -> BTreeSet<String> {
        self.shared.tracker.read().latest_qualities()
    }

    pub fn subscribe(&self, subscriber: &Subscriber, topic: Topic) {
        self.shared.bus.subscribe(subscriber, topic);
    }

    pub fn unsubscribe(&self, subscriber: &Subscriber, topic: Topic) {
        self.shared.bus.unsubscribe(subscriber, topic);
    }
}

impl Drop for StreamMonitor {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}
