//! Side-file export of the episode's snapshot history.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Result;
use crate::monitor::{BroadcastSnapshot, EventPayload, StreamMonitor, Subscriber, Topic};
use crate::utils::fs::{ensure_parent_dir_with_op, write_file_with_op};

/// How long the export task waits on the bus before re-checking the monitor.
const RECEIVE_TIMEOUT: Duration = Duration::from_millis(500);

/// Overwrite `path` with the JSON list of `snapshots`.
pub async fn write_side_file(path: &Path, snapshots: &[BroadcastSnapshot]) -> Result<()> {
    let records: Vec<_> = snapshots.iter().map(BroadcastSnapshot::record).collect();
    let json = serde_json::to_vec_pretty(&records)?;
    ensure_parent_dir_with_op("creating metadata directory", path).await?;
    write_file_with_op("writing metadata side-file", path, &json).await
}

/// Keeps `<output>.json` in sync with the monitor while an episode is recorded.
pub struct MetadataExporter {
    monitor: Arc<StreamMonitor>,
    path: PathBuf,
    writes: usize,
}

impl MetadataExporter {
    pub fn new(monitor: Arc<StreamMonitor>, path: PathBuf) -> Self {
        Self {
            monitor,
            path,
            writes: 0,
        }
    }

    /// Start exporting in a background task.
    ///
    /// The task ends when the monitor reports offline or `cancellation_token`
    /// fires, after one final write. It yields the number of successful writes.
    pub fn spawn(self, cancellation_token: CancellationToken) -> JoinHandle<usize> {
        tokio::spawn(self.run(cancellation_token))
    }

    pub async fn run(mut self, cancellation_token: CancellationToken) -> usize {
        info!(path = %self.path.display(), "writing metadata side-file");
        let last = self.monitor.last_history();
        self.write(&last).await;

        let subscriber = Subscriber::new("metadata-export");
        self.monitor.subscribe(&subscriber, Topic::StreamInfo);

        while self.monitor.is_online() && !cancellation_token.is_cancelled() {
            let event = tokio::select! {
                _ = cancellation_token.cancelled() => break,
                event = subscriber.receive(RECEIVE_TIMEOUT) => event,
            };
            if let Some(EventPayload::StreamInfo(_)) = event {
                info!(path = %self.path.display(), "stream metadata changed; updating side-file");
                let current = self.monitor.current_history();
                self.write(&current).await;
            }
        }
        self.monitor.unsubscribe(&subscriber, Topic::StreamInfo);

        // Going offline moves the episode into `last`.
        let mut history = self.monitor.current_history();
        if history.is_empty() {
            history = self.monitor.last_history();
        }
        self.write(&history).await;
        debug!(writes = self.writes, "metadata export finished");
        self.writes
    }

    async fn write(&mut self, snapshots: &[BroadcastSnapshot]) {
        if snapshots.is_empty() {
            return;
        }
        match write_side_file(&self.path, snapshots).await {
            Ok(()) => self.writes += 1,
            Err(e) => warn!(error = %e, "failed to write metadata side-file"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::{ProbeReport, StatusProbe, StreamMonitorConfig};
    use async_trait::async_trait;
    use chrono::Local;
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Online with title `T<n>` for the first `titles` probes, then offline.
    struct RetitlingProbe {
        calls: AtomicUsize,
        titles: usize,
    }

    #[async_trait]
    impl StatusProbe for RetitlingProbe {
        async fn probe(&self) -> crate::Result<ProbeReport> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call >= self.titles {
                return Ok(ProbeReport::new(json!({"error": "offline"})));
            }
            Ok(ProbeReport::new(json!({
                "plugin": "twitch",
                "metadata": {"id": "abc", "author": "A", "category": "C", "title": format!("T{call}")}
            })))
        }
    }

    fn read_titles(path: &Path) -> Vec<String> {
        let value: Value = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|record| record["title"].as_str().unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_write_side_file_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.json");
        let report = ProbeReport::new(json!({
            "plugin": "twitch",
            "metadata": {"id": "abc", "author": "A", "category": "C", "title": "한국어"}
        }));
        let snapshot = BroadcastSnapshot::from_report(&report, Local::now());

        write_side_file(&path, &[snapshot.clone(), snapshot.clone()]).await.unwrap();
        write_side_file(&path, &[snapshot]).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("한국어"));
        assert_eq!(read_titles(&path), vec!["한국어"]);
    }

    #[tokio::test]
    async fn test_export_follows_episode_until_offline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("episode.json");
        let monitor = Arc::new(StreamMonitor::start(
            Arc::new(RetitlingProbe {
                calls: AtomicUsize::new(0),
                titles: 2,
            }),
            StreamMonitorConfig::new(Duration::from_secs(3600)),
            &[],
        ));
        monitor.wait_until_probed().await;

        let token = CancellationToken::new();
        let handle = MetadataExporter::new(monitor.clone(), path.clone()).spawn(token.clone());

        // Second probe is still online with a new title, third goes offline.
        tokio::time::sleep(Duration::from_millis(50)).await;
        monitor.refresh().await;
        monitor.refresh().await;

        let writes = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(writes >= 2);
        assert_eq!(read_titles(&path), vec!["T0", "T1"]);
        monitor.stop().await;
    }

    #[tokio::test]
    async fn test_cancellation_still_finalizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("episode.json");
        let monitor = Arc::new(StreamMonitor::start(
            Arc::new(RetitlingProbe {
                calls: AtomicUsize::new(0),
                titles: usize::MAX,
            }),
            StreamMonitorConfig::new(Duration::from_secs(3600)),
            &[],
        ));
        monitor.wait_until_probed().await;

        let token = CancellationToken::new();
        let handle = MetadataExporter::new(monitor.clone(), path.clone()).spawn(token.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        monitor.refresh().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();

        let writes = handle.await.unwrap();
        assert!(writes >= 2);
        assert_eq!(read_titles(&path), vec!["T0", "T1"]);
        monitor.stop().await;
    }
}
