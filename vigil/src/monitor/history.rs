//! Episode history and the online/offline state machine.
//!
//! [`LifecycleTracker::observe`] is the whole state machine: it folds one
//! probe result into the history and returns the events the monitor must
//! publish. It does no IO so it can be driven directly in tests.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use super::events::EventPayload;
use super::probe::{ProbeReport, StreamIdentity, qualities_of};

/// Online/offline state of the watched broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleState {
    #[default]
    Offline,
    Online,
}

impl LifecycleState {
    pub fn is_online(&self) -> bool {
        matches!(self, Self::Online)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Offline => "offline",
            Self::Online => "online",
        })
    }
}

/// One deduplicated identity record captured during an episode.
#[derive(Debug, Clone)]
pub struct BroadcastSnapshot {
    pub plugin: Option<String>,
    pub stream_id: Option<String>,
    pub author: Option<String>,
    pub category: Option<String>,
    pub title: Option<String>,
    pub captured_at: DateTime<Local>,
    /// Probe payload the snapshot was taken from.
    pub raw: Arc<Value>,
}

impl BroadcastSnapshot {
    pub fn from_report(report: &ProbeReport, captured_at: DateTime<Local>) -> Self {
        let identity = report.identity();
        Self {
            plugin: identity.plugin,
            stream_id: identity.stream_id,
            author: identity.author,
            category: identity.category,
            title: identity.title,
            captured_at,
            raw: report.raw().clone(),
        }
    }

    pub fn identity(&self) -> StreamIdentity {
        StreamIdentity {
            plugin: self.plugin.clone(),
            stream_id: self.stream_id.clone(),
            author: self.author.clone(),
            category: self.category.clone(),
            title: self.title.clone(),
        }
    }

    /// `YYYYmmdd_HHMMSS` of the capture time, used for container date tags.
    pub fn datetime_label(&self) -> String {
        self.captured_at.format("%Y%m%d_%H%M%S").to_string()
    }

    /// Side-file representation of this snapshot.
    pub fn record(&self) -> SnapshotRecord<'_> {
        SnapshotRecord {
            plugin: self.plugin.as_deref(),
            id: self.stream_id.as_deref(),
            author: self.author.as_deref(),
            category: self.category.as_deref(),
            title: self.title.as_deref(),
            timestamp: self.captured_at.format("%Y%m%dT%H%M%S%.6f%z").to_string(),
            datetime: self.datetime_label(),
        }
    }
}

/// Serialized shape of a snapshot in the metadata side-file.
#[derive(Debug, Serialize)]
pub struct SnapshotRecord<'a> {
    pub plugin: Option<&'a str>,
    pub id: Option<&'a str>,
    pub author: Option<&'a str>,
    pub category: Option<&'a str>,
    pub title: Option<&'a str>,
    pub timestamp: String,
    pub datetime: String,
}

/// Current and last-completed episode history.
///
/// `current` is non-empty iff the broadcast is online. Going offline moves
/// `current` into `last` in one step.
#[derive(Debug, Default)]
pub struct LifecycleTracker {
    state: LifecycleState,
    current: Vec<BroadcastSnapshot>,
    last: Vec<BroadcastSnapshot>,
    /// Raw payload of the most recent online probe, deduplicated or not.
    latest_raw: Option<Arc<Value>>,
}

impl LifecycleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn current(&self) -> &[BroadcastSnapshot] {
        &self.current
    }

    pub fn last(&self) -> &[BroadcastSnapshot] {
        &self.last
    }

    /// Quality labels of the most recent online probe.
    ///
    /// Tracked on every probe, so a listing that fills in without an
    /// identity change is still visible.
    pub fn latest_qualities(&self) -> BTreeSet<String> {
        self.latest_raw
            .as_deref()
            .map(qualities_of)
            .unwrap_or_default()
    }

    /// Fold one probe result into the history.
    ///
    /// Returns the events to publish, in order.
    pub fn observe(&mut self, report: &ProbeReport, now: DateTime<Local>) -> Vec<EventPayload> {
        let mut events = Vec::new();
        let online = report.is_online();

        match (self.state, online) {
            (LifecycleState::Offline, false) => return events,
            (LifecycleState::Online, false) => {
                info!("stream went offline");
                self.last = std::mem::take(&mut self.current);
                self.state = LifecycleState::Offline;
                events.push(EventPayload::Online(false));
                return events;
            }
            (LifecycleState::Offline, true) => {
                info!("stream went online");
                self.state = LifecycleState::Online;
                self.last.clear();
                events.push(EventPayload::Online(true));
            }
            (LifecycleState::Online, true) => {}
        }
        self.latest_raw = Some(report.raw().clone());

        let snapshot = BroadcastSnapshot::from_report(report, now);
        match self.current.last() {
            None => {
                self.last = vec![snapshot.clone()];
                self.current.push(snapshot);
            }
            Some(tail) if tail.identity() == snapshot.identity() => return events,
            Some(tail) => {
                info!(
                    previous_title = ?tail.title,
                    title = ?snapshot.title,
                    category = ?snapshot.category,
                    "stream metadata changed"
                );
                self.current.push(snapshot);
            }
        }
        debug!(history_len = self.current.len(), "recorded snapshot");
        events.push(EventPayload::StreamInfo(report.raw().clone()));
        events
    }
}
