//! Lifecycle notifications.
//!
//! Delivery is best-effort: failures are logged and never reach the caller.

mod discord;
mod ledger;

pub use discord::{DiscordChannel, DiscordConfig};
pub use ledger::{MAX_IDS_PER_CLASSIFICATION, NotificationLedger};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::Result;
use crate::monitor::BroadcastSnapshot;

/// Kind of lifecycle message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    /// Recording started.
    On,
    /// Recording ended.
    Off,
    /// Recording failed.
    Error,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::On => "ON",
            Self::Off => "OFF",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outbound message channel.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, content: &str) -> Result<()>;
}

/// `[plugin][author][category] title (id)` for a snapshot.
pub fn describe_snapshot(snapshot: &BroadcastSnapshot) -> String {
    format!(
        "[{}][{}][{}] {} ({})",
        snapshot.plugin.as_deref().unwrap_or_default(),
        snapshot.author.as_deref().unwrap_or_default(),
        snapshot.category.as_deref().unwrap_or_default(),
        snapshot.title.as_deref().unwrap_or_default(),
        snapshot.stream_id.as_deref().unwrap_or_default(),
    )
}

/// Sends lifecycle messages through an optional sink, deduplicating ON/OFF.
pub struct Notifier {
    sink: Option<Arc<dyn NotificationSink>>,
    ledger: NotificationLedger,
}

impl Notifier {
    pub fn new(sink: Option<Arc<dyn NotificationSink>>) -> Self {
        Self {
            sink,
            ledger: NotificationLedger::new(),
        }
    }

    /// A notifier that only logs.
    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub fn ledger(&self) -> &NotificationLedger {
        &self.ledger
    }

    /// Announce `stream_id` under `classification` unless it was announced recently.
    ///
    /// Returns whether a message was sent.
    pub async fn notify_once(
        &mut self,
        classification: Classification,
        stream_id: &str,
        description: &str,
    ) -> bool {
        if !self.ledger.record(classification, stream_id) {
            debug!(%classification, stream_id, "notification already sent for this stream");
            return false;
        }
        self.deliver(classification, description).await
    }

    /// Send unconditionally. Used for errors.
    pub async fn notify(&self, classification: Classification, description: &str) -> bool {
        self.deliver(classification, description).await
    }

    async fn deliver(&self, classification: Classification, description: &str) -> bool {
        let content = format!("[{classification}]{description}");
        let Some(sink) = &self.sink else {
            debug!(%content, "notifications disabled");
            return false;
        };
        match sink.send(&content).await {
            Ok(()) => {
                info!(sink = sink.name(), %content, "notification sent");
                true
            }
            Err(e) => {
                // Failures stop here.
                warn!(sink = sink.name(), error = %e, "notification failed");
                false
            }
        }
    }
}
