//! Stream lifecycle monitor.
//!
//! The monitor is responsible for:
//! - Probing the target broadcast on an interval
//! - Classifying each probe as online/offline
//! - Keeping a deduplicated snapshot history per episode
//! - Publishing `is_online` / `stream_info` events to in-process subscribers

mod events;
mod history;
mod probe;
mod service;

pub use events::{EventBus, EventPayload, Subscriber, Topic};
pub use history::{BroadcastSnapshot, LifecycleState, LifecycleTracker, SnapshotRecord};
pub use probe::{ProbeReport, StatusProbe, StreamIdentity, StreamlinkProbe, qualities_of};
pub use service::{StreamMonitor, StreamMonitorConfig};
