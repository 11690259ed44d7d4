//! Bounded record of which streams were already announced.

use std::collections::{HashMap, VecDeque};

use super::Classification;

/// Stream ids remembered per classification.
pub const MAX_IDS_PER_CLASSIFICATION: usize = 10;

/// Per-classification ordered set of recently announced stream ids.
///
/// Owned by the recorder; repeated cycles over the same unchanged episode
/// consult it so the channel is not spammed.
#[derive(Debug, Default)]
pub struct NotificationLedger {
    sent: HashMap<Classification, VecDeque<String>>,
}

impl NotificationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `stream_id` under `classification`.
    ///
    /// Returns `false` if it was already recorded, in which case nothing changes.
    pub fn record(&mut self, classification: Classification, stream_id: &str) -> bool {
        let ids = self.sent.entry(classification).or_default();
        if ids.iter().any(|id| id == stream_id) {
            return false;
        }
        if ids.len() >= MAX_IDS_PER_CLASSIFICATION {
            ids.pop_front();
        }
        ids.push_back(stream_id.to_string());
        true
    }

    pub fn contains(&self, classification: Classification, stream_id: &str) -> bool {
        self.sent
            .get(&classification)
            .is_some_and(|ids| ids.iter().any(|id| id == stream_id))
    }

    pub fn len(&self, classification: Classification) -> usize {
        self.sent.get(&classification).map_or(0, VecDeque::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicates_are_rejected_per_classification() {
        let mut ledger = NotificationLedger::new();
        assert!(ledger.record(Classification::On, "abc"));
        assert!(!ledger.record(Classification::On, "abc"));
        assert!(ledger.record(Classification::Off, "abc"));
        assert!(ledger.contains(Classification::Off, "abc"));
    }

    #[test]
    fn test_only_ten_most_recent_are_kept() {
        let mut ledger = NotificationLedger::new();
        for i in 0..12 {
            assert!(ledger.record(Classification::On, &i.to_string()));
        }
        assert_eq!(ledger.len(Classification::On), MAX_IDS_PER_CLASSIFICATION);
        assert!(!ledger.contains(Classification::On, "0"));
        assert!(!ledger.contains(Classification::On, "1"));
        assert!(ledger.contains(Classification::On, "2"));

        // Evicted ids can be announced again.
        assert!(ledger.record(Classification::On, "0"));
    }
}
