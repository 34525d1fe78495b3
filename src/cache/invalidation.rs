//! Reports produced by bulk invalidation
//!
//! `delete_matching`, `stale_matching` and `prune_matching` apply the single-key
//! operation to every matching key and describe what happened with an
//! [`InvalidationEvent`].

use crate::cache::types::CacheKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which bulk operation produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationReason {
    /// Entries were deleted
    Deleted,

    /// Entries were announced stale
    Staled,

    /// Entries were pruned (unless a subscriber vetoed)
    Pruned,
}

impl std::fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidationReason::Deleted => write!(f, "deleted"),
            InvalidationReason::Staled => write!(f, "marked stale"),
            InvalidationReason::Pruned => write!(f, "pruned"),
        }
    }
}

/// Outcome of a bulk invalidation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationEvent {
    /// Operation applied
    pub reason: InvalidationReason,

    /// When the invalidation occurred
    pub timestamp: DateTime<Utc>,

    /// Keys the operation took effect on, in iteration order
    pub keys: Vec<CacheKey>,

    /// Keys a subscriber kept alive by vetoing the prune
    pub vetoed: Vec<CacheKey>,
}

impl InvalidationEvent {
    /// Create an empty event for the given operation
    pub fn new(reason: InvalidationReason) -> Self {
        Self {
            reason,
            timestamp: Utc::now(),
            keys: Vec::new(),
            vetoed: Vec::new(),
        }
    }

    /// Number of keys the operation took effect on
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub(crate) fn record(&mut self, key: CacheKey) {
        self.keys.push(key);
    }

    pub(crate) fn record_veto(&mut self, key: CacheKey) {
        self.vetoed.push(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalidation_reason_display() {
        assert_eq!(InvalidationReason::Deleted.to_string(), "deleted");
        assert_eq!(InvalidationReason::Staled.to_string(), "marked stale");
        assert_eq!(InvalidationReason::Pruned.to_string(), "pruned");
    }

    #[test]
    fn test_invalidation_event() {
        let mut event = InvalidationEvent::new(InvalidationReason::Pruned);
        assert!(event.is_empty());

        event.record("a".to_string());
        event.record_veto("b".to_string());

        assert_eq!(event.len(), 1);
        assert_eq!(event.keys, vec!["a".to_string()]);
        assert_eq!(event.vetoed, vec!["b".to_string()]);
    }

    #[test]
    fn test_invalidation_event_serializes() {
        let event = InvalidationEvent::new(InvalidationReason::Deleted);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"reason\":\"deleted\""));
    }
}
