//! Core type definitions for the cache system

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Cache key type - opaque, caller-defined, never empty
pub type CacheKey = String;

/// Lifecycle events broadcast by the cache, one topic per key per kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheEventKind {
    /// A value was committed
    Set,
    /// Advisory: the value should be reloaded
    Stale,
    /// Vetoable request to delete the value
    Prune,
    /// The value was removed
    Delete,
}

impl CacheEventKind {
    /// Topic string for this event on `key`, e.g. `"user:1/set"`
    pub fn topic(self, key: &str) -> String {
        format!("{}/{}", key, self)
    }
}

impl fmt::Display for CacheEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheEventKind::Set => write!(f, "set"),
            CacheEventKind::Stale => write!(f, "stale"),
            CacheEventKind::Prune => write!(f, "prune"),
            CacheEventKind::Delete => write!(f, "delete"),
        }
    }
}

/// Payload of a cache notification
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent<V> {
    Set(V),
    Stale,
    Prune,
    Delete,
}

impl<V> CacheEvent<V> {
    pub fn kind(&self) -> CacheEventKind {
        match self {
            CacheEvent::Set(_) => CacheEventKind::Set,
            CacheEvent::Stale => CacheEventKind::Stale,
            CacheEvent::Prune => CacheEventKind::Prune,
            CacheEvent::Delete => CacheEventKind::Delete,
        }
    }

    /// The committed value, for `set` notifications
    pub fn value(&self) -> Option<&V> {
        match self {
            CacheEvent::Set(value) => Some(value),
            _ => None,
        }
    }
}

/// Reject keys the cache cannot address
pub(crate) fn validate_key(key: &str, max_len: usize) -> Result<()> {
    if key.is_empty() {
        return Err(CacheError::invalid_argument("key", "must not be empty"));
    }

    if key.len() > max_len {
        return Err(CacheError::invalid_argument(
            "key",
            format!("length {} exceeds the maximum of {}", key.len(), max_len),
        ));
    }

    Ok(())
}

/// Statistics for cache and load activity
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Values committed through `set`
    pub sets: u64,

    /// Entries removed
    pub deletes: u64,

    /// `stale` notifications broadcast
    pub stales: u64,

    /// Prunes that went through to a delete
    pub prunes: u64,

    /// Prunes a subscriber vetoed
    pub prunes_vetoed: u64,

    /// Load controllers started against this cache
    pub loads_started: u64,

    /// Loads whose result was committed
    pub loads_committed: u64,

    /// Loads discarded because they were cancelled
    pub loads_discarded: u64,

    /// Loads whose work panicked
    pub loads_aborted: u64,
}

impl CacheStats {
    /// Share of finished loads that were committed, as a percentage
    pub fn commit_rate(&self) -> f64 {
        let finished = self.loads_finished();
        if finished == 0 {
            0.0
        } else {
            (self.loads_committed as f64 / finished as f64) * 100.0
        }
    }

    /// Loads that reached the finished state
    pub fn loads_finished(&self) -> u64 {
        self.loads_committed + self.loads_discarded + self.loads_aborted
    }

    /// Loads still pending
    pub fn loads_pending(&self) -> u64 {
        self.loads_started.saturating_sub(self.loads_finished())
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ sets: {}, deletes: {}, stales: {}, prunes: {} ({} vetoed), loads: {} started, {} committed, {} discarded, {} aborted, commit_rate: {:.2}% }}",
            self.sets,
            self.deletes,
            self.stales,
            self.prunes,
            self.prunes_vetoed,
            self.loads_started,
            self.loads_committed,
            self.loads_discarded,
            self.loads_aborted,
            self.commit_rate()
        )
    }
}
