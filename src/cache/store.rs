//! Cache store: committed values plus per-key lifecycle notifications

use crate::cache::{
    config::CacheConfig,
    invalidation::{InvalidationEvent, InvalidationReason},
    snapshot::CacheSnapshot,
    types::{validate_key, CacheEvent, CacheEventKind, CacheKey, CacheStats},
};
use crate::error::{CacheError, Result};
use crate::events::{EventBus, Notification, SubscriptionId};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Shared store of committed values keyed by opaque string keys
///
/// `Cache` is a handle: clones refer to the same entries, subscribers and
/// statistics. Every mutation broadcasts on the key's topics after the entry
/// map has been updated, so a listener reading the cache sees the new state.
///
/// Entries iterate in key order, which is the order bulk operations visit them.
pub struct Cache<V> {
    inner: Arc<CacheInner<V>>,
}

struct CacheInner<V> {
    config: CacheConfig,
    entries: RwLock<BTreeMap<CacheKey, V>>,
    events: EventBus<CacheEvent<V>>,
    stats: Mutex<CacheStats>,
}

/// Result of pruning a single key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruneOutcome {
    /// Nothing was cached under the key
    Absent,
    /// A subscriber kept the entry alive
    Vetoed,
    /// The entry was deleted
    Deleted,
}

impl<V> Clone for Cache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Non-owning handle to a [`Cache`]
///
/// Listeners registered on a cache should capture this instead of a `Cache`,
/// otherwise the cache owns a listener that keeps the cache alive.
pub struct WeakCache<V> {
    inner: Weak<CacheInner<V>>,
}

impl<V> WeakCache<V> {
    /// The cache, if some strong handle still exists
    pub fn upgrade(&self) -> Option<Cache<V>> {
        self.inner.upgrade().map(|inner| Cache { inner })
    }
}

impl<V> Clone for WeakCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<V: Clone> Cache<V> {
    /// Create an empty cache
    pub fn new(config: CacheConfig) -> Self {
        info!("Initializing request cache with config: {:?}", config);
        Self::with_entries(config, BTreeMap::new())
    }

    /// Create a cache pre-populated from a snapshot, without emitting notifications
    pub fn from_snapshot(config: CacheConfig, snapshot: CacheSnapshot<V>) -> Result<Self> {
        config.validate()?;
        for key in snapshot.entries.keys() {
            validate_key(key, config.max_key_length)?;
        }

        info!("Hydrating request cache with {} entries", snapshot.len());
        Ok(Self::with_entries(config, snapshot.entries))
    }

    fn with_entries(config: CacheConfig, entries: BTreeMap<CacheKey, V>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                config,
                entries: RwLock::new(entries),
                events: EventBus::new(),
                stats: Mutex::new(CacheStats::default()),
            }),
        }
    }

    /// Configuration the cache was created with
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Commit a value, overwriting any previous one, and broadcast `{key}/set`
    pub fn set(&self, key: &str, value: V) -> Result<()> {
        self.check_key(key)?;

        self.inner
            .entries
            .write()
            .insert(key.to_string(), value.clone());
        self.track(|stats| stats.sets += 1);

        debug!(key = %key, "Set cache entry");
        self.inner
            .events
            .emit(CacheEventKind::Set.topic(key), CacheEvent::Set(value));
        Ok(())
    }

    /// Current value for a key
    pub fn get(&self, key: &str) -> Option<V> {
        self.inner.entries.read().get(key).cloned()
    }

    /// Check if a key is cached
    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.entries.read().contains_key(key)
    }

    /// Cached keys, in iteration order
    pub fn keys(&self) -> Vec<CacheKey> {
        self.inner.entries.read().keys().cloned().collect()
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.inner.entries.read().is_empty()
    }

    /// Remove a key and broadcast `{key}/delete`. Absent keys are a silent no-op.
    ///
    /// Returns whether an entry was removed.
    pub fn delete(&self, key: &str) -> Result<bool> {
        self.check_key(key)?;
        Ok(self.remove_entry(key))
    }

    /// Delete every key matching the predicate
    pub fn delete_matching<F>(&self, predicate: F) -> InvalidationEvent
    where
        F: Fn(&str) -> bool,
    {
        let mut event = InvalidationEvent::new(InvalidationReason::Deleted);
        for key in self.matching_keys(&predicate) {
            if self.remove_entry(&key) {
                event.record(key);
            }
        }

        info!("Deleted {} cache entries", event.len());
        event
    }

    /// Delete every key
    pub fn delete_all(&self) -> InvalidationEvent {
        self.delete_matching(|_| true)
    }

    /// Announce that a cached value should be reloaded. Does not touch the entry.
    pub fn stale(&self, key: &str) -> Result<()> {
        self.check_key(key)?;
        if self.stale_entry(key) {
            Ok(())
        } else {
            Err(CacheError::NotFound {
                key: key.to_string(),
            })
        }
    }

    /// Announce every matching key stale
    pub fn stale_matching<F>(&self, predicate: F) -> InvalidationEvent
    where
        F: Fn(&str) -> bool,
    {
        let mut event = InvalidationEvent::new(InvalidationReason::Staled);
        for key in self.matching_keys(&predicate) {
            // A listener may have deleted a later key in the meantime.
            if self.stale_entry(&key) {
                event.record(key);
            }
        }

        info!("Marked {} cache entries stale", event.len());
        event
    }

    /// Announce every key stale
    pub fn stale_all(&self) -> InvalidationEvent {
        self.stale_matching(|_| true)
    }

    /// Broadcast a vetoable `{key}/prune`; delete the entry unless a subscriber vetoes
    pub fn prune(&self, key: &str) -> Result<PruneOutcome> {
        self.check_key(key)?;
        Ok(self.prune_entry(key))
    }

    /// Prune every matching key
    pub fn prune_matching<F>(&self, predicate: F) -> InvalidationEvent
    where
        F: Fn(&str) -> bool,
    {
        let mut event = InvalidationEvent::new(InvalidationReason::Pruned);
        for key in self.matching_keys(&predicate) {
            match self.prune_entry(&key) {
                PruneOutcome::Deleted => event.record(key),
                PruneOutcome::Vetoed => event.record_veto(key),
                PruneOutcome::Absent => {}
            }
        }

        if !event.vetoed.is_empty() {
            warn!(
                "Prune kept {} cache entries alive by subscriber veto",
                event.vetoed.len()
            );
        }
        info!("Pruned {} cache entries", event.len());
        event
    }

    /// Prune every key
    pub fn prune_all(&self) -> InvalidationEvent {
        self.prune_matching(|_| true)
    }

    /// Serializable copy of the current entries
    pub fn snapshot(&self) -> CacheSnapshot<V> {
        CacheSnapshot::new(self.inner.entries.read().clone())
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        self.inner.stats.lock().clone()
    }

    pub(crate) fn track<F: FnOnce(&mut CacheStats)>(&self, update: F) {
        if self.inner.config.enable_metrics {
            let mut stats = self.inner.stats.lock();
            update(&mut *stats);
        }
    }

    pub(crate) fn check_key(&self, key: &str) -> Result<()> {
        validate_key(key, self.inner.config.max_key_length)
    }

    fn matching_keys<F: Fn(&str) -> bool>(&self, predicate: &F) -> Vec<CacheKey> {
        self.inner
            .entries
            .read()
            .keys()
            .filter(|key| predicate(key))
            .cloned()
            .collect()
    }

    fn remove_entry(&self, key: &str) -> bool {
        let removed = self.inner.entries.write().remove(key).is_some();
        if removed {
            self.track(|stats| stats.deletes += 1);
            debug!(key = %key, "Deleted cache entry");
            self.inner
                .events
                .emit(CacheEventKind::Delete.topic(key), CacheEvent::Delete);
        }
        removed
    }

    fn stale_entry(&self, key: &str) -> bool {
        if !self.contains_key(key) {
            return false;
        }

        self.track(|stats| stats.stales += 1);
        debug!(key = %key, "Cache entry stale");
        self.inner
            .events
            .emit(CacheEventKind::Stale.topic(key), CacheEvent::Stale);
        true
    }

    fn prune_entry(&self, key: &str) -> PruneOutcome {
        if !self.contains_key(key) {
            return PruneOutcome::Absent;
        }

        let vetoed = self
            .inner
            .events
            .emit_vetoable(CacheEventKind::Prune.topic(key), CacheEvent::Prune);

        if vetoed {
            self.track(|stats| stats.prunes_vetoed += 1);
            debug!(key = %key, "Cache entry prune vetoed");
            return PruneOutcome::Vetoed;
        }

        self.track(|stats| stats.prunes += 1);
        if self.remove_entry(key) {
            PruneOutcome::Deleted
        } else {
            // A prune listener deleted it itself.
            PruneOutcome::Absent
        }
    }
}

impl<V> Cache<V> {
    /// Subscribe to one lifecycle event of a key
    pub fn subscribe<F>(&self, key: &str, kind: CacheEventKind, listener: F) -> Result<SubscriptionId>
    where
        F: Fn(&Notification<CacheEvent<V>>) + Send + Sync + 'static,
    {
        validate_key(key, self.inner.config.max_key_length)?;
        Ok(self.inner.events.subscribe(kind.topic(key), listener))
    }

    /// Subscribe to a raw topic such as `"user:1/prune"`
    pub fn subscribe_topic<F>(&self, topic: impl Into<String>, listener: F) -> SubscriptionId
    where
        F: Fn(&Notification<CacheEvent<V>>) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(topic, listener)
    }

    /// Remove a subscription made through this cache
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    /// Number of listeners on one lifecycle event of a key
    pub fn listener_count(&self, key: &str, kind: CacheEventKind) -> usize {
        self.inner.events.listener_count(&kind.topic(key))
    }

    /// Whether two handles refer to the same store
    pub fn same_store(&self, other: &Cache<V>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// A handle that does not keep the cache alive
    pub fn downgrade(&self) -> WeakCache<V> {
        WeakCache {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl<V: Clone> Default for Cache<V> {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl<V> fmt::Debug for Cache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("config", &self.inner.config)
            .field("entries", &self.inner.entries.read().len())
            .field("events", &self.inner.events)
            .finish()
    }
}
