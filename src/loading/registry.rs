//! Loading registry: which load controllers are in flight, per key, in start order

use crate::cache::types::CacheKey;
use crate::events::{EventBus, Notification, SubscriptionId};
use crate::loading::controller::LoadController;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Load ids increase with start order across the whole process
static NEXT_LOAD_ID: AtomicU64 = AtomicU64::new(1);

/// Events broadcast by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadingEventKind {
    /// A controller registered itself
    Start,
    /// A controller finished and deregistered
    End,
}

impl LoadingEventKind {
    /// Topic string for this event on `key`, e.g. `"user:1/start"`
    pub fn topic(self, key: &str) -> String {
        format!("{}/{}", key, self)
    }
}

impl fmt::Display for LoadingEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadingEventKind::Start => write!(f, "start"),
            LoadingEventKind::End => write!(f, "end"),
        }
    }
}

/// Per-key bookkeeping of in-flight loads
///
/// A key is present only while at least one controller for it is in flight.
/// Controllers are ordered by their load id, which increases with start
/// order, so removing a finished controller never disturbs the order of the
/// others. Clones share the same registry.
pub struct Loading<V> {
    inner: Arc<LoadingInner<V>>,
}

struct LoadingInner<V> {
    in_flight: Mutex<HashMap<CacheKey, BTreeMap<u64, LoadController<V>>>>,
    events: EventBus<LoadController<V>>,
}

impl<V> Loading<V> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            inner: Arc::new(LoadingInner {
                in_flight: Mutex::new(HashMap::new()),
                events: EventBus::new(),
            }),
        }
    }

    /// Controllers currently in flight for a key, in start order
    pub fn in_flight(&self, key: &str) -> Vec<LoadController<V>> {
        self.inner
            .in_flight
            .lock()
            .get(key)
            .map(|loads| loads.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether any load for the key is in flight
    pub fn is_loading(&self, key: &str) -> bool {
        self.inner.in_flight.lock().contains_key(key)
    }

    /// Keys with at least one load in flight
    pub fn keys(&self) -> Vec<CacheKey> {
        let mut keys: Vec<CacheKey> = self.inner.in_flight.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Total number of loads in flight across all keys
    pub fn len(&self) -> usize {
        self.inner.in_flight.lock().values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.in_flight.lock().is_empty()
    }

    /// Subscribe to `start` or `end` of loads for a key
    pub fn subscribe<F>(&self, key: &str, kind: LoadingEventKind, listener: F) -> SubscriptionId
    where
        F: Fn(&Notification<LoadController<V>>) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(kind.topic(key), listener)
    }

    /// Subscribe to a raw topic such as `"user:1/end"`
    pub fn subscribe_topic<F>(&self, topic: impl Into<String>, listener: F) -> SubscriptionId
    where
        F: Fn(&Notification<LoadController<V>>) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(topic, listener)
    }

    /// Remove a subscription made through this registry
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    /// Whether two handles refer to the same registry
    pub fn same_registry(&self, other: &Loading<V>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// A handle that does not keep the registry alive
    pub fn downgrade(&self) -> WeakLoading<V> {
        WeakLoading {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl<V> Loading<V> {
    /// Allocate a load id, build the controller with it and append it to its
    /// key's collection, then broadcast `{key}/start`.
    ///
    /// The id is taken while the registry is locked, so within a registry id
    /// order is registration order even when loads start on several threads.
    pub(crate) fn register<F>(&self, key: &str, build: F) -> LoadController<V>
    where
        F: FnOnce(u64) -> LoadController<V>,
    {
        let (controller, count) = {
            let mut in_flight = self.inner.in_flight.lock();
            let controller = build(NEXT_LOAD_ID.fetch_add(1, Ordering::SeqCst));
            let loads = in_flight.entry(key.to_string()).or_default();
            loads.insert(controller.id(), controller.clone());
            (controller, loads.len())
        };

        debug!(key = %key, load_id = controller.id(), in_flight = count, "Load registered");
        self.inner
            .events
            .emit(LoadingEventKind::Start.topic(key), controller.clone());
        controller
    }

    /// Remove a controller, dropping the key once its collection is empty,
    /// then broadcast `{key}/end`
    pub(crate) fn unregister(&self, controller: &LoadController<V>) {
        let key = controller.key();
        {
            let mut in_flight = self.inner.in_flight.lock();
            if let Some(loads) = in_flight.get_mut(key) {
                loads.remove(&controller.id());
                if loads.is_empty() {
                    in_flight.remove(key);
                }
            }
        }

        debug!(key = %key, load_id = controller.id(), "Load unregistered");
        self.inner
            .events
            .emit(LoadingEventKind::End.topic(key), controller.clone());
    }

    /// The nearest controller started before this one that is still in flight
    pub(crate) fn predecessor(&self, controller: &LoadController<V>) -> Option<LoadController<V>> {
        self.inner
            .in_flight
            .lock()
            .get(controller.key())?
            .range(..controller.id())
            .next_back()
            .map(|(_, earlier)| earlier.clone())
    }
}

/// Non-owning handle to a [`Loading`] registry
pub struct WeakLoading<V> {
    inner: Weak<LoadingInner<V>>,
}

impl<V> WeakLoading<V> {
    /// The registry, if some strong handle still exists
    pub fn upgrade(&self) -> Option<Loading<V>> {
        self.inner.upgrade().map(|inner| Loading { inner })
    }
}

impl<V> Clone for WeakLoading<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<V> Clone for Loading<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> Default for Loading<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> fmt::Debug for Loading<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let in_flight = self.inner.in_flight.lock();
        let counts: BTreeMap<&CacheKey, usize> =
            in_flight.iter().map(|(key, loads)| (key, loads.len())).collect();
        f.debug_struct("Loading")
            .field("in_flight", &counts)
            .field("events", &self.inner.events)
            .finish()
    }
}
