//! Topic-keyed publish/subscribe shared by the cache and the loading registry
//!
//! Topics are plain strings such as `"user:1/set"`. Listeners are synchronous
//! and run on the emitting thread, in subscription order. No lock is held
//! while a listener runs, so listeners may freely call back into the cache,
//! the registry or this bus.
//!
//! A listener that panics is logged and skipped; the remaining listeners
//! still run and the emitter carries on as if it had returned.
//!
//! ## Vetoable notifications
//!
//! A notification emitted with [`EventBus::emit_vetoable`] can be vetoed by any
//! listener calling [`Notification::prevent_default`]. The emitter learns
//! about the veto from the return value and skips its follow-up action.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::error;

/// Callback invoked for every notification on a subscribed topic
pub type Listener<P> = Arc<dyn Fn(&Notification<P>) + Send + Sync>;

/// Handle returned by `subscribe`, used to unsubscribe later
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// A single broadcast, as seen by listeners
pub struct Notification<P> {
    topic: String,
    payload: P,
    vetoable: bool,
    vetoed: AtomicBool,
}

impl<P> Notification<P> {
    fn new(topic: String, payload: P, vetoable: bool) -> Self {
        Self {
            topic,
            payload,
            vetoable,
            vetoed: AtomicBool::new(false),
        }
    }

    /// Topic the notification was emitted on
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Payload carried by the notification
    pub fn payload(&self) -> &P {
        &self.payload
    }

    /// Whether listeners may veto the emitter's follow-up action
    pub fn is_vetoable(&self) -> bool {
        self.vetoable
    }

    /// Veto the follow-up action. Ignored for non-vetoable notifications.
    pub fn prevent_default(&self) {
        if self.vetoable {
            self.vetoed.store(true, Ordering::SeqCst);
        }
    }

    /// Whether some listener has vetoed so far
    pub fn default_prevented(&self) -> bool {
        self.vetoed.load(Ordering::SeqCst)
    }
}

impl<P: fmt::Debug> fmt::Debug for Notification<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notification")
            .field("topic", &self.topic)
            .field("payload", &self.payload)
            .field("vetoable", &self.vetoable)
            .field("vetoed", &self.default_prevented())
            .finish()
    }
}

/// Per-instance observer lists keyed by topic
pub struct EventBus<P> {
    listeners: Mutex<HashMap<String, Vec<(SubscriptionId, Listener<P>)>>>,
    next_id: AtomicU64,
}

impl<P> EventBus<P> {
    /// Create a bus with no subscribers
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe a listener to a topic
    pub fn subscribe<F>(&self, topic: impl Into<String>, listener: F) -> SubscriptionId
    where
        F: Fn(&Notification<P>) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .entry(topic.into())
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Remove a subscription. Returns `false` if it was already removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.lock();
        let mut emptied = None;
        let mut found = false;

        for (topic, subscribers) in listeners.iter_mut() {
            if let Some(pos) = subscribers.iter().position(|(sub, _)| *sub == id) {
                subscribers.remove(pos);
                if subscribers.is_empty() {
                    emptied = Some(topic.clone());
                }
                found = true;
                break;
            }
        }

        if let Some(topic) = emptied {
            listeners.remove(&topic);
        }
        found
    }

    /// Number of listeners currently subscribed to a topic
    pub fn listener_count(&self, topic: &str) -> usize {
        self.listeners.lock().get(topic).map_or(0, Vec::len)
    }

    /// Broadcast a notification that cannot be vetoed
    pub fn emit(&self, topic: impl Into<String>, payload: P) {
        self.dispatch(Notification::new(topic.into(), payload, false));
    }

    /// Broadcast a vetoable notification. Returns `true` if a listener vetoed it.
    pub fn emit_vetoable(&self, topic: impl Into<String>, payload: P) -> bool {
        self.dispatch(Notification::new(topic.into(), payload, true))
            .default_prevented()
    }

    fn dispatch(&self, notification: Notification<P>) -> Notification<P> {
        // Snapshot so listeners can subscribe/unsubscribe while we iterate.
        let snapshot: Vec<Listener<P>> = match self.listeners.lock().get(&notification.topic) {
            Some(subscribers) => subscribers.iter().map(|(_, l)| Arc::clone(l)).collect(),
            None => return notification,
        };

        for listener in snapshot {
            if panic::catch_unwind(AssertUnwindSafe(|| listener(&notification))).is_err() {
                error!(topic = %notification.topic, "Listener panicked, skipping it");
            }
        }
        notification
    }
}

impl<P> Default for EventBus<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> fmt::Debug for EventBus<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.listeners.lock();
        let topics: Vec<(&String, usize)> = listeners.iter().map(|(t, l)| (t, l.len())).collect();
        f.debug_struct("EventBus").field("topics", &topics).finish()
    }
}
