//! Keeping entries alive while someone still uses them

use crate::cache::{store::Cache, types::CacheEventKind};
use crate::error::Result;
use crate::events::SubscriptionId;
use tracing::debug;

/// Vetoes every prune of one key for as long as it is alive
///
/// A long-lived consumer (a mounted view, an open session) holds one of these
/// so bulk `prune_*` calls leave its entry in place. Explicit `delete` is
/// unaffected.
#[must_use = "the prevention ends as soon as the guard is dropped"]
pub struct PrunePrevention<V> {
    cache: Cache<V>,
    key: String,
    subscription: SubscriptionId,
}

impl<V> PrunePrevention<V> {
    pub fn new(cache: &Cache<V>, key: &str) -> Result<Self> {
        let subscription = cache.subscribe(key, CacheEventKind::Prune, |notification| {
            notification.prevent_default();
        })?;

        debug!(key = %key, "Prune prevention active");
        Ok(Self {
            cache: cache.clone(),
            key: key.to_string(),
            subscription,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl<V> Drop for PrunePrevention<V> {
    fn drop(&mut self) {
        self.cache.unsubscribe(self.subscription);
        debug!(key = %self.key, "Prune prevention released");
    }
}
