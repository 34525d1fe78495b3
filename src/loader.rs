//! High-level loading on top of the cache and the loading registry
//!
//! A [`LoadSource`] is the boundary to the transport: given a key it starts the
//! request and returns the work together with the cancellation token bound to
//! it. [`Loader`] pairs a cache with a loading registry and starts load
//! controllers from sources.

use crate::cache::{Cache, CacheConfig, CacheEventKind};
use crate::error::Result;
use crate::events::SubscriptionId;
use crate::loading::{LoadController, Loading};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Work that has been started by a transport, plus its cancellation token
pub struct PendingLoad<V> {
    pub work: BoxFuture<'static, V>,
    pub cancellation: CancellationToken,
}

impl<V> PendingLoad<V> {
    pub fn new<F>(work: F, cancellation: CancellationToken) -> Self
    where
        F: Future<Output = V> + Send + 'static,
    {
        Self {
            work: work.boxed(),
            cancellation,
        }
    }
}

impl<V: Send + 'static> PendingLoad<V> {
    /// Work that has already settled
    pub fn ready(value: V) -> Self {
        Self::new(futures::future::ready(value), CancellationToken::new())
    }
}

/// Starts the work for a key
///
/// Implementations must return work that always settles; request failures
/// belong in the value, not in a panic.
pub trait LoadSource<V>: Send + Sync {
    fn begin(&self, key: &str) -> PendingLoad<V>;
}

impl<V, F> LoadSource<V> for F
where
    F: Fn(&str) -> PendingLoad<V> + Send + Sync,
{
    fn begin(&self, key: &str) -> PendingLoad<V> {
        self(key)
    }
}

/// A cache and a loading registry used together
pub struct Loader<V> {
    cache: Cache<V>,
    loading: Loading<V>,
}

impl<V> Clone for Loader<V> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            loading: self.loading.clone(),
        }
    }
}

impl<V> Loader<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a loader with a fresh cache and registry
    pub fn new(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_parts(Cache::new(config), Loading::new()))
    }

    /// Use an existing cache (for example a hydrated one) and registry
    pub fn from_parts(cache: Cache<V>, loading: Loading<V>) -> Self {
        Self { cache, loading }
    }

    pub fn cache(&self) -> &Cache<V> {
        &self.cache
    }

    pub fn loading(&self) -> &Loading<V> {
        &self.loading
    }

    /// Start loading a key from a source.
    ///
    /// With `abort_superseded_loads` configured, loads already in flight for the
    /// key are cancelled first, so only this newest result can commit.
    pub fn load<S>(&self, key: &str, source: &S) -> Result<LoadController<V>>
    where
        S: LoadSource<V> + ?Sized,
    {
        self.cache.check_key(key)?;

        if self.cache.config().abort_superseded_loads {
            let aborted = self.abort(key);
            if aborted > 0 {
                debug!(key = %key, aborted, "Aborted superseded loads");
            }
        }

        let pending = source.begin(key);
        LoadController::start(
            &self.loading,
            &self.cache,
            key,
            pending.work,
            pending.cancellation,
        )
    }

    /// Start loading only if the key is neither cached nor already loading
    pub fn load_if_absent<S>(&self, key: &str, source: &S) -> Result<Option<LoadController<V>>>
    where
        S: LoadSource<V> + ?Sized,
    {
        self.cache.check_key(key)?;
        if self.cache.contains_key(key) || self.loading.is_loading(key) {
            return Ok(None);
        }
        self.load(key, source).map(Some)
    }

    /// Cancel every in-flight load for a key. Returns how many were cancelled.
    pub fn abort(&self, key: &str) -> usize {
        let mut cancelled = 0;
        for controller in self.loading.in_flight(key) {
            if !controller.is_cancelled() {
                controller.cancel();
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Reload the key from `source` every time it is announced stale.
    ///
    /// Loads start on the thread that calls `stale`, which must be inside a
    /// tokio runtime. Stop with `cache().unsubscribe(id)`. The subscription
    /// holds only weak handles, so it does not keep the cache or the
    /// registry alive.
    pub fn load_on_stale(&self, key: &str, source: Arc<dyn LoadSource<V>>) -> Result<SubscriptionId> {
        let cache = self.cache.downgrade();
        let loading = self.loading.downgrade();
        let watched = key.to_string();

        let id = self.cache.subscribe(key, CacheEventKind::Stale, move |_| {
            let (Some(cache), Some(loading)) = (cache.upgrade(), loading.upgrade()) else {
                debug!(key = %watched, "Reload on stale skipped, loader is gone");
                return;
            };
            let loader = Loader::from_parts(cache, loading);
            if let Err(e) = loader.load(&watched, source.as_ref()) {
                warn!(key = %watched, "Reload on stale failed to start: {}", e);
            }
        })?;

        info!(key = %key, "Reloading on stale");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loading::LoadState;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counting_source(calls: Arc<AtomicUsize>) -> impl Fn(&str) -> PendingLoad<String> + Send + Sync {
        move |key: &str| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            PendingLoad::ready(format!("{}#{}", key, n))
        }
    }

    #[tokio::test]
    async fn test_load_commits_result() {
        let loader = Loader::new(CacheConfig::default()).unwrap();
        let source = counting_source(Arc::new(AtomicUsize::new(0)));

        let load = loader.load("a", &source).unwrap();
        assert_eq!(load.outcome().await.unwrap(), "a#1");
        assert_eq!(loader.cache().get("a"), Some("a#1".to_string()));
    }

    #[tokio::test]
    async fn test_load_if_absent_skips_cached_and_loading_keys() {
        let loader = Loader::new(CacheConfig::default()).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let source = counting_source(Arc::clone(&calls));

        let load = loader.load_if_absent("a", &source).unwrap().unwrap();
        load.outcome().await.unwrap();
        assert!(loader.load_if_absent("a", &source).unwrap().is_none());

        let slow = |_: &str| {
            PendingLoad::new(
                async {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    "slow".to_string()
                },
                CancellationToken::new(),
            )
        };
        let pending = loader.load_if_absent("b", &slow).unwrap().unwrap();
        assert!(loader.load_if_absent("b", &slow).unwrap().is_none());
        pending.outcome().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_abort_superseded_loads() {
        let loader = Loader::new(CacheConfig::latest_wins()).unwrap();
        let slow = |_: &str| {
            PendingLoad::new(
                async {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    "old".to_string()
                },
                CancellationToken::new(),
            )
        };

        let first = loader.load("a", &slow).unwrap();
        let second = loader.load("a", &|_: &str| PendingLoad::ready("new".to_string())).unwrap();

        assert!(first.is_cancelled());
        assert_eq!(second.outcome().await.unwrap(), "new");
        assert_eq!(first.outcome().await.unwrap(), "old");
        assert_eq!(first.state(), LoadState::Discarded);
        assert_eq!(loader.cache().get("a"), Some("new".to_string()));
    }

    #[tokio::test]
    async fn test_abort_counts_only_live_tokens() {
        let loader: Loader<String> = Loader::new(CacheConfig::default()).unwrap();
        let never = |_: &str| PendingLoad::new(futures::future::pending(), CancellationToken::new());

        loader.load("a", &never).unwrap();
        loader.load("a", &never).unwrap();

        assert_eq!(loader.abort("a"), 2);
        assert_eq!(loader.abort("a"), 0);
        assert_eq!(loader.abort("missing"), 0);
    }

    #[tokio::test]
    async fn test_load_on_stale_reloads() {
        let loader = Loader::new(CacheConfig::default()).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let source: Arc<dyn LoadSource<String>> = Arc::new(counting_source(Arc::clone(&calls)));

        loader.load("a", source.as_ref()).unwrap().outcome().await.unwrap();
        let id = loader.load_on_stale("a", Arc::clone(&source)).unwrap();

        loader.cache().stale("a").unwrap();
        let reload = loader.loading().in_flight("a").pop().unwrap();
        assert_eq!(reload.outcome().await.unwrap(), "a#2");
        assert_eq!(loader.cache().get("a"), Some("a#2".to_string()));

        assert!(loader.cache().unsubscribe(id));
    }

    #[tokio::test]
    async fn test_load_on_stale_does_not_keep_cache_alive() {
        let loader: Loader<Arc<()>> = Loader::new(CacheConfig::default()).unwrap();
        let value = Arc::new(());
        loader.cache().set("a", Arc::clone(&value)).unwrap();

        let source: Arc<dyn LoadSource<Arc<()>>> =
            Arc::new(|_: &str| PendingLoad::ready(Arc::new(())));
        loader.load_on_stale("a", source).unwrap();
        assert_eq!(Arc::strong_count(&value), 2);

        drop(loader);
        assert_eq!(Arc::strong_count(&value), 1);
    }

    #[tokio::test]
    async fn test_load_on_stale_from_a_cache_handle_clone() {
        let loader = Loader::new(CacheConfig::default()).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let source: Arc<dyn LoadSource<String>> = Arc::new(counting_source(Arc::clone(&calls)));

        let cache = loader.cache().clone();
        let loading = loader.loading().clone();
        cache.set("a", "seed".to_string()).unwrap();
        loader.load_on_stale("a", source).unwrap();
        drop(loader);

        // Other handles keep the reload working after the loader is dropped.
        cache.stale("a").unwrap();
        let reload = loading.in_flight("a").pop().unwrap();
        assert_eq!(reload.outcome().await.unwrap(), "a#1");
        assert_eq!(cache.get("a"), Some("a#1".to_string()));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = CacheConfig::builder().max_key_length(0).build();
        assert!(Loader::<String>::new(config).is_err());
    }
}
