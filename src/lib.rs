//! # Request Cache (request-cache)
//!
//! A client-side request cache with a coordination layer that lets independent
//! callers load the same resource concurrently while the cache converges on a
//! single, deterministically chosen result.
//!
//! ## Components
//!
//! - [`Cache`] - committed values keyed by opaque string keys, with
//!   `{key}/set`, `{key}/stale`, `{key}/prune` (vetoable) and `{key}/delete`
//!   notifications
//! - [`Loading`] - the loads in flight for each key, in start order, with
//!   `{key}/start` and `{key}/end` notifications
//! - [`LoadController`] - one in-flight load; commits its result in start order
//!   relative to other loads of the same key, or discards it when cancelled
//! - [`Loader`] - convenience layer starting controllers from a [`LoadSource`]
//!
//! ## Commit ordering
//!
//! Loads for a key commit in the order they started, not the order their work
//! settles. A load that started later waits for the nearest earlier load still
//! in flight before committing, so the last load to start always has the final
//! say, unless it was cancelled.
//!
//! ```rust
//! use request_cache::{Cache, LoadController, Loading};
//! use tokio::sync::oneshot;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let cache: Cache<String> = Cache::default();
//! let loading = Loading::new();
//!
//! let (tx1, rx1) = oneshot::channel::<String>();
//! let (tx2, rx2) = oneshot::channel::<String>();
//! let first = LoadController::start(&loading, &cache, "a", async move {
//!     rx1.await.unwrap_or_default()
//! }, CancellationToken::new())?;
//! let second = LoadController::start(&loading, &cache, "a", async move {
//!     rx2.await.unwrap_or_default()
//! }, CancellationToken::new())?;
//!
//! // The later load settles first, yet commits last.
//! tx2.send("B".to_string()).ok();
//! tx1.send("A".to_string()).ok();
//! second.outcome().await?;
//! first.outcome().await?;
//!
//! assert_eq!(cache.get("a").as_deref(), Some("B"));
//! assert!(!loading.is_loading("a"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Cancellation
//!
//! Cancellation is cooperative. Cancelling a load's token only suppresses its
//! commit; the load still deregisters, `end` still fires and its outcome still
//! resolves with whatever the work settled with.

pub mod cache;
pub mod error;
pub mod events;
pub mod graphql;
pub mod loader;
pub mod loading;

// Re-export main types for convenience
pub use cache::{
    Cache, CacheConfig, CacheConfigBuilder, CacheEvent, CacheEventKind, CacheKey, CacheSnapshot,
    CacheStats, InvalidationEvent, InvalidationReason, PruneOutcome, PrunePrevention, WeakCache,
};
pub use error::{CacheError, Result};
pub use events::{EventBus, Notification, SubscriptionId};
pub use graphql::{
    CacheKeyBuilder, ClientErrorCode, GraphQLError, GraphQLOperation, GraphQLResult,
};
pub use loader::{LoadSource, Loader, PendingLoad};
pub use loading::{LoadController, LoadState, Loading, LoadingEventKind, WeakLoading};
