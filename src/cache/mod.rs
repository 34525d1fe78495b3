//! # Cache Store
//!
//! Committed values keyed by opaque string keys, with a notification topic per
//! key for each lifecycle event:
//!
//! - `{key}/set` - a value was committed (carries the value)
//! - `{key}/stale` - advisory, the value should be reloaded
//! - `{key}/prune` - vetoable; deletes the entry unless a subscriber vetoes
//! - `{key}/delete` - the entry was removed
//!
//! The store never expires or evicts on its own; callers decide when entries
//! are stale or pruned, typically through the bulk `*_matching` operations.
//!
//! ## Example
//!
//! ```rust
//! use request_cache::cache::{Cache, CacheConfig, CacheEventKind, PruneOutcome};
//!
//! # fn example() -> request_cache::Result<()> {
//! let cache = Cache::new(CacheConfig::default());
//!
//! cache.subscribe("user:1", CacheEventKind::Prune, |n| n.prevent_default())?;
//! cache.set("user:1", "Alice".to_string())?;
//!
//! assert_eq!(cache.prune("user:1")?, PruneOutcome::Vetoed);
//! assert_eq!(cache.get("user:1").as_deref(), Some("Alice"));
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

pub mod config;
pub mod invalidation;
pub mod prevention;
pub mod snapshot;
pub mod store;
pub mod types;

pub use config::{CacheConfig, CacheConfigBuilder};
pub use invalidation::{InvalidationEvent, InvalidationReason};
pub use prevention::PrunePrevention;
pub use snapshot::CacheSnapshot;
pub use store::{Cache, PruneOutcome, WeakCache};
pub use types::{CacheEvent, CacheEventKind, CacheKey, CacheStats};
