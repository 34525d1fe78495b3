//! Load controller: ties one in-flight load to the cache and the loading registry
//!
//! A controller is created around work that is already under way. It registers
//! itself with the [`Loading`] registry straight away, and once the work
//! settles it decides whether and when the result is committed to the
//! [`Cache`]:
//!
//! 1. If the cancellation token was cancelled, the result is discarded.
//! 2. Otherwise the controller waits for the nearest earlier load for the same
//!    key that is still in flight, and repeats until no earlier load is left,
//!    then commits. Commits for a key therefore land in start order no matter
//!    in which order the work settles.
//! 3. Either way it deregisters (broadcasting `end`) and resolves its outcome
//!    with the settled value.
//!
//! ## Example
//!
//! ```rust
//! use request_cache::{Cache, LoadController, Loading};
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let cache: Cache<String> = Cache::default();
//! let loading = Loading::new();
//!
//! let load = LoadController::start(
//!     &loading,
//!     &cache,
//!     "greeting",
//!     async { "hello".to_string() },
//!     CancellationToken::new(),
//! )?;
//!
//! assert_eq!(load.outcome().await?, "hello");
//! assert_eq!(cache.get("greeting").as_deref(), Some("hello"));
//! # Ok(())
//! # }
//! ```

use crate::cache::{types::CacheKey, Cache};
use crate::error::{CacheError, Result};
use crate::loading::registry::Loading;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Lifecycle of a load controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadState {
    /// Registered, waiting for its work or for an earlier load
    Pending,
    /// Finished, and its result was committed to the cache
    Committed,
    /// Finished without committing
    Discarded,
}

impl LoadState {
    pub fn is_finished(self) -> bool {
        !matches!(self, LoadState::Pending)
    }
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadState::Pending => write!(f, "pending"),
            LoadState::Committed => write!(f, "committed"),
            LoadState::Discarded => write!(f, "discarded"),
        }
    }
}

/// One in-flight load
///
/// Cloning yields another handle to the same load; equality is identity.
pub struct LoadController<V> {
    inner: Arc<ControllerInner<V>>,
}

struct ControllerInner<V> {
    id: u64,
    key: CacheKey,
    started_at: Instant,
    cancellation: CancellationToken,
    state: Mutex<LoadState>,
    outcome: watch::Receiver<Option<V>>,
}

impl<V> LoadController<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Start coordinating a load whose work is already under way.
    ///
    /// The controller is registered and `{key}/start` has been broadcast by the
    /// time this returns. The commit pipeline runs on the current tokio runtime.
    ///
    /// `work` must settle: failures are expected to be folded into the value
    /// it resolves with. If the caller wants cancellation to cut the work
    /// short, the work itself has to observe `cancellation`; the controller
    /// only reads the token once the work has settled.
    ///
    /// Fails with [`CacheError::InvalidArgument`] if the key is unacceptable
    /// to the cache or no tokio runtime is running.
    pub fn start<F>(
        loading: &Loading<V>,
        cache: &Cache<V>,
        key: &str,
        work: F,
        cancellation: CancellationToken,
    ) -> Result<Self>
    where
        F: Future<Output = V> + Send + 'static,
    {
        cache.check_key(key)?;
        let runtime = Handle::try_current().map_err(|_| {
            CacheError::invalid_argument("work", "no tokio runtime is running to drive the load")
        })?;

        let started_at = Instant::now();
        let (outcome_tx, outcome_rx) = watch::channel(None);

        cache.track(|stats| stats.loads_started += 1);
        let controller = loading.register(key, |id| Self {
            inner: Arc::new(ControllerInner {
                id,
                key: key.to_string(),
                started_at,
                cancellation,
                state: Mutex::new(LoadState::Pending),
                outcome: outcome_rx,
            }),
        });

        runtime.spawn(controller.clone().commit(
            loading.clone(),
            cache.clone(),
            work,
            outcome_tx,
        ));
        Ok(controller)
    }

    async fn commit<F>(
        self,
        loading: Loading<V>,
        cache: Cache<V>,
        work: F,
        outcome: watch::Sender<Option<V>>,
    ) where
        F: Future<Output = V> + Send + 'static,
    {
        let result = match AssertUnwindSafe(work).catch_unwind().await {
            Ok(result) => result,
            Err(_) => {
                error!(key = %self.key(), load_id = self.id(), "Load work panicked, discarding");
                self.finish(LoadState::Discarded);
                cache.track(|stats| stats.loads_aborted += 1);
                loading.unregister(&self);
                // Dropping `outcome` without a value resolves waiters with LoadAborted.
                return;
            }
        };

        if self.is_cancelled() {
            debug!(key = %self.key(), load_id = self.id(), "Load cancelled, discarding result");
            self.finish(LoadState::Discarded);
            cache.track(|stats| stats.loads_discarded += 1);
        } else {
            // Re-scan after each wait: a cancelled predecessor does not wait
            // on its own predecessors before finishing.
            while let Some(earlier) = loading.predecessor(&self) {
                debug!(
                    key = %self.key(),
                    load_id = self.id(),
                    waiting_on = earlier.id(),
                    "Waiting for earlier load to finish"
                );
                earlier.finished().await;
            }

            match cache.set(self.key(), result.clone()) {
                Ok(()) => {
                    debug!(
                        key = %self.key(),
                        load_id = self.id(),
                        elapsed_ms = self.elapsed().as_millis() as u64,
                        "Load committed"
                    );
                    self.finish(LoadState::Committed);
                    cache.track(|stats| stats.loads_committed += 1);
                }
                Err(e) => {
                    // Unreachable in practice: the key was validated by `start`.
                    error!(key = %self.key(), load_id = self.id(), "Load commit failed: {}", e);
                    self.finish(LoadState::Discarded);
                    cache.track(|stats| stats.loads_discarded += 1);
                }
            }
        }

        loading.unregister(&self);
        outcome.send_replace(Some(result));
    }

    /// Wait until the load finished and return the value its work settled with.
    ///
    /// Resolves with the value whether or not it was committed. Any number of
    /// callers may await it, before or after the load finished.
    pub async fn outcome(&self) -> Result<V> {
        let mut outcome = self.inner.outcome.clone();
        let settled = match outcome.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        };

        settled.ok_or_else(|| CacheError::LoadAborted {
            key: self.inner.key.clone(),
        })
    }

    /// The settled value, if the load already finished
    pub fn try_outcome(&self) -> Option<V> {
        self.inner.outcome.borrow().clone()
    }

    async fn finished(&self) {
        // An aborted predecessor has finished too; only its value is missing.
        let _ = self.outcome().await;
    }
}

impl<V> LoadController<V> {
    /// Process-unique id; ids increase with start order
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Key the load targets
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// Monotonic time the controller was constructed
    pub fn started_at(&self) -> Instant {
        self.inner.started_at
    }

    /// Time since the controller was constructed
    pub fn elapsed(&self) -> Duration {
        self.inner.started_at.elapsed()
    }

    /// The caller's cancellation token
    pub fn cancellation(&self) -> &CancellationToken {
        &self.inner.cancellation
    }

    /// Cancel through the caller's token. Has no effect once the load finished
    /// or once its work has settled and it is waiting to commit.
    pub fn cancel(&self) {
        self.inner.cancellation.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancellation.is_cancelled()
    }

    /// Current lifecycle state
    pub fn state(&self) -> LoadState {
        *self.inner.state.lock()
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_finished()
    }

    fn finish(&self, state: LoadState) {
        *self.inner.state.lock() = state;
    }
}

impl<V> Clone for LoadController<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> PartialEq for LoadController<V> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<V> Eq for LoadController<V> {}

impl<V> fmt::Debug for LoadController<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadController")
            .field("id", &self.inner.id)
            .field("key", &self.inner.key)
            .field("state", &self.state())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
