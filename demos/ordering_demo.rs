//! Two requests for the same page race; the one started last wins, even
//! though it answers first. A stale announcement then triggers a reload.
//!
//! Run with `RUST_LOG=request_cache=debug cargo run --example ordering_demo`.

use anyhow::Result;
use request_cache::{
    CacheConfig, CacheEventKind, GraphQLOperation, GraphQLResult, LoadSource, Loader,
    LoadingEventKind, PendingLoad, PrunePrevention,
};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Answers each request after a shrinking delay, so later requests settle sooner
struct SlowingServer {
    requests: AtomicU64,
}

impl LoadSource<GraphQLResult> for SlowingServer {
    fn begin(&self, key: &str) -> PendingLoad<GraphQLResult> {
        let n = self.requests.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = Duration::from_millis(200u64.saturating_sub(n * 80));
        let cancellation = CancellationToken::new();
        let token = cancellation.clone();
        let key = key.to_string();

        PendingLoad::new(
            async move {
                tokio::select! {
                    _ = token.cancelled() => GraphQLResult::cancelled(),
                    _ = tokio::time::sleep(delay) => {
                        GraphQLResult::data(json!({ "key": key, "response": n }))
                    }
                }
            },
            cancellation,
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "request_cache=info,ordering_demo=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = CacheConfig::from_env()?;
    let loader: Loader<GraphQLResult> = Loader::new(config)?;
    let server = Arc::new(SlowingServer {
        requests: AtomicU64::new(0),
    });

    let key = GraphQLOperation::new("query Page { page { title } }")
        .with_operation_name("Page")
        .cache_key();

    loader.cache().subscribe(&key, CacheEventKind::Set, |n| {
        if let Some(value) = n.payload().value() {
            info!("Committed {}", value.data.clone().unwrap_or_default());
        }
    })?;
    loader.loading().subscribe(&key, LoadingEventKind::End, |n| {
        info!(load_id = n.payload().id(), state = %n.payload().state(), "Load ended");
    });

    let first = loader.load(&key, server.as_ref())?;
    let second = loader.load(&key, server.as_ref())?;
    second.outcome().await?;
    first.outcome().await?;

    let winner = loader.cache().get(&key);
    info!("Final value: {:?}", winner.and_then(|r| r.data));

    // Keep the page alive across a prune, reload it on stale.
    let _mounted = PrunePrevention::new(loader.cache(), &key)?;
    let reload = loader.load_on_stale(&key, server.clone())?;

    let pruned = loader.cache().prune_all();
    info!("Prune kept {:?}", pruned.vetoed);

    loader.cache().stale(&key)?;
    for load in loader.loading().in_flight(&key) {
        load.outcome().await?;
    }
    loader.cache().unsubscribe(reload);

    info!("{}", loader.cache().stats());
    Ok(())
}
