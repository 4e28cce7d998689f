//! Bounded-concurrency fan-out with per-task timeouts.
//!
//! Keeps at most `max_concurrent` tasks in flight and collects one result per
//! key. A failing, timed-out or panicking task only affects its own entry.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, warn};

use crate::error::{ApiError, Error, Result};

/// Type alias for boxed futures used in the fan-out
type TaskFuture<K, V> = Pin<Box<dyn Future<Output = (K, Result<V>)> + Send>>;

/// Run `fetch` for every key, at most `max_concurrent` at a time.
///
/// Each task runs on its own tokio task under `timeout`. Results arrive in
/// completion order and are keyed, so aggregation does not depend on order.
///
/// # Example
///
/// ```ignore
/// let results = fetch_bounded(
///     system_ids,
///     move |system_id| {
///         let fetcher = fetcher.clone();
///         async move { fetcher.fetch_kills_for_system(system_id, opts).await }
///     },
///     8,
///     Duration::from_secs(30),
/// )
/// .await;
/// ```
pub async fn fetch_bounded<K, V, F, Fut>(
    keys: Vec<K>,
    fetch: F,
    max_concurrent: usize,
    timeout: Duration,
) -> HashMap<K, Result<V>>
where
    K: Eq + Hash + Clone + Display + Send + 'static,
    V: Send + 'static,
    F: Fn(K) -> Fut,
    Fut: Future<Output = Result<V>> + Send + 'static,
{
    let mut results = HashMap::with_capacity(keys.len());
    if keys.is_empty() {
        return results;
    }

    let max_concurrent = max_concurrent.max(1);
    debug!(
        "Fetching {} keys with max {} concurrent, timeout {:?}",
        keys.len(),
        max_concurrent,
        timeout
    );

    let mut futures: FuturesUnordered<TaskFuture<K, V>> = FuturesUnordered::new();
    let mut pending = keys.into_iter();

    let make_future = |key: K, f: &F| -> TaskFuture<K, V> {
        let fut = f(key.clone());
        let handle = tokio::spawn(async move {
            tokio::time::timeout(timeout, fut)
                .await
                .unwrap_or_else(|_| Err(ApiError::Timeout(format!("task exceeded {:?}", timeout)).into()))
        });
        Box::pin(async move {
            let result = match handle.await {
                Ok(result) => result,
                Err(join_err) => Err(Error::Other(format!("task for {} failed: {}", key, join_err))),
            };
            (key, result)
        })
    };

    // Seed initial batch up to max_concurrent
    for key in pending.by_ref().take(max_concurrent) {
        futures.push(make_future(key, &fetch));
    }

    // Refill as tasks complete to keep the window full
    while let Some((key, result)) = futures.next().await {
        if let Err(ref e) = result {
            warn!("Task for {} failed: {}", key, e);
        }
        results.insert(key, result);

        if let Some(next) = pending.next() {
            futures.push(make_future(next, &fetch));
        }
    }

    results
}
