//! In-flight request coalescing.
//!
//! A burst of identical reads (a re-render storm, several tabs polling the
//! same store) should hit the backend once. Calls with the same key that arrive
//! while an earlier call is still running, and within the dedupe window of its
//! start, await the earlier call's result instead of starting a new one.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::time::Instant;
use tracing::debug;

type SharedResult<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

struct InFlight<T, E> {
    id: u64,
    started_at: Instant,
    future: SharedResult<T, E>,
}

type InFlightMap<T, E> = Arc<Mutex<HashMap<String, InFlight<T, E>>>>;

/// Coalesces concurrent calls keyed by operation signature.
///
/// Both outcomes are shared: when the producing call fails, every waiter sees
/// the same error. A key is evicted as soon as its call completes, so the next
/// call after a failure retries from scratch.
pub struct RequestDeduplicator<T, E> {
    window: Duration,
    inflight: InFlightMap<T, E>,
    next_id: AtomicU64,
}

impl<T, E> core::fmt::Debug for RequestDeduplicator<T, E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RequestDeduplicator")
            .field("window", &self.window)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl<T, E> RequestDeduplicator<T, E> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            inflight: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Number of keys with an outstanding call.
    pub fn in_flight(&self) -> usize {
        self.inflight.lock().map(|map| map.len()).unwrap_or(0)
    }
}

impl<T, E> RequestDeduplicator<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Run `produce` unless an identical call is already outstanding.
    pub async fn dedupe<F, Fut>(&self, key: impl Into<String>, produce: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let key = key.into();
        let now = Instant::now();

        let future = {
            let mut map = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
            match map.get(&key) {
                Some(existing) if now.saturating_duration_since(existing.started_at) <= self.window => {
                    debug!(key = %key, "joining in-flight request");
                    existing.future.clone()
                }
                _ => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let future = evicting(Arc::clone(&self.inflight), key.clone(), id, produce());
                    map.insert(
                        key,
                        InFlight {
                            id,
                            started_at: now,
                            future: future.clone(),
                        },
                    );
                    future
                }
            }
        };

        future.await
    }
}

/// Wrap `work` so that finishing it removes its own map entry (and only its own).
fn evicting<T, E, Fut>(
    inflight: InFlightMap<T, E>,
    key: String,
    id: u64,
    work: Fut,
) -> SharedResult<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    async move {
        let result = work.await;
        let mut map = inflight.lock().unwrap_or_else(PoisonError::into_inner);
        if map.get(&key).is_some_and(|entry| entry.id == id) {
            map.remove(&key);
        }
        result
    }
    .boxed()
    .shared()
}
