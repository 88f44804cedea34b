//! Change-notification listener.
//!
//! Subscribes to a [`ChangeEvent`] bus and invalidates the cache layers a
//! change can affect. Notifications for a store are collected for one debounce
//! window after the first one arrives and then applied together, so a burst of
//! row updates costs one invalidation.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use larder_core::StoreId;
use larder_events::{ChangeEvent, ChangeSource, EventBus, StoreScoped, Subscription};

use crate::cache::{CacheLayer, StoreCache};
use crate::loader::DETAILED_KEY;

const MAX_TICK: Duration = Duration::from_millis(250);

/// Handle to stop and join a running listener.
#[derive(Debug)]
pub struct ListenerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    flushes: Arc<AtomicUsize>,
}

impl ListenerHandle {
    /// Number of debounced invalidation batches applied so far.
    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::Acquire)
    }

    /// Apply anything pending, then stop and wait for the thread.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

#[derive(Debug)]
pub struct ChangeListener;

impl ChangeListener {
    /// Start a listener thread.
    ///
    /// With `store_id` set, notifications for other stores are ignored.
    pub fn spawn<B>(
        bus: B,
        cache: Arc<StoreCache>,
        store_id: Option<StoreId>,
        debounce: Duration,
    ) -> io::Result<ListenerHandle>
    where
        B: EventBus<ChangeEvent> + Send + Sync + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let subscription = bus.subscribe();
        let flushes = Arc::new(AtomicUsize::new(0));

        let state = ListenerState {
            cache,
            store_id,
            debounce,
            pending: HashMap::new(),
            flushes: Arc::clone(&flushes),
        };
        let join = thread::Builder::new()
            .name("larder-change-listener".to_string())
            .spawn(move || listen(subscription, shutdown_rx, state))?;

        info!(?store_id, debounce_ms = debounce.as_millis() as u64, "change listener started");
        Ok(ListenerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            flushes,
        })
    }
}

struct Pending {
    since: Instant,
    sources: HashSet<ChangeSource>,
}

struct ListenerState {
    cache: Arc<StoreCache>,
    store_id: Option<StoreId>,
    debounce: Duration,
    pending: HashMap<StoreId, Pending>,
    flushes: Arc<AtomicUsize>,
}

impl ListenerState {
    fn record(&mut self, event: ChangeEvent) {
        if self.store_id.is_some_and(|s| s != event.store_id()) {
            return;
        }
        self.pending
            .entry(event.store_id)
            .or_insert_with(|| Pending {
                since: Instant::now(),
                sources: HashSet::new(),
            })
            .sources
            .insert(event.source);
    }

    /// Apply every batch whose window has closed (all of them when `force`).
    fn flush_due(&mut self, force: bool) {
        let now = Instant::now();
        let due: Vec<StoreId> = self
            .pending
            .iter()
            .filter(|(_, p)| force || now.duration_since(p.since) >= self.debounce)
            .map(|(store, _)| *store)
            .collect();

        for store in due {
            if let Some(batch) = self.pending.remove(&store) {
                let removed: usize = batch
                    .sources
                    .iter()
                    .map(|source| invalidate(&self.cache, store, *source))
                    .sum();
                self.flushes.fetch_add(1, Ordering::AcqRel);
                debug!(store_id = %store, sources = ?batch.sources, removed, "cache invalidated");
            }
        }
    }
}

fn listen(subscription: Subscription<ChangeEvent>, shutdown_rx: mpsc::Receiver<()>, mut state: ListenerState) {
    let tick = state.debounce.clamp(Duration::from_millis(1), MAX_TICK);

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match subscription.recv_timeout(tick) {
            Ok(event) => state.record(event),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        state.flush_due(false);
    }

    while let Ok(event) = subscription.try_recv() {
        state.record(event);
    }
    state.flush_due(true);
    debug!("change listener stopped");
}

const STOCK_LAYERS: &[CacheLayer] = &[
    CacheLayer::Inventory,
    CacheLayer::BatchedData,
    CacheLayer::CartValidation,
];
const CATALOG_LAYERS: &[CacheLayer] = &[
    CacheLayer::Products,
    CacheLayer::BatchedData,
    CacheLayer::CartValidation,
];
const RECIPE_LAYERS: &[CacheLayer] = &[
    CacheLayer::RecipeIngredients,
    CacheLayer::BatchedData,
    CacheLayer::CartValidation,
];

/// Drop the entries a change of `source` can make wrong. Returns how many went.
pub fn invalidate(cache: &StoreCache, store_id: StoreId, source: ChangeSource) -> usize {
    let (layers, detailed) = match source {
        ChangeSource::InventoryStock => (STOCK_LAYERS, true),
        ChangeSource::ProductCatalog => (CATALOG_LAYERS, false),
        ChangeSource::RecipeIngredients => (RECIPE_LAYERS, true),
    };

    let mut removed: usize = layers
        .iter()
        .map(|layer| cache.invalidate_layer(store_id, *layer))
        .sum();
    if detailed && cache.invalidate(store_id, CacheLayer::Products, DETAILED_KEY) {
        removed += 1;
    }
    removed
}
