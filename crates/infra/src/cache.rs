//! Store-partitioned, layer-scoped TTL cache.
//!
//! Entries are keyed by `(store, layer, key)` and expire after their layer's
//! TTL. Expiry is enforced on every read; when a tokio runtime is available,
//! a removal task is also scheduled at insertion time so idle entries do not
//! linger in memory.
//!
//! Every invalidation stamps its store with a generation. A load that took a
//! [`CacheStamp`] before reading stores its result with
//! [`StoreCache::set_if_unchanged`], which refuses the write when the store was
//! invalidated mid-load.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use larder_core::StoreId;

/// Data class an entry belongs to. Each class has its own TTL.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheLayer {
    Products,
    RecipeIngredients,
    Inventory,
    CartValidation,
    BatchedData,
}

impl CacheLayer {
    pub const ALL: [CacheLayer; 5] = [
        CacheLayer::Products,
        CacheLayer::RecipeIngredients,
        CacheLayer::Inventory,
        CacheLayer::CartValidation,
        CacheLayer::BatchedData,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Products => "products",
            Self::RecipeIngredients => "recipe_ingredients",
            Self::Inventory => "inventory",
            Self::CartValidation => "cart_validation",
            Self::BatchedData => "batched_data",
        }
    }

    pub(crate) fn env_suffix(self) -> &'static str {
        match self {
            Self::Products => "PRODUCTS",
            Self::RecipeIngredients => "RECIPE_INGREDIENTS",
            Self::Inventory => "INVENTORY",
            Self::CartValidation => "CART_VALIDATION",
            Self::BatchedData => "BATCHED_DATA",
        }
    }
}

/// Per-layer time-to-live. Volatile layers expire fastest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheTtls {
    pub products: Duration,
    pub recipe_ingredients: Duration,
    pub inventory: Duration,
    pub cart_validation: Duration,
    pub batched_data: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            products: Duration::from_secs(30 * 60),
            recipe_ingredients: Duration::from_secs(15 * 60),
            inventory: Duration::from_secs(5 * 60),
            cart_validation: Duration::from_secs(2 * 60),
            batched_data: Duration::from_secs(10 * 60),
        }
    }
}

impl CacheTtls {
    pub fn ttl_for(&self, layer: CacheLayer) -> Duration {
        match layer {
            CacheLayer::Products => self.products,
            CacheLayer::RecipeIngredients => self.recipe_ingredients,
            CacheLayer::Inventory => self.inventory,
            CacheLayer::CartValidation => self.cart_validation,
            CacheLayer::BatchedData => self.batched_data,
        }
    }

    pub fn set(&mut self, layer: CacheLayer, ttl: Duration) {
        match layer {
            CacheLayer::Products => self.products = ttl,
            CacheLayer::RecipeIngredients => self.recipe_ingredients = ttl,
            CacheLayer::Inventory => self.inventory = ttl,
            CacheLayer::CartValidation => self.cart_validation = ttl,
            CacheLayer::BatchedData => self.batched_data = ttl,
        }
    }

    /// Same TTL for every layer (tests).
    pub fn uniform(ttl: Duration) -> Self {
        Self {
            products: ttl,
            recipe_ingredients: ttl,
            inventory: ttl,
            cart_validation: ttl,
            batched_data: ttl,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    store_id: StoreId,
    layer: CacheLayer,
    key: String,
}

struct CacheEntry {
    value: Arc<dyn Any + Send + Sync>,
    inserted_at: Instant,
    ttl: Duration,
    generation: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) > self.ttl
    }
}

#[derive(Default)]
struct Slots {
    entries: HashMap<CacheKey, CacheEntry>,
    /// Generation of the latest invalidation touching each store.
    invalidated: HashMap<StoreId, u64>,
    /// Generation of the latest `clear_all`.
    cleared: u64,
}

impl Slots {
    fn changed_since(&self, store_id: StoreId, stamp: CacheStamp) -> bool {
        self.cleared > stamp.0 || self.invalidated.get(&store_id).is_some_and(|mark| *mark > stamp.0)
    }
}

type SharedSlots = RwLock<Slots>;

/// Point in the cache's history, taken before a load starts.
///
/// Results of a load are only stored if nothing the load could have read was
/// invalidated after the stamp; see [`StoreCache::set_if_unchanged`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStamp(u64);

/// Concurrency-safe cache shared by every service of one engine instance.
pub struct StoreCache {
    slots: Arc<SharedSlots>,
    ttls: CacheTtls,
    generation: AtomicU64,
}

impl core::fmt::Debug for StoreCache {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StoreCache")
            .field("entries", &self.len())
            .field("ttls", &self.ttls)
            .finish()
    }
}

impl Default for StoreCache {
    fn default() -> Self {
        Self::new(CacheTtls::default())
    }
}

impl StoreCache {
    pub fn new(ttls: CacheTtls) -> Self {
        Self {
            slots: Arc::new(RwLock::new(Slots::default())),
            ttls,
            generation: AtomicU64::new(0),
        }
    }

    pub fn ttls(&self) -> &CacheTtls {
        &self.ttls
    }

    /// Value for `(store, layer, key)` if present, unexpired and of type `T`.
    pub fn get<T>(&self, store_id: StoreId, layer: CacheLayer, key: &str) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let cache_key = CacheKey {
            store_id,
            layer,
            key: key.to_string(),
        };
        let now = Instant::now();

        {
            let slots = self.slots.read().ok()?;
            let entry = slots.entries.get(&cache_key)?;
            if !entry.is_expired(now) {
                return entry.value.downcast_ref::<T>().cloned();
            }
        }

        // Expired: drop it eagerly instead of waiting for the scheduled removal.
        if let Ok(mut slots) = self.slots.write() {
            if slots.entries.get(&cache_key).is_some_and(|e| e.is_expired(now)) {
                slots.entries.remove(&cache_key);
            }
        }
        None
    }

    /// Store `value` under the layer's TTL, replacing any previous entry.
    pub fn set<T>(&self, store_id: StoreId, layer: CacheLayer, key: impl Into<String>, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.store(store_id, layer, key.into(), value, None);
    }

    pub fn stamp(&self) -> CacheStamp {
        CacheStamp(self.generation.load(Ordering::Acquire))
    }

    /// Like [`set`](Self::set), but only if `store_id` was not invalidated
    /// since `stamp`. Returns whether the value was stored.
    pub fn set_if_unchanged<T>(
        &self,
        store_id: StoreId,
        layer: CacheLayer,
        key: impl Into<String>,
        value: T,
        stamp: CacheStamp,
    ) -> bool
    where
        T: Send + Sync + 'static,
    {
        self.store(store_id, layer, key.into(), value, Some(stamp))
    }

    fn store<T>(&self, store_id: StoreId, layer: CacheLayer, key: String, value: T, stamp: Option<CacheStamp>) -> bool
    where
        T: Send + Sync + 'static,
    {
        let ttl = self.ttls.ttl_for(layer);
        let cache_key = CacheKey { store_id, layer, key };

        let generation = {
            let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
            if stamp.is_some_and(|stamp| slots.changed_since(store_id, stamp)) {
                debug!(store_id = %store_id, layer = layer.as_str(), key = %cache_key.key, "invalidated during load; not cached");
                return false;
            }
            let generation = self.next_generation();
            slots.entries.insert(
                cache_key.clone(),
                CacheEntry {
                    value: Arc::new(value),
                    inserted_at: Instant::now(),
                    ttl,
                    generation,
                },
            );
            generation
        };

        schedule_expiry(Arc::downgrade(&self.slots), cache_key, generation, ttl);
        true
    }

    pub fn invalidate(&self, store_id: StoreId, layer: CacheLayer, key: &str) -> bool {
        let cache_key = CacheKey {
            store_id,
            layer,
            key: key.to_string(),
        };
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let mark = self.next_generation();
        slots.invalidated.insert(store_id, mark);
        slots.entries.remove(&cache_key).is_some()
    }

    /// Remove every entry of `layer` for `store_id`. Returns how many were removed.
    pub fn invalidate_layer(&self, store_id: StoreId, layer: CacheLayer) -> usize {
        self.remove_where(Some(store_id), |k| k.store_id == store_id && k.layer == layer)
    }

    /// Remove everything cached for `store_id`.
    pub fn clear_store(&self, store_id: StoreId) -> usize {
        self.remove_where(Some(store_id), |k| k.store_id == store_id)
    }

    pub fn clear_all(&self) -> usize {
        self.remove_where(None, |_| true)
    }

    /// Number of stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.slots.read().map(|slots| slots.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Marks the scope invalidated (`None` is every store), then removes matches.
    fn remove_where(&self, scope: Option<StoreId>, predicate: impl Fn(&CacheKey) -> bool) -> usize {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let mark = self.next_generation();
        match scope {
            Some(store_id) => {
                slots.invalidated.insert(store_id, mark);
            }
            None => slots.cleared = mark,
        }
        let before = slots.entries.len();
        slots.entries.retain(|k, _| !predicate(k));
        before - slots.entries.len()
    }
}

fn schedule_expiry(slots: Weak<SharedSlots>, key: CacheKey, generation: u64, ttl: Duration) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        return;
    };

    handle.spawn(async move {
        tokio::time::sleep(ttl).await;
        let Some(slots) = slots.upgrade() else {
            return;
        };
        if let Ok(mut slots) = slots.write() {
            // A newer `set` for the same key owns the slot now.
            if slots.entries.get(&key).is_some_and(|e| e.generation == generation) {
                slots.entries.remove(&key);
                debug!(store_id = %key.store_id, layer = key.layer.as_str(), key = %key.key, "cache entry expired");
            }
        }
    });
}
