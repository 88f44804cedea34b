//! Batched snapshot fetching.
//!
//! A store snapshot costs at most three backend reads no matter how large the
//! catalog is: products (with recipe header and category), stock rows, and the
//! ingredients of every referenced recipe. Products and the two stock reads run
//! concurrently; ingredients follow once the recipe ids are known.
//!
//! Catalog rows and recipe ingredients are definitions and are reused from
//! their own cache layers. A store snapshot always reads stock rows fresh, so
//! its quantities are never older than the snapshot itself, and leaves them in
//! the `Inventory` layer. Cart snapshots reuse those rows until a stock change
//! invalidates them.
//!
//! Every load takes a cache stamp before its first read and stores nothing if
//! the store was invalidated while it ran.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, instrument, warn};

use larder_catalog::{BatchedSnapshot, ProductWithRecipe, RecipeIngredient};
use larder_core::{ProductId, RecipeId, StoreId};
use larder_inventory::InventoryStockItem;

use crate::backend::SharedBackend;
use crate::cache::{CacheLayer, CacheStamp, StoreCache};
use crate::dedupe::RequestDeduplicator;
use crate::error::{BackendError, FetchError};

/// Whole-store snapshot, `BatchedData` layer.
pub(crate) const STORE_SNAPSHOT_KEY: &str = "store_snapshot";
/// Last good whole-store snapshot, `Products` layer. Served when the backend is down.
pub(crate) const FALLBACK_KEY: &str = "snapshot_fallback";
/// Unfiltered catalog rows, `Products` layer.
pub(crate) const CATALOG_KEY: &str = "catalog";
/// Raw stock rows, `Inventory` layer.
pub(crate) const INVENTORY_KEY: &str = "rows";

/// A snapshot plus whether it came from the fallback entry.
#[derive(Debug, Clone)]
pub struct CachedSnapshot {
    pub snapshot: Arc<BatchedSnapshot>,
    /// `true` when the backend failed and this is the last good snapshot.
    pub stale: bool,
}

pub struct SnapshotFetcher {
    backend: SharedBackend,
    cache: Arc<StoreCache>,
    snapshots: RequestDeduplicator<Arc<BatchedSnapshot>, FetchError>,
}

impl core::fmt::Debug for SnapshotFetcher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SnapshotFetcher")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl SnapshotFetcher {
    pub fn new(backend: SharedBackend, cache: Arc<StoreCache>, dedupe_window: Duration) -> Self {
        Self {
            backend,
            cache,
            snapshots: RequestDeduplicator::new(dedupe_window),
        }
    }

    pub fn backend(&self) -> &SharedBackend {
        &self.backend
    }

    pub fn cache(&self) -> &Arc<StoreCache> {
        &self.cache
    }

    /// Snapshot of every product in the store.
    #[instrument(skip(self), fields(store_id = %store_id), err)]
    pub async fn fetch_store_snapshot(&self, store_id: StoreId) -> Result<Arc<BatchedSnapshot>, FetchError> {
        if let Some(snapshot) =
            self.cache
                .get::<Arc<BatchedSnapshot>>(store_id, CacheLayer::BatchedData, STORE_SNAPSHOT_KEY)
        {
            debug!("store snapshot cache hit");
            return Ok(snapshot);
        }

        let backend = Arc::clone(&self.backend);
        let cache = Arc::clone(&self.cache);
        self.snapshots
            .dedupe(format!("store_snapshot:{store_id}"), move || async move {
                let stamp = cache.stamp();
                let snapshot = Arc::new(load_snapshot(&backend, &cache, store_id, None, stamp).await?);
                cache.set_if_unchanged(
                    store_id,
                    CacheLayer::BatchedData,
                    STORE_SNAPSHOT_KEY,
                    Arc::clone(&snapshot),
                    stamp,
                );
                // Kept regardless: it is only served flagged as stale.
                cache.set(store_id, CacheLayer::Products, FALLBACK_KEY, Arc::clone(&snapshot));
                Ok(snapshot)
            })
            .await
    }

    /// Snapshot restricted to `product_ids`; cost scales with the cart, not the catalog.
    #[instrument(skip(self, product_ids), fields(store_id = %store_id, products = product_ids.len()), err)]
    pub async fn fetch_cart_snapshot(
        &self,
        store_id: StoreId,
        product_ids: &[ProductId],
    ) -> Result<Arc<BatchedSnapshot>, FetchError> {
        let mut ids = product_ids.to_vec();
        ids.sort();
        ids.dedup();

        if ids.is_empty() {
            return Ok(Arc::new(BatchedSnapshot::assemble(
                store_id,
                Vec::new(),
                Vec::new(),
                Vec::new(),
                Utc::now(),
            )));
        }

        let signature = join_ids(&ids);
        let cache_key = format!("cart:{signature}");
        if let Some(snapshot) =
            self.cache
                .get::<Arc<BatchedSnapshot>>(store_id, CacheLayer::CartValidation, &cache_key)
        {
            debug!("cart snapshot cache hit");
            return Ok(snapshot);
        }

        let backend = Arc::clone(&self.backend);
        let cache = Arc::clone(&self.cache);
        self.snapshots
            .dedupe(format!("cart_snapshot:{store_id}:{signature}"), move || async move {
                let stamp = cache.stamp();
                let snapshot = Arc::new(load_snapshot(&backend, &cache, store_id, Some(ids), stamp).await?);
                cache.set_if_unchanged(
                    store_id,
                    CacheLayer::CartValidation,
                    cache_key,
                    Arc::clone(&snapshot),
                    stamp,
                );
                Ok(snapshot)
            })
            .await
    }

    /// Like [`fetch_store_snapshot`](Self::fetch_store_snapshot), but serves the
    /// last good snapshot (flagged stale) when the backend fails.
    pub async fn fetch_store_snapshot_or_cached(&self, store_id: StoreId) -> Result<CachedSnapshot, FetchError> {
        match self.fetch_store_snapshot(store_id).await {
            Ok(snapshot) => Ok(CachedSnapshot {
                snapshot,
                stale: false,
            }),
            Err(err) => {
                let fallback =
                    self.cache
                        .get::<Arc<BatchedSnapshot>>(store_id, CacheLayer::Products, FALLBACK_KEY);
                match fallback {
                    Some(snapshot) => {
                        warn!(
                            store_id = %store_id,
                            error = %err,
                            fetched_at = %snapshot.fetched_at,
                            "serving stale snapshot"
                        );
                        Ok(CachedSnapshot {
                            snapshot,
                            stale: true,
                        })
                    }
                    None => Err(err),
                }
            }
        }
    }

    /// Drop every cached entry of one store.
    pub fn invalidate_store(&self, store_id: StoreId) -> usize {
        let removed = self.cache.clear_store(store_id);
        debug!(store_id = %store_id, removed, "store cache invalidated");
        removed
    }

    pub fn clear_all(&self) -> usize {
        self.cache.clear_all()
    }
}

fn join_ids<T: core::fmt::Display>(ids: &[T]) -> String {
    ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(",")
}

/// Stock rows of a store. With `reuse_cached` the `Inventory` layer is tried
/// first; either way a backend read refreshes it.
async fn stock_rows(
    backend: &SharedBackend,
    cache: &StoreCache,
    store_id: StoreId,
    reuse_cached: bool,
    stamp: CacheStamp,
) -> Result<Arc<Vec<InventoryStockItem>>, BackendError> {
    if reuse_cached {
        if let Some(rows) = cache.get::<Arc<Vec<InventoryStockItem>>>(store_id, CacheLayer::Inventory, INVENTORY_KEY) {
            return Ok(rows);
        }
    }
    let rows = Arc::new(backend.fetch_inventory(store_id).await?);
    cache.set_if_unchanged(store_id, CacheLayer::Inventory, INVENTORY_KEY, Arc::clone(&rows), stamp);
    Ok(rows)
}

async fn load_snapshot(
    backend: &SharedBackend,
    cache: &StoreCache,
    store_id: StoreId,
    product_ids: Option<Vec<ProductId>>,
    stamp: CacheStamp,
) -> Result<BatchedSnapshot, FetchError> {
    let fail = |e: BackendError| FetchError::new(store_id, e);

    let cached_catalog = match product_ids {
        None => cache.get::<Arc<Vec<ProductWithRecipe>>>(store_id, CacheLayer::Products, CATALOG_KEY),
        Some(_) => None,
    };

    let reuse_stock = product_ids.is_some();
    let (catalog, inventory) = match cached_catalog {
        Some(catalog) => (
            catalog,
            stock_rows(backend, cache, store_id, reuse_stock, stamp).await.map_err(fail)?,
        ),
        None => {
            let (catalog, inventory) = tokio::try_join!(
                backend.fetch_products(store_id, product_ids.as_deref()),
                stock_rows(backend, cache, store_id, reuse_stock, stamp),
            )
            .map_err(fail)?;
            let catalog = Arc::new(catalog);
            if product_ids.is_none() {
                cache.set_if_unchanged(store_id, CacheLayer::Products, CATALOG_KEY, Arc::clone(&catalog), stamp);
            }
            (catalog, inventory)
        }
    };

    let mut recipe_ids: Vec<RecipeId> = catalog
        .iter()
        .filter_map(|row| row.recipe.as_ref().map(|recipe| recipe.id))
        .collect();
    recipe_ids.sort();
    recipe_ids.dedup();

    let ingredients = if recipe_ids.is_empty() {
        Vec::new()
    } else {
        let key = format!("recipes:{}", join_ids(&recipe_ids));
        match cache.get::<Arc<Vec<RecipeIngredient>>>(store_id, CacheLayer::RecipeIngredients, &key) {
            Some(rows) => Arc::unwrap_or_clone(rows),
            None => {
                let rows = backend
                    .fetch_recipe_ingredients(store_id, &recipe_ids)
                    .await
                    .map_err(fail)?;
                cache.set_if_unchanged(store_id, CacheLayer::RecipeIngredients, key, Arc::new(rows.clone()), stamp);
                rows
            }
        }
    };

    debug!(
        store_id = %store_id,
        products = catalog.len(),
        recipes = recipe_ids.len(),
        stock_rows = inventory.len(),
        "snapshot loaded"
    );

    Ok(BatchedSnapshot::assemble(
        store_id,
        Arc::unwrap_or_clone(catalog),
        Arc::unwrap_or_clone(inventory),
        ingredients,
        Utc::now(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::in_memory::ops;
    use crate::backend::InMemoryBackend;
    use crate::cache::CacheTtls;
    use larder_catalog::{Product, Recipe};
    use larder_core::InventoryItemId;

    struct Fixture {
        backend: Arc<InMemoryBackend>,
        fetcher: SnapshotFetcher,
        store: StoreId,
        latte: ProductId,
        tea: ProductId,
        beans: InventoryItemId,
    }

    fn fixture() -> Fixture {
        let store = StoreId::new();
        let backend = Arc::new(InMemoryBackend::new());

        let beans = InventoryStockItem::new(store, "Coffee Beans", 200.0);
        let milk = InventoryStockItem::new(store, "Milk", 900.0);
        let recipe = Recipe::new(store, "Latte");
        backend.add_recipe(
            recipe.clone(),
            vec![
                RecipeIngredient::mapped(recipe.id, "Coffee Beans", 18.0, beans.id),
                RecipeIngredient::mapped(recipe.id, "Milk", 150.0, milk.id),
            ],
        );
        let latte = Product::new(store, "Latte", 450).with_recipe(recipe.id);
        let tea = Product::new(store, "Tea", 300);
        let (latte_id, tea_id, beans_id) = (latte.id, tea.id, beans.id);
        backend.add_product(latte);
        backend.add_product(tea);
        backend.add_inventory(beans);
        backend.add_inventory(milk);

        let shared: SharedBackend = backend.clone();
        let fetcher = SnapshotFetcher::new(
            shared,
            Arc::new(StoreCache::new(CacheTtls::default())),
            Duration::from_millis(500),
        );

        Fixture {
            backend,
            fetcher,
            store,
            latte: latte_id,
            tea: tea_id,
            beans: beans_id,
        }
    }

    #[tokio::test]
    async fn store_snapshot_uses_three_reads_then_cache() {
        let f = fixture();

        let snapshot = f.fetcher.fetch_store_snapshot(f.store).await.unwrap();
        assert_eq!(snapshot.products.len(), 2);
        assert_eq!(snapshot.inventory.len(), 2);
        assert_eq!(f.backend.read_count(), 3);

        let again = f.fetcher.fetch_store_snapshot(f.store).await.unwrap();
        assert!(Arc::ptr_eq(&snapshot, &again));
        assert_eq!(f.backend.read_count(), 3);
    }

    #[tokio::test]
    async fn concurrent_snapshot_requests_share_one_load() {
        let f = fixture();

        let (a, b) = tokio::join!(
            f.fetcher.fetch_store_snapshot(f.store),
            f.fetcher.fetch_store_snapshot(f.store)
        );
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(f.backend.query_count(ops::FETCH_PRODUCTS), 1);
        assert_eq!(f.backend.query_count(ops::FETCH_INVENTORY), 1);
    }

    #[tokio::test]
    async fn rebuilt_snapshot_rereads_stock_but_reuses_definitions() {
        let f = fixture();
        f.fetcher.fetch_store_snapshot(f.store).await.unwrap();

        f.backend.restock(f.beans, 10.0);
        f.fetcher
            .cache()
            .invalidate_layer(f.store, CacheLayer::BatchedData);

        let snapshot = f.fetcher.fetch_store_snapshot(f.store).await.unwrap();
        assert_eq!(snapshot.inventory_item(&f.beans).unwrap().stock_quantity, 210.0);
        assert_eq!(f.backend.query_count(ops::FETCH_INVENTORY), 2);
        assert_eq!(f.backend.query_count(ops::FETCH_PRODUCTS), 1);
        assert_eq!(f.backend.query_count(ops::FETCH_RECIPE_INGREDIENTS), 1);
    }

    #[tokio::test]
    async fn cart_snapshot_is_restricted_to_requested_products() {
        let f = fixture();

        let snapshot = f
            .fetcher
            .fetch_cart_snapshot(f.store, &[f.tea, f.tea])
            .await
            .unwrap();
        assert_eq!(snapshot.product_ids(), vec![f.tea]);
        // Tea has no recipe, so no ingredient read.
        assert_eq!(f.backend.query_count(ops::FETCH_RECIPE_INGREDIENTS), 0);

        let empty = f.fetcher.fetch_cart_snapshot(f.store, &[]).await.unwrap();
        assert!(empty.products.is_empty());
        assert_eq!(f.backend.query_count(ops::FETCH_PRODUCTS), 1);
    }

    #[tokio::test]
    async fn backend_errors_propagate_without_a_fallback() {
        let f = fixture();
        f.backend.fail(ops::FETCH_INVENTORY);

        let err = f.fetcher.fetch_store_snapshot(f.store).await.unwrap_err();
        assert_eq!(err.store_id, f.store);

        let err = f.fetcher.fetch_store_snapshot_or_cached(f.store).await.unwrap_err();
        assert_eq!(err.store_id, f.store);
    }

    #[tokio::test]
    async fn stale_snapshot_is_served_when_backend_fails() {
        let f = fixture();
        let fresh = f.fetcher.fetch_store_snapshot_or_cached(f.store).await.unwrap();
        assert!(!fresh.stale);

        f.fetcher
            .cache()
            .invalidate_layer(f.store, CacheLayer::BatchedData);
        f.backend.fail(ops::FETCH_INVENTORY);

        let cached = f.fetcher.fetch_store_snapshot_or_cached(f.store).await.unwrap();
        assert!(cached.stale);
        assert!(Arc::ptr_eq(&cached.snapshot, &fresh.snapshot));
        assert!(cached.snapshot.product(&f.latte).is_some());
    }

    #[tokio::test]
    async fn cart_snapshots_reuse_stock_rows_until_invalidated() {
        let f = fixture();
        f.fetcher.fetch_store_snapshot(f.store).await.unwrap();

        f.fetcher.fetch_cart_snapshot(f.store, &[f.latte]).await.unwrap();
        assert_eq!(f.backend.query_count(ops::FETCH_INVENTORY), 1);

        f.backend.restock(f.beans, 10.0);
        f.fetcher.cache().invalidate_layer(f.store, CacheLayer::Inventory);
        f.fetcher.cache().invalidate_layer(f.store, CacheLayer::CartValidation);

        let cart = f.fetcher.fetch_cart_snapshot(f.store, &[f.latte]).await.unwrap();
        assert_eq!(f.backend.query_count(ops::FETCH_INVENTORY), 2);
        assert_eq!(cart.inventory_item(&f.beans).unwrap().stock_quantity, 210.0);
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_loaded_across_an_invalidation_is_not_cached() {
        let f = fixture();
        f.backend.set_latency(ops::FETCH_INVENTORY, Duration::from_millis(100));

        let invalidate_mid_load = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            f.fetcher.invalidate_store(f.store);
        };
        let (loaded, ()) = tokio::join!(f.fetcher.fetch_store_snapshot(f.store), invalidate_mid_load);
        loaded.unwrap();
        assert!(
            f.fetcher
                .cache()
                .get::<Arc<BatchedSnapshot>>(f.store, CacheLayer::BatchedData, STORE_SNAPSHOT_KEY)
                .is_none()
        );

        f.fetcher.fetch_store_snapshot(f.store).await.unwrap();
        assert_eq!(f.backend.query_count(ops::FETCH_INVENTORY), 2);
        assert_eq!(f.backend.query_count(ops::FETCH_PRODUCTS), 2);
    }

    #[tokio::test]
    async fn invalidate_store_forces_a_reload() {
        let f = fixture();
        f.fetcher.fetch_store_snapshot(f.store).await.unwrap();
        f.fetcher.fetch_cart_snapshot(f.store, &[f.tea]).await.unwrap();

        assert!(f.fetcher.invalidate_store(f.store) > 0);
        f.fetcher.fetch_store_snapshot(f.store).await.unwrap();
        assert_eq!(f.backend.query_count(ops::FETCH_PRODUCTS), 2);
    }
}
