//! Two-phase product loading for the sales grid.
//!
//! `load_essential` returns what the grid needs to render (name, price, image,
//! category) from one light query. `load_detailed_in_background` then computes
//! availability for the same products from the full snapshot and reports
//! progress as it goes, so badges can appear without blocking the grid.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, instrument};

use larder_catalog::{
    AvailabilityPolicy, BatchedSnapshot, EssentialProduct, ProductAvailability,
    StoreAvailabilitySummary,
};
use larder_core::StoreId;

use crate::cache::CacheLayer;
use crate::config::EngineConfig;
use crate::dedupe::RequestDeduplicator;
use crate::error::FetchError;
use crate::snapshot::SnapshotFetcher;

/// Essential product list, `Products` layer.
pub(crate) const ESSENTIAL_KEY: &str = "essential";
/// Availability-enriched list, `Products` layer.
pub(crate) const DETAILED_KEY: &str = "detailed";

/// An essential product with its computed availability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailedProduct {
    #[serde(flatten)]
    pub product: EssentialProduct,
    pub availability: ProductAvailability,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadProgress {
    pub store_id: StoreId,
    pub loaded: usize,
    pub total: usize,
}

impl LoadProgress {
    pub fn is_complete(&self) -> bool {
        self.loaded >= self.total
    }

    /// Share done, in `0.0..=1.0`. An empty load counts as complete.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.loaded as f64 / self.total as f64
        }
    }
}

/// Availability for a whole store, plus whether it was computed from a stale snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreAvailability {
    pub store_id: StoreId,
    pub stale: bool,
    pub products: Vec<ProductAvailability>,
    pub summary: StoreAvailabilitySummary,
}

pub struct ProgressiveLoader {
    fetcher: Arc<SnapshotFetcher>,
    policy: AvailabilityPolicy,
    progress_step: usize,
    essentials: RequestDeduplicator<Arc<Vec<EssentialProduct>>, FetchError>,
    detailed: RequestDeduplicator<Arc<Vec<DetailedProduct>>, FetchError>,
}

impl core::fmt::Debug for ProgressiveLoader {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProgressiveLoader")
            .field("policy", &self.policy)
            .field("progress_step", &self.progress_step)
            .finish()
    }
}

impl ProgressiveLoader {
    pub fn new(fetcher: Arc<SnapshotFetcher>, config: &EngineConfig) -> Self {
        Self {
            fetcher,
            policy: config.availability_policy(),
            progress_step: config.progress_step.max(1),
            essentials: RequestDeduplicator::new(config.dedupe_window),
            detailed: RequestDeduplicator::new(config.dedupe_window),
        }
    }

    pub fn fetcher(&self) -> &Arc<SnapshotFetcher> {
        &self.fetcher
    }

    pub fn policy(&self) -> &AvailabilityPolicy {
        &self.policy
    }

    /// Grid fields for every product of the store.
    #[instrument(skip(self), fields(store_id = %store_id), err)]
    pub async fn load_essential(&self, store_id: StoreId) -> Result<Arc<Vec<EssentialProduct>>, FetchError> {
        let cache = Arc::clone(self.fetcher.cache());
        if let Some(products) = cache.get::<Arc<Vec<EssentialProduct>>>(store_id, CacheLayer::Products, ESSENTIAL_KEY) {
            return Ok(products);
        }

        let backend = Arc::clone(self.fetcher.backend());
        self.essentials
            .dedupe(format!("essential:{store_id}"), move || async move {
                let stamp = cache.stamp();
                let products = Arc::new(
                    backend
                        .fetch_essential_products(store_id)
                        .await
                        .map_err(|e| FetchError::new(store_id, e))?,
                );
                cache.set_if_unchanged(store_id, CacheLayer::Products, ESSENTIAL_KEY, Arc::clone(&products), stamp);
                Ok(products)
            })
            .await
    }

    /// Availability for `essentials`, computed on a background task.
    ///
    /// Concurrent loads for the same store share one computation; only the
    /// first caller's `on_progress` receives reports.
    pub fn load_detailed_in_background<F>(
        self: &Arc<Self>,
        store_id: StoreId,
        essentials: Arc<Vec<EssentialProduct>>,
        on_progress: F,
    ) -> JoinHandle<Result<Arc<Vec<DetailedProduct>>, FetchError>>
    where
        F: Fn(LoadProgress) + Send + Sync + 'static,
    {
        let loader = Arc::clone(self);
        tokio::spawn(async move { loader.load_detailed(store_id, essentials, on_progress).await })
    }

    #[instrument(skip(self, essentials, on_progress), fields(store_id = %store_id, products = essentials.len()), err)]
    pub async fn load_detailed<F>(
        &self,
        store_id: StoreId,
        essentials: Arc<Vec<EssentialProduct>>,
        on_progress: F,
    ) -> Result<Arc<Vec<DetailedProduct>>, FetchError>
    where
        F: Fn(LoadProgress) + Send + Sync + 'static,
    {
        let cache = Arc::clone(self.fetcher.cache());
        if let Some(detailed) = cache.get::<Arc<Vec<DetailedProduct>>>(store_id, CacheLayer::Products, DETAILED_KEY) {
            on_progress(LoadProgress {
                store_id,
                loaded: detailed.len(),
                total: detailed.len(),
            });
            return Ok(detailed);
        }

        let fetcher = Arc::clone(&self.fetcher);
        let policy = self.policy;
        let step = self.progress_step;
        self.detailed
            .dedupe(format!("detailed:{store_id}"), move || async move {
                let stamp = cache.stamp();
                let cached = fetcher.fetch_store_snapshot_or_cached(store_id).await?;
                let detailed =
                    enrich(&cached.snapshot, &essentials, &policy, step, &on_progress).await;
                let detailed = Arc::new(detailed);
                // A list built from a stale snapshot must not outlive the outage.
                if !cached.stale {
                    cache.set_if_unchanged(store_id, CacheLayer::Products, DETAILED_KEY, Arc::clone(&detailed), stamp);
                }
                Ok(detailed)
            })
            .await
    }

    /// Availability of every product in the store.
    #[instrument(skip(self), fields(store_id = %store_id), err)]
    pub async fn store_availability(&self, store_id: StoreId) -> Result<StoreAvailability, FetchError> {
        let cached = self.fetcher.fetch_store_snapshot_or_cached(store_id).await?;
        let products = cached.snapshot.availability_all(&self.policy);
        Ok(StoreAvailability {
            store_id,
            stale: cached.stale,
            summary: StoreAvailabilitySummary::from_results(&products),
            products,
        })
    }

    pub async fn store_summary(&self, store_id: StoreId) -> Result<StoreAvailabilitySummary, FetchError> {
        Ok(self.store_availability(store_id).await?.summary)
    }
}

async fn enrich(
    snapshot: &BatchedSnapshot,
    essentials: &[EssentialProduct],
    policy: &AvailabilityPolicy,
    step: usize,
    on_progress: &(dyn Fn(LoadProgress) + Send + Sync),
) -> Vec<DetailedProduct> {
    let total = essentials.len();
    let mut detailed = Vec::with_capacity(total);

    for chunk in essentials.chunks(step) {
        detailed.extend(chunk.iter().map(|product| DetailedProduct {
            availability: snapshot.availability_of(&product.id, policy),
            product: product.clone(),
        }));
        on_progress(LoadProgress {
            store_id: snapshot.store_id,
            loaded: detailed.len(),
            total,
        });
        tokio::task::yield_now().await;
    }

    if total == 0 {
        on_progress(LoadProgress {
            store_id: snapshot.store_id,
            loaded: 0,
            total: 0,
        });
    }
    debug!(store_id = %snapshot.store_id, total, "detailed products computed");
    detailed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::backend::in_memory::ops;
    use crate::backend::{InMemoryBackend, SharedBackend};
    use crate::cache::{CacheTtls, StoreCache};
    use larder_catalog::{AvailabilityStatus, Product, Recipe, RecipeIngredient};
    use larder_inventory::InventoryStockItem;

    fn loader_with(products: usize) -> (Arc<InMemoryBackend>, Arc<ProgressiveLoader>, StoreId) {
        let store = StoreId::new();
        let backend = Arc::new(InMemoryBackend::new());
        let flour = InventoryStockItem::new(store, "Flour", 30.0);
        let recipe = Recipe::new(store, "Croffle");
        backend.add_recipe(
            recipe.clone(),
            vec![RecipeIngredient::mapped(recipe.id, "Flour", 10.0, flour.id)],
        );
        backend.add_inventory(flour);
        for i in 0..products {
            let mut product = Product::new(store, format!("Croffle {i}"), 120).with_recipe(recipe.id);
            product.display_order = i as i32;
            backend.add_product(product);
        }

        let shared: SharedBackend = backend.clone();
        let config = EngineConfig::default().with_progress_step(10);
        let fetcher = Arc::new(SnapshotFetcher::new(
            shared,
            Arc::new(StoreCache::new(CacheTtls::default())),
            Duration::from_millis(500),
        ));
        (backend, Arc::new(ProgressiveLoader::new(fetcher, &config)), store)
    }

    #[tokio::test]
    async fn essential_load_is_one_query_and_cached() {
        let (backend, loader, store) = loader_with(3);

        let first = loader.load_essential(store).await.unwrap();
        let second = loader.load_essential(store).await.unwrap();
        assert_eq!(first.len(), 3);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(backend.query_count(ops::FETCH_ESSENTIAL_PRODUCTS), 1);
        assert_eq!(backend.query_count(ops::FETCH_INVENTORY), 0);
    }

    #[tokio::test]
    async fn detailed_load_reports_progress_in_steps() {
        let (_backend, loader, store) = loader_with(25);
        let essentials = loader.load_essential(store).await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let detailed = loader
            .load_detailed_in_background(store, essentials, move |p| sink.lock().unwrap().push(p.loaded))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(detailed.len(), 25);
        assert_eq!(*seen.lock().unwrap(), vec![10, 20, 25]);
        // 30 flour / 10 per unit.
        assert_eq!(detailed[0].availability.quantity, 3);
        assert_eq!(detailed[0].availability.status, AvailabilityStatus::LowStock);
    }

    #[tokio::test]
    async fn detailed_results_are_cached_after_the_first_load() {
        let (backend, loader, store) = loader_with(2);
        let essentials = loader.load_essential(store).await.unwrap();

        loader.load_detailed(store, Arc::clone(&essentials), |_| {}).await.unwrap();
        loader.load_detailed(store, essentials, |_| {}).await.unwrap();
        assert_eq!(backend.query_count(ops::FETCH_INVENTORY), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn detailed_list_computed_across_a_stock_change_is_not_cached() {
        let (backend, loader, store) = loader_with(2);
        let essentials = loader.load_essential(store).await.unwrap();
        backend.set_latency(ops::FETCH_INVENTORY, Duration::from_millis(100));

        let cache = Arc::clone(loader.fetcher().cache());
        let stock_changed = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            crate::listener::invalidate(&cache, store, larder_events::ChangeSource::InventoryStock);
        };
        let (detailed, ()) = tokio::join!(
            loader.load_detailed(store, Arc::clone(&essentials), |_| {}),
            stock_changed
        );
        assert_eq!(detailed.unwrap().len(), 2);

        loader.load_detailed(store, essentials, |_| {}).await.unwrap();
        assert_eq!(backend.query_count(ops::FETCH_INVENTORY), 2);
    }

    #[tokio::test]
    async fn summary_counts_statuses() {
        let (_backend, loader, store) = loader_with(4);
        let summary = loader.store_summary(store).await.unwrap();
        assert_eq!(summary.total, 4);
        assert_eq!(summary.low_stock, 4);
    }
}
