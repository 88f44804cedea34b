use std::sync::Arc;

use larder_infra::{
    CartValidator, DeductionEngine, EngineConfig, ProgressiveLoader, SharedBackend,
    SnapshotFetcher, StoreCache,
};

/// Engine services shared by all handlers.
#[derive(Debug)]
pub struct AppServices {
    pub fetcher: Arc<SnapshotFetcher>,
    pub loader: Arc<ProgressiveLoader>,
    pub validator: CartValidator,
    pub engine: DeductionEngine,
}

impl AppServices {
    /// The cache every service reads through; hand it to the change listener.
    pub fn cache(&self) -> &Arc<StoreCache> {
        self.fetcher.cache()
    }
}

/// Wire the services over one backend and one cache.
pub fn build_services(backend: SharedBackend, config: &EngineConfig) -> AppServices {
    let cache = Arc::new(StoreCache::new(config.cache_ttls.clone()));
    let fetcher = Arc::new(SnapshotFetcher::new(
        Arc::clone(&backend),
        cache,
        config.dedupe_window,
    ));
    let loader = Arc::new(ProgressiveLoader::new(Arc::clone(&fetcher), config));
    let validator = CartValidator::new(Arc::clone(&fetcher), config.availability_policy());
    let engine = DeductionEngine::new(backend, config);

    AppServices {
        fetcher,
        loader,
        validator,
        engine,
    }
}
