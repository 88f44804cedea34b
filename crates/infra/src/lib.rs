//! Infrastructure layer: backends, caching, request coalescing, and the async
//! services (snapshot fetching, deduction, progressive loading, cache
//! invalidation) built on top of the pure catalog and inventory crates.

pub mod backend;
pub mod cache;
pub mod config;
pub mod dedupe;
pub mod deduction;
pub mod error;
pub mod listener;
pub mod loader;
pub mod snapshot;
pub mod validation;


pub use backend::{InMemoryBackend, PgChangeFeed, PostgresBackend, SharedBackend, StoreBackend, StoreFixture};
pub use cache::{CacheLayer, CacheTtls, StoreCache};
pub use config::EngineConfig;
pub use dedupe::RequestDeduplicator;
pub use deduction::{DeductedItem, DeductionEngine, DeductionReport, DeductionRequest, LineItem};
pub use error::{BackendError, DeductionError, FetchError};
pub use listener::{ChangeListener, ListenerHandle};
pub use loader::{DetailedProduct, LoadProgress, ProgressiveLoader, StoreAvailability};
pub use snapshot::{CachedSnapshot, SnapshotFetcher};
pub use validation::{CartLine, CartValidation, CartValidator};
