use axum::{
    routing::{get, post},
    Router,
};

pub mod availability;
pub mod cart;
pub mod deductions;
pub mod products;
pub mod system;

/// Router for store-scoped endpoints, nested under `/stores/:store_id`.
pub fn router() -> Router {
    Router::new()
        .route("/products/essential", get(products::essential))
        .route("/products/detailed", get(products::detailed))
        .route("/availability", get(availability::store_availability))
        .route("/summary", get(availability::summary))
        .route("/cache/invalidate", post(system::invalidate_cache))
        .route("/cart/validate", post(cart::validate))
        .route("/deductions", post(deductions::deduct))
}
