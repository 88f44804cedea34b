use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use crate::app::{dto, errors, services::AppServices};

/// Per-product availability. Served from the last good snapshot (flagged `stale`) during an outage.
pub async fn store_availability(
    Extension(services): Extension<Arc<AppServices>>,
    Path(store_id): Path<String>,
) -> axum::response::Response {
    let store_id = match dto::parse_store_id(&store_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.loader.store_availability(store_id).await {
        Ok(availability) => (StatusCode::OK, Json(availability)).into_response(),
        Err(e) => errors::fetch_error_to_response(e),
    }
}

pub async fn summary(
    Extension(services): Extension<Arc<AppServices>>,
    Path(store_id): Path<String>,
) -> axum::response::Response {
    let store_id = match dto::parse_store_id(&store_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.loader.store_summary(store_id).await {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(e) => errors::fetch_error_to_response(e),
    }
}
