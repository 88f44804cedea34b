use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use tracing::info;

use crate::app::{dto, services::AppServices};

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// Drop every cached entry for the store.
pub async fn invalidate_cache(
    Extension(services): Extension<Arc<AppServices>>,
    Path(store_id): Path<String>,
) -> axum::response::Response {
    let store_id = match dto::parse_store_id(&store_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let removed = services.fetcher.invalidate_store(store_id);
    info!(store_id = %store_id, removed, "store cache invalidated on request");
    (StatusCode::OK, Json(serde_json::json!({ "removed": removed }))).into_response()
}
