use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use crate::app::{dto, errors, services::AppServices};

/// Grid fields only; cheap enough to call on every screen load.
pub async fn essential(
    Extension(services): Extension<Arc<AppServices>>,
    Path(store_id): Path<String>,
) -> axum::response::Response {
    let store_id = match dto::parse_store_id(&store_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.loader.load_essential(store_id).await {
        Ok(products) => (StatusCode::OK, Json(products.as_slice())).into_response(),
        Err(e) => errors::fetch_error_to_response(e),
    }
}

/// Essential fields plus availability, computed on the background loader.
pub async fn detailed(
    Extension(services): Extension<Arc<AppServices>>,
    Path(store_id): Path<String>,
) -> axum::response::Response {
    let store_id = match dto::parse_store_id(&store_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let essentials = match services.loader.load_essential(store_id).await {
        Ok(products) => products,
        Err(e) => return errors::fetch_error_to_response(e),
    };

    let handle = services
        .loader
        .load_detailed_in_background(store_id, essentials, |_| {});
    match handle.await {
        Ok(Ok(products)) => (StatusCode::OK, Json(products.as_slice())).into_response(),
        Ok(Err(e)) => errors::fetch_error_to_response(e),
        Err(e) => errors::json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "loader_failed",
            e.to_string(),
        ),
    }
}
