use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use crate::app::{dto, errors, services::AppServices};

/// An invalid cart is still a 200; the verdict is in `is_valid` and `errors`.
pub async fn validate(
    Extension(services): Extension<Arc<AppServices>>,
    Path(store_id): Path<String>,
    Json(body): Json<dto::ValidateCartRequest>,
) -> axum::response::Response {
    let store_id = match dto::parse_store_id(&store_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.validator.validate(store_id, &body.items).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => errors::fetch_error_to_response(e),
    }
}
