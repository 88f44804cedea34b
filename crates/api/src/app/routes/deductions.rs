use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use larder_core::TransactionId;
use larder_infra::{DeductionError, DeductionRequest};
use larder_inventory::Actor;

use crate::app::{dto, services::AppServices};

/// Deduct stock for a completed sale.
///
/// The body is always the deduction report. Status: 200 on success, 409 for a
/// replayed transaction id, 422 for any other failure.
pub async fn deduct(
    Extension(services): Extension<Arc<AppServices>>,
    Path(store_id): Path<String>,
    Json(body): Json<dto::DeductRequest>,
) -> axum::response::Response {
    let store_id = match dto::parse_store_id(&store_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let transaction_id = body.transaction_id.unwrap_or_else(TransactionId::new);
    let mut request = DeductionRequest::new(transaction_id, store_id, body.line_items)
        .with_actor(Actor::from(body.user_id));
    if let Some(ms) = body.timeout_ms {
        request = request.with_timeout(Duration::from_millis(ms));
    }

    let report = services.engine.deduct(request).await;

    let status = if report.success {
        StatusCode::OK
    } else if report
        .errors
        .iter()
        .any(|e| matches!(e, DeductionError::DuplicateTransaction(_)))
    {
        StatusCode::CONFLICT
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    (status, Json(report)).into_response()
}

