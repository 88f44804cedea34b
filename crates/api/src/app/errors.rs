use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use larder_infra::{BackendError, FetchError};

pub fn fetch_error_to_response(err: FetchError) -> axum::response::Response {
    let message = err.to_string();
    match err.source {
        BackendError::Unavailable { .. } => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "backend_unavailable", message)
        }
        BackendError::Conflict { .. } => json_error(StatusCode::CONFLICT, "conflict", message),
        BackendError::Database { .. } => json_error(StatusCode::BAD_GATEWAY, "database_error", message),
        BackendError::Decode { .. } => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "decode_error", message)
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
