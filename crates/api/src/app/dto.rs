use axum::http::StatusCode;
use serde::Deserialize;

use larder_core::{StoreId, TransactionId, UserId};
use larder_infra::{CartLine, LineItem};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct ValidateCartRequest {
    pub items: Vec<CartLine>,
}

#[derive(Debug, Deserialize)]
pub struct DeductRequest {
    /// Idempotency key. A fresh id is generated when absent, which disables replay protection.
    #[serde(default)]
    pub transaction_id: Option<TransactionId>,
    pub line_items: Vec<LineItem>,
    /// Cashier; movements are attributed to `system` when absent.
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

// -------------------------
// Path parsing
// -------------------------

pub fn parse_store_id(raw: &str) -> Result<StoreId, axum::response::Response> {
    raw.parse::<StoreId>()
        .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "invalid_store_id", e.to_string()))
}
