//! Infrastructure error types.
//!
//! Errors that are shared between coalesced waiters must be `Clone`, so
//! backend failures are captured as messages rather than boxed sources.

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use thiserror::Error;

use larder_core::{InventoryItemId, StoreId, TransactionId};

/// Failure talking to the persistent store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The store could not be reached (pool closed, network, injected fault).
    #[error("backend unavailable during {operation}: {message}")]
    Unavailable {
        operation: &'static str,
        message: String,
    },

    /// A uniqueness or serialization conflict.
    #[error("conflict during {operation}: {message}")]
    Conflict {
        operation: &'static str,
        message: String,
    },

    /// Any other database-reported failure.
    #[error("database error during {operation}: {message}")]
    Database {
        operation: &'static str,
        message: String,
    },

    /// A row could not be decoded into a domain type.
    #[error("malformed row in {operation}: {message}")]
    Decode {
        operation: &'static str,
        message: String,
    },
}

impl BackendError {
    pub fn unavailable(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Unavailable {
            operation,
            message: message.into(),
        }
    }

    pub fn decode(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Decode {
            operation,
            message: message.into(),
        }
    }
}

/// A snapshot or product read failed. Callers may fall back to cached data.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("fetch failed for store {store_id}: {source}")]
pub struct FetchError {
    pub store_id: StoreId,
    #[source]
    pub source: BackendError,
}

impl FetchError {
    pub fn new(store_id: StoreId, source: BackendError) -> Self {
        Self { store_id, source }
    }
}

/// Everything that can go wrong (or merely be noteworthy) during a deduction.
///
/// Only `Fetch`, `Claim`, `ProcessingTimeout` and `DuplicateTransaction` fail
/// the call as a whole. `Resolution` entries are reported as warnings, `Write` entries as
/// per-row errors, and `AuditLog` is only ever logged.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DeductionError {
    #[error("failed to load deduction data: {0}")]
    Fetch(String),

    #[error("{0}")]
    Resolution(String),

    #[error("failed to update {item_name}: {reason}")]
    Write {
        inventory_item_id: InventoryItemId,
        item_name: String,
        reason: String,
    },

    #[error("processing timeout after {timeout_ms} ms; transaction may be partially processed")]
    ProcessingTimeout { timeout_ms: u64 },

    #[error("failed to record inventory movements: {0}")]
    AuditLog(String),

    #[error("transaction {0} has already been deducted")]
    DuplicateTransaction(TransactionId),

    #[error("failed to claim transaction: {0}")]
    Claim(String),
}

impl DeductionError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Fetch(_) => "fetch_error",
            Self::Resolution(_) => "resolution_warning",
            Self::Write { .. } => "write_error",
            Self::ProcessingTimeout { .. } => "processing_timeout",
            Self::AuditLog(_) => "audit_log_failure",
            Self::DuplicateTransaction(_) => "duplicate_transaction",
            Self::Claim(_) => "claim_error",
        }
    }
}

impl Serialize for DeductionError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("DeductionError", 2)?;
        state.serialize_field("kind", self.kind())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_warns_about_partial_processing() {
        let err = DeductionError::ProcessingTimeout { timeout_ms: 30_000 };
        assert!(err.to_string().contains("partially processed"));
    }

    #[test]
    fn deduction_errors_serialize_as_kind_and_message() {
        let err = DeductionError::Resolution("No recipe or template found for Mystery Drink".into());
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "resolution_warning");
        assert_eq!(json["message"], "No recipe or template found for Mystery Drink");
    }
}
