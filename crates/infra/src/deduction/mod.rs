//! Sale-time inventory deduction.
//!
//! A deduction runs in three phases:
//!
//! 1. **Fetch**: catalog rows for the sold products, store recipes and global
//!    templates named like the sold items, and the store's stock rows are read
//!    concurrently; recipe ingredients follow once recipe ids are known.
//! 2. **Resolve**: each line item is mapped to a recipe (catalog link, then
//!    exact store recipe name, then global template) and its ingredients to
//!    stock rows. Requirements are summed per stock row.
//! 3. **Apply**: the transaction id is claimed, then the plan is written in
//!    fixed-size chunks. Movements are logged in the background.
//!
//! The whole run races a deadline. On timeout the report is marked failed;
//! writes already issued are not rolled back.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use larder_core::{InventoryItemId, ProductId, StoreId, TransactionId};
use larder_inventory::Actor;

use crate::error::DeductionError;

mod engine;
mod resolve;

pub use engine::DeductionEngine;

/// One sold line: a catalog product, a free-text name, or both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    #[serde(default)]
    pub product_id: Option<ProductId>,
    pub name: String,
    pub quantity: u32,
}

impl LineItem {
    pub fn product(product_id: ProductId, name: impl Into<String>, quantity: u32) -> Self {
        Self {
            product_id: Some(product_id),
            name: name.into(),
            quantity,
        }
    }

    /// A line with no catalog reference, resolved by name only.
    pub fn named(name: impl Into<String>, quantity: u32) -> Self {
        Self {
            product_id: None,
            name: name.into(),
            quantity,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeductionRequest {
    pub transaction_id: TransactionId,
    pub store_id: StoreId,
    pub line_items: Vec<LineItem>,
    pub actor: Actor,
    /// Overrides the engine's configured deadline.
    pub timeout: Option<Duration>,
}

impl DeductionRequest {
    pub fn new(transaction_id: TransactionId, store_id: StoreId, line_items: Vec<LineItem>) -> Self {
        Self {
            transaction_id,
            store_id,
            line_items,
            actor: Actor::System,
            timeout: None,
        }
    }

    pub fn with_actor(mut self, actor: Actor) -> Self {
        self.actor = actor;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A stock row that was actually decremented.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeductedItem {
    pub inventory_item_id: InventoryItemId,
    pub item_name: String,
    /// Sum over every line item that uses this row.
    pub requested: f64,
    /// What the backend actually removed; less than `requested` when clamped at zero.
    pub quantity_deducted: f64,
    pub previous_stock: f64,
    pub new_stock: f64,
}

/// Outcome of one `deduct` call.
///
/// `errors` are blocking; `warnings` are notices. `success == false` means
/// inventory may be inconsistent and needs manual reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeductionReport {
    pub transaction_id: TransactionId,
    pub success: bool,
    pub deducted_items: Vec<DeductedItem>,
    pub errors: Vec<DeductionError>,
    pub warnings: Vec<DeductionError>,
    pub processing_time_ms: u64,
    /// Line items that resolved to a recipe or template.
    pub items_processed: usize,
}

impl DeductionReport {
    pub fn new(transaction_id: TransactionId) -> Self {
        Self {
            transaction_id,
            success: true,
            deducted_items: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            processing_time_ms: 0,
            items_processed: 0,
        }
    }

    pub(crate) fn fail(&mut self, error: DeductionError) {
        self.success = false;
        self.errors.push(error);
    }

    pub(crate) fn warn(&mut self, warning: DeductionError) {
        self.warnings.push(warning);
    }

    pub fn deducted(&self, id: &InventoryItemId) -> Option<&DeductedItem> {
        self.deducted_items.iter().find(|item| item.inventory_item_id == *id)
    }
}
