//! Persistent store abstraction.
//!
//! The engine needs a small, fixed set of reads (catalog, stock, recipe
//! ingredients, recipes and templates by name) and three writes: claiming a
//! transaction (and releasing a claim nothing was written under), decrementing
//! stock, and appending movements. Every read is store-scoped except the
//! global template lookup.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use larder_catalog::{EssentialProduct, ProductWithRecipe, Recipe, RecipeIngredient, RecipeTemplate};
use larder_core::{InventoryItemId, ProductId, RecipeId, StoreId, TransactionId};
use larder_inventory::{InventoryMovement, InventoryStockItem};

use crate::error::BackendError;

pub mod in_memory;
pub mod pg_notify;
pub mod postgres;

pub use in_memory::{InMemoryBackend, StoreFixture};
pub use pg_notify::PgChangeFeed;
pub use postgres::PostgresBackend;

/// Backend handle shared by every service.
pub type SharedBackend = Arc<dyn StoreBackend>;

/// Request to lower one stock row by `amount`, never below zero and never
/// above its current value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StockDecrement {
    pub inventory_item_id: InventoryItemId,
    pub amount: f64,
}

/// Per-row result of a batched decrement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StockWriteOutcome {
    /// The row was updated; quantities are as read and written under the row lock.
    Applied {
        inventory_item_id: InventoryItemId,
        previous: f64,
        new: f64,
    },
    Failed {
        inventory_item_id: InventoryItemId,
        reason: String,
    },
}

impl StockWriteOutcome {
    pub fn inventory_item_id(&self) -> InventoryItemId {
        match self {
            Self::Applied { inventory_item_id, .. } | Self::Failed { inventory_item_id, .. } => {
                *inventory_item_id
            }
        }
    }
}

#[async_trait::async_trait]
pub trait StoreBackend: Send + Sync {
    /// Products of a store joined with their recipe header and category,
    /// ordered by display order. `product_ids` restricts the result.
    async fn fetch_products(
        &self,
        store_id: StoreId,
        product_ids: Option<&[ProductId]>,
    ) -> Result<Vec<ProductWithRecipe>, BackendError>;

    /// Grid-only product fields, one lightweight query.
    async fn fetch_essential_products(
        &self,
        store_id: StoreId,
    ) -> Result<Vec<EssentialProduct>, BackendError>;

    /// All stock rows of a store, active or not.
    async fn fetch_inventory(&self, store_id: StoreId) -> Result<Vec<InventoryStockItem>, BackendError>;

    /// Ingredients of the given recipes, restricted to recipes of `store_id`.
    async fn fetch_recipe_ingredients(
        &self,
        store_id: StoreId,
        recipe_ids: &[RecipeId],
    ) -> Result<Vec<RecipeIngredient>, BackendError>;

    /// Active store recipes whose name equals one of `names`, ignoring case.
    async fn fetch_recipes_by_names(
        &self,
        store_id: StoreId,
        names: &[String],
    ) -> Result<Vec<Recipe>, BackendError>;

    /// Active global templates whose name equals one of `names`, ignoring case.
    async fn fetch_templates_by_names(
        &self,
        names: &[String],
    ) -> Result<Vec<RecipeTemplate>, BackendError>;

    /// Record that `transaction_id` is being deducted. Returns `false` when it
    /// was claimed before.
    async fn claim_transaction(
        &self,
        store_id: StoreId,
        transaction_id: TransactionId,
    ) -> Result<bool, BackendError>;

    /// Drop the claim on `transaction_id` so it can be deducted again.
    /// Only used when none of its stock writes landed.
    async fn release_transaction(
        &self,
        store_id: StoreId,
        transaction_id: TransactionId,
    ) -> Result<(), BackendError>;

    /// Atomically lower each row and report what was read and written.
    ///
    /// Each row is read and written under its own lock, so concurrent
    /// transactions never lose each other's decrements.
    async fn apply_decrements(
        &self,
        store_id: StoreId,
        decrements: &[StockDecrement],
    ) -> Result<Vec<StockWriteOutcome>, BackendError>;

    /// Append audit rows.
    async fn insert_movements(&self, movements: &[InventoryMovement]) -> Result<(), BackendError>;
}
