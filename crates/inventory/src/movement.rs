use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use larder_core::{InventoryItemId, MovementId, StoreId, TransactionId, UserId};

/// Kind of stock change. This engine only ever records sales.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    Sale,
}

impl MovementType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sale => "sale",
        }
    }
}

/// What the movement's `reference_id` points at.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceType {
    Transaction,
}

impl ReferenceType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transaction => "transaction",
        }
    }
}

/// Who caused a movement. Automated deductions without a signed-in cashier are
/// attributed to `system`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum Actor {
    #[default]
    System,
    User(UserId),
}

impl From<Option<UserId>> for Actor {
    fn from(value: Option<UserId>) -> Self {
        value.map_or(Self::System, Self::User)
    }
}

impl core::fmt::Display for Actor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::System => f.write_str("system"),
            Self::User(id) => core::fmt::Display::fmt(id, f),
        }
    }
}

/// Append-only audit record of one stock change.
///
/// Write-once: nothing in this workspace updates or deletes a movement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryMovement {
    pub id: MovementId,
    pub store_id: StoreId,
    pub inventory_item_id: InventoryItemId,
    pub movement_type: MovementType,
    /// Signed delta actually applied (`new_quantity - previous_quantity`).
    pub quantity_change: f64,
    pub previous_quantity: f64,
    pub new_quantity: f64,
    pub reference_type: ReferenceType,
    pub reference_id: TransactionId,
    pub notes: String,
    pub created_by: Actor,
    pub created_at: DateTime<Utc>,
}

impl InventoryMovement {
    /// Movement for a sale that moved `inventory_item_id` from `previous` to `new`.
    #[allow(clippy::too_many_arguments)]
    pub fn sale(
        store_id: StoreId,
        inventory_item_id: InventoryItemId,
        previous: f64,
        new: f64,
        transaction_id: TransactionId,
        notes: impl Into<String>,
        created_by: Actor,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MovementId::new(),
            store_id,
            inventory_item_id,
            movement_type: MovementType::Sale,
            quantity_change: new - previous,
            previous_quantity: previous,
            new_quantity: new,
            reference_type: ReferenceType::Transaction,
            reference_id: transaction_id,
            notes: notes.into(),
            created_by,
            created_at,
        }
    }
}
