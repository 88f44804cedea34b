use serde::{Deserialize, Serialize};

use larder_core::{InventoryItemId, StoreId};

/// A quantity-bearing raw or intermediate material at one store.
///
/// Quantities are in the item's own unit (grams, millilitres, pieces); the
/// engine never converts between units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryStockItem {
    pub id: InventoryItemId,
    pub store_id: StoreId,
    pub name: String,
    pub stock_quantity: f64,
    pub is_active: bool,
}

impl InventoryStockItem {
    pub fn new(store_id: StoreId, name: impl Into<String>, stock_quantity: f64) -> Self {
        Self {
            id: InventoryItemId::new(),
            store_id,
            name: name.into(),
            stock_quantity,
            is_active: true,
        }
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}

/// Whole units producible from `stock` when each unit needs `required_per_unit`.
///
/// Returns `None` for a non-positive requirement; such an ingredient does
/// not constrain production. Negative stock produces nothing.
pub fn units_producible(stock: f64, required_per_unit: f64) -> Option<u32> {
    if required_per_unit.is_nan() || required_per_unit <= 0.0 {
        return None;
    }
    let units = (stock.max(0.0) / required_per_unit).floor();
    Some(if units >= f64::from(u32::MAX) { u32::MAX } else { units as u32 })
}
