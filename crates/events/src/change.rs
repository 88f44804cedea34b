//! Backend change notifications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use larder_core::StoreId;

/// Which class of backend rows changed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSource {
    /// A row of `inventory_stock` was inserted, updated or deleted.
    InventoryStock,
    /// A product catalog row (price, availability, recipe link) changed.
    ProductCatalog,
    /// A recipe ingredient row changed.
    RecipeIngredients,
}

impl ChangeSource {
    /// Backend table that emits this kind of change.
    pub fn table(self) -> &'static str {
        match self {
            Self::InventoryStock => "inventory_stock",
            Self::ProductCatalog => "product_catalog",
            Self::RecipeIngredients => "recipe_ingredients",
        }
    }

    pub fn from_table(table: &str) -> Option<Self> {
        match table {
            "inventory_stock" => Some(Self::InventoryStock),
            "product_catalog" => Some(Self::ProductCatalog),
            "recipe_ingredients" => Some(Self::RecipeIngredients),
            _ => None,
        }
    }
}

/// A single "something changed for this store" notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub store_id: StoreId,
    pub source: ChangeSource,
    pub occurred_at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(store_id: StoreId, source: ChangeSource, occurred_at: DateTime<Utc>) -> Self {
        Self {
            store_id,
            source,
            occurred_at,
        }
    }

    pub fn now(store_id: StoreId, source: ChangeSource) -> Self {
        Self::new(store_id, source, Utc::now())
    }
}

/// Messages that belong to exactly one store.
///
/// Lets listeners be pinned to a single store and drop everything else.
pub trait StoreScoped {
    fn store_id(&self) -> StoreId;
}

impl StoreScoped for ChangeEvent {
    fn store_id(&self) -> StoreId {
        self.store_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_map_back_to_sources() {
        for source in [
            ChangeSource::InventoryStock,
            ChangeSource::ProductCatalog,
            ChangeSource::RecipeIngredients,
        ] {
            assert_eq!(ChangeSource::from_table(source.table()), Some(source));
        }
        assert_eq!(ChangeSource::from_table("stores"), None);
    }

    #[test]
    fn change_event_serializes_source_in_snake_case() {
        let event = ChangeEvent::now(StoreId::new(), ChangeSource::RecipeIngredients);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["source"], "recipe_ingredients");
    }
}
