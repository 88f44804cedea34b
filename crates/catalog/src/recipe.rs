use serde::{Deserialize, Serialize};

use larder_core::{InventoryItemId, RecipeId, RecipeTemplateId, StoreId};

/// Store-specific recipe header. Ingredients are fetched separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipe {
    pub id: RecipeId,
    pub store_id: StoreId,
    pub name: String,
    pub is_active: bool,
}

impl Recipe {
    pub fn new(store_id: StoreId, name: impl Into<String>) -> Self {
        Self {
            id: RecipeId::new(),
            store_id,
            name: name.into(),
            is_active: true,
        }
    }
}

/// One line of a store recipe.
///
/// `inventory_item_id` may be `None`: an ingredient that nobody has mapped to a
/// stock row yet is an expected state, not a data error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeIngredient {
    pub recipe_id: RecipeId,
    pub ingredient_name: String,
    /// Quantity consumed per unit of product output.
    pub required_quantity: f64,
    pub inventory_item_id: Option<InventoryItemId>,
}

impl RecipeIngredient {
    pub fn mapped(
        recipe_id: RecipeId,
        ingredient_name: impl Into<String>,
        required_quantity: f64,
        inventory_item_id: InventoryItemId,
    ) -> Self {
        Self {
            recipe_id,
            ingredient_name: ingredient_name.into(),
            required_quantity,
            inventory_item_id: Some(inventory_item_id),
        }
    }

    pub fn unmapped(
        recipe_id: RecipeId,
        ingredient_name: impl Into<String>,
        required_quantity: f64,
    ) -> Self {
        Self {
            recipe_id,
            ingredient_name: ingredient_name.into(),
            required_quantity,
            inventory_item_id: None,
        }
    }
}

/// Store-independent fallback recipe, looked up by sold item name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeTemplate {
    pub id: RecipeTemplateId,
    pub name: String,
    pub is_active: bool,
    pub ingredients: Vec<TemplateIngredient>,
}

/// Template ingredients are resolved to stock rows by name at deduction time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateIngredient {
    pub ingredient_name: String,
    pub quantity: f64,
}

impl RecipeTemplate {
    pub fn new(name: impl Into<String>, ingredients: Vec<TemplateIngredient>) -> Self {
        Self {
            id: RecipeTemplateId::new(),
            name: name.into(),
            is_active: true,
            ingredients,
        }
    }
}
