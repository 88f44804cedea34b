//! Batched snapshot: one store's catalog, recipes, recipe ingredients and stock,
//! joined in memory from a fixed number of backend reads.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use larder_core::{InventoryItemId, ProductId, RecipeId, StoreId};
use larder_inventory::InventoryStockItem;

use crate::product::{Product, ProductWithRecipe};
use crate::recipe::{Recipe, RecipeIngredient};

/// A recipe ingredient enriched with the stock row it maps to, as of fetch time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotIngredient {
    pub recipe_id: RecipeId,
    pub ingredient_name: String,
    pub required_quantity: f64,
    pub inventory_item_id: Option<InventoryItemId>,
    pub inventory_name: Option<String>,
    pub inventory_stock: Option<f64>,
    pub inventory_active: bool,
}

impl SnapshotIngredient {
    /// Mapped to a stock row of this store that is still active.
    pub fn is_tracked(&self) -> bool {
        self.inventory_item_id.is_some() && self.inventory_stock.is_some() && self.inventory_active
    }

    /// Name to show for the requirement: the stock row's, else the recipe's.
    pub fn display_name(&self) -> &str {
        self.inventory_name.as_deref().unwrap_or(&self.ingredient_name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchedSnapshot {
    pub store_id: StoreId,
    /// Ordered by `display_order`.
    pub products: Vec<Product>,
    pub recipes: HashMap<RecipeId, Recipe>,
    pub inventory: Vec<InventoryStockItem>,
    pub ingredients: HashMap<RecipeId, Vec<SnapshotIngredient>>,
    pub fetched_at: DateTime<Utc>,
}

impl BatchedSnapshot {
    /// Join the three query results.
    ///
    /// Stock rows from other stores are dropped, so an ingredient mapped across
    /// stores reads as unmapped. Ingredients of recipes that no product in
    /// `catalog` references are dropped too.
    pub fn assemble(
        store_id: StoreId,
        catalog: Vec<ProductWithRecipe>,
        inventory: Vec<InventoryStockItem>,
        ingredients: Vec<RecipeIngredient>,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        let mut products = Vec::with_capacity(catalog.len());
        let mut recipes = HashMap::new();
        for row in catalog {
            if let Some(recipe) = row.recipe {
                recipes.insert(recipe.id, recipe);
            }
            products.push(row.product);
        }
        products.sort_by_key(|p| p.display_order);

        let inventory: Vec<InventoryStockItem> = inventory
            .into_iter()
            .filter(|item| item.store_id == store_id)
            .collect();
        let by_id: HashMap<InventoryItemId, &InventoryStockItem> =
            inventory.iter().map(|item| (item.id, item)).collect();

        let mut joined: HashMap<RecipeId, Vec<SnapshotIngredient>> = HashMap::new();
        for ingredient in ingredients {
            if !recipes.contains_key(&ingredient.recipe_id) {
                continue;
            }
            let stock = ingredient
                .inventory_item_id
                .and_then(|id| by_id.get(&id).copied());
            joined
                .entry(ingredient.recipe_id)
                .or_default()
                .push(SnapshotIngredient {
                    recipe_id: ingredient.recipe_id,
                    inventory_item_id: stock.map(|s| s.id),
                    inventory_name: stock.map(|s| s.name.clone()),
                    inventory_stock: stock.map(|s| s.stock_quantity),
                    inventory_active: stock.is_some_and(|s| s.is_active),
                    ingredient_name: ingredient.ingredient_name,
                    required_quantity: ingredient.required_quantity,
                });
        }

        Self {
            store_id,
            products,
            recipes,
            inventory,
            ingredients: joined,
            fetched_at,
        }
    }

    pub fn product(&self, id: &ProductId) -> Option<&Product> {
        self.products.iter().find(|p| &p.id == id)
    }

    pub fn recipe(&self, id: &RecipeId) -> Option<&Recipe> {
        self.recipes.get(id)
    }

    pub fn ingredients_for(&self, recipe_id: &RecipeId) -> &[SnapshotIngredient] {
        self.ingredients
            .get(recipe_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn inventory_item(&self, id: &InventoryItemId) -> Option<&InventoryStockItem> {
        self.inventory.iter().find(|item| &item.id == id)
    }

    /// Recipe ids referenced by the snapshot's products, sorted and deduplicated.
    pub fn recipe_ids(&self) -> Vec<RecipeId> {
        let mut ids: Vec<RecipeId> = self.recipes.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn product_ids(&self) -> Vec<ProductId> {
        self.products.iter().map(|p| p.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assemble_joins_stock_and_drops_foreign_rows() {
        let store = StoreId::new();
        let other = StoreId::new();
        let recipe = Recipe::new(store, "Latte");
        let beans = InventoryStockItem::new(store, "Coffee Beans", 200.0);
        let foreign_milk = InventoryStockItem::new(other, "Milk", 900.0);
        let latte = Product::new(store, "Latte", 15000).with_recipe(recipe.id);

        let snapshot = BatchedSnapshot::assemble(
            store,
            vec![ProductWithRecipe {
                product: latte.clone(),
                recipe: Some(recipe.clone()),
            }],
            vec![beans.clone(), foreign_milk.clone()],
            vec![
                RecipeIngredient::mapped(recipe.id, "Coffee Beans", 18.0, beans.id),
                RecipeIngredient::mapped(recipe.id, "Milk", 150.0, foreign_milk.id),
            ],
            Utc::now(),
        );

        assert_eq!(snapshot.inventory.len(), 1);
        let ingredients = snapshot.ingredients_for(&recipe.id);
        assert_eq!(ingredients.len(), 2);
        assert!(ingredients[0].is_tracked());
        assert_eq!(ingredients[0].inventory_stock, Some(200.0));
        assert!(!ingredients[1].is_tracked());
        assert_eq!(ingredients[1].display_name(), "Milk");
    }

    #[test]
    fn products_are_ordered_by_display_order() {
        let store = StoreId::new();
        let mut first = Product::new(store, "Americano", 12000);
        first.display_order = 2;
        let mut second = Product::new(store, "Espresso", 9000);
        second.display_order = 1;

        let snapshot = BatchedSnapshot::assemble(
            store,
            vec![
                ProductWithRecipe { product: first, recipe: None },
                ProductWithRecipe { product: second, recipe: None },
            ],
            Vec::new(),
            Vec::new(),
            Utc::now(),
        );

        let names: Vec<&str> = snapshot.products.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Espresso", "Americano"]);
    }
}
