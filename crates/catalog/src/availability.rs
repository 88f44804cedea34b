//! Availability calculator.
//!
//! A pure function of a product and a snapshot: no I/O, no clock, no globals.
//! The limiting-ingredient rule applies: a recipe product can be made as many
//! times as its scarcest ingredient allows.

use serde::{Deserialize, Serialize};

use larder_core::{InventoryItemId, ProductId};
use larder_inventory::units_producible;

use crate::product::Product;
use crate::snapshot::BatchedSnapshot;

/// Quantity reported for direct-sale products that are not ingredient-tracked.
pub const UNCONSTRAINED_QUANTITY: u32 = 100;

/// Default producible-unit count at or below which a product is `low_stock`.
pub const DEFAULT_LOW_STOCK_THRESHOLD: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityPolicy {
    pub low_stock_threshold: u32,
    pub unconstrained_quantity: u32,
}

impl Default for AvailabilityPolicy {
    fn default() -> Self {
        Self {
            low_stock_threshold: DEFAULT_LOW_STOCK_THRESHOLD,
            unconstrained_quantity: UNCONSTRAINED_QUANTITY,
        }
    }
}

impl AvailabilityPolicy {
    pub fn with_low_stock_threshold(mut self, threshold: u32) -> Self {
        self.low_stock_threshold = threshold;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityStatus {
    Available,
    LowStock,
    OutOfStock,
    NoRecipe,
}

/// How one ingredient constrains the product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngredientRequirement {
    pub inventory_item_id: Option<InventoryItemId>,
    pub item_name: String,
    pub required_quantity: f64,
    pub available_quantity: f64,
    /// `None` when the ingredient is unmapped/inactive or has no positive requirement.
    pub possible_units: Option<u32>,
    pub is_sufficient: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductAvailability {
    pub product_id: ProductId,
    pub quantity: u32,
    pub status: AvailabilityStatus,
    pub requirements: Vec<IngredientRequirement>,
}

impl ProductAvailability {
    fn bare(product_id: ProductId, quantity: u32, status: AvailabilityStatus) -> Self {
        Self {
            product_id,
            quantity,
            status,
            requirements: Vec::new(),
        }
    }

    /// Result for a product id that is not in the snapshot at all.
    pub fn missing(product_id: ProductId) -> Self {
        Self::bare(product_id, 0, AvailabilityStatus::OutOfStock)
    }
}

/// Compute how many units of `product` the snapshot's stock can produce.
///
/// A product whose recipe is referenced but absent from the snapshot is treated
/// like an inactive recipe. Ingredients with a non-positive requirement do not
/// constrain production; a recipe made only of those is unconstrained.
pub fn compute_availability(
    product: &Product,
    snapshot: &BatchedSnapshot,
    policy: &AvailabilityPolicy,
) -> ProductAvailability {
    let Some(recipe_id) = product.recipe_id else {
        return ProductAvailability::bare(
            product.id,
            policy.unconstrained_quantity,
            AvailabilityStatus::Available,
        );
    };

    match snapshot.recipe(&recipe_id) {
        Some(recipe) if recipe.is_active => {}
        _ => return ProductAvailability::bare(product.id, 0, AvailabilityStatus::OutOfStock),
    }

    let ingredients = snapshot.ingredients_for(&recipe_id);
    if ingredients.is_empty() {
        return ProductAvailability::bare(product.id, 0, AvailabilityStatus::NoRecipe);
    }

    let mut requirements = Vec::with_capacity(ingredients.len());
    let mut limiting: Option<u32> = None;
    let mut insufficient = false;

    for ingredient in ingredients {
        let available = ingredient.inventory_stock.unwrap_or(0.0);
        let required = ingredient.required_quantity;

        let possible_units = if ingredient.is_tracked() {
            units_producible(available, required)
        } else {
            None
        };

        if !ingredient.is_tracked() {
            insufficient = true;
        }
        if let Some(units) = possible_units {
            limiting = Some(limiting.map_or(units, |current| current.min(units)));
        }

        requirements.push(IngredientRequirement {
            inventory_item_id: ingredient.inventory_item_id,
            item_name: ingredient.display_name().to_string(),
            required_quantity: required,
            available_quantity: available,
            possible_units,
            is_sufficient: ingredient.is_tracked() && available >= required,
        });
    }

    let (quantity, status) = if insufficient {
        (0, AvailabilityStatus::OutOfStock)
    } else {
        match limiting {
            None => (policy.unconstrained_quantity, AvailabilityStatus::Available),
            Some(0) => (0, AvailabilityStatus::OutOfStock),
            Some(units) if units <= policy.low_stock_threshold => {
                (units, AvailabilityStatus::LowStock)
            }
            Some(units) => (units, AvailabilityStatus::Available),
        }
    };

    ProductAvailability {
        product_id: product.id,
        quantity,
        status,
        requirements,
    }
}

impl BatchedSnapshot {
    /// Availability for a product by id; unknown ids come back out of stock.
    pub fn availability_of(
        &self,
        product_id: &ProductId,
        policy: &AvailabilityPolicy,
    ) -> ProductAvailability {
        match self.product(product_id) {
            Some(product) => compute_availability(product, self, policy),
            None => ProductAvailability::missing(*product_id),
        }
    }

    /// Availability for every product, in display order.
    pub fn availability_all(&self, policy: &AvailabilityPolicy) -> Vec<ProductAvailability> {
        self.products
            .iter()
            .map(|product| compute_availability(product, self, policy))
            .collect()
    }
}

/// Per-store counts of products by availability status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreAvailabilitySummary {
    pub total: usize,
    pub available: usize,
    pub low_stock: usize,
    pub out_of_stock: usize,
    pub no_recipe: usize,
}

impl StoreAvailabilitySummary {
    pub fn from_results<'a>(results: impl IntoIterator<Item = &'a ProductAvailability>) -> Self {
        results.into_iter().fold(Self::default(), |mut acc, result| {
            acc.total += 1;
            match result.status {
                AvailabilityStatus::Available => acc.available += 1,
                AvailabilityStatus::LowStock => acc.low_stock += 1,
                AvailabilityStatus::OutOfStock => acc.out_of_stock += 1,
                AvailabilityStatus::NoRecipe => acc.no_recipe += 1,
            }
            acc
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use larder_core::StoreId;
    use larder_inventory::InventoryStockItem;
    use proptest::prelude::*;

    use crate::product::ProductWithRecipe;
    use crate::recipe::{Recipe, RecipeIngredient};

    fn test_store_id() -> StoreId {
        StoreId::new()
    }

    /// One recipe product over the given `(name, per_unit, stock)` ingredients.
    fn recipe_snapshot(ingredients: &[(&str, f64, f64)]) -> (Product, BatchedSnapshot) {
        let store = test_store_id();
        let recipe = Recipe::new(store, "House Blend");
        let product = Product::new(store, "House Blend", 10000).with_recipe(recipe.id);

        let mut stock = Vec::new();
        let mut lines = Vec::new();
        for (name, per_unit, qty) in ingredients {
            let item = InventoryStockItem::new(store, *name, *qty);
            lines.push(RecipeIngredient::mapped(recipe.id, *name, *per_unit, item.id));
            stock.push(item);
        }

        let snapshot = BatchedSnapshot::assemble(
            store,
            vec![ProductWithRecipe {
                product: product.clone(),
                recipe: Some(recipe),
            }],
            stock,
            lines,
            Utc::now(),
        );
        (product, snapshot)
    }

    #[test]
    fn latte_is_limited_by_milk_and_low_stock() {
        let (latte, snapshot) =
            recipe_snapshot(&[("Coffee Beans", 18.0, 200.0), ("Milk", 150.0, 900.0)]);

        let result = compute_availability(&latte, &snapshot, &AvailabilityPolicy::default());

        assert_eq!(result.quantity, 6);
        assert_eq!(result.status, AvailabilityStatus::LowStock);
        assert_eq!(result.requirements.len(), 2);
        assert_eq!(result.requirements[0].possible_units, Some(11));
        assert_eq!(result.requirements[1].possible_units, Some(6));
    }

    #[test]
    fn direct_sale_product_is_unconstrained() {
        let store = test_store_id();
        let water = Product::new(store, "Bottled Water", 3000);
        let snapshot = BatchedSnapshot::assemble(store, Vec::new(), Vec::new(), Vec::new(), Utc::now());

        let result = compute_availability(&water, &snapshot, &AvailabilityPolicy::default());
        assert_eq!(result.quantity, UNCONSTRAINED_QUANTITY);
        assert_eq!(result.status, AvailabilityStatus::Available);
        assert!(result.requirements.is_empty());
    }

    #[test]
    fn inactive_recipe_is_out_of_stock() {
        let store = test_store_id();
        let mut recipe = Recipe::new(store, "Seasonal Frappe");
        recipe.is_active = false;
        let product = Product::new(store, "Seasonal Frappe", 18000).with_recipe(recipe.id);
        let snapshot = BatchedSnapshot::assemble(
            store,
            vec![ProductWithRecipe {
                product: product.clone(),
                recipe: Some(recipe),
            }],
            Vec::new(),
            Vec::new(),
            Utc::now(),
        );

        let result = compute_availability(&product, &snapshot, &AvailabilityPolicy::default());
        assert_eq!((result.quantity, result.status), (0, AvailabilityStatus::OutOfStock));
    }

    #[test]
    fn active_recipe_without_ingredients_is_no_recipe() {
        let (product, snapshot) = recipe_snapshot(&[]);
        let result = compute_availability(&product, &snapshot, &AvailabilityPolicy::default());
        assert_eq!((result.quantity, result.status), (0, AvailabilityStatus::NoRecipe));
    }

    #[test]
    fn one_unmapped_ingredient_forces_out_of_stock() {
        let (product, mut snapshot) = recipe_snapshot(&[("Coffee Beans", 18.0, 10_000.0)]);
        let recipe_id = product.recipe_id.unwrap();
        let unmapped = RecipeIngredient::unmapped(recipe_id, "Oat Milk", 150.0);
        snapshot
            .ingredients
            .get_mut(&recipe_id)
            .unwrap()
            .push(crate::snapshot::SnapshotIngredient {
                recipe_id,
                ingredient_name: unmapped.ingredient_name,
                required_quantity: unmapped.required_quantity,
                inventory_item_id: None,
                inventory_name: None,
                inventory_stock: None,
                inventory_active: false,
            });

        let result = compute_availability(&product, &snapshot, &AvailabilityPolicy::default());
        assert_eq!(result.status, AvailabilityStatus::OutOfStock);
        assert_eq!(result.quantity, 0);
        assert!(!result.requirements[1].is_sufficient);
    }

    #[test]
    fn inactive_stock_row_counts_as_insufficient() {
        let (product, mut snapshot) = recipe_snapshot(&[("Matcha", 5.0, 500.0)]);
        let recipe_id = product.recipe_id.unwrap();
        snapshot.ingredients.get_mut(&recipe_id).unwrap()[0].inventory_active = false;

        let result = compute_availability(&product, &snapshot, &AvailabilityPolicy::default());
        assert_eq!(result.status, AvailabilityStatus::OutOfStock);
    }

    #[test]
    fn threshold_is_configurable() {
        let (latte, snapshot) = recipe_snapshot(&[("Milk", 150.0, 900.0)]);
        let policy = AvailabilityPolicy::default().with_low_stock_threshold(3);
        let result = compute_availability(&latte, &snapshot, &policy);
        assert_eq!(result.status, AvailabilityStatus::Available);
    }

    #[test]
    fn unknown_product_id_is_out_of_stock() {
        let (_, snapshot) = recipe_snapshot(&[("Milk", 150.0, 900.0)]);
        let result = snapshot.availability_of(&ProductId::new(), &AvailabilityPolicy::default());
        assert_eq!((result.quantity, result.status), (0, AvailabilityStatus::OutOfStock));
    }

    #[test]
    fn summary_counts_each_status() {
        let (latte, snapshot) = recipe_snapshot(&[("Milk", 150.0, 900.0)]);
        let results = vec![
            compute_availability(&latte, &snapshot, &AvailabilityPolicy::default()),
            ProductAvailability::missing(ProductId::new()),
        ];

        let summary = StoreAvailabilitySummary::from_results(&results);
        assert_eq!(summary.total, 2);
        assert_eq!(summary.low_stock, 1);
        assert_eq!(summary.out_of_stock, 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 1000,
            ..ProptestConfig::default()
        })]

        /// Property: direct-sale products ignore inventory entirely.
        #[test]
        fn no_recipe_reference_is_always_sentinel(stock in proptest::collection::vec(0.0f64..1e6, 0..10)) {
            let store = test_store_id();
            let inventory: Vec<InventoryStockItem> = stock
                .iter()
                .enumerate()
                .map(|(i, qty)| InventoryStockItem::new(store, format!("Item {i}"), *qty))
                .collect();
            let product = Product::new(store, "Chips", 4500);
            let snapshot = BatchedSnapshot::assemble(store, Vec::new(), inventory, Vec::new(), Utc::now());

            let result = compute_availability(&product, &snapshot, &AvailabilityPolicy::default());
            prop_assert_eq!(result.quantity, UNCONSTRAINED_QUANTITY);
            prop_assert_eq!(result.status, AvailabilityStatus::Available);
        }

        /// Property: quantity is the minimum of floor(stock / per_unit).
        #[test]
        fn quantity_is_limiting_ingredient(
            lines in proptest::collection::vec((0.5f64..100.0, 0.0f64..5_000.0), 1..6)
        ) {
            let named: Vec<(String, f64, f64)> = lines
                .iter()
                .enumerate()
                .map(|(i, (per_unit, qty))| (format!("Ingredient {i}"), *per_unit, *qty))
                .collect();
            let borrowed: Vec<(&str, f64, f64)> =
                named.iter().map(|(n, p, q)| (n.as_str(), *p, *q)).collect();
            let (product, snapshot) = recipe_snapshot(&borrowed);

            let expected = lines
                .iter()
                .map(|(per_unit, qty)| (qty / per_unit).floor() as u32)
                .min()
                .unwrap();

            let result = compute_availability(&product, &snapshot, &AvailabilityPolicy::default());
            prop_assert_eq!(result.quantity, expected);
            let expected_status = match expected {
                0 => AvailabilityStatus::OutOfStock,
                n if n <= DEFAULT_LOW_STOCK_THRESHOLD => AvailabilityStatus::LowStock,
                _ => AvailabilityStatus::Available,
            };
            prop_assert_eq!(result.status, expected_status);
        }

        /// Property: any unmapped ingredient forces out_of_stock.
        #[test]
        fn unmapped_ingredient_always_out_of_stock(stock in 1_000.0f64..1e6) {
            let (product, mut snapshot) = recipe_snapshot(&[("Sugar", 1.0, stock)]);
            let recipe_id = product.recipe_id.unwrap();
            snapshot.ingredients.get_mut(&recipe_id).unwrap()[0].inventory_item_id = None;

            let result = compute_availability(&product, &snapshot, &AvailabilityPolicy::default());
            prop_assert_eq!(result.status, AvailabilityStatus::OutOfStock);
            prop_assert_eq!(result.quantity, 0);
        }
    }
}
