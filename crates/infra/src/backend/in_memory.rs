//! In-memory backend for tests/dev.
//!
//! Counts queries per operation (so tests can assert round-trip bounds) and
//! supports fault injection per operation, per stock row, and artificial
//! latency. Optionally publishes change notifications the way database
//! triggers would.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use larder_catalog::{
    EssentialProduct, Product, ProductWithRecipe, Recipe, RecipeIngredient, RecipeTemplate,
};
use larder_core::{InventoryItemId, ProductId, RecipeId, StoreId, TransactionId};
use larder_events::{ChangeEvent, ChangeSource, EventBus, InMemoryEventBus};
use larder_inventory::{InventoryMovement, InventoryStockItem, normalize_name};

use super::{StockDecrement, StockWriteOutcome, StoreBackend};
use crate::error::BackendError;

/// Operation names used for query counting and fault injection.
pub mod ops {
    pub const FETCH_PRODUCTS: &str = "fetch_products";
    pub const FETCH_ESSENTIAL_PRODUCTS: &str = "fetch_essential_products";
    pub const FETCH_INVENTORY: &str = "fetch_inventory";
    pub const FETCH_RECIPE_INGREDIENTS: &str = "fetch_recipe_ingredients";
    pub const FETCH_RECIPES_BY_NAMES: &str = "fetch_recipes_by_names";
    pub const FETCH_TEMPLATES_BY_NAMES: &str = "fetch_templates_by_names";
    pub const CLAIM_TRANSACTION: &str = "claim_transaction";
    pub const RELEASE_TRANSACTION: &str = "release_transaction";
    pub const APPLY_DECREMENTS: &str = "apply_decrements";
    pub const INSERT_MOVEMENTS: &str = "insert_movements";

    pub const READS: [&str; 6] = [
        FETCH_PRODUCTS,
        FETCH_ESSENTIAL_PRODUCTS,
        FETCH_INVENTORY,
        FETCH_RECIPE_INGREDIENTS,
        FETCH_RECIPES_BY_NAMES,
        FETCH_TEMPLATES_BY_NAMES,
    ];
}

/// Seed data, loadable from JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreFixture {
    pub products: Vec<Product>,
    pub recipes: Vec<Recipe>,
    pub recipe_ingredients: Vec<RecipeIngredient>,
    pub templates: Vec<RecipeTemplate>,
    pub inventory: Vec<InventoryStockItem>,
}

#[derive(Debug, Default)]
struct State {
    products: Vec<Product>,
    recipes: HashMap<RecipeId, Recipe>,
    ingredients: Vec<RecipeIngredient>,
    templates: Vec<RecipeTemplate>,
    inventory: Vec<InventoryStockItem>,
    movements: Vec<InventoryMovement>,
    claimed: HashSet<TransactionId>,
}

#[derive(Debug, Default)]
pub struct InMemoryBackend {
    state: RwLock<State>,
    queries: Mutex<HashMap<&'static str, usize>>,
    failing: Mutex<HashSet<&'static str>>,
    failing_rows: Mutex<HashSet<InventoryItemId>>,
    latency: Mutex<HashMap<&'static str, Duration>>,
    changes: Option<Arc<InMemoryEventBus<ChangeEvent>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixture(fixture: StoreFixture) -> Self {
        let backend = Self::new();
        backend.load_fixture(fixture);
        backend
    }

    /// Publish a change notification for every write, like row triggers would.
    pub fn with_change_bus(mut self, bus: Arc<InMemoryEventBus<ChangeEvent>>) -> Self {
        self.changes = Some(bus);
        self
    }

    pub fn load_fixture(&self, fixture: StoreFixture) {
        let mut state = self.write_state();
        state.products.extend(fixture.products);
        state
            .recipes
            .extend(fixture.recipes.into_iter().map(|r| (r.id, r)));
        state.ingredients.extend(fixture.recipe_ingredients);
        state.templates.extend(fixture.templates);
        state.inventory.extend(fixture.inventory);
    }

    pub fn add_product(&self, product: Product) {
        self.write_state().products.push(product);
    }

    pub fn add_recipe(&self, recipe: Recipe, ingredients: Vec<RecipeIngredient>) {
        let mut state = self.write_state();
        state.ingredients.extend(ingredients);
        state.recipes.insert(recipe.id, recipe);
    }

    pub fn add_template(&self, template: RecipeTemplate) {
        self.write_state().templates.push(template);
    }

    pub fn add_inventory(&self, item: InventoryStockItem) {
        self.write_state().inventory.push(item);
    }

    /// External receiving flow: raise a row's stock.
    pub fn restock(&self, id: InventoryItemId, quantity: f64) {
        let store = {
            let mut state = self.write_state();
            let Some(row) = state.inventory.iter_mut().find(|row| row.id == id) else {
                return;
            };
            row.stock_quantity += quantity;
            row.store_id
        };
        self.notify(store, ChangeSource::InventoryStock);
    }

    /// Make every call of `operation` fail until [`recover`](Self::recover).
    pub fn fail(&self, operation: &'static str) {
        lock(&self.failing).insert(operation);
    }

    pub fn recover(&self, operation: &'static str) {
        lock(&self.failing).remove(operation);
    }

    /// Make decrements of one row fail while the rest of its batch succeeds.
    pub fn fail_row(&self, id: InventoryItemId) {
        lock(&self.failing_rows).insert(id);
    }

    pub fn set_latency(&self, operation: &'static str, latency: Duration) {
        lock(&self.latency).insert(operation, latency);
    }

    pub fn query_count(&self, operation: &str) -> usize {
        lock(&self.queries).get(operation).copied().unwrap_or(0)
    }

    /// Reads issued so far, across every read operation.
    pub fn read_count(&self) -> usize {
        ops::READS.iter().map(|op| self.query_count(op)).sum()
    }

    pub fn stock_of(&self, id: InventoryItemId) -> Option<f64> {
        self.read_state()
            .inventory
            .iter()
            .find(|row| row.id == id)
            .map(|row| row.stock_quantity)
    }

    pub fn movements(&self) -> Vec<InventoryMovement> {
        self.read_state().movements.clone()
    }

    pub fn movements_for(&self, transaction_id: TransactionId) -> Vec<InventoryMovement> {
        self.read_state()
            .movements
            .iter()
            .filter(|m| m.reference_id == transaction_id)
            .cloned()
            .collect()
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    async fn enter(&self, operation: &'static str) -> Result<(), BackendError> {
        *lock(&self.queries).entry(operation).or_default() += 1;

        let latency = lock(&self.latency).get(operation).copied();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if lock(&self.failing).contains(operation) {
            return Err(BackendError::unavailable(operation, "injected failure"));
        }
        Ok(())
    }

    fn notify(&self, store_id: StoreId, source: ChangeSource) {
        if let Some(bus) = &self.changes {
            if let Err(err) = bus.publish(ChangeEvent::now(store_id, source)) {
                warn!(store_id = %store_id, error = ?err, "failed to publish change notification");
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn name_set(names: &[String]) -> HashSet<String> {
    names.iter().map(|n| normalize_name(n)).collect()
}

#[async_trait::async_trait]
impl StoreBackend for InMemoryBackend {
    async fn fetch_products(
        &self,
        store_id: StoreId,
        product_ids: Option<&[ProductId]>,
    ) -> Result<Vec<ProductWithRecipe>, BackendError> {
        self.enter(ops::FETCH_PRODUCTS).await?;
        let state = self.read_state();

        let mut rows: Vec<ProductWithRecipe> = state
            .products
            .iter()
            .filter(|p| p.store_id == store_id)
            .filter(|p| product_ids.is_none_or(|ids| ids.contains(&p.id)))
            .map(|p| ProductWithRecipe {
                product: p.clone(),
                recipe: p
                    .recipe_id
                    .and_then(|id| state.recipes.get(&id))
                    .filter(|r| r.store_id == store_id)
                    .cloned(),
            })
            .collect();
        rows.sort_by_key(|row| row.product.display_order);
        Ok(rows)
    }

    async fn fetch_essential_products(
        &self,
        store_id: StoreId,
    ) -> Result<Vec<EssentialProduct>, BackendError> {
        self.enter(ops::FETCH_ESSENTIAL_PRODUCTS).await?;
        let state = self.read_state();

        let mut rows: Vec<EssentialProduct> = state
            .products
            .iter()
            .filter(|p| p.store_id == store_id)
            .map(EssentialProduct::from)
            .collect();
        rows.sort_by_key(|p| p.display_order);
        Ok(rows)
    }

    async fn fetch_inventory(&self, store_id: StoreId) -> Result<Vec<InventoryStockItem>, BackendError> {
        self.enter(ops::FETCH_INVENTORY).await?;
        Ok(self
            .read_state()
            .inventory
            .iter()
            .filter(|row| row.store_id == store_id)
            .cloned()
            .collect())
    }

    async fn fetch_recipe_ingredients(
        &self,
        store_id: StoreId,
        recipe_ids: &[RecipeId],
    ) -> Result<Vec<RecipeIngredient>, BackendError> {
        self.enter(ops::FETCH_RECIPE_INGREDIENTS).await?;
        let state = self.read_state();

        Ok(state
            .ingredients
            .iter()
            .filter(|i| recipe_ids.contains(&i.recipe_id))
            .filter(|i| {
                state
                    .recipes
                    .get(&i.recipe_id)
                    .is_some_and(|r| r.store_id == store_id)
            })
            .cloned()
            .collect())
    }

    async fn fetch_recipes_by_names(
        &self,
        store_id: StoreId,
        names: &[String],
    ) -> Result<Vec<Recipe>, BackendError> {
        self.enter(ops::FETCH_RECIPES_BY_NAMES).await?;
        let wanted = name_set(names);
        let state = self.read_state();

        let mut recipes: Vec<Recipe> = state
            .recipes
            .values()
            .filter(|r| r.store_id == store_id && r.is_active)
            .filter(|r| wanted.contains(&normalize_name(&r.name)))
            .cloned()
            .collect();
        recipes.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(recipes)
    }

    async fn fetch_templates_by_names(
        &self,
        names: &[String],
    ) -> Result<Vec<RecipeTemplate>, BackendError> {
        self.enter(ops::FETCH_TEMPLATES_BY_NAMES).await?;
        let wanted = name_set(names);

        Ok(self
            .read_state()
            .templates
            .iter()
            .filter(|t| t.is_active && wanted.contains(&normalize_name(&t.name)))
            .cloned()
            .collect())
    }

    async fn claim_transaction(
        &self,
        _store_id: StoreId,
        transaction_id: TransactionId,
    ) -> Result<bool, BackendError> {
        self.enter(ops::CLAIM_TRANSACTION).await?;
        Ok(self.write_state().claimed.insert(transaction_id))
    }

    async fn release_transaction(
        &self,
        _store_id: StoreId,
        transaction_id: TransactionId,
    ) -> Result<(), BackendError> {
        self.enter(ops::RELEASE_TRANSACTION).await?;
        self.write_state().claimed.remove(&transaction_id);
        Ok(())
    }

    async fn apply_decrements(
        &self,
        store_id: StoreId,
        decrements: &[StockDecrement],
    ) -> Result<Vec<StockWriteOutcome>, BackendError> {
        self.enter(ops::APPLY_DECREMENTS).await?;
        let failing_rows = lock(&self.failing_rows).clone();

        let outcomes: Vec<StockWriteOutcome> = {
            let mut state = self.write_state();
            decrements
                .iter()
                .map(|d| {
                    if failing_rows.contains(&d.inventory_item_id) {
                        return StockWriteOutcome::Failed {
                            inventory_item_id: d.inventory_item_id,
                            reason: "injected row failure".to_string(),
                        };
                    }
                    match state
                        .inventory
                        .iter_mut()
                        .find(|row| row.id == d.inventory_item_id && row.store_id == store_id)
                    {
                        Some(row) => {
                            let previous = row.stock_quantity;
                            row.stock_quantity = (previous - d.amount).max(0.0).min(previous);
                            StockWriteOutcome::Applied {
                                inventory_item_id: row.id,
                                previous,
                                new: row.stock_quantity,
                            }
                        }
                        None => StockWriteOutcome::Failed {
                            inventory_item_id: d.inventory_item_id,
                            reason: "inventory row not found in store".to_string(),
                        },
                    }
                })
                .collect()
        };

        if outcomes
            .iter()
            .any(|o| matches!(o, StockWriteOutcome::Applied { .. }))
        {
            self.notify(store_id, ChangeSource::InventoryStock);
        }
        Ok(outcomes)
    }

    async fn insert_movements(&self, movements: &[InventoryMovement]) -> Result<(), BackendError> {
        self.enter(ops::INSERT_MOVEMENTS).await?;
        self.write_state().movements.extend_from_slice(movements);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn decrement_clamps_and_reports_previous_value() {
        let backend = InMemoryBackend::new();
        let store = StoreId::new();
        let cups = InventoryStockItem::new(store, "Cups", 3.0);
        backend.add_inventory(cups.clone());

        let outcomes = backend
            .apply_decrements(
                store,
                &[StockDecrement {
                    inventory_item_id: cups.id,
                    amount: 10.0,
                }],
            )
            .await
            .unwrap();

        assert_eq!(
            outcomes,
            vec![StockWriteOutcome::Applied {
                inventory_item_id: cups.id,
                previous: 3.0,
                new: 0.0
            }]
        );
        assert_eq!(backend.stock_of(cups.id), Some(0.0));
    }

    #[tokio::test]
    async fn decrement_never_raises_negative_stock() {
        let backend = InMemoryBackend::new();
        let store = StoreId::new();
        let syrup = InventoryStockItem::new(store, "Vanilla Syrup", -50.0);
        backend.add_inventory(syrup.clone());

        let outcomes = backend
            .apply_decrements(
                store,
                &[StockDecrement {
                    inventory_item_id: syrup.id,
                    amount: 18.0,
                }],
            )
            .await
            .unwrap();

        assert_eq!(
            outcomes,
            vec![StockWriteOutcome::Applied {
                inventory_item_id: syrup.id,
                previous: -50.0,
                new: -50.0
            }]
        );
        assert_eq!(backend.stock_of(syrup.id), Some(-50.0));
    }

    #[tokio::test]
    async fn rows_of_other_stores_are_not_touched() {
        let backend = InMemoryBackend::new();
        let milk = InventoryStockItem::new(StoreId::new(), "Milk", 900.0);
        backend.add_inventory(milk.clone());

        let outcomes = backend
            .apply_decrements(
                StoreId::new(),
                &[StockDecrement {
                    inventory_item_id: milk.id,
                    amount: 1.0,
                }],
            )
            .await
            .unwrap();

        assert!(matches!(outcomes[0], StockWriteOutcome::Failed { .. }));
        assert_eq!(backend.stock_of(milk.id), Some(900.0));
    }

    #[tokio::test]
    async fn claims_are_single_use() {
        let backend = InMemoryBackend::new();
        let store = StoreId::new();
        let txn = TransactionId::new();

        assert!(backend.claim_transaction(store, txn).await.unwrap());
        assert!(!backend.claim_transaction(store, txn).await.unwrap());

        backend.release_transaction(store, txn).await.unwrap();
        assert!(backend.claim_transaction(store, txn).await.unwrap());
    }

    #[tokio::test]
    async fn injected_failures_surface_and_still_count() {
        let backend = InMemoryBackend::new();
        backend.fail(ops::FETCH_INVENTORY);

        let err = backend.fetch_inventory(StoreId::new()).await.unwrap_err();
        assert!(matches!(err, BackendError::Unavailable { operation: "fetch_inventory", .. }));
        assert_eq!(backend.query_count(ops::FETCH_INVENTORY), 1);

        backend.recover(ops::FETCH_INVENTORY);
        assert!(backend.fetch_inventory(StoreId::new()).await.is_ok());
    }

    #[tokio::test]
    async fn writes_publish_inventory_changes() {
        let bus = Arc::new(InMemoryEventBus::new());
        let sub = bus.subscribe();
        let backend = InMemoryBackend::new().with_change_bus(Arc::clone(&bus));
        let store = StoreId::new();
        let beans = InventoryStockItem::new(store, "Coffee Beans", 200.0);
        backend.add_inventory(beans.clone());

        backend.restock(beans.id, 50.0);

        let event = sub.try_recv().unwrap();
        assert_eq!(event.store_id, store);
        assert_eq!(event.source, ChangeSource::InventoryStock);
        assert_eq!(backend.stock_of(beans.id), Some(250.0));
    }

    #[test]
    fn fixture_parses_from_json() {
        let store = StoreId::new();
        let fixture = StoreFixture {
            inventory: vec![InventoryStockItem::new(store, "Milk", 900.0)],
            ..StoreFixture::default()
        };
        let json = serde_json::to_string(&fixture).unwrap();

        let parsed: StoreFixture = serde_json::from_str(&json).unwrap();
        let backend = InMemoryBackend::from_fixture(parsed);
        assert_eq!(backend.stock_of(fixture.inventory[0].id), Some(900.0));
    }
}
