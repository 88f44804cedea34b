//! Postgres-backed store.
//!
//! Tables used (all store-scoped except the template tables):
//!
//! | table | access |
//! |-------|--------|
//! | `product_catalog`, `categories`, `recipes` | read |
//! | `recipe_ingredients` | read |
//! | `recipe_templates`, `recipe_template_ingredients` | read |
//! | `inventory_stock` | read + atomic decrement |
//! | `inventory_movements` | append |
//! | `inventory_deduction_idempotency` | insert-once claim, delete on release |
//!
//! ## Error Mapping
//!
//! | SQLx error | SQLSTATE | `BackendError` |
//! |------------|----------|----------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (serialization failure / deadlock) | `40001`, `40P01` | `Conflict` |
//! | Database (other) | any | `Database` |
//! | PoolClosed, Io, PoolTimedOut | n/a | `Unavailable` |
//! | ColumnDecode, Decode, ColumnNotFound | n/a | `Decode` |

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{Span, instrument};
use uuid::Uuid;

use larder_catalog::{
    CategoryRef, EssentialProduct, Product, ProductWithRecipe, Recipe, RecipeIngredient,
    RecipeTemplate, TemplateIngredient,
};
use larder_core::{
    CategoryId, InventoryItemId, ProductId, RecipeId, RecipeTemplateId, StoreId, TransactionId,
};
use larder_inventory::{InventoryMovement, InventoryStockItem};

use super::{StockDecrement, StockWriteOutcome, StoreBackend};
use crate::error::BackendError;

#[derive(Debug, Clone)]
pub struct PostgresBackend {
    pool: Arc<PgPool>,
}

impl PostgresBackend {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool against `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, BackendError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(sqlx_err("connect"))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn product_uuids(ids: &[ProductId]) -> Vec<Uuid> {
    ids.iter().map(|id| *id.as_uuid()).collect()
}

fn recipe_uuids(ids: &[RecipeId]) -> Vec<Uuid> {
    ids.iter().map(|id| *id.as_uuid()).collect()
}

fn lowercase_names(names: &[String]) -> Vec<String> {
    names.iter().map(|n| n.trim().to_lowercase()).collect()
}

fn sqlx_err(operation: &'static str) -> impl Fn(sqlx::Error) -> BackendError {
    move |e| map_sqlx_error(operation, e)
}

fn product_from_row(row: &PgRow) -> Result<ProductWithRecipe, sqlx::Error> {
    let store_id = StoreId::from_uuid(row.try_get("store_id")?);
    let category = match row.try_get::<Option<Uuid>, _>("category_id")? {
        Some(id) => Some(CategoryRef {
            id: CategoryId::from_uuid(id),
            name: row
                .try_get::<Option<String>, _>("category_name")?
                .unwrap_or_default(),
        }),
        None => None,
    };
    let recipe_id: Option<Uuid> = row.try_get("recipe_id")?;
    let recipe = match (recipe_id, row.try_get::<Option<String>, _>("recipe_name")?) {
        (Some(id), Some(name)) => Some(Recipe {
            id: RecipeId::from_uuid(id),
            store_id,
            name,
            is_active: row.try_get::<Option<bool>, _>("recipe_active")?.unwrap_or(false),
        }),
        _ => None,
    };

    Ok(ProductWithRecipe {
        product: Product {
            id: ProductId::from_uuid(row.try_get("id")?),
            store_id,
            name: row.try_get("product_name")?,
            description: row.try_get("description")?,
            price: u64::try_from(row.try_get::<i64, _>("price")?).unwrap_or(0),
            category,
            image_url: row.try_get("image_url")?,
            is_available: row.try_get("is_available")?,
            display_order: row.try_get("display_order")?,
            recipe_id: recipe_id.map(RecipeId::from_uuid),
        },
        recipe,
    })
}

fn inventory_from_row(row: &PgRow) -> Result<InventoryStockItem, sqlx::Error> {
    Ok(InventoryStockItem {
        id: InventoryItemId::from_uuid(row.try_get("id")?),
        store_id: StoreId::from_uuid(row.try_get("store_id")?),
        name: row.try_get("item")?,
        stock_quantity: row.try_get("stock_quantity")?,
        is_active: row.try_get("is_active")?,
    })
}

#[async_trait::async_trait]
impl StoreBackend for PostgresBackend {
    #[instrument(
        skip(self, product_ids),
        fields(store_id = %store_id, row_count = tracing::field::Empty),
        err
    )]
    async fn fetch_products(
        &self,
        store_id: StoreId,
        product_ids: Option<&[ProductId]>,
    ) -> Result<Vec<ProductWithRecipe>, BackendError> {
        let ids: Option<Vec<Uuid>> = product_ids.map(product_uuids);

        let rows = sqlx::query(
            r#"
            SELECT
                p.id,
                p.store_id,
                p.product_name,
                p.description,
                p.price,
                p.category_id,
                c.name AS category_name,
                p.image_url,
                p.is_available,
                p.display_order,
                p.recipe_id,
                r.name AS recipe_name,
                r.is_active AS recipe_active
            FROM product_catalog p
            LEFT JOIN categories c ON c.id = p.category_id
            LEFT JOIN recipes r ON r.id = p.recipe_id AND r.store_id = p.store_id
            WHERE p.store_id = $1
                AND ($2::uuid[] IS NULL OR p.id = ANY($2))
            ORDER BY p.display_order ASC, p.product_name ASC
            "#,
        )
        .bind(store_id.as_uuid())
        .bind(ids)
        .fetch_all(&*self.pool)
        .await
        .map_err(sqlx_err("fetch_products"))?;

        let products = rows
            .iter()
            .map(product_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(sqlx_err("fetch_products"))?;

        Span::current().record("row_count", products.len());
        Ok(products)
    }

    #[instrument(skip(self), fields(store_id = %store_id), err)]
    async fn fetch_essential_products(
        &self,
        store_id: StoreId,
    ) -> Result<Vec<EssentialProduct>, BackendError> {
        let rows = sqlx::query(
            r#"
            SELECT
                p.id,
                p.product_name,
                p.price,
                p.image_url,
                COALESCE(c.name, 'Uncategorized') AS category_name,
                p.is_available,
                p.display_order
            FROM product_catalog p
            LEFT JOIN categories c ON c.id = p.category_id
            WHERE p.store_id = $1
            ORDER BY p.display_order ASC, p.product_name ASC
            "#,
        )
        .bind(store_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(sqlx_err("fetch_essential_products"))?;

        rows.iter()
            .map(|row| -> Result<EssentialProduct, sqlx::Error> {
                Ok(EssentialProduct {
                    id: ProductId::from_uuid(row.try_get("id")?),
                    name: row.try_get("product_name")?,
                    price: u64::try_from(row.try_get::<i64, _>("price")?).unwrap_or(0),
                    image_url: row.try_get("image_url")?,
                    category_name: row.try_get("category_name")?,
                    is_available: row.try_get("is_available")?,
                    display_order: row.try_get("display_order")?,
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(sqlx_err("fetch_essential_products"))
    }

    #[instrument(skip(self), fields(store_id = %store_id), err)]
    async fn fetch_inventory(&self, store_id: StoreId) -> Result<Vec<InventoryStockItem>, BackendError> {
        let rows = sqlx::query(
            r#"
            SELECT id, store_id, item, stock_quantity, is_active
            FROM inventory_stock
            WHERE store_id = $1
            ORDER BY item ASC
            "#,
        )
        .bind(store_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(sqlx_err("fetch_inventory"))?;

        rows.iter()
            .map(inventory_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(sqlx_err("fetch_inventory"))
    }

    #[instrument(skip(self, recipe_ids), fields(store_id = %store_id, recipes = recipe_ids.len()), err)]
    async fn fetch_recipe_ingredients(
        &self,
        store_id: StoreId,
        recipe_ids: &[RecipeId],
    ) -> Result<Vec<RecipeIngredient>, BackendError> {
        let rows = sqlx::query(
            r#"
            SELECT ri.recipe_id, ri.ingredient_name, ri.quantity, ri.inventory_stock_id
            FROM recipe_ingredients ri
            JOIN recipes r ON r.id = ri.recipe_id
            WHERE r.store_id = $1 AND ri.recipe_id = ANY($2)
            ORDER BY ri.recipe_id, ri.ingredient_name
            "#,
        )
        .bind(store_id.as_uuid())
        .bind(recipe_uuids(recipe_ids))
        .fetch_all(&*self.pool)
        .await
        .map_err(sqlx_err("fetch_recipe_ingredients"))?;

        rows.iter()
            .map(|row| -> Result<RecipeIngredient, sqlx::Error> {
                Ok(RecipeIngredient {
                    recipe_id: RecipeId::from_uuid(row.try_get("recipe_id")?),
                    ingredient_name: row.try_get("ingredient_name")?,
                    required_quantity: row.try_get("quantity")?,
                    inventory_item_id: row
                        .try_get::<Option<Uuid>, _>("inventory_stock_id")?
                        .map(InventoryItemId::from_uuid),
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(sqlx_err("fetch_recipe_ingredients"))
    }

    #[instrument(skip(self, names), fields(store_id = %store_id, names = names.len()), err)]
    async fn fetch_recipes_by_names(
        &self,
        store_id: StoreId,
        names: &[String],
    ) -> Result<Vec<Recipe>, BackendError> {
        let rows = sqlx::query(
            r#"
            SELECT id, store_id, name, is_active
            FROM recipes
            WHERE store_id = $1 AND is_active AND lower(trim(name)) = ANY($2)
            ORDER BY name ASC, id ASC
            "#,
        )
        .bind(store_id.as_uuid())
        .bind(lowercase_names(names))
        .fetch_all(&*self.pool)
        .await
        .map_err(sqlx_err("fetch_recipes_by_names"))?;

        rows.iter()
            .map(|row| -> Result<Recipe, sqlx::Error> {
                Ok(Recipe {
                    id: RecipeId::from_uuid(row.try_get("id")?),
                    store_id: StoreId::from_uuid(row.try_get("store_id")?),
                    name: row.try_get("name")?,
                    is_active: row.try_get("is_active")?,
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(sqlx_err("fetch_recipes_by_names"))
    }

    #[instrument(skip(self, names), fields(names = names.len()), err)]
    async fn fetch_templates_by_names(
        &self,
        names: &[String],
    ) -> Result<Vec<RecipeTemplate>, BackendError> {
        let rows = sqlx::query(
            r#"
            SELECT
                t.id,
                t.name,
                t.is_active,
                ti.ingredient_name,
                ti.quantity
            FROM recipe_templates t
            LEFT JOIN recipe_template_ingredients ti ON ti.recipe_template_id = t.id
            WHERE t.is_active AND lower(trim(t.name)) = ANY($1)
            ORDER BY t.name ASC, t.id ASC, ti.ingredient_name ASC
            "#,
        )
        .bind(lowercase_names(names))
        .fetch_all(&*self.pool)
        .await
        .map_err(sqlx_err("fetch_templates_by_names"))?;

        let mut order: Vec<RecipeTemplateId> = Vec::new();
        let mut templates: HashMap<RecipeTemplateId, RecipeTemplate> = HashMap::new();
        for row in &rows {
            let id = RecipeTemplateId::from_uuid(
                row.try_get("id").map_err(sqlx_err("fetch_templates_by_names"))?,
            );
            let template = match templates.entry(id) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    order.push(id);
                    entry.insert(RecipeTemplate {
                        id,
                        name: row.try_get("name").map_err(sqlx_err("fetch_templates_by_names"))?,
                        is_active: row
                            .try_get("is_active")
                            .map_err(sqlx_err("fetch_templates_by_names"))?,
                        ingredients: Vec::new(),
                    })
                }
            };

            let ingredient: Option<String> = row
                .try_get("ingredient_name")
                .map_err(sqlx_err("fetch_templates_by_names"))?;
            if let Some(ingredient_name) = ingredient {
                template.ingredients.push(TemplateIngredient {
                    ingredient_name,
                    quantity: row
                        .try_get("quantity")
                        .map_err(sqlx_err("fetch_templates_by_names"))?,
                });
            }
        }

        Ok(order
            .into_iter()
            .filter_map(|id| templates.remove(&id))
            .collect())
    }

    #[instrument(skip(self), fields(store_id = %store_id, transaction_id = %transaction_id), err)]
    async fn claim_transaction(
        &self,
        store_id: StoreId,
        transaction_id: TransactionId,
    ) -> Result<bool, BackendError> {
        let result = sqlx::query(
            r#"
            INSERT INTO inventory_deduction_idempotency (transaction_id, store_id, claimed_at)
            VALUES ($1, $2, now())
            ON CONFLICT (transaction_id) DO NOTHING
            "#,
        )
        .bind(transaction_id.as_uuid())
        .bind(store_id.as_uuid())
        .execute(&*self.pool)
        .await
        .map_err(sqlx_err("claim_transaction"))?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), fields(store_id = %store_id, transaction_id = %transaction_id), err)]
    async fn release_transaction(
        &self,
        store_id: StoreId,
        transaction_id: TransactionId,
    ) -> Result<(), BackendError> {
        sqlx::query(
            r#"
            DELETE FROM inventory_deduction_idempotency
            WHERE transaction_id = $1 AND store_id = $2
            "#,
        )
        .bind(transaction_id.as_uuid())
        .bind(store_id.as_uuid())
        .execute(&*self.pool)
        .await
        .map_err(sqlx_err("release_transaction"))?;

        Ok(())
    }

    /// One statement per batch: rows are locked, read and lowered together, so
    /// a concurrent sale waits for the lock instead of overwriting this one.
    #[instrument(skip(self, decrements), fields(store_id = %store_id, rows = decrements.len()), err)]
    async fn apply_decrements(
        &self,
        store_id: StoreId,
        decrements: &[StockDecrement],
    ) -> Result<Vec<StockWriteOutcome>, BackendError> {
        let ids: Vec<Uuid> = decrements.iter().map(|d| *d.inventory_item_id.as_uuid()).collect();
        let amounts: Vec<f64> = decrements.iter().map(|d| d.amount).collect();

        let rows = sqlx::query(
            r#"
            WITH input AS (
                SELECT * FROM UNNEST($2::uuid[], $3::float8[]) AS t(id, amount)
            ),
            locked AS (
                SELECT s.id, s.stock_quantity AS previous
                FROM inventory_stock s
                JOIN input i ON i.id = s.id
                WHERE s.store_id = $1
                FOR UPDATE OF s
            )
            UPDATE inventory_stock s
            SET stock_quantity = LEAST(locked.previous, GREATEST(locked.previous - input.amount, 0)),
                updated_at = now()
            FROM locked
            JOIN input ON input.id = locked.id
            WHERE s.id = locked.id
            RETURNING s.id, locked.previous, s.stock_quantity AS new
            "#,
        )
        .bind(store_id.as_uuid())
        .bind(&ids)
        .bind(&amounts)
        .fetch_all(&*self.pool)
        .await
        .map_err(sqlx_err("apply_decrements"))?;

        let mut applied: HashMap<Uuid, (f64, f64)> = HashMap::with_capacity(rows.len());
        for row in &rows {
            let id: Uuid = row.try_get("id").map_err(sqlx_err("apply_decrements"))?;
            let previous: f64 = row.try_get("previous").map_err(sqlx_err("apply_decrements"))?;
            let new: f64 = row.try_get("new").map_err(sqlx_err("apply_decrements"))?;
            applied.insert(id, (previous, new));
        }

        Ok(decrements
            .iter()
            .map(|d| match applied.get(d.inventory_item_id.as_uuid()) {
                Some((previous, new)) => StockWriteOutcome::Applied {
                    inventory_item_id: d.inventory_item_id,
                    previous: *previous,
                    new: *new,
                },
                None => StockWriteOutcome::Failed {
                    inventory_item_id: d.inventory_item_id,
                    reason: "inventory row not found in store".to_string(),
                },
            })
            .collect())
    }

    #[instrument(skip(self, movements), fields(rows = movements.len()), err)]
    async fn insert_movements(&self, movements: &[InventoryMovement]) -> Result<(), BackendError> {
        if movements.is_empty() {
            return Ok(());
        }

        let ids: Vec<Uuid> = movements.iter().map(|m| *m.id.as_uuid()).collect();
        let stores: Vec<Uuid> = movements.iter().map(|m| *m.store_id.as_uuid()).collect();
        let items: Vec<Uuid> = movements.iter().map(|m| *m.inventory_item_id.as_uuid()).collect();
        let types: Vec<&str> = movements.iter().map(|m| m.movement_type.as_str()).collect();
        let changes: Vec<f64> = movements.iter().map(|m| m.quantity_change).collect();
        let previous: Vec<f64> = movements.iter().map(|m| m.previous_quantity).collect();
        let new: Vec<f64> = movements.iter().map(|m| m.new_quantity).collect();
        let ref_types: Vec<&str> = movements.iter().map(|m| m.reference_type.as_str()).collect();
        let ref_ids: Vec<Uuid> = movements.iter().map(|m| *m.reference_id.as_uuid()).collect();
        let notes: Vec<&str> = movements.iter().map(|m| m.notes.as_str()).collect();
        let actors: Vec<String> = movements.iter().map(|m| m.created_by.to_string()).collect();
        let created: Vec<DateTime<Utc>> = movements.iter().map(|m| m.created_at).collect();

        sqlx::query(
            r#"
            INSERT INTO inventory_movements (
                id, store_id, inventory_stock_id, movement_type, quantity_change,
                previous_quantity, new_quantity, reference_type, reference_id,
                notes, created_by, created_at
            )
            SELECT * FROM UNNEST(
                $1::uuid[], $2::uuid[], $3::uuid[], $4::text[], $5::float8[],
                $6::float8[], $7::float8[], $8::text[], $9::uuid[],
                $10::text[], $11::text[], $12::timestamptz[]
            )
            "#,
        )
        .bind(&ids)
        .bind(&stores)
        .bind(&items)
        .bind(&types)
        .bind(&changes)
        .bind(&previous)
        .bind(&new)
        .bind(&ref_types)
        .bind(&ref_ids)
        .bind(&notes)
        .bind(&actors)
        .bind(&created)
        .execute(&*self.pool)
        .await
        .map_err(sqlx_err("insert_movements"))?;

        Ok(())
    }
}

/// Map an `sqlx::Error` onto the backend taxonomy (see module docs).
pub(crate) fn map_sqlx_error(operation: &'static str, err: sqlx::Error) -> BackendError {
    match err {
        sqlx::Error::Database(db_err) => {
            let message = db_err.message().to_string();
            match db_err.code().as_deref() {
                Some("23505") | Some("40001") | Some("40P01") => {
                    BackendError::Conflict { operation, message }
                }
                _ => BackendError::Database { operation, message },
            }
        }
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
            BackendError::unavailable(operation, err.to_string())
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::ColumnNotFound(_) => {
            BackendError::decode(operation, err.to_string())
        }
        other => BackendError::Database {
            operation,
            message: other.to_string(),
        },
    }
}
