use serde::{Deserialize, Serialize};

use larder_core::{CategoryId, ProductId, RecipeId, StoreId};

use crate::recipe::Recipe;

/// Category label used when a product has none.
pub const UNCATEGORIZED: &str = "Uncategorized";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRef {
    pub id: CategoryId,
    pub name: String,
}

/// Sellable catalog entry for one store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub store_id: StoreId,
    pub name: String,
    pub description: Option<String>,
    /// Price in the smallest currency unit.
    pub price: u64,
    pub category: Option<CategoryRef>,
    pub image_url: Option<String>,
    /// Set by catalog administration; independent of computed stock.
    pub is_available: bool,
    pub display_order: i32,
    /// `None` marks a direct-sale product that is not ingredient-tracked.
    pub recipe_id: Option<RecipeId>,
}

impl Product {
    pub fn new(store_id: StoreId, name: impl Into<String>, price: u64) -> Self {
        Self {
            id: ProductId::new(),
            store_id,
            name: name.into(),
            description: None,
            price,
            category: None,
            image_url: None,
            is_available: true,
            display_order: 0,
            recipe_id: None,
        }
    }

    pub fn with_recipe(mut self, recipe_id: RecipeId) -> Self {
        self.recipe_id = Some(recipe_id);
        self
    }

    pub fn with_category(mut self, category: CategoryRef) -> Self {
        self.category = Some(category);
        self
    }

    pub fn category_name(&self) -> &str {
        self.category.as_ref().map_or(UNCATEGORIZED, |c| c.name.as_str())
    }
}

/// A product row joined with its recipe header, as returned by the catalog query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductWithRecipe {
    pub product: Product,
    pub recipe: Option<Recipe>,
}

/// The minimal fields a product grid needs to render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EssentialProduct {
    pub id: ProductId,
    pub name: String,
    pub price: u64,
    pub image_url: Option<String>,
    pub category_name: String,
    pub is_available: bool,
    pub display_order: i32,
}

impl From<&Product> for EssentialProduct {
    fn from(product: &Product) -> Self {
        Self {
            id: product.id,
            name: product.name.clone(),
            price: product.price,
            image_url: product.image_url.clone(),
            category_name: product.category_name().to_string(),
            is_available: product.is_available,
            display_order: product.display_order,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_category_reads_as_uncategorized() {
        let product = Product::new(StoreId::new(), "Water", 2500);
        assert_eq!(product.category_name(), UNCATEGORIZED);
        assert_eq!(EssentialProduct::from(&product).category_name, UNCATEGORIZED);
    }
}
