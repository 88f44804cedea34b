use std::collections::HashMap;

use tracing::{info, warn};

use larder_catalog::{ProductWithRecipe, Recipe, RecipeIngredient, RecipeTemplate};
use larder_core::{InventoryItemId, RecipeId};
use larder_inventory::{DeductionPlan, InventoryStockItem, find_best_match, normalize_name};

use super::LineItem;
use crate::error::DeductionError;

/// Everything a deduction reads from the backend.
#[derive(Debug, Default)]
pub(crate) struct ResolutionInputs {
    pub catalog: Vec<ProductWithRecipe>,
    pub recipes_by_name: Vec<Recipe>,
    pub templates: Vec<RecipeTemplate>,
    pub inventory: Vec<InventoryStockItem>,
    pub ingredients: HashMap<RecipeId, Vec<RecipeIngredient>>,
}

impl ResolutionInputs {
    /// Recipe ids whose ingredients must be read before resolving.
    pub fn recipe_ids(&self) -> Vec<RecipeId> {
        let mut ids: Vec<RecipeId> = self
            .catalog
            .iter()
            .filter_map(|row| row.recipe.as_ref())
            .chain(self.recipes_by_name.iter())
            .filter(|recipe| recipe.is_active)
            .map(|recipe| recipe.id)
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

/// How a line item found its recipe.
#[derive(Debug, Clone, Copy)]
pub(crate) enum RecipeSource<'a> {
    Catalog(&'a Recipe),
    Named(&'a Recipe),
    Template(&'a RecipeTemplate),
}

impl RecipeSource<'_> {
    fn path(&self) -> &'static str {
        match self {
            Self::Catalog(_) => "recipe",
            Self::Named(_) => "recipe by name",
            Self::Template(_) => "template",
        }
    }
}

pub(crate) fn resolve_recipe<'a>(item: &LineItem, inputs: &'a ResolutionInputs) -> Option<RecipeSource<'a>> {
    let linked = item.product_id.and_then(|id| {
        inputs
            .catalog
            .iter()
            .find(|row| row.product.id == id)
            .and_then(|row| row.recipe.as_ref())
    });
    if let Some(recipe) = linked {
        return Some(RecipeSource::Catalog(recipe));
    }

    let wanted = normalize_name(&item.name);
    if wanted.is_empty() {
        return None;
    }

    if let Some(recipe) = inputs
        .recipes_by_name
        .iter()
        .find(|recipe| recipe.is_active && normalize_name(&recipe.name) == wanted)
    {
        return Some(RecipeSource::Named(recipe));
    }

    inputs
        .templates
        .iter()
        .find(|template| template.is_active && normalize_name(&template.name) == wanted)
        .map(RecipeSource::Template)
}

/// Result of the resolve phase.
#[derive(Debug, Default)]
pub(crate) struct Resolution {
    pub plan: DeductionPlan,
    pub warnings: Vec<DeductionError>,
    pub items_processed: usize,
}

impl Resolution {
    fn warn(&mut self, message: String) {
        warn!(warning = %message, "deduction resolution");
        self.warnings.push(DeductionError::Resolution(message));
    }
}

/// Map every line item to stock rows and sum the requirements per row.
pub(crate) fn build_plan(items: &[LineItem], inputs: &ResolutionInputs) -> Resolution {
    let mut resolution = Resolution::default();
    let stock: HashMap<InventoryItemId, &InventoryStockItem> =
        inputs.inventory.iter().map(|row| (row.id, row)).collect();

    for item in items {
        if item.quantity == 0 {
            resolution.warn(format!("Skipping {} with zero quantity", item.name));
            continue;
        }

        let Some(source) = resolve_recipe(item, inputs) else {
            resolution.warn(format!("No recipe or template found for {}", item.name));
            continue;
        };

        let label = format!("{} x{} ({})", item.name, item.quantity, source.path());
        match source {
            RecipeSource::Catalog(recipe) | RecipeSource::Named(recipe) => {
                if !recipe.is_active {
                    resolution.warn(format!("Recipe {} is inactive; {} not deducted", recipe.name, item.name));
                    continue;
                }
                resolution.items_processed += 1;
                add_recipe(&mut resolution, recipe, item, &label, &stock, inputs);
            }
            RecipeSource::Template(template) => {
                resolution.warn(format!(
                    "Using recipe template for {}; store recipe missing or not linked",
                    item.name
                ));
                resolution.items_processed += 1;
                add_template(&mut resolution, template, item, &label, inputs);
            }
        }
    }

    resolution
}

fn add_recipe(
    resolution: &mut Resolution,
    recipe: &Recipe,
    item: &LineItem,
    label: &str,
    stock: &HashMap<InventoryItemId, &InventoryStockItem>,
    inputs: &ResolutionInputs,
) {
    let ingredients = inputs
        .ingredients
        .get(&recipe.id)
        .map(Vec::as_slice)
        .unwrap_or(&[]);
    if ingredients.is_empty() {
        resolution.warn(format!("Recipe {} has no ingredients defined", recipe.name));
        return;
    }

    for ingredient in ingredients {
        let Some(id) = ingredient.inventory_item_id else {
            resolution.warn(format!(
                "Ingredient {} not mapped to inventory",
                ingredient.ingredient_name
            ));
            continue;
        };
        let Some(row) = stock.get(&id) else {
            resolution.warn(format!(
                "Ingredient {} is mapped to a stock row outside this store",
                ingredient.ingredient_name
            ));
            continue;
        };
        if !row.is_active {
            resolution.warn(format!(
                "Ingredient {} is mapped to inactive stock row {}",
                ingredient.ingredient_name, row.name
            ));
            continue;
        }
        if let Err(e) = resolution
            .plan
            .add(row, ingredient.required_quantity, item.quantity, label)
        {
            resolution.warn(e.to_string());
        }
    }
}

fn add_template(
    resolution: &mut Resolution,
    template: &RecipeTemplate,
    item: &LineItem,
    label: &str,
    inputs: &ResolutionInputs,
) {
    if template.ingredients.is_empty() {
        resolution.warn(format!("Template {} has no ingredients defined", template.name));
        return;
    }

    for ingredient in &template.ingredients {
        let Some(found) = find_best_match(&ingredient.ingredient_name, &inputs.inventory) else {
            resolution.warn(format!(
                "No inventory mapping found for template ingredient: {}",
                ingredient.ingredient_name
            ));
            continue;
        };

        if found.strategy.is_fuzzy() {
            info!(
                ingredient = %ingredient.ingredient_name,
                matched = %found.item.name,
                strategy = %found.strategy,
                score = found.score,
                via = found.via.unwrap_or(""),
                template = %template.name,
                "fuzzy ingredient match"
            );
        }

        if let Err(e) = resolution
            .plan
            .add(found.item, ingredient.quantity, item.quantity, label)
        {
            resolution.warn(e.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use larder_catalog::{Product, TemplateIngredient};
    use larder_core::StoreId;

    struct Shop {
        store: StoreId,
        inputs: ResolutionInputs,
        beans: InventoryItemId,
        milk: InventoryItemId,
        latte: Product,
    }

    fn shop() -> Shop {
        let store = StoreId::new();
        let beans = InventoryStockItem::new(store, "Coffee Beans", 200.0);
        let milk = InventoryStockItem::new(store, "Milk", 900.0);

        let latte_recipe = Recipe::new(store, "Latte");
        let mocha_recipe = Recipe::new(store, "Mocha");
        let latte = Product::new(store, "Latte", 450).with_recipe(latte_recipe.id);

        let mut ingredients = HashMap::new();
        ingredients.insert(
            latte_recipe.id,
            vec![
                RecipeIngredient::mapped(latte_recipe.id, "Coffee Beans", 18.0, beans.id),
                RecipeIngredient::mapped(latte_recipe.id, "Milk", 150.0, milk.id),
            ],
        );
        ingredients.insert(
            mocha_recipe.id,
            vec![
                RecipeIngredient::mapped(mocha_recipe.id, "Coffee Beans", 20.0, beans.id),
                RecipeIngredient::unmapped(mocha_recipe.id, "Cocoa", 5.0),
            ],
        );

        Shop {
            store,
            beans: beans.id,
            milk: milk.id,
            inputs: ResolutionInputs {
                catalog: vec![ProductWithRecipe {
                    product: latte.clone(),
                    recipe: Some(latte_recipe),
                }],
                recipes_by_name: vec![mocha_recipe],
                templates: Vec::new(),
                inventory: vec![beans, milk],
                ingredients,
            },
            latte,
        }
    }

    #[test]
    fn shared_rows_are_aggregated_across_line_items() {
        let shop = shop();
        let items = vec![
            LineItem::product(shop.latte.id, "Latte", 2),
            LineItem::named("mocha", 1),
        ];

        let resolution = build_plan(&items, &shop.inputs);
        assert_eq!(resolution.items_processed, 2);
        assert_eq!(resolution.plan.len(), 2);

        let beans = resolution.plan.get(&shop.beans).unwrap();
        assert_eq!(beans.total_deduction, 18.0 * 2.0 + 20.0);
        assert_eq!(beans.sources, vec!["Latte x2 (recipe)", "mocha x1 (recipe by name)"]);
        assert_eq!(resolution.plan.get(&shop.milk).unwrap().total_deduction, 300.0);

        // Cocoa is unmapped.
        assert_eq!(resolution.warnings.len(), 1);
        assert!(resolution.warnings[0].to_string().contains("Cocoa"));
    }

    #[test]
    fn catalog_link_wins_over_name() {
        let shop = shop();
        // Named "Mocha" but linked to the Latte product.
        let item = LineItem::product(shop.latte.id, "Mocha", 1);
        assert!(matches!(
            resolve_recipe(&item, &shop.inputs),
            Some(RecipeSource::Catalog(recipe)) if recipe.name == "Latte"
        ));
    }

    #[test]
    fn template_fallback_matches_ingredients_fuzzily() {
        let mut shop = shop();
        let sauce = InventoryStockItem::new(shop.store, "Nutella Sauce", 500.0);
        let sauce_id = sauce.id;
        shop.inputs.inventory.push(sauce);
        shop.inputs.templates.push(RecipeTemplate::new(
            "Nutella Croffle",
            vec![
                TemplateIngredient {
                    ingredient_name: "Nutella Topping".into(),
                    quantity: 30.0,
                },
                TemplateIngredient {
                    ingredient_name: "Unicorn Dust".into(),
                    quantity: 1.0,
                },
            ],
        ));

        let resolution = build_plan(&[LineItem::named("Nutella Croffle", 2)], &shop.inputs);
        assert_eq!(resolution.items_processed, 1);
        assert_eq!(resolution.plan.get(&sauce_id).unwrap().total_deduction, 60.0);

        let messages: Vec<String> = resolution.warnings.iter().map(ToString::to_string).collect();
        assert!(messages.iter().any(|m| m.contains("Using recipe template for Nutella Croffle")));
        assert!(messages.iter().any(|m| m.contains("Unicorn Dust")));
    }

    #[test]
    fn unresolved_and_empty_lines_become_warnings() {
        let shop = shop();
        let items = vec![
            LineItem::named("Mystery Drink", 1),
            LineItem::product(shop.latte.id, "Latte", 0),
        ];

        let resolution = build_plan(&items, &shop.inputs);
        assert!(resolution.plan.is_empty());
        assert_eq!(resolution.items_processed, 0);
        assert_eq!(resolution.warnings.len(), 2);
        assert_eq!(
            resolution.warnings[0],
            DeductionError::Resolution("No recipe or template found for Mystery Drink".into())
        );
    }

    #[test]
    fn inactive_recipes_are_skipped() {
        let mut shop = shop();
        if let Some(recipe) = shop.inputs.catalog[0].recipe.as_mut() {
            recipe.is_active = false;
        }

        let resolution = build_plan(&[LineItem::product(shop.latte.id, "Latte", 1)], &shop.inputs);
        assert!(resolution.plan.is_empty());
        assert!(resolution.warnings[0].to_string().contains("inactive"));
        assert!(!shop.inputs.recipe_ids().contains(&shop.latte.recipe_id.unwrap()));
    }
}
