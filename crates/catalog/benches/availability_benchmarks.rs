use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::Utc;
use larder_catalog::{
    AvailabilityPolicy, BatchedSnapshot, Product, ProductWithRecipe, Recipe, RecipeIngredient,
    StoreAvailabilitySummary,
};
use larder_core::StoreId;
use larder_inventory::{DeductionPlan, InventoryStockItem, find_best_match};

const INGREDIENTS_PER_RECIPE: usize = 4;

/// A store where every product has a recipe drawing on a shared ingredient pool.
fn build_snapshot(product_count: usize) -> BatchedSnapshot {
    let store = StoreId::new();
    let inventory: Vec<InventoryStockItem> = (0..product_count.max(8))
        .map(|i| InventoryStockItem::new(store, format!("Ingredient {i}"), 1_000.0 + i as f64))
        .collect();

    let mut catalog = Vec::with_capacity(product_count);
    let mut ingredients = Vec::with_capacity(product_count * INGREDIENTS_PER_RECIPE);
    for p in 0..product_count {
        let recipe = Recipe::new(store, format!("Recipe {p}"));
        for k in 0..INGREDIENTS_PER_RECIPE {
            let item = &inventory[(p + k * 7) % inventory.len()];
            ingredients.push(RecipeIngredient::mapped(
                recipe.id,
                item.name.clone(),
                5.0 + k as f64,
                item.id,
            ));
        }
        catalog.push(ProductWithRecipe {
            product: Product::new(store, format!("Product {p}"), 10_000).with_recipe(recipe.id),
            recipe: Some(recipe),
        });
    }

    BatchedSnapshot::assemble(store, catalog, inventory, ingredients, Utc::now())
}

fn bench_store_availability(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_availability");
    let policy = AvailabilityPolicy::default();

    for product_count in [10usize, 100, 1_000, 5_000].iter() {
        let snapshot = build_snapshot(*product_count);
        group.throughput(Throughput::Elements(*product_count as u64));
        group.bench_with_input(
            BenchmarkId::new("availability_all", product_count),
            &snapshot,
            |b, snapshot| {
                b.iter(|| {
                    let results = snapshot.availability_all(black_box(&policy));
                    black_box(StoreAvailabilitySummary::from_results(&results))
                });
            },
        );
    }

    group.finish();
}

fn bench_ingredient_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingredient_matching");
    let store = StoreId::new();
    let inventory: Vec<InventoryStockItem> = (0..500)
        .map(|i| InventoryStockItem::new(store, format!("Stock Row {i} Blend"), 100.0))
        .chain([InventoryStockItem::new(store, "Nutella Sauce", 100.0)])
        .collect();

    group.bench_function("synonym_hit", |b| {
        b.iter(|| find_best_match(black_box("Nutella Topping"), &inventory))
    });
    group.bench_function("token_overlap_scan", |b| {
        b.iter(|| find_best_match(black_box("Blend Row 250 Stock"), &inventory))
    });
    group.bench_function("miss", |b| {
        b.iter(|| find_best_match(black_box("Saffron Threads"), &inventory))
    });

    group.finish();
}

fn bench_deduction_planning(c: &mut Criterion) {
    let mut group = c.benchmark_group("deduction_planning");
    let snapshot = build_snapshot(200);

    for line_items in [1usize, 10, 50].iter() {
        group.bench_with_input(
            BenchmarkId::new("aggregate_lines", line_items),
            line_items,
            |b, &count| {
                b.iter(|| {
                    let mut plan = DeductionPlan::new();
                    for product in snapshot.products.iter().take(count) {
                        let Some(recipe_id) = product.recipe_id else { continue };
                        for ingredient in snapshot.ingredients_for(&recipe_id) {
                            let Some(id) = ingredient.inventory_item_id else { continue };
                            if let Some(item) = snapshot.inventory_item(&id) {
                                let _ = plan.add(item, ingredient.required_quantity, 2, &product.name);
                            }
                        }
                    }
                    black_box(plan.len())
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_store_availability,
    bench_ingredient_matching,
    bench_deduction_planning
);
criterion_main!(benches);
