//! Catalog domain: products, store recipes, global recipe templates, the
//! batched snapshot that joins them with stock, and the availability
//! calculator that runs over it.
//!
//! Read-only with respect to the backend: nothing here mutates catalog or
//! recipe definitions.

pub mod availability;
pub mod product;
pub mod recipe;
pub mod snapshot;

pub use availability::{
    AvailabilityPolicy, AvailabilityStatus, IngredientRequirement, ProductAvailability,
    StoreAvailabilitySummary, compute_availability,
};
pub use product::{CategoryRef, EssentialProduct, Product, ProductWithRecipe};
pub use recipe::{Recipe, RecipeIngredient, RecipeTemplate, TemplateIngredient};
pub use snapshot::{BatchedSnapshot, SnapshotIngredient};
