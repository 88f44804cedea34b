//! Inventory domain: stock rows, the movement audit record, ingredient-to-stock
//! matching and per-transaction deduction planning.
//!
//! Deterministic domain logic only (no IO, no async, no storage).

pub mod matching;
pub mod movement;
pub mod plan;
pub mod stock;

pub use matching::{IngredientMatch, MatchStrategy, find_best_match, normalize_name};
pub use movement::{Actor, InventoryMovement, MovementType, ReferenceType};
pub use plan::{DeductionPlan, PlannedDeduction};
pub use stock::{InventoryStockItem, units_producible};
