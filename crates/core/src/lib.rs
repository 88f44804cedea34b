//! `larder-core` — identifiers and the domain error model shared by every crate.
//!
//! Pure types only; nothing in here touches I/O.

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{
    CategoryId, InventoryItemId, MovementId, ProductId, RecipeId, RecipeTemplateId, StoreId,
    TransactionId, UserId,
};
