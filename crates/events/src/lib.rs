//! Change notifications and the pub/sub bus that carries them.
//!
//! The backend announces row changes (stock, catalog, recipe ingredients) per
//! store; listeners downstream only need to know *which* data class changed.

pub mod bus;
pub mod change;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use change::{ChangeEvent, ChangeSource, StoreScoped};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
