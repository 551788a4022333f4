//! Storage layer: the inventory store contract and its realizations.

pub mod contract;
pub mod in_memory;
pub mod orchestrator;
pub mod postgres;

pub use contract::{
    InventoryStore, LevelFilter, LevelPage, LevelUpdate, NewAdjustment, NewReservation,
    Pagination, StoreError,
};
pub use in_memory::InMemoryInventoryStore;
pub use orchestrator::{AdjustmentRequest, ReservationOrchestrator};
pub use postgres::PostgresInventoryStore;
