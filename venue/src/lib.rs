pub mod engine;
pub mod error;
pub mod memory;
pub mod store;
pub mod types;

// ---- Top-level re-exports for ergonomic usage ----

// Service traits
pub use engine::{Ledger, MatchingEngine};
pub use store::{ConfStore, FileConfStore, MemoryConfStore};

// In-process venue
pub use memory::MemoryVenue;

pub use error::{Result, VenueError};

// Records
pub use types::{
    Balance, BalanceArea, Depth, Holding, MatchEvent, Order, OrderStatus, Side, SymbolInfo,
    SPOT_PREFIX,
};
