//! Synthetic liquidity for a matching engine.
//!
//! A [`Registry`] runs one [`Maker`] per symbol. Each maker walks a random
//! fair price through a cycle and keeps a ladder of limit orders around it,
//! reconciling its view of orders and balances from match events.

pub mod error;
pub mod mm;

pub use error::{MakerError, Result};
pub use mm::config::{config_key, MakerConfig, Violation};
pub use mm::maker::{Maker, MakerServices, MakerSnapshot, TargetQuote};
pub use mm::registry::Registry;
pub use mm::walk::{PriceWalk, WalkPoint};
