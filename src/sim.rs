//! Simulated venue for `run`: loaded from a JSON description, with an
//! optional random taker so resting orders get filled.

use std::path::Path;

use rand::seq::SliceRandom;
use rand::Rng;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::Deserialize;
use synth_maker::mm::random::between;
use synth_maker::Result;
use venue::{BalanceArea, MemoryVenue, Order, SymbolInfo, VenueError};

/// Symbols the venue trades and balances credited before any maker starts.
#[derive(Debug, Deserialize)]
pub struct VenueFile {
    pub symbols: Vec<SymbolInfo>,
    #[serde(default)]
    pub deposits: Vec<Deposit>,
}

#[derive(Debug, Deserialize)]
pub struct Deposit {
    pub user_id: i64,
    pub area: BalanceArea,
    pub asset: String,
    pub amount: Decimal,
}

impl VenueFile {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(VenueError::from)?;
        Self::parse(&bytes)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn build(&self) -> MemoryVenue {
        let venue = MemoryVenue::new(self.symbols.iter().cloned());
        for d in &self.deposits {
            venue.deposit(d.user_id, d.area, &d.asset, d.amount);
        }
        venue
    }
}

/// Fill part of one random resting order of one random `(user, symbol)`.
///
/// Returns `None` when there was nothing to take.
pub fn take_random<R: Rng + ?Sized>(
    venue: &MemoryVenue,
    targets: &[(i64, SymbolInfo)],
    rng: &mut R,
) -> Option<venue::Result<Order>> {
    let (user_id, info) = targets.choose(rng)?;
    let orders = venue.open_orders(*user_id, &info.symbol);
    let order = orders.choose(rng)?;
    let remaining = order.remaining();
    let quantity = (remaining * between(rng, dec!(0.1), Decimal::ONE))
        .round_dp_with_strategy(info.quantity_precision, RoundingStrategy::ToZero)
        .max(info.quantity_unit())
        .min(remaining);
    Some(venue.fill(&order.order_id, quantity))
}
