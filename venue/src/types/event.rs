use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::account::{Balance, Holding, Order};

/// Aggregated order-book depth, each level `[price, quantity]`.
///
/// Asks ascend from the best (lowest) price, bids descend from the best
/// (highest) price.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Depth {
    pub asks: Vec<[Decimal; 2]>,
    pub bids: Vec<[Decimal; 2]>,
}

impl Depth {
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|level| level[0])
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|level| level[0])
    }
}

/// One batch of state changes reported by the matching engine.
///
/// Not scoped to any account: consumers filter by user id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchEvent {
    pub symbol: String,
    #[serde(default)]
    pub orders: Vec<Order>,
    #[serde(default)]
    pub balances: Vec<Balance>,
    #[serde(default)]
    pub holdings: Vec<Holding>,
    #[serde(default)]
    pub depth: Depth,
}
