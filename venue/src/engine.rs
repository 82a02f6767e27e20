//! Services the maker consumes from the exchange side.
//!
//! Both traits are object safe so callers can hold `Arc<dyn MatchingEngine>`
//! and swap in [`crate::MemoryVenue`] for simulation and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::Result;
use crate::types::{Balance, BalanceArea, Holding, Order, Side, SymbolInfo};

/// Central order-matching engine.
///
/// State changes are reported asynchronously as [`crate::MatchEvent`]s on a
/// feed owned by the implementation, never through these return values.
#[async_trait]
pub trait MatchingEngine: Send + Sync {
    /// Every symbol the engine trades.
    fn symbols(&self) -> Vec<SymbolInfo>;

    /// Metadata of one symbol, or `None` if the engine does not trade it.
    fn lookup_symbol(&self, symbol: &str) -> Option<SymbolInfo>;

    /// Submit a limit order.
    async fn place_limit(
        &self,
        user_id: i64,
        symbol: &str,
        side: Side,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<Order>;

    /// Cancel an open order owned by `user_id`.
    async fn cancel(&self, user_id: i64, symbol: &str, order_id: &str) -> Result<Order>;
}

/// Balance/position ledger, the source of truth at startup.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Ensure a balance record exists for each asset (idempotent).
    async fn touch_balance(&self, user_id: i64, area: BalanceArea, assets: &[String])
        -> Result<()>;

    /// All balances of the account in `area`, keyed by asset.
    async fn list_balances(&self, user_id: i64, area: BalanceArea)
        -> Result<HashMap<String, Balance>>;

    /// Ensure a holding record exists for each symbol (idempotent).
    async fn touch_holding(&self, user_id: i64, symbols: &[String]) -> Result<()>;

    async fn find_holding(&self, user_id: i64, symbol: &str) -> Result<Option<Holding>>;
}
