use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::enums::{BalanceArea, OrderStatus, Side};

/// Last-known state of a limit order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub user_id: i64,
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub price: Decimal,
    pub filled: Decimal,
    pub status: OrderStatus,
    pub update_time: DateTime<Utc>,
}

impl Order {
    /// Quantity still resting on the book.
    pub fn remaining(&self) -> Decimal {
        self.quantity - self.filled
    }
}

impl std::fmt::Display for Order {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} {} {}@{} filled {} ({:?})",
            self.symbol, self.order_id, self.side, self.quantity, self.price, self.filled, self.status
        )
    }
}

/// Balance of one asset in one area of an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub user_id: i64,
    pub area: BalanceArea,
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

impl Balance {
    pub fn empty(user_id: i64, area: BalanceArea, asset: &str) -> Self {
        Self {
            user_id,
            area,
            asset: asset.to_string(),
            free: Decimal::ZERO,
            locked: Decimal::ZERO,
        }
    }
}

/// Derivative position of an account in one symbol.
///
/// `amount` is signed: positive = long, negative = short.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub user_id: i64,
    pub symbol: String,
    pub amount: Decimal,
    pub open: Decimal,
}

impl Holding {
    pub fn empty(user_id: i64, symbol: &str) -> Self {
        Self {
            user_id,
            symbol: symbol.to_string(),
            amount: Decimal::ZERO,
            open: Decimal::ZERO,
        }
    }
}
