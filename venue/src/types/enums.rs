use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// Lifecycle of an order as reported by the matching engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Partialled,
    Done,
    Canceled,
    PartCanceled,
}

impl OrderStatus {
    /// Whether the order can no longer change.
    pub fn is_final(self) -> bool {
        matches!(
            self,
            OrderStatus::Done | OrderStatus::Canceled | OrderStatus::PartCanceled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BalanceArea {
    Spot,
    Futures,
}

impl std::fmt::Display for BalanceArea {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BalanceArea::Spot => write!(f, "spot"),
            BalanceArea::Futures => write!(f, "futures"),
        }
    }
}
