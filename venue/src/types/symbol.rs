use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Prefix the matching engine uses for spot instruments.
pub const SPOT_PREFIX: &str = "spot.";

/// Static metadata of a tradable symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    pub base: String,
    pub quote: String,
    pub price_precision: u32,
    pub quantity_precision: u32,
}

impl SymbolInfo {
    /// Spot instruments settle base/quote balances; everything else is a
    /// derivative settled against a quote-asset margin balance.
    pub fn is_spot(&self) -> bool {
        self.symbol.starts_with(SPOT_PREFIX)
    }

    /// Minimum price increment (`10^-price_precision`).
    pub fn price_unit(&self) -> Decimal {
        Decimal::new(1, self.price_precision)
    }

    /// Minimum quantity increment (`10^-quantity_precision`).
    pub fn quantity_unit(&self) -> Decimal {
        Decimal::new(1, self.quantity_precision)
    }
}
