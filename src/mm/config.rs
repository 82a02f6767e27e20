//! Maker configuration.
//!
//! One [`MakerConfig`] per symbol, persisted as a versioned JSON record under
//! the key `maker-<symbol>`.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{MakerError, Result};

/// Version written into every persisted record.
pub const CONFIG_VERSION: u32 = 1;

/// Upper bound of the quote timer period.
pub const MAX_DELAY_MS: u64 = 1_000;

/// Minimum ladder levels: best ask/bid plus two beyond.
pub const MIN_DEPTH_LEVELS: usize = 4;

/// Persistence key of a symbol's config.
pub fn config_key(symbol: &str) -> String {
    format!("maker-{symbol}")
}

/// Fractional rate bounds relative to the cycle's open price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateRange {
    pub min: Decimal,
    pub max: Decimal,
}

/// Intermediate "vibration" points of one price-walk cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VibConfig {
    /// Lowest rate of a vibration price relative to open.
    pub min: Decimal,
    /// Highest rate of a vibration price relative to open.
    pub max: Decimal,
    /// Upper bound for the number of vibration points.
    pub count: usize,
}

/// Shape of the order ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthConfig {
    /// Largest quantity of a single order.
    pub qty_max: Decimal,
    /// Largest number of price units between the inside quote and a level.
    pub step_max: u32,
    /// Lowest ask/bid spread as a fraction of the target price.
    pub diff_min: Decimal,
    /// Highest ask/bid spread as a fraction of the target price.
    pub diff_max: Decimal,
    /// Nominal ladder levels to maintain; only checked against
    /// [`MIN_DEPTH_LEVELS`]. Each cycle's depth is drawn from `step_max`.
    pub max: usize,
}

/// All tuneable parameters of one symbol's maker.
///
/// [`Default::default()`] gives a usable parameter set; `user_id` and
/// `symbol` must be set before it validates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MakerConfig {
    /// Start this maker at bootstrap.
    #[serde(default)]
    pub on: bool,
    /// Account the maker trades under.
    pub user_id: i64,
    /// Quote recompute period in milliseconds.
    #[serde(rename = "delay")]
    pub delay_ms: u64,
    /// Duration of one price-walk cycle in milliseconds.
    #[serde(rename = "interval")]
    pub interval_ms: u64,
    /// Symbol to make, as named by the matching engine.
    pub symbol: String,
    /// Fair price at the start of each cycle.
    pub open: Decimal,
    /// Bounds of the cycle's closing price.
    pub close: RateRange,
    pub vib: VibConfig,
    /// Max fractional jitter applied to the instantaneous quote.
    pub ticker: Decimal,
    pub depth: DepthConfig,
}

impl Default for MakerConfig {
    fn default() -> Self {
        Self {
            on: false,
            user_id: 0,
            delay_ms: 1_000,
            interval_ms: 10 * 60 * 1000,
            symbol: String::new(),
            open: dec!(100),
            close: RateRange {
                min: dec!(-0.05),
                max: dec!(0.05),
            },
            vib: VibConfig {
                min: dec!(-0.03),
                max: dec!(0.03),
                count: 5,
            },
            ticker: dec!(0.002),
            depth: DepthConfig {
                qty_max: dec!(10),
                step_max: 5,
                diff_min: dec!(0.001),
                diff_max: dec!(0.005),
                max: 8,
            },
        }
    }
}

/// One violated configuration constraint.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Violation {
    #[error("user_id must be positive, got {0}")]
    UserId(i64),
    #[error("symbol must not be empty")]
    Symbol,
    #[error("delay must be in (0, {MAX_DELAY_MS}] ms, got {0}")]
    Delay(u64),
    #[error("interval must be positive")]
    Interval,
    #[error("open must be positive, got {0}")]
    Open(Decimal),
    #[error("close.max ({max}) must be greater than close.min ({min})")]
    CloseBounds { min: Decimal, max: Decimal },
    #[error("close.min must be greater than -1, got {0}")]
    CloseMin(Decimal),
    #[error("vib.max ({max}) must be greater than vib.min ({min})")]
    VibBounds { min: Decimal, max: Decimal },
    #[error("vib.min must be greater than -1, got {0}")]
    VibMin(Decimal),
    #[error("vib.count must be at least 1")]
    VibCount,
    #[error("ticker must be positive, got {0}")]
    Ticker(Decimal),
    #[error("depth.qty_max must be positive, got {0}")]
    QtyMax(Decimal),
    #[error("depth.step_max must be positive")]
    StepMax,
    #[error("depth.diff_max ({max}) must be greater than depth.diff_min ({min})")]
    DiffBounds { min: Decimal, max: Decimal },
    #[error("depth.max must be at least {MIN_DEPTH_LEVELS}, got {0}")]
    DepthMax(usize),
}

impl MakerConfig {
    /// Every violated constraint, in field order. Empty when valid.
    pub fn violations(&self) -> Vec<Violation> {
        let mut out = Vec::new();
        if self.user_id < 1 {
            out.push(Violation::UserId(self.user_id));
        }
        if self.symbol.is_empty() {
            out.push(Violation::Symbol);
        }
        if self.delay_ms == 0 || self.delay_ms > MAX_DELAY_MS {
            out.push(Violation::Delay(self.delay_ms));
        }
        if self.interval_ms == 0 {
            out.push(Violation::Interval);
        }
        if self.open <= Decimal::ZERO {
            out.push(Violation::Open(self.open));
        }
        if self.close.max <= self.close.min {
            out.push(Violation::CloseBounds {
                min: self.close.min,
                max: self.close.max,
            });
        }
        if self.close.min <= Decimal::NEGATIVE_ONE {
            out.push(Violation::CloseMin(self.close.min));
        }
        if self.vib.max <= self.vib.min {
            out.push(Violation::VibBounds {
                min: self.vib.min,
                max: self.vib.max,
            });
        }
        if self.vib.min <= Decimal::NEGATIVE_ONE {
            out.push(Violation::VibMin(self.vib.min));
        }
        if self.vib.count < 1 {
            out.push(Violation::VibCount);
        }
        if self.ticker <= Decimal::ZERO {
            out.push(Violation::Ticker(self.ticker));
        }
        if self.depth.qty_max <= Decimal::ZERO {
            out.push(Violation::QtyMax(self.depth.qty_max));
        }
        if self.depth.step_max == 0 {
            out.push(Violation::StepMax);
        }
        if self.depth.diff_max <= self.depth.diff_min {
            out.push(Violation::DiffBounds {
                min: self.depth.diff_min,
                max: self.depth.diff_max,
            });
        }
        if self.depth.max < MIN_DEPTH_LEVELS {
            out.push(Violation::DepthMax(self.depth.max));
        }
        out
    }

    pub fn validate(&self) -> Result<()> {
        let violations = self.violations();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(MakerError::InvalidConfig(violations))
        }
    }

    /// Encode as a versioned record.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let record = RecordRef {
            version: CONFIG_VERSION,
            config: self,
        };
        Ok(serde_json::to_vec_pretty(&record)?)
    }

    /// Decode a versioned record. Does not validate.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header: RecordHeader = serde_json::from_slice(bytes)?;
        if header.version != CONFIG_VERSION {
            return Err(MakerError::UnsupportedVersion(header.version));
        }
        let record: Record = serde_json::from_slice(bytes)?;
        Ok(record.config)
    }
}

#[derive(Deserialize)]
struct RecordHeader {
    version: u32,
}

#[derive(Serialize)]
struct RecordRef<'a> {
    version: u32,
    #[serde(flatten)]
    config: &'a MakerConfig,
}

#[derive(Deserialize)]
struct Record {
    #[serde(flatten)]
    config: MakerConfig,
}
