//! Piecewise random price walk over one cycle.
//!
//! A cycle starts at `open`, passes through a handful of randomly placed
//! vibration points, and ends at a random close after exactly `interval_ms`.
//! [`PriceWalk::next`] turns elapsed time plus the last fair price into the
//! next instantaneous quote, drifting toward whichever point is due next.

use rand::Rng;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::config::MakerConfig;
use super::random::{below, between, rate_from};

/// Fewest intermediate vibration points per cycle.
pub const MIN_VIB_POINTS: usize = 4;

/// One vertex of the walk: the price due once `slice_ms` more has elapsed
/// since the previous vertex.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WalkPoint {
    pub price: Decimal,
    pub slice_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PriceWalk {
    points: Vec<WalkPoint>,
    ticker: Decimal,
}

impl PriceWalk {
    /// Draw a fresh cycle from a validated config.
    pub fn generate<R: Rng + ?Sized>(config: &MakerConfig, rng: &mut R) -> Self {
        let open = config.open;
        let k = MIN_VIB_POINTS + below(rng, config.vib.count.saturating_sub(3).max(1));
        let k_dec = Decimal::from(k);

        let mut points = Vec::with_capacity(k + 2);
        points.push(WalkPoint {
            price: open,
            slice_ms: 0,
        });

        // Earlier slices take a larger share of what is left.
        let mut remaining = config.interval_ms;
        for i in 0..k {
            let weight = Decimal::from(k - i) / k_dec;
            let jitter = rate_from(rng, Decimal::ONE / k_dec);
            let slice = (weight * jitter * Decimal::from(remaining))
                .floor()
                .to_u64()
                .unwrap_or(0)
                .min(remaining);
            remaining -= slice;
            let rate = between(rng, config.vib.min, config.vib.max);
            points.push(WalkPoint {
                price: open * (Decimal::ONE + rate),
                slice_ms: slice,
            });
        }

        let rate = between(rng, config.close.min, config.close.max);
        points.push(WalkPoint {
            price: open * (Decimal::ONE + rate),
            slice_ms: remaining,
        });

        Self {
            points,
            ticker: config.ticker,
        }
    }

    pub fn points(&self) -> &[WalkPoint] {
        &self.points
    }

    /// Total cycle length; always the configured interval.
    pub fn duration_ms(&self) -> u64 {
        self.points.iter().map(|p| p.slice_ms).sum()
    }

    pub fn close(&self) -> Decimal {
        self.points.last().map(|p| p.price).unwrap_or_default()
    }

    /// Next fair price `elapsed_ms` into the cycle, starting from `last`.
    ///
    /// Returns `last` unchanged once the cycle has run out. Otherwise moves
    /// by up to `ticker` (relative) with a bias toward the point due next;
    /// the bias grows as the slice nears its end.
    pub fn next<R: Rng + ?Sized>(&self, elapsed_ms: u64, last: Decimal, rng: &mut R) -> Decimal {
        let mut offset = 0u64;
        let mut due = None;
        for point in &self.points {
            offset += point.slice_ms;
            if offset > elapsed_ms {
                due = Some(point);
                break;
            }
        }
        let Some(due) = due else {
            return last;
        };

        // offset > elapsed_ms implies a non-empty slice here.
        let left = Decimal::from(offset - elapsed_ms);
        let slice = Decimal::from(due.slice_ms);
        let floor = (Decimal::ONE - left / slice) * dec!(0.5);
        let factor = rate_from(rng, floor);
        let rate = self.ticker * (dec!(2) * factor - Decimal::ONE);
        if last < due.price {
            last + last * rate
        } else {
            last - last * rate
        }
    }
}
