//! Decimal random draws on top of any [`rand::Rng`].
//!
//! Every random decision the maker takes goes through these helpers with an
//! injected generator, so a seeded `StdRng` makes a run reproducible.

use rand::Rng;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Rates are drawn on a grid of `1 / RATE_SCALE`.
const RATE_SCALE: i64 = 100_000;
const RATE_SCALE_DP: u32 = 5;

/// Uniform integer in `[0, n)`, or 0 when `n` is 0.
pub fn below<R: Rng + ?Sized>(rng: &mut R, n: usize) -> usize {
    if n == 0 {
        0
    } else {
        rng.gen_range(0..n)
    }
}

/// Uniform rate in `[min, 1)`. Zero when `min >= 1`.
pub fn rate_from<R: Rng + ?Sized>(rng: &mut R, min: Decimal) -> Decimal {
    if min >= Decimal::ONE {
        return Decimal::ZERO;
    }
    let span = ((Decimal::ONE - min) * Decimal::from(RATE_SCALE))
        .floor()
        .to_i64()
        .unwrap_or(0);
    if span <= 0 {
        return min;
    }
    Decimal::new(rng.gen_range(0..span), RATE_SCALE_DP) + min
}

/// Uniform value in `[min, max)`.
pub fn between<R: Rng + ?Sized>(rng: &mut R, min: Decimal, max: Decimal) -> Decimal {
    (max - min) * rate_from(rng, Decimal::ZERO) + min
}
