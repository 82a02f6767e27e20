//! One quote cycle: recompute the target, cancel stale orders, lay a fresh
//! ladder.
//!
//! Per-order failures are logged and skipped; a cycle never fails as a
//! whole. The next cycle re-derives everything from current state.

use std::collections::BTreeSet;
use std::time::Duration;

use rust_decimal::{Decimal, RoundingStrategy};
use tokio::time::Instant;
use tracing::{debug, warn};
use venue::Side;

use crate::mm::maker::{MakerCore, TargetQuote};
use crate::mm::random::{below, between};
use crate::mm::walk::PriceWalk;

/// Most extra valid orders canceled per cycle for churn.
pub const CHURN_MAX: usize = 4;

/// Fewest ladder levels beyond the inside quote.
pub const MIN_LADDER: usize = 3;

/// Outcome of one `proc_make` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MakeReport {
    pub quote: TargetQuote,
    pub canceled: usize,
    pub placed: usize,
    /// Levels skipped for lack of funds.
    pub skipped: usize,
}

impl MakerCore {
    /// Run one quote cycle. `force` recomputes the target even if one
    /// exists.
    pub async fn proc_make(&self, force: bool) -> MakeReport {
        let _making = self.making.lock().await;
        let quote = self.target_quote(force);
        let user_id = self.state.read().config.user_id;
        let symbol = self.symbol.symbol.as_str();
        let engine = &self.services.engine;

        let mut canceled = 0;
        let stale = self.cancel_candidates(&quote);
        if !stale.is_empty() {
            debug!(
                symbol,
                count = stale.len(),
                ask = %quote.ask,
                bid = %quote.bid,
                "canceling"
            );
        }
        for order_id in stale {
            match engine.cancel(user_id, symbol, &order_id).await {
                Ok(order) => {
                    canceled += 1;
                    debug!(order = %order, "canceled");
                }
                Err(e) => warn!(symbol, order_id = %order_id, error = %e, "cancel failed"),
            }
        }

        let mut placed = 0;
        let mut skipped = 0;
        for (side, price) in self.ladder(&quote) {
            let quantity = self.draw_quantity();
            if !self.can_place(side, quantity, price) {
                skipped += 1;
                continue;
            }
            match engine
                .place_limit(user_id, symbol, side, quantity, price)
                .await
            {
                Ok(order) => {
                    placed += 1;
                    debug!(order = %order, "placed");
                }
                Err(e) => warn!(
                    symbol,
                    side = %side,
                    qty = %quantity,
                    price = %price,
                    error = %e,
                    "place failed"
                ),
            }
        }

        debug!(
            symbol,
            mid = %quote.mid,
            ask = %quote.ask,
            bid = %quote.bid,
            canceled,
            placed,
            skipped,
            "MAKE"
        );
        MakeReport {
            quote,
            canceled,
            placed,
            skipped,
        }
    }

    /// Current target, recomputed when forced or when none exists yet.
    pub(crate) fn target_quote(&self, force: bool) -> TargetQuote {
        let mut guard = self.state.write();
        let state = &mut *guard;
        if let (false, Some(quote)) = (force, state.quote) {
            return quote;
        }
        let mut rng = self.rng.lock();

        let now = Instant::now();
        let expired = match (state.cycle_start, &state.walk) {
            (Some(start), Some(walk)) => elapsed_ms(now, start) >= walk.duration_ms(),
            _ => true,
        };
        if expired {
            let walk = PriceWalk::generate(&state.config, &mut *rng);
            // One tick back, but always short of the cycle's end.
            let backdate = state
                .config
                .delay_ms
                .min(walk.duration_ms().saturating_sub(1));
            let start = now.checked_sub(Duration::from_millis(backdate));
            state.cycle_start = Some(start.unwrap_or(now));
            state.walk = Some(walk);
        }
        let elapsed = state
            .cycle_start
            .map(|start| elapsed_ms(now, start))
            .unwrap_or_default();
        let mid = match &state.walk {
            Some(walk) => walk.next(elapsed, state.last_mid, &mut *rng),
            None => state.last_mid,
        };

        let depth = &state.config.depth;
        let half = mid * between(&mut *rng, depth.diff_min, depth.diff_max) / Decimal::TWO;
        let precision = self.symbol.price_precision;
        let bid = (mid - half).round_dp_with_strategy(precision, RoundingStrategy::ToNegativeInfinity);
        let mut ask =
            (mid + half).round_dp_with_strategy(precision, RoundingStrategy::ToPositiveInfinity);
        if ask <= bid {
            ask = bid + self.symbol.price_unit();
        }

        let quote = TargetQuote { mid, ask, bid };
        state.quote = Some(quote);
        quote
    }

    /// Orders to cancel: everything inside the new spread, plus up to
    /// [`CHURN_MAX`] distinct random picks among the rest.
    pub(crate) fn cancel_candidates(&self, quote: &TargetQuote) -> Vec<String> {
        let mut cancel = Vec::new();
        let mut valid = Vec::new();
        {
            let state = self.state.read();
            for order in state.orders.values() {
                let inside = match order.side {
                    Side::Sell => order.price < quote.ask,
                    Side::Buy => order.price > quote.bid,
                };
                if inside {
                    cancel.push(order.order_id.clone());
                } else {
                    valid.push(order.order_id.clone());
                }
            }
        }
        if !valid.is_empty() {
            let mut rng = self.rng.lock();
            let picks = below(&mut *rng, CHURN_MAX + 1);
            let mut picked = BTreeSet::new();
            for _ in 0..picks {
                let x = below(&mut *rng, valid.len());
                if picked.insert(x) {
                    cancel.push(valid[x].clone());
                }
            }
        }
        cancel
    }

    /// Prices to quote this cycle, outer levels first, inside bid/ask last.
    pub(crate) fn ladder(&self, quote: &TargetQuote) -> Vec<(Side, Decimal)> {
        let step_max = self.state.read().config.depth.step_max as usize;
        let unit = self.symbol.price_unit();
        let precision = self.symbol.price_precision;

        let mut rng = self.rng.lock();
        let levels = MIN_LADDER + below(&mut *rng, step_max.saturating_sub(MIN_LADDER).max(1));
        let mut step = || Decimal::from(1 + below(&mut *rng, step_max.saturating_sub(1).max(1)));

        let mut out = Vec::with_capacity(2 * levels + 2);
        for _ in 0..levels {
            let bid = (quote.bid - unit * step())
                .round_dp_with_strategy(precision, RoundingStrategy::ToNegativeInfinity);
            out.push((Side::Buy, bid));
            let ask = (quote.ask + unit * step())
                .round_dp_with_strategy(precision, RoundingStrategy::ToPositiveInfinity);
            out.push((Side::Sell, ask));
        }
        out.push((Side::Buy, quote.bid));
        out.push((Side::Sell, quote.ask));
        out
    }

    /// Random order size in `[unit, qty_max - unit)`, rounded up to the
    /// quantity precision.
    fn draw_quantity(&self) -> Decimal {
        let qty_max = self.state.read().config.depth.qty_max;
        let unit = self.symbol.quantity_unit();
        let qty = between(&mut *self.rng.lock(), unit, qty_max - unit).round_dp_with_strategy(
            self.symbol.quantity_precision,
            RoundingStrategy::ToPositiveInfinity,
        );
        qty.max(unit)
    }

    /// Whether the last known balances (or holding) can fund an order.
    ///
    /// Derivatives may always reduce an existing position; otherwise the
    /// free quote balance must exceed the notional.
    pub fn can_place(&self, side: Side, quantity: Decimal, price: Decimal) -> bool {
        let state = self.state.read();
        let free = |asset: &str| state.balances.get(asset).map(|b| b.free);
        let notional = quantity * price;
        if self.symbol.is_spot() {
            match side {
                Side::Buy => free(&self.symbol.quote).is_some_and(|f| f > notional),
                Side::Sell => free(&self.symbol.base).is_some_and(|f| f > quantity),
            }
        } else {
            let amount = state.holding.as_ref().map(|h| h.amount);
            let reduces = match side {
                Side::Buy => amount.is_some_and(|a| a <= -quantity),
                Side::Sell => amount.is_some_and(|a| a >= quantity),
            };
            reduces || free(&self.symbol.quote).is_some_and(|f| f > notional)
        }
    }
}

fn elapsed_ms(now: Instant, start: Instant) -> u64 {
    now.saturating_duration_since(start).as_millis() as u64
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rust_decimal_macros::dec;
    use tokio::time;
    use venue::{Balance, BalanceArea, Holding, MatchEvent, MemoryVenue, Order, OrderStatus};

    use super::*;
    use crate::mm::maker::tests::{config, load, services, venue, USER};

    fn set_free(core: &MakerCore, area: BalanceArea, asset: &str, free: Decimal) {
        let mut balance = Balance::empty(USER, area, asset);
        balance.free = free;
        core.state.write().balances.insert(asset.into(), balance);
    }

    fn resting(id: &str, side: Side, price: Decimal) -> Order {
        Order {
            order_id: id.into(),
            user_id: USER,
            symbol: "futures.YWEUSDT".into(),
            side,
            quantity: dec!(1),
            price,
            filled: Decimal::ZERO,
            status: OrderStatus::Pending,
            update_time: chrono::Utc::now(),
        }
    }

    async fn load_with(
        venue: &Arc<MemoryVenue>,
        config: crate::mm::config::MakerConfig,
        seed: u64,
    ) -> Arc<MakerCore> {
        let rng = rand::SeedableRng::seed_from_u64(seed);
        let (core, _rx) = MakerCore::load(config, services(venue), rng).await.unwrap();
        core
    }

    fn pump(core: &MakerCore, rx: &mut tokio::sync::broadcast::Receiver<MatchEvent>) {
        while let Ok(event) = rx.try_recv() {
            core.on_matched(&event);
        }
    }

    #[tokio::test]
    async fn test_can_place_spot_buy_needs_notional() {
        let venue = venue();
        let core = load(&venue, "spot.YWEUSDT", 1).await;
        set_free(&core, BalanceArea::Spot, "USDT", dec!(50));
        assert!(!core.can_place(Side::Buy, dec!(1), dec!(100)));
        set_free(&core, BalanceArea::Spot, "USDT", dec!(150));
        assert!(core.can_place(Side::Buy, dec!(1), dec!(100)));
        // strictly greater
        set_free(&core, BalanceArea::Spot, "USDT", dec!(100));
        assert!(!core.can_place(Side::Buy, dec!(1), dec!(100)));
    }

    #[tokio::test]
    async fn test_can_place_spot_sell_needs_base() {
        let venue = venue();
        let core = load(&venue, "spot.YWEUSDT", 1).await;
        set_free(&core, BalanceArea::Spot, "YWE", dec!(2));
        assert!(core.can_place(Side::Sell, dec!(1.5), dec!(100)));
        assert!(!core.can_place(Side::Sell, dec!(2), dec!(100)));
    }

    #[tokio::test]
    async fn test_can_place_futures_reduces_position_without_margin() {
        let venue = venue();
        let core = load(&venue, "futures.YWEUSDT", 1).await;
        set_free(&core, BalanceArea::Futures, "USDT", dec!(0));
        core.state.write().holding = Some(Holding {
            user_id: USER,
            symbol: "futures.YWEUSDT".into(),
            amount: dec!(-2),
            open: dec!(100),
        });
        assert!(core.can_place(Side::Buy, dec!(2), dec!(100)));
        assert!(!core.can_place(Side::Buy, dec!(3), dec!(100)));
        assert!(!core.can_place(Side::Sell, dec!(1), dec!(100)));

        set_free(&core, BalanceArea::Futures, "USDT", dec!(1000));
        assert!(core.can_place(Side::Sell, dec!(1), dec!(100)));
    }

    #[tokio::test]
    async fn test_forced_make_on_futures_symbol() {
        let venue = venue();
        let core = load(&venue, "futures.YWEUSDT", 17).await;
        let report = core.proc_make(true).await;

        let quote = report.quote;
        assert!(quote.bid < quote.ask, "{quote:?}");
        assert!(quote.bid >= dec!(95) && quote.ask <= dec!(105), "{quote:?}");
        assert!((8..=10).contains(&report.placed), "{report:?}");
        assert_eq!(report.canceled, 0);
        assert_eq!(
            venue.open_orders(USER, "futures.YWEUSDT").len(),
            report.placed
        );
    }

    #[tokio::test]
    async fn test_ladder_shape() {
        let venue = venue();
        let core = load(&venue, "futures.YWEUSDT", 5).await;
        let quote = TargetQuote {
            mid: dec!(100),
            ask: dec!(100.30),
            bid: dec!(99.70),
        };
        for _ in 0..20 {
            let ladder = core.ladder(&quote);
            assert!(ladder.len() == 8 || ladder.len() == 10, "{}", ladder.len());
            assert_eq!(ladder[ladder.len() - 2], (Side::Buy, dec!(99.70)));
            assert_eq!(ladder[ladder.len() - 1], (Side::Sell, dec!(100.30)));
            for (side, price) in &ladder[..ladder.len() - 2] {
                match side {
                    Side::Buy => assert!(*price < quote.bid && *price >= dec!(99.66)),
                    Side::Sell => assert!(*price > quote.ask && *price <= dec!(100.34)),
                }
            }
        }
    }

    #[tokio::test]
    async fn test_event_make_reuses_target() {
        let venue = venue();
        let core = load(&venue, "futures.YWEUSDT", 8).await;
        let first = core.proc_make(false).await.quote;
        let again = core.proc_make(false).await.quote;
        assert_eq!(first, again);
    }

    #[tokio::test]
    async fn test_crossing_orders_canceled_before_placing() {
        let venue = venue();
        let core = load(&venue, "futures.YWEUSDT", 23).await;
        let mut rx = venue.subscribe_events();

        // Walk through several cycles with the book moving under the maker.
        for round in 0..6 {
            if round % 2 == 1 {
                core.state.write().last_mid = dec!(100) + Decimal::from(round);
            }
            let report = core.proc_make(true).await;
            pump(&core, &mut rx);

            let quote = report.quote;
            for order in venue.open_orders(USER, "futures.YWEUSDT") {
                match order.side {
                    Side::Sell => assert!(order.price >= quote.ask, "{order} vs {quote:?}"),
                    Side::Buy => assert!(order.price <= quote.bid, "{order} vs {quote:?}"),
                }
            }
        }
        // The maker's own view agrees with the venue.
        assert_eq!(
            core.snapshot().open_orders,
            venue.open_orders(USER, "futures.YWEUSDT").len()
        );
    }

    #[tokio::test]
    async fn test_same_seed_same_cycle() {
        async fn run(seed: u64) -> (MakeReport, Vec<(Side, Decimal, Decimal)>) {
            let venue = venue();
            let core = load(&venue, "futures.YWEUSDT", seed).await;
            let report = core.proc_make(true).await;
            let orders = venue
                .open_orders(USER, "futures.YWEUSDT")
                .into_iter()
                .map(|o| (o.side, o.price, o.quantity))
                .collect();
            (report, orders)
        }
        let (a, orders_a) = run(99).await;
        let (b, orders_b) = run(99).await;
        assert_eq!(a.quote.ask, b.quote.ask);
        assert_eq!(a.quote.bid, b.quote.bid);
        assert_eq!(orders_a, orders_b);
    }

    #[tokio::test]
    async fn test_unfunded_levels_are_skipped() {
        let venue = Arc::new(MemoryVenue::new([crate::mm::maker::tests::spot_symbol()]));
        let (core, _rx) = crate::mm::maker::MakerCore::load(
            config("spot.YWEUSDT"),
            services(&venue),
            rand::SeedableRng::seed_from_u64(4),
        )
        .await
        .unwrap();
        let report = core.proc_make(true).await;
        assert_eq!(report.placed, 0);
        assert!(report.skipped >= 8);
        assert!(venue.open_orders(USER, "spot.YWEUSDT").is_empty());
    }

    #[tokio::test]
    async fn test_ladder_depth_follows_step_max() {
        let venue = venue();
        let mut cfg = config("futures.YWEUSDT");
        cfg.depth.step_max = 10;
        cfg.depth.max = 4;
        let core = load_with(&venue, cfg, 11).await;
        let quote = spread();
        let mut deepest = 0;
        for _ in 0..200 {
            let levels = (core.ladder(&quote).len() - 2) / 2;
            assert!((3..=9).contains(&levels), "{levels}");
            deepest = deepest.max(levels);
        }
        assert!(deepest > 4, "{deepest}");
    }

    fn spread() -> TargetQuote {
        TargetQuote {
            mid: dec!(100),
            ask: dec!(100.30),
            bid: dec!(99.70),
        }
    }

    async fn candidates(venue: &Arc<MemoryVenue>, book: &[Order], seed: u64) -> Vec<String> {
        let core = load(venue, "futures.YWEUSDT", seed).await;
        for order in book {
            core.state.write().orders.insert(order.order_id.clone(), order.clone());
        }
        core.cancel_candidates(&spread())
    }

    #[tokio::test]
    async fn test_cancel_candidates_inside_then_distinct_churn() {
        let valid = ["v1", "v2", "v3", "v4", "v5", "v6"];
        let book = [
            resting("a1", Side::Sell, dec!(100.10)),
            resting("b1", Side::Buy, dec!(99.90)),
            resting("v1", Side::Sell, dec!(100.30)),
            resting("v2", Side::Sell, dec!(100.50)),
            resting("v3", Side::Sell, dec!(100.60)),
            resting("v4", Side::Buy, dec!(99.70)),
            resting("v5", Side::Buy, dec!(99.50)),
            resting("v6", Side::Buy, dec!(99.40)),
        ];

        let venue = venue();
        let mut churned = 0;
        for seed in 0..40 {
            let ids = candidates(&venue, &book, seed).await;
            assert_eq!(ids, candidates(&venue, &book, seed).await, "seed {seed}");

            // Inside orders first, in id order.
            assert_eq!(&ids[..2], &["a1", "b1"][..], "seed {seed}");
            let churn = &ids[2..];
            assert!(churn.len() <= CHURN_MAX, "seed {seed}: {ids:?}");
            let distinct: BTreeSet<_> = churn.iter().collect();
            assert_eq!(distinct.len(), churn.len(), "seed {seed}: {ids:?}");
            assert!(
                churn.iter().all(|id| valid.contains(&id.as_str())),
                "seed {seed}: {ids:?}"
            );
            churned += churn.len();
        }
        assert!(churned > 0);
    }

    #[tokio::test]
    async fn test_cancel_candidates_without_valid_orders() {
        let venue = venue();
        let book = [
            resting("a1", Side::Sell, dec!(100.10)),
            resting("b1", Side::Buy, dec!(99.90)),
        ];
        assert_eq!(candidates(&venue, &book, 2).await, vec!["a1", "b1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_cycle_draws_new_walk() {
        let venue = venue();
        let core = load(&venue, "futures.YWEUSDT", 6).await;
        core.target_quote(true);
        let (first_start, first_walk) = {
            let state = core.state.read();
            (state.cycle_start.unwrap(), state.walk.clone().unwrap())
        };

        time::advance(Duration::from_millis(60_000)).await;
        let before = core.state.read().last_mid;
        let quote = core.target_quote(true);

        let state = core.state.read();
        let start = state.cycle_start.unwrap();
        assert!(start > first_start);
        // Backdated by one tick.
        assert_eq!(Instant::now() - start, Duration::from_millis(100));
        assert_ne!(state.walk.as_ref().unwrap(), &first_walk);
        assert_ne!(quote.mid, before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_interval_keeps_walking() {
        let venue = venue();
        let mut cfg = config("futures.YWEUSDT");
        cfg.interval_ms = 800;
        cfg.delay_ms = 100;
        let core = load_with(&venue, cfg, 12).await;

        let mut mids = Vec::new();
        for _ in 0..20 {
            let quote = core.target_quote(true);
            core.state.write().last_mid = quote.mid;
            mids.push(quote.mid);
            {
                let state = core.state.read();
                let elapsed = elapsed_ms(Instant::now(), state.cycle_start.unwrap());
                assert!(elapsed < state.walk.as_ref().unwrap().duration_ms());
            }
            time::advance(Duration::from_millis(100)).await;
        }
        let distinct: BTreeSet<_> = mids.iter().collect();
        assert!(distinct.len() > 10, "{mids:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_backdate_clamped_below_interval() {
        let venue = venue();
        let mut cfg = config("futures.YWEUSDT");
        cfg.interval_ms = 50;
        cfg.delay_ms = 100;
        let core = load_with(&venue, cfg, 13).await;
        core.target_quote(true);
        let state = core.state.read();
        assert_eq!(elapsed_ms(Instant::now(), state.cycle_start.unwrap()), 49);
    }
}
