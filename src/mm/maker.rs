//! Per-symbol maker: trading state, the timer and event loops, and match
//! event reconciliation.
//!
//! Two tokio tasks drive a running [`Maker`]:
//!
//! - the **timer loop** calls `proc_make(true)` every `delay_ms` and is
//!   owned by a [`CancellationToken`] recreated on every update;
//! - the **event loop** waits on a capacity-1 channel fed by
//!   [`Maker::on_matched`] and calls `proc_make(false)` per notification.
//!
//! All trading state sits behind one `parking_lot::RwLock` that is never
//! held across an `.await`. Quote cycles are serialized by a separate async
//! mutex, so the two loops never run `proc_make` at the same time.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rust_decimal::{Decimal, RoundingStrategy};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use venue::{
    Balance, BalanceArea, Depth, Holding, Ledger, MatchEvent, MatchingEngine, Order, OrderStatus,
    SymbolInfo,
};

use crate::error::{MakerError, Result};
use crate::mm::config::MakerConfig;
use crate::mm::walk::PriceWalk;

/// Exchange services a maker trades against.
#[derive(Clone)]
pub struct MakerServices {
    pub engine: Arc<dyn MatchingEngine>,
    pub ledger: Arc<dyn Ledger>,
}

impl MakerServices {
    pub fn new(engine: Arc<dyn MatchingEngine>, ledger: Arc<dyn Ledger>) -> Self {
        Self { engine, ledger }
    }
}

/// Message on the event-loop channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Notify {
    Matched,
    Shutdown,
}

/// Most recently computed quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetQuote {
    pub mid: Decimal,
    pub ask: Decimal,
    pub bid: Decimal,
}

/// Read-only view of a maker for status reporting.
#[derive(Debug, Clone)]
pub struct MakerSnapshot {
    pub symbol: String,
    pub user_id: i64,
    pub delay_ms: u64,
    pub open_orders: usize,
    /// Outstanding quantity per price level.
    pub pending: BTreeMap<Decimal, Decimal>,
    pub balances: Vec<Balance>,
    pub holding: Option<Holding>,
    pub last_mid: Decimal,
    pub quote: Option<TargetQuote>,
}

pub(crate) struct MakerState {
    pub config: MakerConfig,
    /// Orders believed open, by order id.
    pub orders: BTreeMap<String, Order>,
    /// Net outstanding quantity per price level.
    pub pending: BTreeMap<Decimal, Decimal>,
    /// Balance snapshots by asset.
    pub balances: HashMap<String, Balance>,
    pub holding: Option<Holding>,
    pub depth: Depth,
    /// `None` until the first quote starts a cycle.
    pub cycle_start: Option<Instant>,
    pub walk: Option<PriceWalk>,
    pub last_mid: Decimal,
    pub quote: Option<TargetQuote>,
}

/// Shared state of one maker, referenced by both loops.
pub(crate) struct MakerCore {
    pub symbol: SymbolInfo,
    pub state: RwLock<MakerState>,
    pub rng: Mutex<StdRng>,
    pub services: MakerServices,
    /// Held for the duration of one quote cycle.
    pub making: tokio::sync::Mutex<()>,
    notify_tx: mpsc::Sender<Notify>,
}

impl MakerCore {
    /// Validate `config`, resolve the symbol and load the account's
    /// balances (and holding, for derivatives).
    pub async fn load(
        config: MakerConfig,
        services: MakerServices,
        rng: StdRng,
    ) -> Result<(Arc<Self>, mpsc::Receiver<Notify>)> {
        config.validate()?;
        let symbol = services
            .engine
            .lookup_symbol(&config.symbol)
            .ok_or_else(|| MakerError::SymbolNotFound(config.symbol.clone()))?;

        let user_id = config.user_id;
        let ledger = &services.ledger;
        let (balances, holding) = if symbol.is_spot() {
            let assets = [symbol.base.clone(), symbol.quote.clone()];
            ledger
                .touch_balance(user_id, BalanceArea::Spot, &assets)
                .await?;
            (ledger.list_balances(user_id, BalanceArea::Spot).await?, None)
        } else {
            ledger
                .touch_balance(user_id, BalanceArea::Futures, &[symbol.quote.clone()])
                .await?;
            ledger
                .touch_holding(user_id, &[symbol.symbol.clone()])
                .await?;
            let balances = ledger.list_balances(user_id, BalanceArea::Futures).await?;
            let holding = ledger.find_holding(user_id, &symbol.symbol).await?;
            (balances, holding)
        };

        let (notify_tx, notify_rx) = mpsc::channel(1);
        let core = Self {
            state: RwLock::new(MakerState {
                last_mid: config.open,
                config,
                orders: BTreeMap::new(),
                pending: BTreeMap::new(),
                balances,
                holding,
                depth: Depth::default(),
                cycle_start: None,
                walk: None,
                quote: None,
            }),
            symbol,
            rng: Mutex::new(rng),
            services,
            making: tokio::sync::Mutex::new(()),
            notify_tx,
        };
        Ok((Arc::new(core), notify_rx))
    }

    pub fn area(&self) -> BalanceArea {
        if self.symbol.is_spot() {
            BalanceArea::Spot
        } else {
            BalanceArea::Futures
        }
    }

    /// Reconcile state from one match-event batch, then wake the event
    /// loop. Never blocks on the loops.
    pub fn on_matched(&self, event: &MatchEvent) {
        if event.symbol != self.symbol.symbol {
            return;
        }
        {
            let mut guard = self.state.write();
            let state = &mut *guard;
            let user_id = state.config.user_id;

            for order in &event.orders {
                if order.user_id != user_id
                    || order.symbol != self.symbol.symbol
                    || order.price <= Decimal::ZERO
                {
                    continue;
                }
                match order.status {
                    OrderStatus::Pending => {
                        *state.pending.entry(order.price).or_default() += order.quantity;
                        state.orders.insert(order.order_id.clone(), order.clone());
                    }
                    OrderStatus::Partialled => {
                        if let Some(prev) = state.orders.get(&order.order_id) {
                            let filled = order.filled - prev.filled;
                            *state.pending.entry(order.price).or_default() -= filled;
                        }
                        state.orders.insert(order.order_id.clone(), order.clone());
                    }
                    OrderStatus::Done | OrderStatus::Canceled | OrderStatus::PartCanceled => {
                        if let Some(prev) = state.orders.remove(&order.order_id) {
                            let filled = order.filled - prev.filled;
                            *state.pending.entry(order.price).or_default() -=
                                filled + order.remaining();
                        }
                        if state
                            .pending
                            .get(&order.price)
                            .is_some_and(|qty| *qty <= Decimal::ZERO)
                        {
                            state.pending.remove(&order.price);
                        }
                    }
                }
            }

            let area = self.area();
            for balance in &event.balances {
                if balance.user_id == user_id && balance.area == area {
                    state.balances.insert(balance.asset.clone(), balance.clone());
                }
            }
            for holding in &event.holdings {
                if holding.user_id == user_id && holding.symbol == self.symbol.symbol {
                    state.holding = Some(holding.clone());
                }
            }

            state.depth = event.depth.clone();
            if let (Some(ask), Some(bid)) = (state.depth.best_ask(), state.depth.best_bid()) {
                state.last_mid = ((ask + bid) / Decimal::TWO).round_dp_with_strategy(
                    self.symbol.price_precision,
                    RoundingStrategy::MidpointAwayFromZero,
                );
            }
        }
        // Full means a wake-up is already queued.
        let _ = self.notify_tx.try_send(Notify::Matched);
    }

    pub fn snapshot(&self) -> MakerSnapshot {
        let state = self.state.read();
        let mut balances: Vec<Balance> = state.balances.values().cloned().collect();
        balances.sort_by(|a, b| a.asset.cmp(&b.asset));
        MakerSnapshot {
            symbol: self.symbol.symbol.clone(),
            user_id: state.config.user_id,
            delay_ms: state.config.delay_ms,
            open_orders: state.orders.len(),
            pending: state.pending.clone(),
            balances,
            holding: state.holding.clone(),
            last_mid: state.last_mid,
            quote: state.quote,
        }
    }

    fn delay(&self) -> Duration {
        Duration::from_millis(self.state.read().config.delay_ms)
    }
}

// ---------------------------------------------------------------------------
// Loops
// ---------------------------------------------------------------------------

struct TimerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl TimerHandle {
    fn spawn(core: Arc<MakerCore>) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(timer_loop(core, cancel.clone()));
        Self { cancel, task }
    }

    async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "timer loop ended abnormally");
        }
    }
}

async fn timer_loop(core: Arc<MakerCore>, cancel: CancellationToken) {
    let delay = core.delay();
    let mut ticker = time::interval_at(Instant::now() + delay, delay);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(symbol = %core.symbol.symbol, delay_ms = delay.as_millis() as u64, "timer loop started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                core.proc_make(true).await;
            }
        }
    }
    debug!(symbol = %core.symbol.symbol, "timer loop stopped");
}

async fn event_loop(core: Arc<MakerCore>, mut notify_rx: mpsc::Receiver<Notify>) {
    debug!(symbol = %core.symbol.symbol, "event loop started");
    while let Some(Notify::Matched) = notify_rx.recv().await {
        core.proc_make(false).await;
    }
    debug!(symbol = %core.symbol.symbol, "event loop stopped");
}

// ---------------------------------------------------------------------------
// Maker
// ---------------------------------------------------------------------------

/// A running maker for one symbol.
pub struct Maker {
    core: Arc<MakerCore>,
    timer: tokio::sync::Mutex<Option<TimerHandle>>,
    events: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Maker {
    /// Load state for `config` and launch both loops.
    ///
    /// Returns once the loops are spawned. Nothing is spawned on error.
    pub async fn start(config: MakerConfig, services: MakerServices, rng: StdRng) -> Result<Self> {
        let (core, notify_rx) = MakerCore::load(config, services, rng).await?;
        let events = tokio::spawn(event_loop(Arc::clone(&core), notify_rx));
        let timer = TimerHandle::spawn(Arc::clone(&core));
        {
            let state = core.state.read();
            info!(
                symbol = %core.symbol.symbol,
                user_id = state.config.user_id,
                delay_ms = state.config.delay_ms,
                interval_ms = state.config.interval_ms,
                open = %state.config.open,
                "MAKER START"
            );
        }
        Ok(Self {
            core,
            timer: tokio::sync::Mutex::new(Some(timer)),
            events: tokio::sync::Mutex::new(Some(events)),
        })
    }

    pub fn symbol(&self) -> &str {
        &self.core.symbol.symbol
    }

    pub fn symbol_info(&self) -> &SymbolInfo {
        &self.core.symbol
    }

    pub fn config(&self) -> MakerConfig {
        self.core.state.read().config.clone()
    }

    pub fn snapshot(&self) -> MakerSnapshot {
        self.core.snapshot()
    }

    /// Feed one match-event batch into the maker.
    pub fn on_matched(&self, event: &MatchEvent) {
        self.core.on_matched(event);
    }

    /// Stop the timer loop, then the event loop, waiting for each.
    ///
    /// Returns whether anything was running; a second call is a no-op.
    pub async fn stop(&self) -> bool {
        let mut stopped = false;
        if let Some(timer) = self.timer.lock().await.take() {
            timer.shutdown().await;
            stopped = true;
        }
        if let Some(events) = self.events.lock().await.take() {
            // Queued behind at most one pending wake-up.
            let _ = self.core.notify_tx.send(Notify::Shutdown).await;
            if let Err(e) = events.await {
                warn!(error = %e, "event loop ended abnormally");
            }
            stopped = true;
        }
        if stopped {
            info!(symbol = %self.core.symbol.symbol, "MAKER STOP");
        }
        stopped
    }

    /// Swap the config and restart only the timer loop. Orders, balances
    /// and the current cycle carry over.
    pub async fn update(&self, config: MakerConfig) -> Result<()> {
        config.validate()?;
        if self.events.lock().await.is_none() {
            return Err(MakerError::NotRunning(self.core.symbol.symbol.clone()));
        }
        let mut timer = self.timer.lock().await;
        if let Some(old) = timer.take() {
            old.shutdown().await;
        }
        let delay_ms = config.delay_ms;
        self.core.state.write().config = config;
        *timer = Some(TimerHandle::spawn(Arc::clone(&self.core)));
        info!(symbol = %self.core.symbol.symbol, delay_ms, "MAKER UPDATE");
        Ok(())
    }
}
