//! In-process venue: rests limit orders, keeps balances and holdings, and
//! publishes every change as a [`MatchEvent`].
//!
//! There is no matching. Orders rest until they are canceled or until
//! [`MemoryVenue::fill`] simulates an external counterparty taking them.
//! Events go out on a `tokio::sync::broadcast` channel; consumers subscribe
//! with [`MemoryVenue::subscribe_events`].

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::broadcast;
use tracing::debug;

use crate::engine::{Ledger, MatchingEngine};
use crate::error::{Result, VenueError};
use crate::types::*;

/// Buffered events per subscriber before it starts lagging.
const EVENT_CAPACITY: usize = 1024;

/// Maximum aggregated levels reported per side.
const DEPTH_LEVELS: usize = 20;

type BalanceKey = (i64, BalanceArea, String);

/// Funds reserved by one resting order, released per unit of quantity.
#[derive(Debug, Clone)]
struct Lock {
    key: BalanceKey,
    per_unit: Decimal,
}

#[derive(Debug, Default)]
struct VenueState {
    next_order_id: u64,
    /// Open orders only.
    orders: HashMap<String, Order>,
    locks: HashMap<String, Lock>,
    balances: HashMap<BalanceKey, Balance>,
    holdings: HashMap<(i64, String), Holding>,
}

pub struct MemoryVenue {
    symbols: BTreeMap<String, SymbolInfo>,
    state: Mutex<VenueState>,
    event_tx: broadcast::Sender<MatchEvent>,
}

fn area_of(info: &SymbolInfo) -> BalanceArea {
    if info.is_spot() {
        BalanceArea::Spot
    } else {
        BalanceArea::Futures
    }
}

impl MemoryVenue {
    pub fn new(symbols: impl IntoIterator<Item = SymbolInfo>) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            symbols: symbols
                .into_iter()
                .map(|s| (s.symbol.clone(), s))
                .collect(),
            state: Mutex::new(VenueState::default()),
            event_tx,
        }
    }

    /// Subscribe to the match-event feed.
    pub fn subscribe_events(&self) -> broadcast::Receiver<MatchEvent> {
        self.event_tx.subscribe()
    }

    /// Credit `amount` to the free balance of an asset.
    pub fn deposit(&self, user_id: i64, area: BalanceArea, asset: &str, amount: Decimal) {
        let mut state = self.state.lock();
        let balance = state
            .balances
            .entry((user_id, area, asset.to_string()))
            .or_insert_with(|| Balance::empty(user_id, area, asset));
        balance.free += amount;
    }

    pub fn balance(&self, user_id: i64, area: BalanceArea, asset: &str) -> Option<Balance> {
        self.state
            .lock()
            .balances
            .get(&(user_id, area, asset.to_string()))
            .cloned()
    }

    pub fn holding(&self, user_id: i64, symbol: &str) -> Option<Holding> {
        self.state
            .lock()
            .holdings
            .get(&(user_id, symbol.to_string()))
            .cloned()
    }

    /// Open orders of one account in one symbol, oldest first.
    pub fn open_orders(&self, user_id: i64, symbol: &str) -> Vec<Order> {
        let state = self.state.lock();
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.user_id == user_id && o.symbol == symbol)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.order_id.parse::<u64>().unwrap_or_default());
        orders
    }

    pub fn depth(&self, symbol: &str) -> Depth {
        build_depth(&self.state.lock(), symbol)
    }

    /// Simulate an external taker consuming up to `quantity` of a resting
    /// order at its limit price.
    pub fn fill(&self, order_id: &str, quantity: Decimal) -> Result<Order> {
        let event = {
            let mut state = self.state.lock();
            let mut order = state
                .orders
                .get(order_id)
                .cloned()
                .ok_or_else(|| VenueError::OrderNotFound(order_id.to_string()))?;
            let info = self.symbol(&order.symbol)?;
            let qty = quantity.min(order.remaining());
            if qty <= Decimal::ZERO {
                return Err(VenueError::Rejected(format!("nothing to fill on {order_id}")));
            }

            let mut touched = vec![release(&mut state, order_id, qty)];
            let notional = qty * order.price;
            match (info.is_spot(), order.side) {
                (true, Side::Buy) => {
                    touched.push(credit(&mut state, (order.user_id, BalanceArea::Spot, info.base.clone()), qty));
                    touched.push(debit_locked(&mut state, (order.user_id, BalanceArea::Spot, info.quote.clone()), notional));
                }
                (true, Side::Sell) => {
                    touched.push(debit_locked(&mut state, (order.user_id, BalanceArea::Spot, info.base.clone()), qty));
                    touched.push(credit(&mut state, (order.user_id, BalanceArea::Spot, info.quote.clone()), notional));
                }
                (false, side) => {
                    let holding = state
                        .holdings
                        .entry((order.user_id, order.symbol.clone()))
                        .or_insert_with(|| Holding::empty(order.user_id, &order.symbol));
                    if holding.amount.is_zero() {
                        holding.open = order.price;
                    }
                    match side {
                        Side::Buy => holding.amount += qty,
                        Side::Sell => holding.amount -= qty,
                    }
                }
            }

            order.filled += qty;
            order.update_time = Utc::now();
            if order.remaining().is_zero() {
                order.status = OrderStatus::Done;
                state.orders.remove(order_id);
                state.locks.remove(order_id);
            } else {
                order.status = OrderStatus::Partialled;
                state.orders.insert(order_id.to_string(), order.clone());
            }

            let holdings = state
                .holdings
                .get(&(order.user_id, order.symbol.clone()))
                .cloned()
                .into_iter()
                .collect();
            MatchEvent {
                symbol: order.symbol.clone(),
                depth: build_depth(&state, &order.symbol),
                orders: vec![order],
                balances: touched.into_iter().flatten().collect(),
                holdings,
            }
        };
        let order = event.orders[0].clone();
        debug!(order = %order, "simulated fill");
        let _ = self.event_tx.send(event);
        Ok(order)
    }

    fn symbol(&self, symbol: &str) -> Result<&SymbolInfo> {
        self.symbols
            .get(symbol)
            .ok_or_else(|| VenueError::SymbolNotFound(symbol.to_string()))
    }
}

/// Release the lock of `qty` units of an order back to free balance.
fn release(state: &mut VenueState, order_id: &str, qty: Decimal) -> Option<Balance> {
    let lock = state.locks.get(order_id)?.clone();
    let amount = lock.per_unit * qty;
    let balance = state.balances.get_mut(&lock.key)?;
    balance.locked -= amount;
    balance.free += amount;
    Some(balance.clone())
}

fn credit(state: &mut VenueState, key: BalanceKey, amount: Decimal) -> Option<Balance> {
    let balance = state
        .balances
        .entry(key.clone())
        .or_insert_with(|| Balance::empty(key.0, key.1, &key.2));
    balance.free += amount;
    Some(balance.clone())
}

/// Settle funds that were released from a lock by [`release`].
fn debit_locked(state: &mut VenueState, key: BalanceKey, amount: Decimal) -> Option<Balance> {
    let balance = state.balances.get_mut(&key)?;
    balance.free -= amount;
    Some(balance.clone())
}

fn build_depth(state: &VenueState, symbol: &str) -> Depth {
    let mut asks: BTreeMap<Decimal, Decimal> = BTreeMap::new();
    let mut bids: BTreeMap<Decimal, Decimal> = BTreeMap::new();
    for order in state.orders.values().filter(|o| o.symbol == symbol) {
        let side = match order.side {
            Side::Sell => &mut asks,
            Side::Buy => &mut bids,
        };
        *side.entry(order.price.normalize()).or_default() += order.remaining();
    }
    Depth {
        asks: asks
            .into_iter()
            .take(DEPTH_LEVELS)
            .map(|(p, q)| [p, q])
            .collect(),
        bids: bids
            .into_iter()
            .rev()
            .take(DEPTH_LEVELS)
            .map(|(p, q)| [p, q])
            .collect(),
    }
}

fn check_precision(what: &str, value: Decimal, precision: u32) -> Result<()> {
    if value <= Decimal::ZERO {
        return Err(VenueError::Rejected(format!("{what} must be positive, got {value}")));
    }
    if value.normalize().scale() > precision {
        return Err(VenueError::Rejected(format!(
            "{what} {value} exceeds {precision} decimal places"
        )));
    }
    Ok(())
}

#[async_trait]
impl MatchingEngine for MemoryVenue {
    fn symbols(&self) -> Vec<SymbolInfo> {
        self.symbols.values().cloned().collect()
    }

    fn lookup_symbol(&self, symbol: &str) -> Option<SymbolInfo> {
        self.symbols.get(symbol).cloned()
    }

    async fn place_limit(
        &self,
        user_id: i64,
        symbol: &str,
        side: Side,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<Order> {
        let info = self.symbol(symbol)?;
        check_precision("price", price, info.price_precision)?;
        check_precision("quantity", quantity, info.quantity_precision)?;

        let area = area_of(info);
        let event = {
            let mut state = self.state.lock();
            let (asset, per_unit) = match (info.is_spot(), side) {
                (true, Side::Buy) => (&info.quote, price),
                (true, Side::Sell) => (&info.base, Decimal::ONE),
                (false, _) => {
                    let amount = state
                        .holdings
                        .get(&(user_id, symbol.to_string()))
                        .map(|h| h.amount)
                        .unwrap_or_default();
                    let reducing = match side {
                        Side::Buy => amount <= -quantity,
                        Side::Sell => amount >= quantity,
                    };
                    (&info.quote, if reducing { Decimal::ZERO } else { price })
                }
            };

            let key = (user_id, area, asset.clone());
            let need = per_unit * quantity;
            let balance = state
                .balances
                .entry(key.clone())
                .or_insert_with(|| Balance::empty(user_id, area, asset));
            if balance.free < need {
                return Err(VenueError::InsufficientBalance {
                    asset: asset.clone(),
                    need,
                    free: balance.free,
                });
            }
            balance.free -= need;
            balance.locked += need;
            let balance = balance.clone();

            state.next_order_id += 1;
            let order = Order {
                order_id: state.next_order_id.to_string(),
                user_id,
                symbol: symbol.to_string(),
                side,
                quantity,
                price,
                filled: Decimal::ZERO,
                status: OrderStatus::Pending,
                update_time: Utc::now(),
            };
            state.orders.insert(order.order_id.clone(), order.clone());
            state
                .locks
                .insert(order.order_id.clone(), Lock { key, per_unit });

            MatchEvent {
                symbol: symbol.to_string(),
                depth: build_depth(&state, symbol),
                orders: vec![order],
                balances: vec![balance],
                holdings: Vec::new(),
            }
        };
        let order = event.orders[0].clone();
        debug!(order = %order, "order rested");
        let _ = self.event_tx.send(event);
        Ok(order)
    }

    async fn cancel(&self, user_id: i64, symbol: &str, order_id: &str) -> Result<Order> {
        self.symbol(symbol)?;
        let event = {
            let mut state = self.state.lock();
            let owned = state
                .orders
                .get(order_id)
                .is_some_and(|o| o.user_id == user_id && o.symbol == symbol);
            if !owned {
                return Err(VenueError::OrderNotFound(order_id.to_string()));
            }
            let Some(mut order) = state.orders.remove(order_id) else {
                return Err(VenueError::OrderNotFound(order_id.to_string()));
            };
            let balance = release(&mut state, order_id, order.remaining());
            state.locks.remove(order_id);

            order.status = if order.filled.is_zero() {
                OrderStatus::Canceled
            } else {
                OrderStatus::PartCanceled
            };
            order.update_time = Utc::now();
            MatchEvent {
                symbol: symbol.to_string(),
                depth: build_depth(&state, symbol),
                orders: vec![order],
                balances: balance.into_iter().collect(),
                holdings: Vec::new(),
            }
        };
        let order = event.orders[0].clone();
        debug!(order = %order, "order canceled");
        let _ = self.event_tx.send(event);
        Ok(order)
    }
}

#[async_trait]
impl Ledger for MemoryVenue {
    async fn touch_balance(
        &self,
        user_id: i64,
        area: BalanceArea,
        assets: &[String],
    ) -> Result<()> {
        let mut state = self.state.lock();
        for asset in assets {
            state
                .balances
                .entry((user_id, area, asset.clone()))
                .or_insert_with(|| Balance::empty(user_id, area, asset));
        }
        Ok(())
    }

    async fn list_balances(
        &self,
        user_id: i64,
        area: BalanceArea,
    ) -> Result<HashMap<String, Balance>> {
        let state = self.state.lock();
        Ok(state
            .balances
            .values()
            .filter(|b| b.user_id == user_id && b.area == area)
            .map(|b| (b.asset.clone(), b.clone()))
            .collect())
    }

    async fn touch_holding(&self, user_id: i64, symbols: &[String]) -> Result<()> {
        let mut state = self.state.lock();
        for symbol in symbols {
            state
                .holdings
                .entry((user_id, symbol.clone()))
                .or_insert_with(|| Holding::empty(user_id, symbol));
        }
        Ok(())
    }

    async fn find_holding(&self, user_id: i64, symbol: &str) -> Result<Option<Holding>> {
        Ok(self
            .state
            .lock()
            .holdings
            .get(&(user_id, symbol.to_string()))
            .cloned())
    }
}
