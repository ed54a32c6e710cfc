//! In-memory mirror of the remote terminal's account state.
//!
//! All mutation happens inside synchronization-listener callbacks under a
//! single write lock, so readers observe either the pre- or post-event
//! snapshot and never a partially applied one.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tracing::debug;

use crate::core::domain::{
    AccountId, AccountInformation, Order, Position, PositionType, SymbolPrice,
    SymbolSpecification,
};
use crate::core::sync::SynchronizationListener;

/// Default broker-status watchdog timeout.
pub const DEFAULT_STATUS_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Default)]
struct StateInner {
    connected: bool,
    connected_to_broker: bool,
    /// Bumped on every status signal; lets a stale watchdog timer detect
    /// that a newer signal already re-armed the watchdog.
    status_generation: u64,
    account_information: Option<AccountInformation>,
    positions: HashMap<String, Position>,
    /// Ids removed since the last full replace; late updates for them are
    /// ignored until a replace brings the id back.
    removed_positions: HashSet<String>,
    orders: HashMap<String, Order>,
    /// Completion is terminal until the next full replace.
    completed_orders: HashSet<String>,
    specifications: HashMap<String, SymbolSpecification>,
    prices: HashMap<String, SymbolPrice>,
}

/// Local snapshot of account info, positions, orders, specs and prices.
pub struct TerminalState {
    inner: Arc<RwLock<StateInner>>,
    closed: Arc<AtomicBool>,
    status_timeout: Duration,
}

impl TerminalState {
    #[must_use]
    pub fn new(status_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(StateInner::default())),
            closed: Arc::new(AtomicBool::new(false)),
            status_timeout,
        }
    }

    /// Whether the terminal has authenticated this account's stream.
    #[must_use]
    pub fn connected(&self) -> bool {
        self.inner.read().connected
    }

    /// Whether the terminal reports a live broker session.
    #[must_use]
    pub fn connected_to_broker(&self) -> bool {
        self.inner.read().connected_to_broker
    }

    #[must_use]
    pub fn account_information(&self) -> Option<AccountInformation> {
        self.inner.read().account_information.clone()
    }

    #[must_use]
    pub fn positions(&self) -> Vec<Position> {
        self.inner.read().positions.values().cloned().collect()
    }

    #[must_use]
    pub fn position(&self, id: &str) -> Option<Position> {
        self.inner.read().positions.get(id).cloned()
    }

    #[must_use]
    pub fn orders(&self) -> Vec<Order> {
        self.inner.read().orders.values().cloned().collect()
    }

    #[must_use]
    pub fn order(&self, id: &str) -> Option<Order> {
        self.inner.read().orders.get(id).cloned()
    }

    #[must_use]
    pub fn specification(&self, symbol: &str) -> Option<SymbolSpecification> {
        self.inner.read().specifications.get(symbol).cloned()
    }

    #[must_use]
    pub fn price(&self, symbol: &str) -> Option<SymbolPrice> {
        self.inner.read().prices.get(symbol).cloned()
    }

    /// Stop reacting to watchdog timers; called when the connection closes.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn arm_status_watchdog(&self, generation: u64) {
        let inner = Arc::clone(&self.inner);
        let closed = Arc::clone(&self.closed);
        let timeout = self.status_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if closed.load(Ordering::SeqCst) {
                return;
            }
            let mut state = inner.write();
            if state.status_generation == generation && state.connected_to_broker {
                debug!("Broker status signal overdue, marking broker disconnected");
                state.connected_to_broker = false;
            }
        });
    }
}

fn upsert_position(inner: &mut StateInner, position: &Position) {
    if inner.removed_positions.contains(&position.id) {
        return;
    }
    let mut position = position.clone();
    position.normalize_profits();
    inner.positions.insert(position.id.clone(), position);
}

fn upsert_order(inner: &mut StateInner, order: &Order) {
    if inner.completed_orders.contains(&order.id) {
        return;
    }
    inner.orders.insert(order.id.clone(), order.clone());
}

/// Recompute equity from balance and open-position profits.
fn refresh_equity(inner: &mut StateInner) {
    let profit_total: Decimal = inner.positions.values().map(|p| p.profit).sum();
    if let Some(information) = inner.account_information.as_mut() {
        information.equity = information.balance + profit_total;
    }
}

fn apply_price(inner: &mut StateInner, price: &SymbolPrice) {
    let Some(specification) = inner.specifications.get(&price.symbol) else {
        inner.prices.insert(price.symbol.clone(), price.clone());
        return;
    };
    let tick_size = specification.tick_size;

    if !tick_size.is_zero() {
        for position in inner
            .positions
            .values_mut()
            .filter(|p| p.symbol == price.symbol)
        {
            let new_price = match position.position_type {
                PositionType::Buy => price.bid,
                PositionType::Sell => price.ask,
            };
            let price_change = new_price - position.current_price;
            let ticks = price_change / tick_size;
            let tick_value = if price_change >= Decimal::ZERO {
                price.profit_tick_value
            } else {
                price.loss_tick_value
            };
            let delta = position.position_type.direction() * ticks * tick_value * position.volume;

            position.current_price = new_price;
            position.profit += delta;
            if let Some(unrealized) = position.unrealized_profit {
                position.unrealized_profit = Some(unrealized + delta);
            }
        }
    }

    for order in inner
        .orders
        .values_mut()
        .filter(|o| o.symbol == price.symbol)
    {
        order.current_price = Some(if order.order_type.is_sell() {
            price.bid
        } else {
            price.ask
        });
    }

    inner.prices.insert(price.symbol.clone(), price.clone());
}

#[async_trait]
impl SynchronizationListener for TerminalState {
    async fn on_connected(&self, _account_id: &AccountId) {
        self.inner.write().connected = true;
    }

    async fn on_disconnected(&self, _account_id: &AccountId) {
        let mut inner = self.inner.write();
        inner.connected = false;
        inner.connected_to_broker = false;
    }

    async fn on_broker_connection_status_changed(&self, _account_id: &AccountId, connected: bool) {
        let generation = {
            let mut inner = self.inner.write();
            inner.connected_to_broker = connected;
            inner.status_generation += 1;
            inner.status_generation
        };
        // Without a fresh status signal inside the timeout the broker link
        // is considered lost.
        self.arm_status_watchdog(generation);
    }

    async fn on_account_information_updated(
        &self,
        _account_id: &AccountId,
        information: &AccountInformation,
    ) {
        self.inner.write().account_information = Some(information.clone());
    }

    async fn on_positions_replaced(&self, _account_id: &AccountId, positions: &[Position]) {
        let mut inner = self.inner.write();
        inner.positions.clear();
        inner.removed_positions.clear();
        for position in positions {
            let mut position = position.clone();
            position.normalize_profits();
            inner.positions.insert(position.id.clone(), position);
        }
    }

    async fn on_position_updated(&self, _account_id: &AccountId, position: &Position) {
        upsert_position(&mut self.inner.write(), position);
    }

    async fn on_position_removed(&self, _account_id: &AccountId, position_id: &str) {
        let mut inner = self.inner.write();
        inner.positions.remove(position_id);
        inner.removed_positions.insert(position_id.to_string());
    }

    async fn on_orders_replaced(&self, _account_id: &AccountId, orders: &[Order]) {
        let mut inner = self.inner.write();
        inner.orders.clear();
        inner.completed_orders.clear();
        for order in orders {
            inner.orders.insert(order.id.clone(), order.clone());
        }
    }

    async fn on_order_updated(&self, _account_id: &AccountId, order: &Order) {
        upsert_order(&mut self.inner.write(), order);
    }

    async fn on_order_completed(&self, _account_id: &AccountId, order_id: &str) {
        let mut inner = self.inner.write();
        inner.orders.remove(order_id);
        inner.completed_orders.insert(order_id.to_string());
    }

    async fn on_symbol_specification_updated(
        &self,
        _account_id: &AccountId,
        specification: &SymbolSpecification,
    ) {
        self.inner
            .write()
            .specifications
            .insert(specification.symbol.clone(), specification.clone());
    }

    async fn on_symbol_prices_updated(
        &self,
        _account_id: &AccountId,
        prices: &[SymbolPrice],
        equity: Option<Decimal>,
        margin: Option<Decimal>,
        free_margin: Option<Decimal>,
        margin_level: Option<Decimal>,
    ) {
        let mut inner = self.inner.write();
        for price in prices {
            apply_price(&mut inner, price);
        }
        refresh_equity(&mut inner);

        // Explicit metrics reported with the tick override the derived ones.
        if let Some(information) = inner.account_information.as_mut() {
            if let Some(equity) = equity {
                information.equity = equity;
            }
            if let Some(margin) = margin {
                information.margin = margin;
            }
            if let Some(free_margin) = free_margin {
                information.free_margin = free_margin;
            }
            if let Some(margin_level) = margin_level {
                information.margin_level = Some(margin_level);
            }
        }
    }
}
