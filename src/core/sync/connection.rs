//! Per-account connection and synchronization engine.
//!
//! A [`TerminalConnection`] owns the terminal state mirror, the history
//! storage and the health monitor for one account, registers itself as the
//! account's event listener on the shared transport, and drives the
//! synchronization state machine: initial sync on connect, retry with
//! backoff on failure, resubscription and resync on reconnects and lost
//! packets, and orderly teardown on close.

use std::collections::{BTreeSet, HashSet};
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::listener::{ReconnectListener, SynchronizationListener};
use super::query::QueryClient;
use super::registry::ConnectionRegistry;
use super::trade::TradeClient;
use crate::core::domain::{
    Account, AccountId, AccountInformation, Deal, Order, Position, SymbolPrice,
    SymbolSpecification,
};
use crate::core::health::{HealthMonitor, HealthMonitorConfig};
use crate::core::state::TerminalState;
use crate::core::store::HistoryStorage;
use crate::core::transport::MessageTransport;
use crate::error::{Error, Result};

/// Synchronization retry backoff bounds.
#[derive(Debug, Clone)]
pub struct RetryOptions {
    pub initial_interval: Duration,
    pub max_interval: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(300),
        }
    }
}

/// Tunables applied to each connection the registry builds.
#[derive(Debug, Clone, Default)]
pub struct ConnectionOptions {
    pub status_timeout: Option<Duration>,
    pub retry: RetryOptions,
    pub health: HealthMonitorConfig,
}

/// Options of [`TerminalConnection::wait_synchronized`].
#[derive(Debug, Clone)]
pub struct SynchronizationOptions {
    /// Specific synchronization to wait for; defaults to the most recent one.
    pub synchronization_id: Option<String>,
    /// Server-side application pattern; derived from the account application
    /// when absent.
    pub application_pattern: Option<String>,
    pub timeout_in_seconds: u64,
    pub interval_in_milliseconds: u64,
}

impl Default for SynchronizationOptions {
    fn default() -> Self {
        Self {
            synchronization_id: None,
            application_pattern: None,
            timeout_in_seconds: 300,
            interval_in_milliseconds: 1000,
        }
    }
}

/// Synchronization bookkeeping guarded by one mutex.
#[derive(Default)]
struct SyncState {
    /// Key of the engine's current synchronization intent. A retry loop only
    /// keeps running while its own key is still the active one.
    should_synchronize: Option<String>,
    /// Set once the synchronize request flow completed for the active key.
    synchronized: bool,
    last_synchronization_id: Option<String>,
    last_disconnected_synchronization_id: Option<String>,
    orders_synced: HashSet<String>,
    deals_synced: HashSet<String>,
    /// Events are only applied between `synchronizationStarted` and the next
    /// disconnect.
    stream_active: bool,
}

/// Live connection to one account on the remote terminal.
pub struct TerminalConnection {
    account: Account,
    transport: Weak<dyn MessageTransport>,
    registry: Weak<ConnectionRegistry>,
    state: Arc<TerminalState>,
    history: Arc<dyn HistoryStorage>,
    health: Arc<HealthMonitor>,
    trade: TradeClient,
    query: QueryClient,
    history_start_time: Option<DateTime<Utc>>,
    subscriptions: RwLock<BTreeSet<String>>,
    sync: Mutex<SyncState>,
    closed: AtomicBool,
    retry: RetryOptions,
    /// Weak self-handle so listener callbacks can spawn engine tasks.
    self_ref: Weak<TerminalConnection>,
}

impl TerminalConnection {
    pub(crate) fn new(
        account: Account,
        transport: &Arc<dyn MessageTransport>,
        registry: Weak<ConnectionRegistry>,
        history: Arc<dyn HistoryStorage>,
        history_start_time: Option<DateTime<Utc>>,
        options: &ConnectionOptions,
    ) -> Arc<Self> {
        let state = Arc::new(TerminalState::new(
            options
                .status_timeout
                .unwrap_or(crate::core::state::DEFAULT_STATUS_TIMEOUT),
        ));
        let health = Arc::new(HealthMonitor::new(
            Arc::clone(&state),
            options.health.clone(),
        ));
        Arc::new_cyclic(|self_ref| Self {
            trade: TradeClient::new(Arc::downgrade(transport), account.clone()),
            query: QueryClient::new(Arc::downgrade(transport), account.clone()),
            transport: Arc::downgrade(transport),
            registry,
            state,
            history,
            health,
            history_start_time,
            subscriptions: RwLock::new(BTreeSet::new()),
            sync: Mutex::new(SyncState::default()),
            closed: AtomicBool::new(false),
            retry: options.retry.clone(),
            self_ref: self_ref.clone(),
            account,
        })
    }

    /// The account this connection serves.
    #[must_use]
    pub fn account(&self) -> &Account {
        &self.account
    }

    /// Local mirror of the terminal state.
    #[must_use]
    pub fn terminal_state(&self) -> &Arc<TerminalState> {
        &self.state
    }

    /// Order/deal history storage owned by this connection.
    #[must_use]
    pub fn history_storage(&self) -> &Arc<dyn HistoryStorage> {
        &self.history
    }

    /// Connection health monitor.
    #[must_use]
    pub fn health_monitor(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    /// Trade request client.
    #[must_use]
    pub fn trade(&self) -> &TradeClient {
        &self.trade
    }

    /// Request/response query client.
    #[must_use]
    pub fn query(&self) -> &QueryClient {
        &self.query
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Register this connection as the account's listener and start the
    /// health monitor. Called once by the registry during setup.
    pub(crate) fn initialize(self: &Arc<Self>) -> Result<()> {
        let transport = self.transport()?;
        let concrete: Arc<Self> = Arc::clone(self);
        let sync_arc: Arc<dyn SynchronizationListener> = concrete.clone();
        let sync_listener: Weak<dyn SynchronizationListener> = Arc::downgrade(&sync_arc);
        transport.add_synchronization_listener(self.account.id.clone(), sync_listener);
        let reconnect_arc: Arc<dyn ReconnectListener> = concrete.clone();
        let reconnect_listener: Weak<dyn ReconnectListener> = Arc::downgrade(&reconnect_arc);
        transport.add_reconnect_listener(reconnect_listener);
        self.health.start();
        Ok(())
    }

    /// Ask the server to start streaming this account's events.
    ///
    /// # Errors
    ///
    /// Propagates the transport error; the registry treats a failed
    /// subscribe as a failed connection setup.
    pub(crate) async fn subscribe(&self) -> Result<()> {
        let transport = self.transport()?;
        transport
            .request(
                &self.account.id,
                json!({
                    "type": "subscribe",
                    "application": self.account.application,
                }),
            )
            .await?;
        Ok(())
    }

    /// Subscribe to streaming prices for a symbol.
    ///
    /// The symbol is remembered and re-subscribed automatically after
    /// reconnects and resynchronizations.
    pub async fn subscribe_to_market_data(&self, symbol: &str) -> Result<()> {
        self.subscriptions.write().insert(symbol.to_string());
        self.query.subscribe_to_market_data(symbol).await
    }

    /// Stop streaming prices for a symbol and forget it.
    pub async fn unsubscribe_from_market_data(&self, symbol: &str) -> Result<()> {
        self.subscriptions.write().remove(symbol);
        self.query.unsubscribe_from_market_data(symbol).await
    }

    /// Symbols currently subscribed for market data.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.read().iter().cloned().collect()
    }

    /// Clear server-side history for an application and reset local storage.
    pub async fn remove_history(&self, application: Option<&str>) -> Result<()> {
        self.query.remove_history(application).await?;
        self.history.reset().await
    }

    /// Remove the application from the account and reset local storage.
    pub async fn remove_application(&self) -> Result<()> {
        self.query.remove_application().await?;
        self.history.reset().await
    }

    /// Whether the synchronization identified by `synchronization_id` (or
    /// the most recent one) has seen both of its completion signals.
    #[must_use]
    pub fn is_synchronized(&self, synchronization_id: Option<&str>) -> bool {
        let sync = self.sync.lock();
        let id = synchronization_id
            .map(str::to_string)
            .or_else(|| sync.last_synchronization_id.clone())
            .or_else(|| sync.last_disconnected_synchronization_id.clone());
        match id {
            Some(id) => sync.orders_synced.contains(&id) && sync.deals_synced.contains(&id),
            None => false,
        }
    }

    /// Wait until the terminal state is synchronized, then perform the
    /// server-side synchronization handshake.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Timeout`] when the deadline passes first and
    /// [`Error::ConnectionClosed`] when the connection closes while waiting.
    pub async fn wait_synchronized(&self, options: SynchronizationOptions) -> Result<()> {
        let deadline = Instant::now() + Duration::from_secs(options.timeout_in_seconds);
        let interval = Duration::from_millis(options.interval_in_milliseconds.max(1));

        loop {
            if self.is_closed() {
                return Err(Error::ConnectionClosed);
            }
            if self.is_synchronized(options.synchronization_id.as_deref()) {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout("synchronization"));
            }
            sleep(interval.min(deadline - now)).await;
        }

        let application_pattern = options.application_pattern.clone().unwrap_or_else(|| {
            if self.account.application == "CopyFactory" {
                "CopyFactory.*|RPC".to_string()
            } else {
                "RPC".to_string()
            }
        });
        let remaining = deadline
            .saturating_duration_since(Instant::now())
            .as_secs()
            .max(1);
        let transport = self.transport()?;
        transport
            .request(
                &self.account.id,
                json!({
                    "type": "waitSynchronized",
                    "application": self.account.application,
                    "applicationPattern": application_pattern,
                    "timeoutInSeconds": remaining,
                }),
            )
            .await?;
        Ok(())
    }

    /// Close the connection: stop retries and timers, drop listener
    /// registrations, fail outstanding requests and leave the registry.
    ///
    /// The shared transport itself stays up for other connections.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(account_id = %self.account.id, "Closing connection");
        {
            let mut sync = self.sync.lock();
            sync.should_synchronize = None;
            sync.synchronized = false;
            sync.stream_active = false;
        }
        if let Some(transport) = self.transport.upgrade() {
            let unsubscribe = transport
                .request(
                    &self.account.id,
                    json!({
                        "type": "unsubscribe",
                        "application": self.account.application,
                    }),
                )
                .await;
            if let Err(e) = unsubscribe {
                debug!(account_id = %self.account.id, error = %e, "Unsubscribe on close failed");
            }
            transport.remove_synchronization_listeners(&self.account.id);
            transport.cancel_account_requests(&self.account.id);
        }
        self.state.shutdown();
        self.health.stop();
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.account.id);
        }
    }

    fn transport(&self) -> Result<Arc<dyn MessageTransport>> {
        self.transport.upgrade().ok_or(Error::NotConnected)
    }

    /// Whether the retry loop owning `key` is still the active one.
    fn should_continue(&self, key: &str) -> bool {
        !self.is_closed() && self.sync.lock().should_synchronize.as_deref() == Some(key)
    }

    /// Begin a fresh synchronization attempt, superseding any running one.
    fn start_synchronization(self: &Arc<Self>) {
        let key = Uuid::new_v4().to_string();
        {
            let mut sync = self.sync.lock();
            sync.should_synchronize = Some(key.clone());
            sync.synchronized = false;
        }
        let connection = Arc::clone(self);
        tokio::spawn(async move {
            connection.synchronize_loop(key).await;
        });
    }

    async fn synchronize_loop(&self, key: String) {
        let mut retry_interval = self.retry.initial_interval;
        loop {
            if !self.should_continue(&key) {
                return;
            }
            match self.synchronize_once().await {
                Ok(synchronization_id) => {
                    let mut sync = self.sync.lock();
                    if sync.should_synchronize.as_deref() == Some(key.as_str()) {
                        sync.synchronized = true;
                    }
                    debug!(
                        account_id = %self.account.id,
                        synchronization_id = %synchronization_id,
                        "Synchronization request flow completed"
                    );
                    return;
                }
                Err(e) => {
                    warn!(
                        account_id = %self.account.id,
                        error = %e,
                        retry_in_secs = retry_interval.as_secs(),
                        "Synchronization attempt failed"
                    );
                    if !self.should_continue(&key) {
                        return;
                    }
                    sleep(retry_interval).await;
                    retry_interval = next_retry_interval(retry_interval, self.retry.max_interval);
                }
            }
        }
    }

    /// One synchronization attempt: request the incremental sync, then
    /// re-apply every recorded market-data subscription.
    async fn synchronize_once(&self) -> Result<String> {
        let transport = self.transport()?;
        let synchronization_id = Uuid::new_v4().to_string();
        {
            self.sync.lock().last_synchronization_id = Some(synchronization_id.clone());
        }

        let mut starting_history_order_time = self.history.last_history_order_time().await;
        let mut starting_deal_time = self.history.last_deal_time().await;
        if let Some(configured) = self.history_start_time {
            starting_history_order_time = starting_history_order_time.max(configured);
            starting_deal_time = starting_deal_time.max(configured);
        }

        transport
            .request(
                &self.account.id,
                json!({
                    "type": "synchronize",
                    "application": self.account.application,
                    "synchronizationId": synchronization_id,
                    "startingHistoryOrderTime": starting_history_order_time.to_rfc3339(),
                    "startingDealTime": starting_deal_time.to_rfc3339(),
                }),
            )
            .await?;

        // Re-entrant: a failed symbol does not abort the rest.
        for symbol in self.subscriptions() {
            if let Err(e) = self.query.subscribe_to_market_data(&symbol).await {
                warn!(
                    account_id = %self.account.id,
                    symbol = %symbol,
                    error = %e,
                    "Market data resubscription failed"
                );
            }
        }
        Ok(synchronization_id)
    }

    fn stream_active(&self) -> bool {
        self.sync.lock().stream_active
    }
}

#[async_trait]
impl SynchronizationListener for TerminalConnection {
    async fn on_connected(&self, account_id: &AccountId) {
        info!(account_id = %account_id, "Terminal stream authenticated");
        self.state.on_connected(account_id).await;
        if let Some(connection) = self.self_ref.upgrade() {
            connection.start_synchronization();
        }
    }

    async fn on_disconnected(&self, account_id: &AccountId) {
        info!(account_id = %account_id, "Terminal stream dropped");
        {
            let mut sync = self.sync.lock();
            sync.last_disconnected_synchronization_id = sync.last_synchronization_id.take();
            sync.should_synchronize = None;
            sync.synchronized = false;
            sync.stream_active = false;
        }
        self.state.on_disconnected(account_id).await;
    }

    async fn on_broker_connection_status_changed(&self, account_id: &AccountId, connected: bool) {
        self.state
            .on_broker_connection_status_changed(account_id, connected)
            .await;
    }

    async fn on_server_health_status(&self, account_id: &AccountId, status: &Value) {
        self.health.on_server_health_status(account_id, status).await;
    }

    async fn on_synchronization_started(&self, account_id: &AccountId, synchronization_id: &str) {
        debug!(
            account_id = %account_id,
            synchronization_id = %synchronization_id,
            "Synchronization stream started"
        );
        self.sync.lock().stream_active = true;
    }

    async fn on_account_information_updated(
        &self,
        account_id: &AccountId,
        information: &AccountInformation,
    ) {
        if !self.stream_active() {
            return;
        }
        self.state
            .on_account_information_updated(account_id, information)
            .await;
    }

    async fn on_positions_replaced(&self, account_id: &AccountId, positions: &[Position]) {
        if !self.stream_active() {
            return;
        }
        self.state.on_positions_replaced(account_id, positions).await;
    }

    async fn on_position_updated(&self, account_id: &AccountId, position: &Position) {
        if !self.stream_active() {
            return;
        }
        self.state.on_position_updated(account_id, position).await;
    }

    async fn on_position_removed(&self, account_id: &AccountId, position_id: &str) {
        if !self.stream_active() {
            return;
        }
        self.state.on_position_removed(account_id, position_id).await;
    }

    async fn on_orders_replaced(&self, account_id: &AccountId, orders: &[Order]) {
        if !self.stream_active() {
            return;
        }
        self.state.on_orders_replaced(account_id, orders).await;
    }

    async fn on_order_updated(&self, account_id: &AccountId, order: &Order) {
        if !self.stream_active() {
            return;
        }
        self.state.on_order_updated(account_id, order).await;
    }

    async fn on_order_completed(&self, account_id: &AccountId, order_id: &str) {
        if !self.stream_active() {
            return;
        }
        self.state.on_order_completed(account_id, order_id).await;
    }

    async fn on_history_order_added(&self, account_id: &AccountId, order: &Order) {
        if !self.stream_active() {
            return;
        }
        if let Err(e) = self.history.on_history_order_added(order).await {
            warn!(account_id = %account_id, error = %e, "Failed to store history order");
        }
    }

    async fn on_deal_added(&self, account_id: &AccountId, deal: &Deal) {
        if !self.stream_active() {
            return;
        }
        if let Err(e) = self.history.on_deal_added(deal).await {
            warn!(account_id = %account_id, error = %e, "Failed to store deal");
        }
    }

    async fn on_symbol_specification_updated(
        &self,
        account_id: &AccountId,
        specification: &SymbolSpecification,
    ) {
        if !self.stream_active() {
            return;
        }
        self.state
            .on_symbol_specification_updated(account_id, specification)
            .await;
    }

    async fn on_symbol_prices_updated(
        &self,
        account_id: &AccountId,
        prices: &[SymbolPrice],
        equity: Option<Decimal>,
        margin: Option<Decimal>,
        free_margin: Option<Decimal>,
        margin_level: Option<Decimal>,
    ) {
        if !self.stream_active() {
            return;
        }
        self.state
            .on_symbol_prices_updated(account_id, prices, equity, margin, free_margin, margin_level)
            .await;
        self.health
            .on_symbol_prices_updated(account_id, prices, equity, margin, free_margin, margin_level)
            .await;
    }

    async fn on_order_synchronization_finished(
        &self,
        account_id: &AccountId,
        synchronization_id: &str,
    ) {
        debug!(account_id = %account_id, synchronization_id = %synchronization_id, "Orders synchronized");
        self.sync
            .lock()
            .orders_synced
            .insert(synchronization_id.to_string());
    }

    async fn on_deal_synchronization_finished(
        &self,
        account_id: &AccountId,
        synchronization_id: &str,
    ) {
        debug!(account_id = %account_id, synchronization_id = %synchronization_id, "Deals synchronized");
        self.sync
            .lock()
            .deals_synced
            .insert(synchronization_id.to_string());
        if let Err(e) = self.history.update_storage().await {
            warn!(account_id = %account_id, error = %e, "Failed to commit history storage");
        }
    }

    async fn on_packet_gap(&self, account_id: &AccountId, missing: Range<u64>) {
        warn!(
            account_id = %account_id,
            missing_from = missing.start,
            missing_to = missing.end,
            "Events lost, resynchronizing"
        );
        if let Some(connection) = self.self_ref.upgrade() {
            if !connection.is_closed() {
                connection.start_synchronization();
            }
        }
    }
}

#[async_trait]
impl ReconnectListener for TerminalConnection {
    async fn on_reconnected(&self) {
        if self.is_closed() {
            return;
        }
        info!(account_id = %self.account.id, "Transport reconnected, resubscribing");
        if let Err(e) = self.subscribe().await {
            warn!(account_id = %self.account.id, error = %e, "Resubscribe after reconnect failed");
        }
    }
}

/// Grows the retry interval: strict doubling with an upper bound.
fn next_retry_interval(current: Duration, max: Duration) -> Duration {
    (current * 2).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_interval_doubles_and_caps() {
        let max = Duration::from_secs(300);
        let mut interval = Duration::from_secs(1);
        let mut observed = Vec::new();
        for _ in 0..10 {
            observed.push(interval.as_secs());
            interval = next_retry_interval(interval, max);
        }
        assert_eq!(observed, vec![1, 2, 4, 8, 16, 32, 64, 128, 256, 300]);
        assert_eq!(next_retry_interval(interval, max), max);
    }
}
