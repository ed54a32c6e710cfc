//! Listener capability set for the terminal event stream.

use std::ops::Range;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;

use crate::core::domain::{
    AccountId, AccountInformation, Deal, Order, Position, SymbolPrice, SymbolSpecification,
};

/// Callbacks invoked for each decoded terminal event.
///
/// Every method defaults to a no-op; implementors override only the
/// callbacks they care about. For a given account, callbacks are invoked in
/// the order the packet orderer releases events and are awaited one at a
/// time, so an implementation never observes two of its callbacks running
/// concurrently for the same account.
#[allow(unused_variables)]
#[async_trait]
pub trait SynchronizationListener: Send + Sync {
    /// The terminal authenticated this account's event stream.
    async fn on_connected(&self, account_id: &AccountId) {}

    /// The terminal dropped this account's event stream.
    async fn on_disconnected(&self, account_id: &AccountId) {}

    /// Broker-side connection status changed.
    async fn on_broker_connection_status_changed(&self, account_id: &AccountId, connected: bool) {}

    /// Server-reported health object changed.
    async fn on_server_health_status(&self, account_id: &AccountId, status: &Value) {}

    /// The server began a new synchronization stream.
    async fn on_synchronization_started(&self, account_id: &AccountId, synchronization_id: &str) {}

    async fn on_account_information_updated(
        &self,
        account_id: &AccountId,
        information: &AccountInformation,
    ) {
    }

    async fn on_positions_replaced(&self, account_id: &AccountId, positions: &[Position]) {}

    async fn on_position_updated(&self, account_id: &AccountId, position: &Position) {}

    async fn on_position_removed(&self, account_id: &AccountId, position_id: &str) {}

    async fn on_orders_replaced(&self, account_id: &AccountId, orders: &[Order]) {}

    async fn on_order_updated(&self, account_id: &AccountId, order: &Order) {}

    async fn on_order_completed(&self, account_id: &AccountId, order_id: &str) {}

    async fn on_history_order_added(&self, account_id: &AccountId, order: &Order) {}

    async fn on_deal_added(&self, account_id: &AccountId, deal: &Deal) {}

    async fn on_symbol_specification_updated(
        &self,
        account_id: &AccountId,
        specification: &SymbolSpecification,
    ) {
    }

    /// Prices ticked; the event may carry explicit account metrics that
    /// override locally derived values.
    async fn on_symbol_prices_updated(
        &self,
        account_id: &AccountId,
        prices: &[SymbolPrice],
        equity: Option<Decimal>,
        margin: Option<Decimal>,
        free_margin: Option<Decimal>,
        margin_level: Option<Decimal>,
    ) {
    }

    async fn on_order_synchronization_finished(
        &self,
        account_id: &AccountId,
        synchronization_id: &str,
    ) {
    }

    async fn on_deal_synchronization_finished(
        &self,
        account_id: &AccountId,
        synchronization_id: &str,
    ) {
    }

    /// The packet orderer gave up on a sequence gap; `missing` is the range
    /// of sequence numbers that will never be delivered.
    async fn on_packet_gap(&self, account_id: &AccountId, missing: Range<u64>) {}
}

/// Callback invoked after the shared transport re-establishes its socket.
#[async_trait]
pub trait ReconnectListener: Send + Sync {
    async fn on_reconnected(&self);
}
