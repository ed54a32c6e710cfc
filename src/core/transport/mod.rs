//! Framed bidirectional message channel to the terminal server.
//!
//! The transport multiplexes request/response pairs and the per-account
//! event stream over one persistent socket. Inbound stream packets pass
//! through the [`PacketOrderer`] so listeners always observe events in
//! sequence order.

mod orderer;
mod protocol;
mod socket;

use std::sync::Weak;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::domain::AccountId;
use crate::core::sync::{ReconnectListener, SynchronizationListener};
use crate::error::Result;

pub use orderer::{Ordered, PacketOrderer, DEFAULT_BUFFER_CAPACITY, DEFAULT_OUT_OF_ORDER_TIMEOUT};
pub use protocol::{decode_event, map_server_error, packet_account_id, RawPacket, TerminalEvent};
pub use socket::WebSocketTransport;

/// Tunables of the transport layer.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Deadline for a request/response round trip.
    pub request_timeout: Duration,
    /// Deadline for the initial socket connect.
    pub connect_timeout: Duration,
    /// How long the orderer waits on a sequence gap before promoting it.
    pub packet_ordering_timeout: Duration,
    /// First reconnect delay after a socket loss.
    pub reconnect_initial_delay: Duration,
    /// Upper bound on the reconnect delay.
    pub reconnect_max_delay: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(60),
            packet_ordering_timeout: DEFAULT_OUT_OF_ORDER_TIMEOUT,
            reconnect_initial_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(60),
        }
    }
}

/// Bidirectional message channel shared by every connection on a host.
///
/// Listener registrations hold weak references: dropping a connection is
/// enough to stop event delivery to it, and `close` on the connection only
/// removes registrations rather than tearing the transport down.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Send a request frame for the account and await the matching response.
    ///
    /// `request` must be a JSON object; the transport assigns the
    /// correlation id and account id fields.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Timeout`](crate::Error::Timeout) when the deadline
    /// elapses while connected, [`Error::NotConnected`](crate::Error::NotConnected)
    /// when it elapses while the channel is down, and the mapped server error
    /// kind when the server answers with an error frame.
    async fn request(&self, account_id: &AccountId, request: Value) -> Result<Value>;

    /// Register an event listener for an account.
    fn add_synchronization_listener(
        &self,
        account_id: AccountId,
        listener: Weak<dyn SynchronizationListener>,
    );

    /// Drop every event listener registered for an account.
    fn remove_synchronization_listeners(&self, account_id: &AccountId);

    /// Register a listener invoked after the socket is re-established.
    fn add_reconnect_listener(&self, listener: Weak<dyn ReconnectListener>);

    /// Fail this account's outstanding request futures with `ConnectionClosed`.
    fn cancel_account_requests(&self, account_id: &AccountId);

    /// Whether the channel currently has a live socket.
    fn is_connected(&self) -> bool;
}

/// Invoke the listener callback matching a decoded event.
///
/// Compound update events fan out into per-entity callbacks here so every
/// transport implementation (including test doubles) delivers them in the
/// same order.
pub async fn deliver(
    listener: &dyn SynchronizationListener,
    account_id: &AccountId,
    event: &TerminalEvent,
) {
    match event {
        TerminalEvent::Connected => listener.on_connected(account_id).await,
        TerminalEvent::Disconnected => listener.on_disconnected(account_id).await,
        TerminalEvent::AccountInformation(information) => {
            listener
                .on_account_information_updated(account_id, information)
                .await;
        }
        TerminalEvent::PositionsReplaced(positions) => {
            listener.on_positions_replaced(account_id, positions).await;
        }
        TerminalEvent::PositionRemoved(position_id) => {
            listener.on_position_removed(account_id, position_id).await;
        }
        TerminalEvent::OrdersReplaced(orders) => {
            listener.on_orders_replaced(account_id, orders).await;
        }
        TerminalEvent::OrderCompleted(order_id) => {
            listener.on_order_completed(account_id, order_id).await;
        }
        TerminalEvent::Update {
            account_information,
            updated_positions,
            removed_position_ids,
            updated_orders,
            completed_order_ids,
            history_orders,
            deals,
        } => {
            if let Some(information) = account_information {
                listener
                    .on_account_information_updated(account_id, information)
                    .await;
            }
            for position in updated_positions {
                listener.on_position_updated(account_id, position).await;
            }
            for position_id in removed_position_ids {
                listener.on_position_removed(account_id, position_id).await;
            }
            for order in updated_orders {
                listener.on_order_updated(account_id, order).await;
            }
            for order_id in completed_order_ids {
                listener.on_order_completed(account_id, order_id).await;
            }
            for order in history_orders {
                listener.on_history_order_added(account_id, order).await;
            }
            for deal in deals {
                listener.on_deal_added(account_id, deal).await;
            }
        }
        TerminalEvent::HistoryOrders(orders) => {
            for order in orders {
                listener.on_history_order_added(account_id, order).await;
            }
        }
        TerminalEvent::Deals(deals) => {
            for deal in deals {
                listener.on_deal_added(account_id, deal).await;
            }
        }
        TerminalEvent::SymbolSpecifications(specifications) => {
            for specification in specifications {
                listener
                    .on_symbol_specification_updated(account_id, specification)
                    .await;
            }
        }
        TerminalEvent::Prices {
            prices,
            equity,
            margin,
            free_margin,
            margin_level,
        } => {
            listener
                .on_symbol_prices_updated(
                    account_id,
                    prices,
                    *equity,
                    *margin,
                    *free_margin,
                    *margin_level,
                )
                .await;
        }
        TerminalEvent::SynchronizationStarted { synchronization_id } => {
            listener
                .on_synchronization_started(account_id, synchronization_id)
                .await;
        }
        TerminalEvent::OrderSynchronizationFinished { synchronization_id } => {
            listener
                .on_order_synchronization_finished(account_id, synchronization_id)
                .await;
        }
        TerminalEvent::DealSynchronizationFinished { synchronization_id } => {
            listener
                .on_deal_synchronization_finished(account_id, synchronization_id)
                .await;
        }
        TerminalEvent::BrokerConnectionStatus(connected) => {
            listener
                .on_broker_connection_status_changed(account_id, *connected)
                .await;
        }
        TerminalEvent::ServerHealthStatus(status) => {
            listener.on_server_health_status(account_id, status).await;
        }
    }
}
