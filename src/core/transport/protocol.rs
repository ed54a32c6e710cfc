//! Wire frames and event decoding.
//!
//! Every frame on the socket is a JSON object carrying a `type`. Requests
//! are correlated to responses by a client-assigned `requestId`; events carry
//! an `accountId` and, when part of the ordered stream, a per-account
//! `sequenceNumber`.

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::core::domain::{
    AccountId, AccountInformation, Deal, Order, Position, SymbolPrice, SymbolSpecification,
};
use crate::error::{Error, Result};

/// A decoded frame as it arrives off the socket.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPacket {
    #[serde(rename = "type")]
    pub packet_type: String,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub sequence_number: Option<u64>,
    /// Remaining payload fields, interpreted per packet type.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl RawPacket {
    /// Whether this frame completes a pending request.
    #[must_use]
    pub fn is_response(&self) -> bool {
        matches!(self.packet_type.as_str(), "response" | "error")
    }

    fn field(&self, name: &str) -> Value {
        self.payload.get(name).cloned().unwrap_or(Value::Null)
    }

    fn decode_field<T: serde::de::DeserializeOwned>(&self, name: &str) -> Result<T> {
        serde_json::from_value(self.field(name)).map_err(Error::from)
    }

    fn string_field(&self, name: &str) -> Result<String> {
        self.payload
            .get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                Error::Validation(format!(
                    "packet '{}' is missing field '{name}'",
                    self.packet_type
                ))
            })
    }

    fn decimal_field(&self, name: &str) -> Option<Decimal> {
        self.payload
            .get(name)
            .cloned()
            .and_then(|value| serde_json::from_value(value).ok())
    }
}

/// A typed terminal event, decoded from a [`RawPacket`].
#[derive(Debug, Clone)]
pub enum TerminalEvent {
    Connected,
    Disconnected,
    AccountInformation(AccountInformation),
    PositionsReplaced(Vec<Position>),
    PositionRemoved(String),
    OrdersReplaced(Vec<Order>),
    OrderCompleted(String),
    /// Combined incremental update; sections are applied in declaration order.
    Update {
        account_information: Option<AccountInformation>,
        updated_positions: Vec<Position>,
        removed_position_ids: Vec<String>,
        updated_orders: Vec<Order>,
        completed_order_ids: Vec<String>,
        history_orders: Vec<Order>,
        deals: Vec<Deal>,
    },
    HistoryOrders(Vec<Order>),
    Deals(Vec<Deal>),
    SymbolSpecifications(Vec<SymbolSpecification>),
    Prices {
        prices: Vec<SymbolPrice>,
        equity: Option<Decimal>,
        margin: Option<Decimal>,
        free_margin: Option<Decimal>,
        margin_level: Option<Decimal>,
    },
    SynchronizationStarted {
        synchronization_id: String,
    },
    OrderSynchronizationFinished {
        synchronization_id: String,
    },
    DealSynchronizationFinished {
        synchronization_id: String,
    },
    BrokerConnectionStatus(bool),
    ServerHealthStatus(Value),
}

fn optional_section<T: serde::de::DeserializeOwned>(
    packet: &RawPacket,
    name: &str,
) -> Result<Option<T>> {
    match packet.payload.get(name) {
        Some(Value::Null) | None => Ok(None),
        Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
    }
}

fn list_section<T: serde::de::DeserializeOwned>(packet: &RawPacket, name: &str) -> Result<Vec<T>> {
    match packet.payload.get(name) {
        Some(Value::Null) | None => Ok(Vec::new()),
        Some(value) => Ok(serde_json::from_value(value.clone())?),
    }
}

/// Decode an event packet into its typed form.
///
/// Returns `Ok(None)` for packet types the SDK does not consume so the
/// caller can skip them without treating that as a protocol violation.
///
/// # Errors
///
/// Returns a validation or JSON error when a known packet type carries a
/// malformed payload; the caller logs and drops the frame.
pub fn decode_event(packet: &RawPacket) -> Result<Option<TerminalEvent>> {
    let event = match packet.packet_type.as_str() {
        "authenticated" => TerminalEvent::Connected,
        "disconnected" => TerminalEvent::Disconnected,
        "accountInformation" => {
            TerminalEvent::AccountInformation(packet.decode_field("accountInformation")?)
        }
        "positions" => TerminalEvent::PositionsReplaced(list_section(packet, "positions")?),
        "orders" => TerminalEvent::OrdersReplaced(list_section(packet, "orders")?),
        "update" => TerminalEvent::Update {
            account_information: optional_section(packet, "accountInformation")?,
            updated_positions: list_section(packet, "updatedPositions")?,
            removed_position_ids: list_section(packet, "removedPositionIds")?,
            updated_orders: list_section(packet, "updatedOrders")?,
            completed_order_ids: list_section(packet, "completedOrderIds")?,
            history_orders: list_section(packet, "historyOrders")?,
            deals: list_section(packet, "deals")?,
        },
        "positionRemoved" => TerminalEvent::PositionRemoved(packet.string_field("positionId")?),
        "orderCompleted" => TerminalEvent::OrderCompleted(packet.string_field("orderId")?),
        "historyOrders" => TerminalEvent::HistoryOrders(list_section(packet, "historyOrders")?),
        "deals" => TerminalEvent::Deals(list_section(packet, "deals")?),
        "symbolSpecifications" => {
            TerminalEvent::SymbolSpecifications(list_section(packet, "specifications")?)
        }
        "prices" => TerminalEvent::Prices {
            prices: list_section(packet, "prices")?,
            equity: packet.decimal_field("equity"),
            margin: packet.decimal_field("margin"),
            free_margin: packet.decimal_field("freeMargin"),
            margin_level: packet.decimal_field("marginLevel"),
        },
        "synchronizationStarted" => TerminalEvent::SynchronizationStarted {
            synchronization_id: packet.string_field("synchronizationId")?,
        },
        "orderSynchronizationFinished" => TerminalEvent::OrderSynchronizationFinished {
            synchronization_id: packet.string_field("synchronizationId")?,
        },
        "dealSynchronizationFinished" => TerminalEvent::DealSynchronizationFinished {
            synchronization_id: packet.string_field("synchronizationId")?,
        },
        "status" => TerminalEvent::BrokerConnectionStatus(
            packet
                .payload
                .get("connected")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        ),
        "serverHealthStatus" => TerminalEvent::ServerHealthStatus(packet.field("healthStatus")),
        _ => return Ok(None),
    };
    Ok(Some(event))
}

/// Map a server error frame onto the matching [`Error`] kind.
#[must_use]
pub fn map_server_error(packet: &RawPacket) -> Error {
    let name = packet
        .payload
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("InternalError");
    let message = packet
        .payload
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown server error")
        .to_string();

    match name {
        "ValidationError" => Error::Validation(message),
        "NotFoundError" => Error::NotFound(message),
        "UnauthorizedError" => Error::Unauthorized(message),
        "TooManyRequestsError" => Error::TooManyRequests {
            message,
            retry_after_seconds: packet
                .payload
                .get("retryAfterSeconds")
                .and_then(Value::as_u64),
        },
        _ => Error::Internal(message),
    }
}

/// Extract the account id of an event packet, if present.
#[must_use]
pub fn packet_account_id(packet: &RawPacket) -> Option<AccountId> {
    packet.account_id.as_deref().map(AccountId::from)
}
