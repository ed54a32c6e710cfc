//! Pending order and history order types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Kind of a pending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    #[serde(rename = "ORDER_TYPE_BUY_LIMIT")]
    BuyLimit,
    #[serde(rename = "ORDER_TYPE_SELL_LIMIT")]
    SellLimit,
    #[serde(rename = "ORDER_TYPE_BUY_STOP")]
    BuyStop,
    #[serde(rename = "ORDER_TYPE_SELL_STOP")]
    SellStop,
    #[serde(rename = "ORDER_TYPE_BUY_STOP_LIMIT")]
    BuyStopLimit,
    #[serde(rename = "ORDER_TYPE_SELL_STOP_LIMIT")]
    SellStopLimit,
    /// Market orders only appear in history records.
    #[serde(rename = "ORDER_TYPE_BUY")]
    Buy,
    #[serde(rename = "ORDER_TYPE_SELL")]
    Sell,
}

impl OrderType {
    /// Whether this is a sell-side order, used to pick bid over ask when
    /// refreshing the order's current price.
    #[must_use]
    pub fn is_sell(self) -> bool {
        matches!(
            self,
            Self::Sell | Self::SellLimit | Self::SellStop | Self::SellStopLimit
        )
    }
}

/// Lifecycle state of an order as reported by the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderState {
    #[serde(rename = "ORDER_STATE_STARTED")]
    Started,
    #[serde(rename = "ORDER_STATE_PLACED")]
    Placed,
    #[serde(rename = "ORDER_STATE_CANCELED")]
    Canceled,
    #[serde(rename = "ORDER_STATE_PARTIAL")]
    Partial,
    #[serde(rename = "ORDER_STATE_FILLED")]
    Filled,
    #[serde(rename = "ORDER_STATE_REJECTED")]
    Rejected,
    #[serde(rename = "ORDER_STATE_EXPIRED")]
    Expired,
    #[serde(other)]
    Unknown,
}

/// Expiration policy of a pending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpirationType {
    #[serde(rename = "ORDER_TIME_GTC")]
    Gtc,
    #[serde(rename = "ORDER_TIME_DAY")]
    Day,
    #[serde(rename = "ORDER_TIME_SPECIFIED")]
    Specified,
    #[serde(rename = "ORDER_TIME_SPECIFIED_DAY")]
    SpecifiedDay,
}

/// Order filling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FillingMode {
    #[serde(rename = "ORDER_FILLING_FOK")]
    Fok,
    #[serde(rename = "ORDER_FILLING_IOC")]
    Ioc,
    #[serde(rename = "ORDER_FILLING_RETURN")]
    Return,
}

/// A pending instruction on the account, or a completed order in history.
///
/// History records carry `done_time`, the server-assigned completion time
/// used as the incremental-synchronization watermark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub symbol: String,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    #[serde(default = "OrderState::placed")]
    pub state: OrderState,
    pub volume: Decimal,
    #[serde(default)]
    pub current_volume: Decimal,
    #[serde(default)]
    pub open_price: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_type: Option<ExpirationType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filling_mode: Option<FillingMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub magic: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

impl OrderState {
    fn placed() -> Self {
        Self::Placed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_sell_covers_sell_side_variants() {
        assert!(OrderType::SellLimit.is_sell());
        assert!(OrderType::SellStop.is_sell());
        assert!(OrderType::SellStopLimit.is_sell());
        assert!(!OrderType::BuyLimit.is_sell());
        assert!(!OrderType::BuyStopLimit.is_sell());
    }

    #[test]
    fn test_unknown_order_state_tolerated() {
        let order: Order = serde_json::from_value(serde_json::json!({
            "id": "1",
            "symbol": "EURUSD",
            "type": "ORDER_TYPE_BUY_LIMIT",
            "state": "ORDER_STATE_SOMETHING_NEW",
            "volume": 1,
            "openPrice": 10
        }))
        .unwrap();
        assert_eq!(order.state, OrderState::Unknown);
    }
}
