//! Trade request construction and response types.
//!
//! Option structs merge into a [`TradeRequest`] through explicit
//! [`apply_to`](MarketTradeOptions::apply_to) builders; there is no runtime
//! field discovery.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::order::{ExpirationType, FillingMode};
use crate::error::TradeErrorInfo;

/// Action requested from the terminal's trade endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionType {
    #[serde(rename = "ORDER_TYPE_BUY")]
    MarketBuy,
    #[serde(rename = "ORDER_TYPE_SELL")]
    MarketSell,
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
    #[serde(rename = "POSITION_MODIFY")]
    PositionModify,
    #[serde(rename = "POSITION_PARTIAL")]
    PositionPartial,
    #[serde(rename = "POSITION_CLOSE_ID")]
    PositionClose,
    #[serde(rename = "POSITION_CLOSE_BY")]
    PositionCloseBy,
    #[serde(rename = "POSITIONS_CLOSE_SYMBOL")]
    PositionsCloseSymbol,
    #[serde(rename = "ORDER_MODIFY")]
    OrderModify,
    #[serde(rename = "ORDER_CANCEL")]
    OrderCancel,
}

/// A typed trade request sent to the terminal.
///
/// Only the fields relevant to the chosen [`ActionType`] are populated;
/// absent fields are omitted from the wire frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeRequest {
    pub action_type: ActionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_price: Option<Decimal>,
    /// Limit price of a stop-limit order; the stop trigger goes in `open_price`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_limit_price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_by_position_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub magic: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slippage: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filling_mode: Option<FillingMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration_type: Option<ExpirationType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration_time: Option<DateTime<Utc>>,
}

impl TradeRequest {
    /// Create an empty request for the given action.
    #[must_use]
    pub fn new(action_type: ActionType) -> Self {
        Self {
            action_type,
            symbol: None,
            volume: None,
            open_price: None,
            stop_limit_price: None,
            stop_loss: None,
            take_profit: None,
            order_id: None,
            position_id: None,
            close_by_position_id: None,
            comment: None,
            client_id: None,
            magic: None,
            slippage: None,
            filling_mode: None,
            expiration_type: None,
            expiration_time: None,
        }
    }
}

/// Options recognized on market and close orders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarketTradeOptions {
    /// Free-text tag returned with the trade response.
    pub comment: Option<String>,
    /// Echoed in future events for client-side correlation.
    pub client_id: Option<String>,
    /// Overrides the connection-level magic.
    pub magic: Option<i64>,
    /// Maximum allowed slippage in price points.
    pub slippage: Option<u64>,
    pub filling_mode: Option<FillingMode>,
}

impl MarketTradeOptions {
    /// Merge these options into a trade request.
    pub fn apply_to(&self, request: &mut TradeRequest) {
        if self.comment.is_some() {
            request.comment = self.comment.clone();
        }
        if self.client_id.is_some() {
            request.client_id = self.client_id.clone();
        }
        if self.magic.is_some() {
            request.magic = self.magic;
        }
        if self.slippage.is_some() {
            request.slippage = self.slippage;
        }
        if self.filling_mode.is_some() {
            request.filling_mode = self.filling_mode;
        }
    }
}

/// Options recognized on pending orders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingTradeOptions {
    pub comment: Option<String>,
    pub client_id: Option<String>,
    pub magic: Option<i64>,
    pub expiration_type: Option<ExpirationType>,
    pub expiration_time: Option<DateTime<Utc>>,
}

impl PendingTradeOptions {
    /// Merge these options into a trade request.
    pub fn apply_to(&self, request: &mut TradeRequest) {
        if self.comment.is_some() {
            request.comment = self.comment.clone();
        }
        if self.client_id.is_some() {
            request.client_id = self.client_id.clone();
        }
        if self.magic.is_some() {
            request.magic = self.magic;
        }
        if self.expiration_type.is_some() {
            request.expiration_type = self.expiration_type;
        }
        if self.expiration_time.is_some() {
            request.expiration_time = self.expiration_time;
        }
    }
}

/// Server trade return codes accepted as success.
const SUCCESS_RETCODES: [i64; 3] = [10008, 10009, 10025];

/// Outcome of a trade request as reported by the terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeResponse {
    pub numeric_code: i64,
    pub string_code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_id: Option<String>,
}

impl TradeResponse {
    /// Whether the return code indicates the trade was accepted.
    #[must_use]
    pub fn is_success(&self) -> bool {
        SUCCESS_RETCODES.contains(&self.numeric_code)
    }

    /// Convert a failed response into its error payload.
    #[must_use]
    pub fn to_error(&self) -> TradeErrorInfo {
        TradeErrorInfo {
            numeric_code: self.numeric_code,
            string_code: self.string_code.clone(),
            message: self.message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_market_options_merge() {
        let mut request = TradeRequest::new(ActionType::MarketBuy);
        request.symbol = Some("EURUSD".into());
        request.volume = Some(dec!(0.1));
        request.magic = Some(1);

        let options = MarketTradeOptions {
            comment: Some("scalp".into()),
            magic: Some(42),
            slippage: Some(3),
            ..Default::default()
        };
        options.apply_to(&mut request);

        assert_eq!(request.comment.as_deref(), Some("scalp"));
        assert_eq!(request.magic, Some(42));
        assert_eq!(request.slippage, Some(3));
        // Unset options leave request fields untouched.
        assert!(request.client_id.is_none());
    }

    #[test]
    fn test_request_serializes_without_absent_fields() {
        let request = TradeRequest::new(ActionType::OrderCancel);
        let value = serde_json::to_value(&request).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.get("actionType").unwrap(), "ORDER_CANCEL");
        assert!(!object.contains_key("symbol"));
        assert!(!object.contains_key("volume"));
    }

    #[test]
    fn test_success_codes() {
        let mut response = TradeResponse {
            numeric_code: 10009,
            string_code: "TRADE_RETCODE_DONE".into(),
            message: "done".into(),
            order_id: Some("1".into()),
            position_id: None,
        };
        assert!(response.is_success());

        response.numeric_code = 10019;
        response.string_code = "TRADE_RETCODE_NO_MONEY".into();
        assert!(!response.is_success());
        let err = response.to_error();
        assert_eq!(err.numeric_code, 10019);
        assert_eq!(err.string_code, "TRADE_RETCODE_NO_MONEY");
    }
}
