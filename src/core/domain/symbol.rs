//! Symbol specification and price types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Trading parameters of a symbol.
///
/// An update from the terminal replaces the prior specification in its
/// entirety; there is no field-level merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolSpecification {
    pub symbol: String,
    pub tick_size: Decimal,
    #[serde(default)]
    pub min_volume: Decimal,
    #[serde(default)]
    pub max_volume: Decimal,
    #[serde(default)]
    pub volume_step: Decimal,
    #[serde(default)]
    pub contract_size: Decimal,
    #[serde(default)]
    pub digits: u32,
    #[serde(default)]
    pub margin_mode: Option<String>,
    /// Quote session schedule, kept opaque.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote_sessions: Option<serde_json::Value>,
    /// Trade session schedule, kept opaque.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trade_sessions: Option<serde_json::Value>,
}

/// Latest quote for a symbol.
///
/// Tick values differ for winning and losing positions, which is why both
/// are carried and the profit derivation picks one by the sign of the move.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolPrice {
    pub symbol: String,
    pub bid: Decimal,
    pub ask: Decimal,
    #[serde(default)]
    pub profit_tick_value: Decimal,
    #[serde(default)]
    pub loss_tick_value: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_currency_exchange_rate: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
    /// Quote time in the broker's timezone, as reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broker_time: Option<String>,
}
