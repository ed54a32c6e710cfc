//! Deal (executed transaction) types.
//!
//! History orders reuse [`Order`](super::Order); deals get their own record
//! since they carry execution rather than instruction fields.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Kind of an executed deal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DealType {
    #[serde(rename = "DEAL_TYPE_BUY")]
    Buy,
    #[serde(rename = "DEAL_TYPE_SELL")]
    Sell,
    #[serde(rename = "DEAL_TYPE_BALANCE")]
    Balance,
    #[serde(rename = "DEAL_TYPE_CREDIT")]
    Credit,
    #[serde(other)]
    Unknown,
}

/// An executed transaction recorded in account history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deal {
    pub id: String,
    #[serde(rename = "type")]
    pub deal_type: DealType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub profit: Decimal,
    #[serde(default)]
    pub swap: Decimal,
    #[serde(default)]
    pub commission: Decimal,
    #[serde(default)]
    pub magic: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
    /// Server-assigned completion time; drives the history watermark.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done_time: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_deal_type_tolerated() {
        let deal: Deal = serde_json::from_value(serde_json::json!({
            "id": "d-1",
            "type": "DEAL_TYPE_CORRECTION"
        }))
        .unwrap();
        assert_eq!(deal.deal_type, DealType::Unknown);
    }
}
