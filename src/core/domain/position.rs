//! Open position types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionType {
    #[serde(rename = "POSITION_TYPE_BUY")]
    Buy,
    #[serde(rename = "POSITION_TYPE_SELL")]
    Sell,
}

impl PositionType {
    /// Sign applied to tick-value profit derivation: +1 for buys, -1 for sells.
    #[must_use]
    pub fn direction(self) -> Decimal {
        match self {
            Self::Buy => Decimal::ONE,
            Self::Sell => Decimal::NEGATIVE_ONE,
        }
    }
}

/// An open exposure on the account.
///
/// `profit` and `unrealized_profit` are kept current locally by price updates
/// between terminal snapshots. A position missing `unrealized_profit` on the
/// wire is normalized on ingestion so both fields track together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub id: String,
    pub symbol: String,
    #[serde(rename = "type")]
    pub position_type: PositionType,
    pub volume: Decimal,
    pub open_price: Decimal,
    #[serde(default)]
    pub current_price: Decimal,
    #[serde(default)]
    pub current_tick_value: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<Decimal>,
    #[serde(default)]
    pub profit: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unrealized_profit: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realized_profit: Option<Decimal>,
    #[serde(default)]
    pub swap: Decimal,
    #[serde(default)]
    pub commission: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub magic: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default)]
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_comment: Option<String>,
}

impl Position {
    /// Fill in the profit-tracking fields the wire may omit.
    ///
    /// When the terminal does not report `unrealized_profit` the whole
    /// reported `profit` is treated as unrealized and `realized_profit`
    /// starts at zero.
    pub fn normalize_profits(&mut self) {
        if self.unrealized_profit.is_none() {
            self.unrealized_profit = Some(self.profit);
        }
        if self.realized_profit.is_none() {
            self.realized_profit = Some(Decimal::ZERO);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_direction_sign() {
        assert_eq!(PositionType::Buy.direction(), dec!(1));
        assert_eq!(PositionType::Sell.direction(), dec!(-1));
    }

    #[test]
    fn test_normalize_profits_fills_missing_fields() {
        let mut position: Position = serde_json::from_value(serde_json::json!({
            "id": "1",
            "symbol": "EURUSD",
            "type": "POSITION_TYPE_BUY",
            "volume": 2,
            "openPrice": 8,
            "currentPrice": 9,
            "profit": 100
        }))
        .unwrap();

        position.normalize_profits();
        assert_eq!(position.unrealized_profit, Some(dec!(100)));
        assert_eq!(position.realized_profit, Some(dec!(0)));

        // Already-populated fields are left alone.
        position.profit = dec!(500);
        position.normalize_profits();
        assert_eq!(position.unrealized_profit, Some(dec!(100)));
    }
}
