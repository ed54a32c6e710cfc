#![allow(dead_code)]

//! Shared builders for integration tests.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use tradelink::core::domain::{
    Account, AccountId, AccountInformation, Deal, Order, Position, SymbolPrice,
    SymbolSpecification,
};
use tradelink::core::health::HealthMonitorConfig;
use tradelink::core::sync::{ConnectionOptions, ConnectionRegistry, RetryOptions};
use tradelink::core::transport::MessageTransport;
use tradelink::testkit::ScriptedTransport;

pub fn account_id() -> AccountId {
    AccountId::from("acct-1")
}

pub fn account() -> Account {
    Account::new("acct-1")
}

/// Connection options with short timers so tests run fast.
pub fn fast_options() -> ConnectionOptions {
    ConnectionOptions {
        status_timeout: Some(Duration::from_millis(200)),
        retry: RetryOptions {
            initial_interval: Duration::from_millis(50),
            max_interval: Duration::from_millis(400),
        },
        health: HealthMonitorConfig {
            sample_period: Duration::from_millis(20),
            quote_freshness: Duration::from_secs(60),
        },
    }
}

/// A scripted transport plus a registry wired to it.
pub fn registry() -> (Arc<ScriptedTransport>, Arc<ConnectionRegistry>) {
    let transport = Arc::new(ScriptedTransport::new());
    let shared: Arc<dyn MessageTransport> = Arc::clone(&transport) as Arc<dyn MessageTransport>;
    let registry = ConnectionRegistry::new(shared, fast_options());
    (transport, registry)
}

pub fn account_information(balance: Decimal, equity: Decimal) -> AccountInformation {
    serde_json::from_value(serde_json::json!({
        "balance": balance,
        "equity": equity,
        "currency": "USD",
        "broker": "Test Broker",
        "server": "Test Server"
    }))
    .unwrap()
}

pub fn buy_position(id: &str, symbol: &str) -> Position {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "symbol": symbol,
        "type": "POSITION_TYPE_BUY",
        "volume": 2,
        "openPrice": 8,
        "currentPrice": 9,
        "currentTickValue": 0.5,
        "profit": 100
    }))
    .unwrap()
}

pub fn specification(symbol: &str) -> SymbolSpecification {
    serde_json::from_value(serde_json::json!({
        "symbol": symbol,
        "tickSize": 0.01,
        "minVolume": 0.01,
        "maxVolume": 100,
        "volumeStep": 0.01,
        "contractSize": 100000,
        "digits": 5
    }))
    .unwrap()
}

pub fn price(symbol: &str) -> SymbolPrice {
    SymbolPrice {
        symbol: symbol.to_string(),
        bid: dec!(10),
        ask: dec!(11),
        profit_tick_value: dec!(0.5),
        loss_tick_value: dec!(0.5),
        account_currency_exchange_rate: None,
        time: None,
        broker_time: None,
    }
}

pub fn pending_order(id: &str, open_price: Decimal) -> Order {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "symbol": "EURUSD",
        "type": "ORDER_TYPE_BUY_LIMIT",
        "state": "ORDER_STATE_PLACED",
        "volume": 1,
        "currentVolume": 1,
        "openPrice": open_price
    }))
    .unwrap()
}

pub fn history_order(id: &str, done_secs: i64) -> Order {
    use chrono::TimeZone;
    serde_json::from_value(serde_json::json!({
        "id": id,
        "symbol": "EURUSD",
        "type": "ORDER_TYPE_BUY",
        "state": "ORDER_STATE_FILLED",
        "volume": 1,
        "openPrice": 10,
        "doneTime": chrono::Utc.timestamp_opt(done_secs, 0).single().unwrap().to_rfc3339()
    }))
    .unwrap()
}

pub fn deal(id: &str, done_secs: i64) -> Deal {
    use chrono::TimeZone;
    serde_json::from_value(serde_json::json!({
        "id": id,
        "type": "DEAL_TYPE_BUY",
        "profit": 5,
        "doneTime": chrono::Utc.timestamp_opt(done_secs, 0).single().unwrap().to_rfc3339()
    }))
    .unwrap()
}

/// Give spawned engine tasks a chance to run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
