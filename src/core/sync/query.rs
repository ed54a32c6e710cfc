//! Request/response query client.
//!
//! Thin accessors over the transport's request channel: each operation maps
//! to one request frame and extracts its named payload field from the
//! response.

use std::sync::Weak;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::core::domain::{
    Account, AccountInformation, Deal, Order, Position, SymbolPrice, SymbolSpecification,
};
use crate::core::health::Uptime;
use crate::core::transport::MessageTransport;
use crate::error::{Error, Result};

/// Read-side operations bound to one account.
pub struct QueryClient {
    transport: Weak<dyn MessageTransport>,
    account: Account,
}

impl QueryClient {
    pub(crate) fn new(transport: Weak<dyn MessageTransport>, account: Account) -> Self {
        Self { transport, account }
    }

    pub async fn get_account_information(&self) -> Result<AccountInformation> {
        self.fetch(json!({"type": "getAccountInformation"}), "accountInformation")
            .await
    }

    pub async fn get_positions(&self) -> Result<Vec<Position>> {
        self.fetch(json!({"type": "getPositions"}), "positions").await
    }

    pub async fn get_position(&self, position_id: &str) -> Result<Position> {
        self.fetch(
            json!({"type": "getPosition", "positionId": position_id}),
            "position",
        )
        .await
    }

    pub async fn get_orders(&self) -> Result<Vec<Order>> {
        self.fetch(json!({"type": "getOrders"}), "orders").await
    }

    pub async fn get_order(&self, order_id: &str) -> Result<Order> {
        self.fetch(json!({"type": "getOrder", "orderId": order_id}), "order")
            .await
    }

    pub async fn get_history_orders_by_ticket(&self, ticket: &str) -> Result<Vec<Order>> {
        self.fetch(
            json!({"type": "getHistoryOrdersByTicket", "ticket": ticket}),
            "historyOrders",
        )
        .await
    }

    pub async fn get_history_orders_by_position(&self, position_id: &str) -> Result<Vec<Order>> {
        self.fetch(
            json!({"type": "getHistoryOrdersByPosition", "positionId": position_id}),
            "historyOrders",
        )
        .await
    }

    pub async fn get_history_orders_by_time_range(
        &self,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Order>> {
        self.fetch(
            json!({
                "type": "getHistoryOrdersByTimeRange",
                "startTime": start_time.to_rfc3339(),
                "endTime": end_time.to_rfc3339(),
                "offset": offset,
                "limit": limit,
            }),
            "historyOrders",
        )
        .await
    }

    pub async fn get_deals_by_ticket(&self, ticket: &str) -> Result<Vec<Deal>> {
        self.fetch(json!({"type": "getDealsByTicket", "ticket": ticket}), "deals")
            .await
    }

    pub async fn get_deals_by_position(&self, position_id: &str) -> Result<Vec<Deal>> {
        self.fetch(
            json!({"type": "getDealsByPosition", "positionId": position_id}),
            "deals",
        )
        .await
    }

    pub async fn get_deals_by_time_range(
        &self,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Deal>> {
        self.fetch(
            json!({
                "type": "getDealsByTimeRange",
                "startTime": start_time.to_rfc3339(),
                "endTime": end_time.to_rfc3339(),
                "offset": offset,
                "limit": limit,
            }),
            "deals",
        )
        .await
    }

    /// Clear server-side history, optionally for a specific application tag.
    pub async fn remove_history(&self, application: Option<&str>) -> Result<()> {
        let mut frame = json!({"type": "removeHistory"});
        if let Some(application) = application {
            frame["application"] = Value::String(application.to_string());
        }
        self.send(frame).await.map(|_| ())
    }

    /// Remove the application and its stored data from the account.
    pub async fn remove_application(&self) -> Result<()> {
        self.send(json!({"type": "removeApplication"})).await.map(|_| ())
    }

    pub async fn subscribe_to_market_data(&self, symbol: &str) -> Result<()> {
        self.send(json!({"type": "subscribeToMarketData", "symbol": symbol}))
            .await
            .map(|_| ())
    }

    pub async fn unsubscribe_from_market_data(&self, symbol: &str) -> Result<()> {
        self.send(json!({"type": "unsubscribeFromMarketData", "symbol": symbol}))
            .await
            .map(|_| ())
    }

    pub async fn get_symbol_specification(&self, symbol: &str) -> Result<SymbolSpecification> {
        self.fetch(
            json!({"type": "getSymbolSpecification", "symbol": symbol}),
            "specification",
        )
        .await
    }

    pub async fn get_symbol_price(&self, symbol: &str) -> Result<SymbolPrice> {
        self.fetch(json!({"type": "getSymbolPrice", "symbol": symbol}), "price")
            .await
    }

    /// Report measured uptime ratios to the server.
    pub async fn save_uptime(&self, uptime: &Uptime) -> Result<()> {
        self.send(json!({
            "type": "saveUptime",
            "uptime": serde_json::to_value(uptime)?,
        }))
        .await
        .map(|_| ())
    }

    async fn send(&self, mut frame: Value) -> Result<Value> {
        let transport = self.transport.upgrade().ok_or(Error::NotConnected)?;
        frame["application"] = Value::String(self.account.application.clone());
        transport.request(&self.account.id, frame).await
    }

    async fn fetch<T: serde::de::DeserializeOwned>(
        &self,
        frame: Value,
        field: &str,
    ) -> Result<T> {
        let response = self.send(frame).await?;
        let payload = response
            .get(field)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("response field '{field}' missing")))?;
        serde_json::from_value(payload).map_err(Error::from)
    }
}
