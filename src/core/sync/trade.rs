//! Trade request client.
//!
//! Each call builds a typed [`TradeRequest`], merges the caller's option
//! struct through its `apply_to` builder and submits it as one `trade`
//! request. Trade calls are never implicitly retried; a failure return code
//! surfaces as [`Error::Trade`].

use std::sync::Weak;

use rust_decimal::Decimal;
use serde_json::Value;
use tracing::debug;

use crate::core::domain::{
    Account, ActionType, MarketTradeOptions, PendingTradeOptions, TradeRequest, TradeResponse,
};
use crate::core::transport::MessageTransport;
use crate::error::{Error, Result};

/// Builds and submits trade requests for one account.
pub struct TradeClient {
    transport: Weak<dyn MessageTransport>,
    account: Account,
}

impl TradeClient {
    pub(crate) fn new(transport: Weak<dyn MessageTransport>, account: Account) -> Self {
        Self { transport, account }
    }

    /// Open a market buy position.
    pub async fn create_market_buy_order(
        &self,
        symbol: &str,
        volume: Decimal,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
        options: &MarketTradeOptions,
    ) -> Result<TradeResponse> {
        let mut request = self.market_request(ActionType::MarketBuy, symbol, volume);
        request.stop_loss = stop_loss;
        request.take_profit = take_profit;
        options.apply_to(&mut request);
        self.execute(request).await
    }

    /// Open a market sell position.
    pub async fn create_market_sell_order(
        &self,
        symbol: &str,
        volume: Decimal,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
        options: &MarketTradeOptions,
    ) -> Result<TradeResponse> {
        let mut request = self.market_request(ActionType::MarketSell, symbol, volume);
        request.stop_loss = stop_loss;
        request.take_profit = take_profit;
        options.apply_to(&mut request);
        self.execute(request).await
    }

    /// Place a buy limit order.
    pub async fn create_limit_buy_order(
        &self,
        symbol: &str,
        volume: Decimal,
        open_price: Decimal,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
        options: &PendingTradeOptions,
    ) -> Result<TradeResponse> {
        self.pending_order(
            ActionType::BuyLimit,
            symbol,
            volume,
            open_price,
            None,
            stop_loss,
            take_profit,
            options,
        )
        .await
    }

    /// Place a sell limit order.
    pub async fn create_limit_sell_order(
        &self,
        symbol: &str,
        volume: Decimal,
        open_price: Decimal,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
        options: &PendingTradeOptions,
    ) -> Result<TradeResponse> {
        self.pending_order(
            ActionType::SellLimit,
            symbol,
            volume,
            open_price,
            None,
            stop_loss,
            take_profit,
            options,
        )
        .await
    }

    /// Place a buy stop order.
    pub async fn create_stop_buy_order(
        &self,
        symbol: &str,
        volume: Decimal,
        open_price: Decimal,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
        options: &PendingTradeOptions,
    ) -> Result<TradeResponse> {
        self.pending_order(
            ActionType::BuyStop,
            symbol,
            volume,
            open_price,
            None,
            stop_loss,
            take_profit,
            options,
        )
        .await
    }

    /// Place a sell stop order.
    pub async fn create_stop_sell_order(
        &self,
        symbol: &str,
        volume: Decimal,
        open_price: Decimal,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
        options: &PendingTradeOptions,
    ) -> Result<TradeResponse> {
        self.pending_order(
            ActionType::SellStop,
            symbol,
            volume,
            open_price,
            None,
            stop_loss,
            take_profit,
            options,
        )
        .await
    }

    /// Place a buy stop-limit order: `open_price` is the stop trigger,
    /// `stop_limit_price` the limit once triggered.
    pub async fn create_stop_limit_buy_order(
        &self,
        symbol: &str,
        volume: Decimal,
        open_price: Decimal,
        stop_limit_price: Decimal,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
        options: &PendingTradeOptions,
    ) -> Result<TradeResponse> {
        self.pending_order(
            ActionType::BuyStopLimit,
            symbol,
            volume,
            open_price,
            Some(stop_limit_price),
            stop_loss,
            take_profit,
            options,
        )
        .await
    }

    /// Place a sell stop-limit order.
    pub async fn create_stop_limit_sell_order(
        &self,
        symbol: &str,
        volume: Decimal,
        open_price: Decimal,
        stop_limit_price: Decimal,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
        options: &PendingTradeOptions,
    ) -> Result<TradeResponse> {
        self.pending_order(
            ActionType::SellStopLimit,
            symbol,
            volume,
            open_price,
            Some(stop_limit_price),
            stop_loss,
            take_profit,
            options,
        )
        .await
    }

    /// Change the protection levels of an open position.
    pub async fn modify_position(
        &self,
        position_id: &str,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
    ) -> Result<TradeResponse> {
        let mut request = TradeRequest::new(ActionType::PositionModify);
        request.position_id = Some(position_id.to_string());
        request.stop_loss = stop_loss;
        request.take_profit = take_profit;
        self.execute(request).await
    }

    /// Close part of an open position.
    pub async fn close_position_partially(
        &self,
        position_id: &str,
        volume: Decimal,
        options: &MarketTradeOptions,
    ) -> Result<TradeResponse> {
        let mut request = TradeRequest::new(ActionType::PositionPartial);
        request.position_id = Some(position_id.to_string());
        request.volume = Some(volume);
        options.apply_to(&mut request);
        self.execute(request).await
    }

    /// Close an open position in full.
    pub async fn close_position(
        &self,
        position_id: &str,
        options: &MarketTradeOptions,
    ) -> Result<TradeResponse> {
        let mut request = TradeRequest::new(ActionType::PositionClose);
        request.position_id = Some(position_id.to_string());
        options.apply_to(&mut request);
        self.execute(request).await
    }

    /// Close a position against an opposite one.
    pub async fn close_by(
        &self,
        position_id: &str,
        opposite_position_id: &str,
        options: &MarketTradeOptions,
    ) -> Result<TradeResponse> {
        let mut request = TradeRequest::new(ActionType::PositionCloseBy);
        request.position_id = Some(position_id.to_string());
        request.close_by_position_id = Some(opposite_position_id.to_string());
        options.apply_to(&mut request);
        self.execute(request).await
    }

    /// Close every open position on a symbol.
    pub async fn close_positions_by_symbol(
        &self,
        symbol: &str,
        options: &MarketTradeOptions,
    ) -> Result<TradeResponse> {
        let mut request = TradeRequest::new(ActionType::PositionsCloseSymbol);
        request.symbol = Some(symbol.to_string());
        options.apply_to(&mut request);
        self.execute(request).await
    }

    /// Change price or protection levels of a pending order.
    pub async fn modify_order(
        &self,
        order_id: &str,
        open_price: Decimal,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
    ) -> Result<TradeResponse> {
        let mut request = TradeRequest::new(ActionType::OrderModify);
        request.order_id = Some(order_id.to_string());
        request.open_price = Some(open_price);
        request.stop_loss = stop_loss;
        request.take_profit = take_profit;
        self.execute(request).await
    }

    /// Cancel a pending order.
    pub async fn cancel_order(&self, order_id: &str) -> Result<TradeResponse> {
        let mut request = TradeRequest::new(ActionType::OrderCancel);
        request.order_id = Some(order_id.to_string());
        self.execute(request).await
    }

    /// Submit an already-built request.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Trade`] when the terminal reports a failure
    /// return code; transport errors pass through unchanged.
    pub async fn execute(&self, request: TradeRequest) -> Result<TradeResponse> {
        let transport = self
            .transport
            .upgrade()
            .ok_or(Error::NotConnected)?;

        let Value::Object(request_fields) = serde_json::to_value(&request)? else {
            return Err(Error::Validation("trade request must serialize to an object".into()));
        };
        let mut frame = serde_json::Map::new();
        frame.insert("type".to_string(), Value::String("trade".to_string()));
        frame.insert(
            "application".to_string(),
            Value::String(self.account.application.clone()),
        );
        frame.extend(request_fields);

        debug!(
            account_id = %self.account.id,
            action = ?request.action_type,
            "Submitting trade request"
        );
        let response = transport
            .request(&self.account.id, Value::Object(frame))
            .await?;
        let payload = response
            .get("response")
            .cloned()
            .ok_or_else(|| Error::Internal("trade response payload missing".into()))?;
        let outcome: TradeResponse = serde_json::from_value(payload)?;

        if outcome.is_success() {
            Ok(outcome)
        } else {
            Err(Error::Trade(outcome.to_error()))
        }
    }

    fn market_request(&self, action: ActionType, symbol: &str, volume: Decimal) -> TradeRequest {
        let mut request = TradeRequest::new(action);
        request.symbol = Some(symbol.to_string());
        request.volume = Some(volume);
        request.magic = self.account.magic;
        request
    }

    #[allow(clippy::too_many_arguments)]
    async fn pending_order(
        &self,
        action: ActionType,
        symbol: &str,
        volume: Decimal,
        open_price: Decimal,
        stop_limit_price: Option<Decimal>,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
        options: &PendingTradeOptions,
    ) -> Result<TradeResponse> {
        let mut request = self.market_request(action, symbol, volume);
        request.open_price = Some(open_price);
        request.stop_limit_price = stop_limit_price;
        request.stop_loss = stop_loss;
        request.take_profit = take_profit;
        options.apply_to(&mut request);
        self.execute(request).await
    }
}
