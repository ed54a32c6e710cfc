//! Integration tests for the synchronization engine.

mod support;

use std::time::Duration;

use serde_json::json;
use tradelink::core::store::HistoryStorage;
use tradelink::core::transport::TerminalEvent;
use tradelink::error::Error;
use tradelink::SynchronizationOptions;

use support::{account, account_id, deal, history_order, registry, settle};

#[tokio::test]
async fn test_connect_event_triggers_synchronize_request() {
    let (transport, registry) = registry();
    let connection = registry.connect(account(), None, None).await.unwrap();

    transport.emit(&account_id(), TerminalEvent::Connected).await;
    settle().await;

    let synchronize = transport.requests_of_type("synchronize");
    assert_eq!(synchronize.len(), 1);
    let frame = &synchronize[0].frame;
    assert!(frame["synchronizationId"].is_string());
    assert!(frame["startingHistoryOrderTime"].is_string());
    assert!(frame["startingDealTime"].is_string());
    assert!(connection.terminal_state().connected());
}

#[tokio::test]
async fn test_completion_signals_mark_synchronized() {
    let (transport, registry) = registry();
    let connection = registry.connect(account(), None, None).await.unwrap();
    let account_id = account_id();

    transport.emit(&account_id, TerminalEvent::Connected).await;
    settle().await;
    assert!(!connection.is_synchronized(None));

    let synchronization_id = transport.requests_of_type("synchronize")[0].frame
        ["synchronizationId"]
        .as_str()
        .unwrap()
        .to_string();

    transport
        .emit(
            &account_id,
            TerminalEvent::SynchronizationStarted {
                synchronization_id: synchronization_id.clone(),
            },
        )
        .await;
    transport
        .emit(
            &account_id,
            TerminalEvent::OrderSynchronizationFinished {
                synchronization_id: synchronization_id.clone(),
            },
        )
        .await;
    assert!(!connection.is_synchronized(None));

    transport
        .emit(
            &account_id,
            TerminalEvent::DealSynchronizationFinished {
                synchronization_id: synchronization_id.clone(),
            },
        )
        .await;
    assert!(connection.is_synchronized(None));
    assert!(connection.is_synchronized(Some(&synchronization_id)));

    // The server-side handshake completes wait_synchronized immediately.
    connection
        .wait_synchronized(SynchronizationOptions {
            timeout_in_seconds: 1,
            interval_in_milliseconds: 10,
            ..Default::default()
        })
        .await
        .unwrap();
    let handshake = transport.requests_of_type("waitSynchronized");
    assert_eq!(handshake.len(), 1);
    assert_eq!(handshake[0].frame["applicationPattern"], "RPC");
}

#[tokio::test]
async fn test_wait_synchronized_times_out_without_sync_events() {
    let (_transport, registry) = registry();
    let connection = registry.connect(account(), None, None).await.unwrap();

    let started = std::time::Instant::now();
    let result = connection
        .wait_synchronized(SynchronizationOptions {
            timeout_in_seconds: 1,
            interval_in_milliseconds: 50,
            ..Default::default()
        })
        .await;

    assert!(matches!(result, Err(Error::Timeout(_))));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(900), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(3), "elapsed {elapsed:?}");
}

#[tokio::test]
async fn test_failed_synchronization_is_retried_with_backoff() {
    let (transport, registry) = registry();
    let _connection = registry.connect(account(), None, None).await.unwrap();

    // First synchronize attempt fails, the retry succeeds.
    transport.push_request_result(Err(Error::Internal("simulated".into())));

    transport.emit(&account_id(), TerminalEvent::Connected).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(transport.requests_of_type("synchronize").len(), 1);

    // Retry interval starts at 50ms in the test options.
    tokio::time::sleep(Duration::from_millis(180)).await;
    assert_eq!(transport.requests_of_type("synchronize").len(), 2);
}

#[tokio::test]
async fn test_close_cancels_pending_retries() {
    let (transport, registry) = registry();
    let connection = registry.connect(account(), None, None).await.unwrap();

    transport.push_request_result(Err(Error::Internal("simulated".into())));
    transport.emit(&account_id(), TerminalEvent::Connected).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(transport.requests_of_type("synchronize").len(), 1);

    connection.close().await;

    // Give any stray retry timer ample time to fire.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(transport.requests_of_type("synchronize").len(), 1);
    assert_eq!(transport.requests_of_type("unsubscribe").len(), 1);
    assert!(registry.is_empty());
    assert_eq!(transport.listener_count(&account_id()), 0);
}

#[tokio::test]
async fn test_packet_gap_triggers_resynchronization() {
    let (transport, registry) = registry();
    let _connection = registry.connect(account(), None, None).await.unwrap();
    let account_id = account_id();

    transport.emit(&account_id, TerminalEvent::Connected).await;
    settle().await;
    assert_eq!(transport.requests_of_type("synchronize").len(), 1);
    let first_id = transport.requests_of_type("synchronize")[0].frame["synchronizationId"]
        .as_str()
        .unwrap()
        .to_string();

    transport.emit_gap(&account_id, 5..9).await;
    settle().await;

    let synchronize = transport.requests_of_type("synchronize");
    assert_eq!(synchronize.len(), 2);
    let second_id = synchronize[1].frame["synchronizationId"].as_str().unwrap();
    assert_ne!(first_id, second_id);
}

#[tokio::test]
async fn test_reconnect_reissues_subscribe() {
    let (transport, registry) = registry();
    let _connection = registry.connect(account(), None, None).await.unwrap();
    assert_eq!(transport.requests_of_type("subscribe").len(), 1);

    transport.emit_reconnected().await;
    settle().await;
    assert_eq!(transport.requests_of_type("subscribe").len(), 2);
}

#[tokio::test]
async fn test_events_are_gated_until_synchronization_starts() {
    let (transport, registry) = registry();
    let connection = registry.connect(account(), None, None).await.unwrap();
    let account_id = account_id();

    transport.emit(&account_id, TerminalEvent::Connected).await;
    settle().await;

    // Before synchronizationStarted, data events are ignored.
    transport
        .emit(
            &account_id,
            TerminalEvent::PositionsReplaced(vec![support::buy_position("1", "EURUSD")]),
        )
        .await;
    assert!(connection.terminal_state().positions().is_empty());

    transport
        .emit(
            &account_id,
            TerminalEvent::SynchronizationStarted {
                synchronization_id: "s1".into(),
            },
        )
        .await;
    transport
        .emit(
            &account_id,
            TerminalEvent::PositionsReplaced(vec![support::buy_position("1", "EURUSD")]),
        )
        .await;
    assert_eq!(connection.terminal_state().positions().len(), 1);

    // A disconnect closes the gate again.
    transport
        .emit(&account_id, TerminalEvent::Disconnected)
        .await;
    transport
        .emit(
            &account_id,
            TerminalEvent::PositionsReplaced(vec![
                support::buy_position("1", "EURUSD"),
                support::buy_position("2", "EURUSD"),
            ]),
        )
        .await;
    assert_eq!(connection.terminal_state().positions().len(), 1);
}

#[tokio::test]
async fn test_history_events_feed_storage_watermarks() {
    let (transport, registry) = registry();
    let connection = registry.connect(account(), None, None).await.unwrap();
    let account_id = account_id();

    transport.emit(&account_id, TerminalEvent::Connected).await;
    settle().await;
    transport
        .emit(
            &account_id,
            TerminalEvent::SynchronizationStarted {
                synchronization_id: "s1".into(),
            },
        )
        .await;
    transport
        .emit(
            &account_id,
            TerminalEvent::HistoryOrders(vec![history_order("h1", 1000)]),
        )
        .await;
    transport
        .emit(&account_id, TerminalEvent::Deals(vec![deal("d1", 2000)]))
        .await;

    use chrono::TimeZone;
    let storage = connection.history_storage();
    assert_eq!(
        storage.last_history_order_time().await,
        chrono::Utc.timestamp_opt(1000, 0).single().unwrap()
    );
    assert_eq!(
        storage.last_deal_time().await,
        chrono::Utc.timestamp_opt(2000, 0).single().unwrap()
    );
}

#[tokio::test]
async fn test_next_synchronize_starts_from_watermarks() {
    let (transport, registry) = registry();
    let _connection = registry.connect(account(), None, None).await.unwrap();
    let account_id = account_id();

    transport.emit(&account_id, TerminalEvent::Connected).await;
    settle().await;
    transport
        .emit(
            &account_id,
            TerminalEvent::SynchronizationStarted {
                synchronization_id: "s1".into(),
            },
        )
        .await;
    transport
        .emit(
            &account_id,
            TerminalEvent::HistoryOrders(vec![history_order("h1", 1000)]),
        )
        .await;

    // Reconnect cycle: the fresh synchronize resumes from the stored time.
    transport
        .emit(&account_id, TerminalEvent::Disconnected)
        .await;
    transport.emit(&account_id, TerminalEvent::Connected).await;
    settle().await;

    let synchronize = transport.requests_of_type("synchronize");
    assert_eq!(synchronize.len(), 2);
    let starting = synchronize[1].frame["startingHistoryOrderTime"]
        .as_str()
        .unwrap();
    use chrono::TimeZone;
    let parsed: chrono::DateTime<chrono::Utc> = starting.parse().unwrap();
    assert_eq!(parsed, chrono::Utc.timestamp_opt(1000, 0).single().unwrap());
}

#[tokio::test]
async fn test_copy_factory_accounts_use_wider_application_pattern() {
    let (transport, registry) = registry();
    let connection = registry
        .connect(
            tradelink::Account::new("acct-1").with_application("CopyFactory"),
            None,
            None,
        )
        .await
        .unwrap();
    let account_id = account_id();

    transport.emit(&account_id, TerminalEvent::Connected).await;
    settle().await;
    let synchronization_id = transport.requests_of_type("synchronize")[0].frame
        ["synchronizationId"]
        .as_str()
        .unwrap()
        .to_string();
    transport
        .emit(
            &account_id,
            TerminalEvent::OrderSynchronizationFinished {
                synchronization_id: synchronization_id.clone(),
            },
        )
        .await;
    transport
        .emit(
            &account_id,
            TerminalEvent::DealSynchronizationFinished { synchronization_id },
        )
        .await;

    connection
        .wait_synchronized(SynchronizationOptions {
            timeout_in_seconds: 1,
            interval_in_milliseconds: 10,
            ..Default::default()
        })
        .await
        .unwrap();
    let handshake = transport.requests_of_type("waitSynchronized");
    assert_eq!(handshake[0].frame["applicationPattern"], "CopyFactory.*|RPC");
}

#[tokio::test]
async fn test_trade_failure_maps_to_trade_error() {
    let (transport, registry) = registry();
    let connection = registry.connect(account(), None, None).await.unwrap();

    transport.push_request_result(Ok(json!({
        "response": {
            "numericCode": 10019,
            "stringCode": "TRADE_RETCODE_NO_MONEY",
            "message": "No money"
        }
    })));

    let result = connection
        .trade()
        .create_market_buy_order(
            "EURUSD",
            rust_decimal_macros::dec!(0.1),
            None,
            None,
            &Default::default(),
        )
        .await;

    match result {
        Err(Error::Trade(info)) => {
            assert_eq!(info.numeric_code, 10019);
            assert_eq!(info.string_code, "TRADE_RETCODE_NO_MONEY");
        }
        other => panic!("unexpected result {other:?}"),
    }
    // No implicit retry happened.
    assert_eq!(transport.requests_of_type("trade").len(), 1);
}

#[tokio::test]
async fn test_trade_success_returns_response() {
    let (transport, registry) = registry();
    let connection = registry.connect(account(), None, None).await.unwrap();

    transport.push_request_result(Ok(json!({
        "response": {
            "numericCode": 10009,
            "stringCode": "TRADE_RETCODE_DONE",
            "message": "done",
            "orderId": "46870472"
        }
    })));

    let response = connection
        .trade()
        .create_market_buy_order(
            "EURUSD",
            rust_decimal_macros::dec!(0.1),
            None,
            None,
            &Default::default(),
        )
        .await
        .unwrap();
    assert_eq!(response.order_id.as_deref(), Some("46870472"));

    let frame = &transport.requests_of_type("trade")[0].frame;
    assert_eq!(frame["actionType"], "ORDER_TYPE_BUY");
    assert_eq!(frame["symbol"], "EURUSD");
}

#[tokio::test]
async fn test_market_data_subscriptions_are_reapplied_on_resync() {
    let (transport, registry) = registry();
    let connection = registry.connect(account(), None, None).await.unwrap();
    let account_id = account_id();

    connection.subscribe_to_market_data("EURUSD").await.unwrap();
    connection.subscribe_to_market_data("AUDUSD").await.unwrap();
    assert_eq!(transport.requests_of_type("subscribeToMarketData").len(), 2);

    transport.emit(&account_id, TerminalEvent::Connected).await;
    settle().await;

    // The synchronize flow re-subscribes both symbols.
    assert_eq!(transport.requests_of_type("subscribeToMarketData").len(), 4);

    connection
        .unsubscribe_from_market_data("AUDUSD")
        .await
        .unwrap();
    assert_eq!(connection.subscriptions(), vec!["EURUSD".to_string()]);
}
