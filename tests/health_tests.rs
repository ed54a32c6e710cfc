//! Integration tests for health monitoring and uptime reporting.

mod support;

use std::time::Duration;

use serde_json::json;
use tradelink::core::transport::TerminalEvent;

use support::{account, account_id, registry, settle};

#[tokio::test]
async fn test_uptime_reflects_connection_state() {
    let (transport, registry) = registry();
    let connection = registry.connect(account(), None, None).await.unwrap();
    let account_id = account_id();

    // Disconnected at first: samples record downtime.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let down = connection.health_monitor().uptime();
    assert!(down.one_hour < 0.5, "one_hour {}", down.one_hour);

    // Authenticated + broker up: samples turn healthy.
    transport.emit(&account_id, TerminalEvent::Connected).await;
    transport
        .emit(&account_id, TerminalEvent::BrokerConnectionStatus(true))
        .await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    let up = connection.health_monitor().uptime();
    assert!(up.one_hour > down.one_hour);
}

#[tokio::test]
async fn test_server_health_mirror_updates() {
    let (transport, registry) = registry();
    let connection = registry.connect(account(), None, None).await.unwrap();
    let account_id = account_id();

    assert!(connection.health_monitor().server_health().is_none());

    transport
        .emit(
            &account_id,
            TerminalEvent::ServerHealthStatus(json!({"restApiHealthy": true})),
        )
        .await;
    settle().await;

    let mirrored = connection.health_monitor().server_health().unwrap();
    assert_eq!(mirrored["restApiHealthy"], true);
}

#[tokio::test]
async fn test_save_uptime_sends_measured_ratios() {
    let (transport, registry) = registry();
    let connection = registry.connect(account(), None, None).await.unwrap();

    let uptime = connection.health_monitor().uptime();
    connection.query().save_uptime(&uptime).await.unwrap();

    let saved = transport.requests_of_type("saveUptime");
    assert_eq!(saved.len(), 1);
    assert!(saved[0].frame["uptime"]["1h"].is_number());
    assert!(saved[0].frame["uptime"]["1w"].is_number());
}

#[tokio::test]
async fn test_stop_on_close_halts_sampler() {
    let (_transport, registry) = registry();
    let connection = registry.connect(account(), None, None).await.unwrap();

    tokio::time::sleep(Duration::from_millis(60)).await;
    connection.close().await;
    let at_close = connection.health_monitor().uptime();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(connection.health_monitor().uptime(), at_close);
}
