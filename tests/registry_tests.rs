//! Integration tests for the connection registry.

mod support;

use std::sync::Arc;

use tradelink::error::Error;

use support::{account, registry};

#[tokio::test]
async fn test_concurrent_connects_share_one_connection() {
    let (transport, registry) = registry();

    let (first, second) = tokio::join!(
        registry.connect(account(), None, None),
        registry.connect(account(), None, None),
    );
    let first = first.unwrap();
    let second = second.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    // Setup ran exactly once.
    assert_eq!(transport.requests_of_type("subscribe").len(), 1);
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_many_concurrent_openers_one_instance() {
    let (transport, registry) = registry();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.connect(account(), None, None).await })
        })
        .collect();

    let mut connections = Vec::new();
    for handle in handles {
        connections.push(handle.await.unwrap().unwrap());
    }
    for connection in &connections[1..] {
        assert!(Arc::ptr_eq(&connections[0], connection));
    }
    assert_eq!(transport.requests_of_type("subscribe").len(), 1);
}

#[tokio::test]
async fn test_repeated_connect_returns_existing_entry() {
    let (transport, registry) = registry();

    let first = registry.connect(account(), None, None).await.unwrap();
    let second = registry.connect(account(), None, None).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(transport.requests_of_type("subscribe").len(), 1);
}

#[tokio::test]
async fn test_distinct_accounts_get_distinct_connections() {
    let (transport, registry) = registry();

    let first = registry.connect(account(), None, None).await.unwrap();
    let second = registry
        .connect(tradelink::Account::new("acct-2"), None, None)
        .await
        .unwrap();

    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(registry.len(), 2);
    assert_eq!(transport.requests_of_type("subscribe").len(), 2);
}

#[tokio::test]
async fn test_failed_setup_releases_the_barrier() {
    let (transport, registry) = registry();

    // The subscribe request of the first setup attempt fails.
    transport.push_request_result(Err(Error::Internal("simulated".into())));
    let failed = registry.connect(account(), None, None).await;
    assert!(failed.is_err());
    assert!(registry.is_empty());

    // A later attempt starts fresh and succeeds.
    let connection = registry.connect(account(), None, None).await.unwrap();
    assert!(!connection.is_closed());
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_close_purges_registry_entry() {
    let (_transport, registry) = registry();

    let connection = registry.connect(account(), None, None).await.unwrap();
    assert_eq!(registry.len(), 1);

    connection.close().await;
    assert!(registry.is_empty());

    // Connecting again builds a fresh instance.
    let reopened = registry.connect(account(), None, None).await.unwrap();
    assert!(!Arc::ptr_eq(&connection, &reopened));
}
