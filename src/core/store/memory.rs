//! In-memory history storage.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;

use super::HistoryStorage;
use crate::core::domain::{Deal, Order};
use crate::error::Result;

fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(0, 0).single().unwrap_or_default()
}

/// Pick the completion time that survives a merge: the earliest reported one.
fn earliest(
    current: Option<DateTime<Utc>>,
    incoming: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    match (current, incoming) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, b) => b,
    }
}

struct StorageInner {
    history_orders: HashMap<String, Order>,
    deals: HashMap<String, Deal>,
    last_history_order_time: DateTime<Utc>,
    last_deal_time: DateTime<Utc>,
}

impl StorageInner {
    fn new() -> Self {
        Self {
            history_orders: HashMap::new(),
            deals: HashMap::new(),
            last_history_order_time: epoch(),
            last_deal_time: epoch(),
        }
    }
}

/// History storage holding both logs in process memory.
pub struct MemoryHistoryStorage {
    inner: RwLock<StorageInner>,
}

impl MemoryHistoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StorageInner::new()),
        }
    }

    /// Stored history orders, totally ordered by `(done_time, id)`.
    #[must_use]
    pub fn history_orders(&self) -> Vec<Order> {
        let inner = self.inner.read();
        let mut orders: Vec<Order> = inner.history_orders.values().cloned().collect();
        orders.sort_by(|a, b| {
            let ta = a.done_time.unwrap_or_else(epoch);
            let tb = b.done_time.unwrap_or_else(epoch);
            ta.cmp(&tb).then_with(|| a.id.cmp(&b.id))
        });
        orders
    }

    /// Stored deals, totally ordered by `(done_time, id)`.
    #[must_use]
    pub fn deals(&self) -> Vec<Deal> {
        let inner = self.inner.read();
        let mut deals: Vec<Deal> = inner.deals.values().cloned().collect();
        deals.sort_by(|a, b| {
            let ta = a.done_time.unwrap_or_else(epoch);
            let tb = b.done_time.unwrap_or_else(epoch);
            ta.cmp(&tb).then_with(|| a.id.cmp(&b.id))
        });
        deals
    }
}

impl Default for MemoryHistoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HistoryStorage for MemoryHistoryStorage {
    async fn last_history_order_time(&self) -> DateTime<Utc> {
        self.inner.read().last_history_order_time
    }

    async fn last_deal_time(&self) -> DateTime<Utc> {
        self.inner.read().last_deal_time
    }

    async fn on_history_order_added(&self, order: &Order) -> Result<()> {
        let mut inner = self.inner.write();
        let mut merged = order.clone();
        if let Some(existing) = inner.history_orders.get(&order.id) {
            // Last write wins on mutable fields; the earliest completion
            // time is authoritative.
            merged.done_time = earliest(existing.done_time, order.done_time);
        }
        if let Some(done_time) = merged.done_time {
            inner.last_history_order_time = inner.last_history_order_time.max(done_time);
        }
        inner.history_orders.insert(merged.id.clone(), merged);
        Ok(())
    }

    async fn on_deal_added(&self, deal: &Deal) -> Result<()> {
        let mut inner = self.inner.write();
        let mut merged = deal.clone();
        if let Some(existing) = inner.deals.get(&deal.id) {
            merged.done_time = earliest(existing.done_time, deal.done_time);
        }
        if let Some(done_time) = merged.done_time {
            inner.last_deal_time = inner.last_deal_time.max(done_time);
        }
        inner.deals.insert(merged.id.clone(), merged);
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        *self.inner.write() = StorageInner::new();
        Ok(())
    }

    async fn update_storage(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(id: &str, done_secs: Option<i64>) -> Order {
        let mut value = serde_json::json!({
            "id": id,
            "symbol": "EURUSD",
            "type": "ORDER_TYPE_BUY",
            "volume": 1,
            "openPrice": 10
        });
        if let Some(secs) = done_secs {
            value["doneTime"] = serde_json::json!(
                Utc.timestamp_opt(secs, 0).single().unwrap().to_rfc3339()
            );
        }
        serde_json::from_value(value).unwrap()
    }

    fn deal(id: &str, done_secs: i64) -> Deal {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "type": "DEAL_TYPE_BUY",
            "doneTime": Utc.timestamp_opt(done_secs, 0).single().unwrap().to_rfc3339()
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_watermark_tracks_max_done_time() {
        let storage = MemoryHistoryStorage::new();
        assert_eq!(storage.last_history_order_time().await, epoch());

        storage.on_history_order_added(&order("1", Some(100))).await.unwrap();
        storage.on_history_order_added(&order("2", Some(50))).await.unwrap();

        let watermark = storage.last_history_order_time().await;
        assert_eq!(watermark, Utc.timestamp_opt(100, 0).single().unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_merge_keeps_earliest_done_time() {
        let storage = MemoryHistoryStorage::new();
        storage.on_history_order_added(&order("1", Some(100))).await.unwrap();
        storage.on_history_order_added(&order("1", Some(200))).await.unwrap();

        let orders = storage.history_orders();
        assert_eq!(orders.len(), 1);
        assert_eq!(
            orders[0].done_time,
            Some(Utc.timestamp_opt(100, 0).single().unwrap())
        );
    }

    #[tokio::test]
    async fn test_records_ordered_by_done_time_then_id() {
        let storage = MemoryHistoryStorage::new();
        storage.on_deal_added(&deal("b", 100)).await.unwrap();
        storage.on_deal_added(&deal("a", 100)).await.unwrap();
        storage.on_deal_added(&deal("c", 50)).await.unwrap();

        let ids: Vec<String> = storage.deals().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_reset_clears_logs_and_watermarks() {
        let storage = MemoryHistoryStorage::new();
        storage.on_history_order_added(&order("1", Some(100))).await.unwrap();
        storage.on_deal_added(&deal("d", 100)).await.unwrap();

        storage.reset().await.unwrap();
        assert_eq!(storage.last_history_order_time().await, epoch());
        assert_eq!(storage.last_deal_time().await, epoch());
        assert!(storage.history_orders().is_empty());
        assert!(storage.deals().is_empty());
    }
}
