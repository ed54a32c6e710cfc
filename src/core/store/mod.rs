//! History storage with pluggable backends.
//!
//! Orders and deals are two disjoint append-only logs keyed by record id.
//! The watermarks (`last_history_order_time`, `last_deal_time`) drive
//! incremental synchronization: a fresh sync asks the terminal only for
//! records completed after them.

mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::core::domain::{Deal, Order};
use crate::error::Result;

pub use memory::MemoryHistoryStorage;

/// Contract for order/deal history storage.
///
/// Watermarks are monotonically non-decreasing across the life of the
/// storage except across [`reset`](Self::reset).
#[async_trait]
pub trait HistoryStorage: Send + Sync {
    /// Completion time of the newest stored history order, or epoch zero
    /// when the log is empty.
    async fn last_history_order_time(&self) -> DateTime<Utc>;

    /// Completion time of the newest stored deal, or epoch zero when the
    /// log is empty.
    async fn last_deal_time(&self) -> DateTime<Utc>;

    /// Merge a history order into the log by id.
    async fn on_history_order_added(&self, order: &Order) -> Result<()>;

    /// Merge a deal into the log by id.
    async fn on_deal_added(&self, deal: &Deal) -> Result<()>;

    /// Empty both logs and reset the watermarks to epoch zero.
    async fn reset(&self) -> Result<()>;

    /// Commit any in-memory buffer.
    ///
    /// A no-op for pure-memory storage; a disk-backed implementation flushes
    /// here.
    async fn update_storage(&self) -> Result<()>;
}
