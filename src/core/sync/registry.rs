//! Process-wide registry of live connections.
//!
//! Guarantees at most one [`TerminalConnection`] per account id. Concurrent
//! openers of the same account are serialized through a per-account one-shot
//! barrier: the first caller builds the connection while the rest await the
//! installed entry.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info};

use super::connection::{ConnectionOptions, TerminalConnection};
use crate::core::domain::{Account, AccountId};
use crate::core::store::{HistoryStorage, MemoryHistoryStorage};
use crate::core::transport::MessageTransport;
use crate::error::Result;

enum Slot {
    Ready(Arc<TerminalConnection>),
    /// Setup in progress; receives the connection once installed, or a
    /// closed channel when setup failed.
    Pending(watch::Receiver<Option<Arc<TerminalConnection>>>),
}

/// Owner of the `AccountId -> Connection` mapping for the process.
pub struct ConnectionRegistry {
    transport: Arc<dyn MessageTransport>,
    options: ConnectionOptions,
    slots: Mutex<HashMap<AccountId, Slot>>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new(transport: Arc<dyn MessageTransport>, options: ConnectionOptions) -> Arc<Self> {
        Arc::new(Self {
            transport,
            options,
            slots: Mutex::new(HashMap::new()),
        })
    }

    /// Get or create the connection for an account.
    ///
    /// Existing connections are returned as-is. When several callers race on
    /// a fresh account, exactly one builds the connection (running
    /// `initialize` and `subscribe` exactly once) and the others receive the
    /// same instance.
    ///
    /// # Errors
    ///
    /// Propagates setup failures to the building caller; waiting callers
    /// retry the lookup and may become the next builder.
    pub async fn connect(
        self: &Arc<Self>,
        account: Account,
        history_storage: Option<Arc<dyn HistoryStorage>>,
        history_start_time: Option<DateTime<Utc>>,
    ) -> Result<Arc<TerminalConnection>> {
        loop {
            enum Action {
                Wait(watch::Receiver<Option<Arc<TerminalConnection>>>),
                Build(watch::Sender<Option<Arc<TerminalConnection>>>),
            }

            let action = {
                let mut slots = self.slots.lock();
                match slots.get(&account.id) {
                    Some(Slot::Ready(connection)) => return Ok(Arc::clone(connection)),
                    Some(Slot::Pending(rx)) => Action::Wait(rx.clone()),
                    None => {
                        let (tx, rx) = watch::channel(None);
                        slots.insert(account.id.clone(), Slot::Pending(rx));
                        Action::Build(tx)
                    }
                }
            };

            match action {
                Action::Wait(mut rx) => {
                    debug!(account_id = %account.id, "Awaiting concurrent connection setup");
                    loop {
                        if let Some(connection) = rx.borrow_and_update().clone() {
                            return Ok(connection);
                        }
                        if rx.changed().await.is_err() {
                            // The opener failed and dropped the barrier;
                            // retry and possibly become the builder.
                            break;
                        }
                    }
                }
                Action::Build(tx) => {
                    let built = self
                        .build_connection(
                            account.clone(),
                            history_storage.clone(),
                            history_start_time,
                        )
                        .await;
                    match built {
                        Ok(connection) => {
                            self.slots
                                .lock()
                                .insert(account.id.clone(), Slot::Ready(Arc::clone(&connection)));
                            let _ = tx.send(Some(Arc::clone(&connection)));
                            return Ok(connection);
                        }
                        Err(e) => {
                            self.slots.lock().remove(&account.id);
                            drop(tx);
                            return Err(e);
                        }
                    }
                }
            }
        }
    }

    async fn build_connection(
        self: &Arc<Self>,
        account: Account,
        history_storage: Option<Arc<dyn HistoryStorage>>,
        history_start_time: Option<DateTime<Utc>>,
    ) -> Result<Arc<TerminalConnection>> {
        info!(account_id = %account.id, "Opening terminal connection");
        let history =
            history_storage.unwrap_or_else(|| Arc::new(MemoryHistoryStorage::new()));
        let registry: Weak<ConnectionRegistry> = Arc::downgrade(self);
        let connection = TerminalConnection::new(
            account,
            &self.transport,
            registry,
            history,
            history_start_time,
            &self.options,
        );
        connection.initialize()?;
        connection.subscribe().await?;
        Ok(connection)
    }

    /// Purge an account's entry; invoked by `TerminalConnection::close`.
    pub fn remove(&self, account_id: &AccountId) {
        if self.slots.lock().remove(account_id).is_some() {
            debug!(account_id = %account_id, "Connection removed from registry");
        }
    }

    /// Number of live or in-setup connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
