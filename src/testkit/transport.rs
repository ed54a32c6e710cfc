//! Mock [`MessageTransport`] for testing.
//!
//! [`ScriptedTransport`] answers requests from a pre-loaded result queue
//! (defaulting to an empty success) and lets tests push terminal events
//! directly into the registered listeners, bypassing any socket.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use crate::core::domain::AccountId;
use crate::core::sync::{ReconnectListener, SynchronizationListener};
use crate::core::transport::{deliver, MessageTransport, TerminalEvent};
use crate::error::{Error, Result};

/// A request frame the transport recorded, with bookkeeping fields intact.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub account_id: AccountId,
    pub frame: Value,
}

impl RecordedRequest {
    /// The frame's `type` field.
    #[must_use]
    pub fn request_type(&self) -> &str {
        self.frame
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }
}

/// Mock transport with scripted request results and direct event injection.
pub struct ScriptedTransport {
    request_results: Mutex<VecDeque<Result<Value>>>,
    requests: Mutex<Vec<RecordedRequest>>,
    request_count: Arc<AtomicU32>,
    listeners: DashMap<AccountId, Vec<Weak<dyn SynchronizationListener>>>,
    reconnect_listeners: RwLock<Vec<Weak<dyn ReconnectListener>>>,
    connected: AtomicBool,
}

impl ScriptedTransport {
    #[must_use]
    pub fn new() -> Self {
        Self {
            request_results: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            request_count: Arc::new(AtomicU32::new(0)),
            listeners: DashMap::new(),
            reconnect_listeners: RwLock::new(Vec::new()),
            connected: AtomicBool::new(true),
        }
    }

    /// Queue results returned by subsequent `request` calls, in order.
    /// An exhausted queue answers with an empty success object.
    #[must_use]
    pub fn with_request_results(self, results: Vec<Result<Value>>) -> Self {
        *self.request_results.lock() = results.into();
        self
    }

    /// Queue one more request result.
    pub fn push_request_result(&self, result: Result<Value>) {
        self.request_results.lock().push_back(result);
    }

    /// Toggle the reported connectivity state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// All recorded requests so far.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    /// Recorded requests with the given frame type.
    #[must_use]
    pub fn requests_of_type(&self, request_type: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.request_type() == request_type)
            .collect()
    }

    #[must_use]
    pub fn request_count(&self) -> u32 {
        self.request_count.load(Ordering::SeqCst)
    }

    /// Deliver an event to the account's registered listeners, in
    /// registration order, exactly like the socket read loop would.
    pub async fn emit(&self, account_id: &AccountId, event: TerminalEvent) {
        let listeners: Vec<Arc<dyn SynchronizationListener>> = {
            let Some(mut entry) = self.listeners.get_mut(account_id) else {
                return;
            };
            entry.retain(|weak| weak.strong_count() > 0);
            entry.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in listeners {
            deliver(listener.as_ref(), account_id, &event).await;
        }
    }

    /// Report a promoted sequence gap to the account's listeners, exactly
    /// like the packet orderer would.
    pub async fn emit_gap(&self, account_id: &AccountId, missing: std::ops::Range<u64>) {
        let listeners: Vec<Arc<dyn SynchronizationListener>> = {
            let Some(mut entry) = self.listeners.get_mut(account_id) else {
                return;
            };
            entry.retain(|weak| weak.strong_count() > 0);
            entry.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in listeners {
            listener.on_packet_gap(account_id, missing.clone()).await;
        }
    }

    /// Notify reconnect listeners as after a socket reattachment.
    pub async fn emit_reconnected(&self) {
        let listeners: Vec<Arc<dyn ReconnectListener>> = {
            let registered = self.reconnect_listeners.read();
            registered.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in listeners {
            listener.on_reconnected().await;
        }
    }

    /// Number of listeners currently registered for an account.
    #[must_use]
    pub fn listener_count(&self, account_id: &AccountId) -> usize {
        self.listeners
            .get(account_id)
            .map(|entry| entry.iter().filter(|weak| weak.strong_count() > 0).count())
            .unwrap_or(0)
    }
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageTransport for ScriptedTransport {
    async fn request(&self, account_id: &AccountId, request: Value) -> Result<Value> {
        self.request_count.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(RecordedRequest {
            account_id: account_id.clone(),
            frame: request,
        });
        if !self.connected.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }
        self.request_results
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(Value::Object(serde_json::Map::new())))
    }

    fn add_synchronization_listener(
        &self,
        account_id: AccountId,
        listener: Weak<dyn SynchronizationListener>,
    ) {
        self.listeners.entry(account_id).or_default().push(listener);
    }

    fn remove_synchronization_listeners(&self, account_id: &AccountId) {
        self.listeners.remove(account_id);
    }

    fn add_reconnect_listener(&self, listener: Weak<dyn ReconnectListener>) {
        self.reconnect_listeners.write().push(listener);
    }

    fn cancel_account_requests(&self, _account_id: &AccountId) {}

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
