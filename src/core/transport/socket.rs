//! WebSocket implementation of the message transport.
//!
//! One socket serves every account on the host. A session task owns the
//! read half and dispatches decoded packets; a writer task owns the write
//! half and drains an outgoing channel. When the socket drops, the session
//! task re-establishes it with exponential backoff and notifies reconnect
//! listeners. Missed events are not replayed; the synchronization engine
//! recovers by resynchronizing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use super::protocol::{decode_event, map_server_error, packet_account_id, RawPacket};
use super::{deliver, MessageTransport, Ordered, PacketOrderer, TransportOptions};
use crate::core::domain::AccountId;
use crate::core::sync::{ReconnectListener, SynchronizationListener};
use crate::error::{Error, Result};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct PendingRequest {
    account_id: AccountId,
    tx: oneshot::Sender<Result<Value>>,
}

/// WebSocket-backed [`MessageTransport`].
pub struct WebSocketTransport {
    url: Url,
    options: TransportOptions,
    connected: AtomicBool,
    closed: AtomicBool,
    writer: RwLock<Option<mpsc::Sender<Message>>>,
    pending: DashMap<String, PendingRequest>,
    listeners: DashMap<AccountId, Vec<Weak<dyn SynchronizationListener>>>,
    reconnect_listeners: RwLock<Vec<Weak<dyn ReconnectListener>>>,
    orderer: PacketOrderer,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl WebSocketTransport {
    /// Create a transport for the given endpoint. No socket is opened until
    /// [`connect`](Self::connect) is called.
    ///
    /// # Errors
    ///
    /// Returns an error when the URL does not parse.
    pub fn new(url: &str, options: TransportOptions) -> Result<Arc<Self>> {
        let url = Url::parse(url)?;
        Ok(Arc::new(Self {
            url,
            orderer: PacketOrderer::new(
                options.packet_ordering_timeout,
                super::DEFAULT_BUFFER_CAPACITY,
            ),
            options,
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            writer: RwLock::new(None),
            pending: DashMap::new(),
            listeners: DashMap::new(),
            reconnect_listeners: RwLock::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
        }))
    }

    /// Open the socket and start the session tasks.
    ///
    /// # Errors
    ///
    /// Fails when the initial connect does not succeed within the connect
    /// deadline. Later socket losses are handled by the internal reconnect
    /// loop instead of surfacing here.
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        let socket = self.open_socket().await?;
        self.install_session(socket);
        self.install_sweeper();
        Ok(())
    }

    /// Stop the transport: abort session tasks and fail all pending requests.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        *self.writer.write() = None;
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
        let pending: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        for request_id in pending {
            if let Some((_, entry)) = self.pending.remove(&request_id) {
                let _ = entry.tx.send(Err(Error::ConnectionClosed));
            }
        }
        self.listeners.clear();
        self.reconnect_listeners.write().clear();
    }

    async fn open_socket(&self) -> Result<Socket> {
        info!(url = %self.url, "Connecting to terminal server");
        let connect = connect_async(self.url.as_str());
        let (socket, response) = tokio::time::timeout(self.options.connect_timeout, connect)
            .await
            .map_err(|_| Error::Timeout("socket connect"))??;
        info!(status = %response.status(), "Terminal server connected");
        self.connected.store(true, Ordering::SeqCst);
        Ok(socket)
    }

    fn install_session(self: &Arc<Self>, socket: Socket) {
        let transport = Arc::clone(self);
        let handle = tokio::spawn(async move {
            transport.run_sessions(socket).await;
        });
        self.tasks.lock().push(handle);
    }

    /// Promote orderer gaps on quiet streams.
    ///
    /// Holds only a weak reference so an abandoned transport can drop.
    fn install_sweeper(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                ticker.tick().await;
                let Some(transport) = weak.upgrade() else { return };
                if transport.closed.load(Ordering::SeqCst) {
                    return;
                }
                for (account_id, items) in transport.orderer.check_timeouts() {
                    for item in items {
                        transport.dispatch(&account_id, item).await;
                    }
                }
            }
        });
        self.tasks.lock().push(handle);
    }

    /// Read-loop over the current socket, re-establishing it on loss.
    async fn run_sessions(self: Arc<Self>, mut socket: Socket) {
        loop {
            self.run_one_session(socket).await;
            if self.closed.load(Ordering::SeqCst) {
                return;
            }
            self.connected.store(false, Ordering::SeqCst);
            *self.writer.write() = None;

            match self.reconnect_with_backoff().await {
                Some(new_socket) => {
                    socket = new_socket;
                    self.notify_reconnected().await;
                }
                None => return,
            }
        }
    }

    async fn run_one_session(&self, socket: Socket) {
        let (mut sink, mut stream) = socket.split();
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(64);
        *self.writer.write() = Some(out_tx);

        loop {
            tokio::select! {
                outgoing = out_rx.recv() => match outgoing {
                    Some(message) => {
                        if let Err(e) = sink.send(message).await {
                            error!(error = %e, "Failed to send frame");
                            break;
                        }
                    }
                    None => break,
                },
                incoming = stream.next() => match incoming {
                    Some(Ok(Message::Text(text))) => self.handle_text(&text).await,
                    Some(Ok(Message::Ping(data))) => {
                        debug!("Received ping");
                        if sink.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!(frame = ?frame, "Socket closed by server");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!(error = %e, "Socket error");
                        break;
                    }
                    None => {
                        warn!("Socket stream ended");
                        break;
                    }
                },
            }
        }
    }

    /// Exponential backoff with jitter until a socket comes back up.
    ///
    /// Returns `None` once the transport is closed.
    async fn reconnect_with_backoff(self: &Arc<Self>) -> Option<Socket> {
        let mut delay = self.options.reconnect_initial_delay;
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            let wait = delay + jitter(delay);
            info!(delay_ms = wait.as_millis(), "Reconnecting after delay");
            sleep(wait).await;

            match self.open_socket().await {
                Ok(socket) => {
                    info!("Reconnected to terminal server");
                    return Some(socket);
                }
                Err(e) => {
                    warn!(error = %e, "Reconnection attempt failed, will retry");
                    delay = (delay * 2).min(self.options.reconnect_max_delay);
                }
            }
        }
    }

    async fn notify_reconnected(&self) {
        let listeners: Vec<Arc<dyn ReconnectListener>> = {
            let mut registered = self.reconnect_listeners.write();
            registered.retain(|weak| weak.strong_count() > 0);
            registered.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in listeners {
            listener.on_reconnected().await;
        }
    }

    async fn handle_text(&self, text: &str) {
        let packet: RawPacket = match serde_json::from_str(text) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(error = %e, raw = %text, "Failed to parse frame, dropping");
                return;
            }
        };

        if packet.is_response() {
            self.complete_request(packet);
            return;
        }

        let Some(account_id) = packet_account_id(&packet) else {
            warn!(packet_type = %packet.packet_type, "Event frame without account id, dropping");
            return;
        };

        for item in self.orderer.submit(&account_id, packet) {
            self.dispatch(&account_id, item).await;
        }
    }

    fn complete_request(&self, packet: RawPacket) {
        let Some(request_id) = packet.request_id.clone() else {
            warn!("Response frame without request id, dropping");
            return;
        };
        let Some((_, entry)) = self.pending.remove(&request_id) else {
            warn!(request_id = %request_id, "Response for unknown request id, dropping");
            return;
        };
        let result = if packet.packet_type == "error" {
            Err(map_server_error(&packet))
        } else {
            Ok(Value::Object(packet.payload))
        };
        let _ = entry.tx.send(result);
    }

    async fn dispatch(&self, account_id: &AccountId, item: Ordered) {
        match item {
            Ordered::Release(packet) => {
                let event = match decode_event(&packet) {
                    Ok(Some(event)) => event,
                    Ok(None) => return,
                    Err(e) => {
                        warn!(
                            account_id = %account_id,
                            packet_type = %packet.packet_type,
                            error = %e,
                            "Failed to decode event, dropping"
                        );
                        return;
                    }
                };
                for listener in self.account_listeners(account_id) {
                    deliver(listener.as_ref(), account_id, &event).await;
                }
            }
            Ordered::Gap(missing) => {
                warn!(
                    account_id = %account_id,
                    missing_from = missing.start,
                    missing_to = missing.end,
                    "Sequence gap detected"
                );
                for listener in self.account_listeners(account_id) {
                    listener.on_packet_gap(account_id, missing.clone()).await;
                }
            }
        }
    }

    /// Upgrade the account's listeners, pruning the dead ones.
    fn account_listeners(&self, account_id: &AccountId) -> Vec<Arc<dyn SynchronizationListener>> {
        let Some(mut entry) = self.listeners.get_mut(account_id) else {
            return Vec::new();
        };
        entry.retain(|weak| weak.strong_count() > 0);
        entry.iter().filter_map(Weak::upgrade).collect()
    }

}

#[async_trait]
impl MessageTransport for WebSocketTransport {
    async fn request(&self, account_id: &AccountId, request: Value) -> Result<Value> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ConnectionClosed);
        }
        let Value::Object(mut frame) = request else {
            return Err(Error::Validation("request must be a JSON object".into()));
        };
        let request_id = Uuid::new_v4().to_string();
        frame.insert(
            "accountId".to_string(),
            Value::String(account_id.as_str().to_string()),
        );
        frame.insert("requestId".to_string(), Value::String(request_id.clone()));

        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            request_id.clone(),
            PendingRequest {
                account_id: account_id.clone(),
                tx,
            },
        );

        let writer = self.writer.read().clone();
        if let Some(writer) = writer {
            let text = serde_json::to_string(&Value::Object(frame))?;
            if writer.send(Message::Text(text)).await.is_err() {
                debug!(request_id = %request_id, "Writer unavailable, waiting for deadline");
            }
        }

        match tokio::time::timeout(self.options.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                self.pending.remove(&request_id);
                if self.connected.load(Ordering::SeqCst) {
                    Err(Error::Timeout("request response"))
                } else {
                    Err(Error::NotConnected)
                }
            }
        }
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
        self.orderer.reset(account_id);
    }

    fn add_reconnect_listener(&self, listener: Weak<dyn ReconnectListener>) {
        self.reconnect_listeners.write().push(listener);
    }

    fn cancel_account_requests(&self, account_id: &AccountId) {
        let cancelled: Vec<String> = self
            .pending
            .iter()
            .filter(|entry| &entry.value().account_id == account_id)
            .map(|entry| entry.key().clone())
            .collect();
        for request_id in cancelled {
            if let Some((_, entry)) = self.pending.remove(&request_id) {
                let _ = entry.tx.send(Err(Error::ConnectionClosed));
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Up to 20% additional delay so simultaneous reconnects do not storm the
/// server in lockstep.
fn jitter(base: Duration) -> Duration {
    let range_ms = (base.as_millis() as u64) / 5;
    if range_ms == 0 {
        return Duration::ZERO;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    Duration::from_millis(u64::from(nanos) % (range_ms + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jitter_is_bounded() {
        for _ in 0..10 {
            let j = jitter(Duration::from_millis(100));
            assert!(j <= Duration::from_millis(20));
        }
        assert_eq!(jitter(Duration::ZERO), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_request_without_socket_times_out_as_not_connected() {
        let options = TransportOptions {
            request_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let transport = WebSocketTransport::new("wss://example.invalid/ws", options).unwrap();

        let err = transport
            .request(&AccountId::from("a"), serde_json::json!({"type": "subscribe"}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotConnected));
    }

    #[tokio::test]
    async fn test_request_rejects_non_object_payload() {
        let transport =
            WebSocketTransport::new("wss://example.invalid/ws", TransportOptions::default())
                .unwrap();
        let err = transport
            .request(&AccountId::from("a"), Value::String("nope".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_closed_transport_rejects_requests() {
        let transport =
            WebSocketTransport::new("wss://example.invalid/ws", TransportOptions::default())
                .unwrap();
        transport.close();
        let err = transport
            .request(&AccountId::from("a"), serde_json::json!({"type": "subscribe"}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_cancel_account_requests_fails_pending_request() {
        let options = TransportOptions {
            request_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        let transport = WebSocketTransport::new("wss://example.invalid/ws", options).unwrap();

        let t2 = Arc::clone(&transport);
        let pending_a = tokio::spawn(async move {
            t2.request(&AccountId::from("a"), serde_json::json!({"type": "synchronize"}))
                .await
        });
        // Let the request register before cancelling.
        tokio::time::sleep(Duration::from_millis(20)).await;
        transport.cancel_account_requests(&AccountId::from("a"));

        let err = pending_a.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
    }
}
