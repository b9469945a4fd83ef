//! # Session Socket
//!
//! One reconnecting duplex channel bound to a session endpoint. Both the fact-gathering
//! and the voice-trial clients sit on top of this.
//!
//! ## Behaviour:
//! 1. **Connect**: `connect()` resolves once the socket is open and fails if the first dial fails
//! 2. **Dispatch**: each inbound text frame is parsed into an [`Envelope`] and handed to the
//!    handler registered for its type, then to the wildcard handler, in wire-arrival order
//! 3. **Reconnect**: an unexpected close schedules redials after `attempt × base_delay`,
//!    up to `max_attempts`; after that the channel stays `Disconnected`
//! 4. **Close**: `close()` is final; no reconnect is attempted afterwards
//!
//! Malformed frames are logged and dropped; they never abort the connection.
//!
//! Handlers run on the socket's reader task while the handler registry is locked, so a
//! handler may call [`SessionSocket::send`] or [`SessionSocket::close`] but must not register
//! further handlers.

use crate::config::ConnectionConfig;
use crate::error::{ClientError, ClientResult};
use crate::protocol::Envelope;
use crate::state::ClientState;

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Socket-driven connection status. Users never set this directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

impl ConnectionState {
    /// Label for the UI status indicator.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Linear backoff with a hard attempt cap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl ReconnectPolicy {
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self {
            max_attempts: config.max_reconnect_attempts,
            base_delay: config.base_delay(),
        }
    }

    /// Delay before the given 1-based attempt, or `None` once the cap is exceeded.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            None
        } else {
            Some(self.base_delay * attempt)
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(2000),
        }
    }
}

pub type MessageHandler = Box<dyn FnMut(&Envelope) + Send>;
pub type ReconnectHandler = Box<dyn FnMut(u32, &Outbox) + Send>;

#[derive(Default)]
struct Handlers {
    typed: HashMap<String, MessageHandler>,
    wildcard: Option<MessageHandler>,
    reconnect: Option<ReconnectHandler>,
}

impl Handlers {
    fn dispatch(&mut self, envelope: &Envelope) {
        if let Some(handler) = self.typed.get_mut(&envelope.kind) {
            handler(envelope);
        }
        if let Some(handler) = self.wildcard.as_mut() {
            handler(envelope);
        }
    }
}

/// Sending half of one live connection.
///
/// Handed to reconnect handlers so they can queue frames on the fresh connection
/// before any inbound frame is processed.
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<String>,
    client_state: ClientState,
}

impl Outbox {
    /// Serialize and queue a message. Returns `false` (and logs) if it could not be queued.
    pub fn send<T: Serialize>(&self, message: &T) -> bool {
        let json = match serde_json::to_string(message) {
            Ok(json) => json,
            Err(err) => {
                error!(error = %err, "Failed to serialize outbound message");
                return false;
            }
        };

        if self.tx.send(json).is_err() {
            self.client_state.record_send_refused();
            warn!("Cannot send - connection is shutting down");
            return false;
        }

        self.client_state.record_outbound();
        true
    }
}

/// Reconnecting JSON WebSocket channel. Cheap to clone; clones share the connection.
#[derive(Clone)]
pub struct SessionSocket {
    inner: Arc<SocketInner>,
}

/// Non-owning handle, for callbacks that live inside the socket's own handlers.
#[derive(Clone)]
pub struct WeakSessionSocket {
    inner: Weak<SocketInner>,
}

impl WeakSessionSocket {
    pub fn upgrade(&self) -> Option<SessionSocket> {
        self.inner.upgrade().map(|inner| SessionSocket { inner })
    }
}

struct SocketInner {
    url: String,
    policy: ReconnectPolicy,
    client_state: ClientState,
    state_tx: watch::Sender<ConnectionState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    handlers: Mutex<Handlers>,
    shutdown: CancellationToken,
    started: AtomicBool,
    gave_up: AtomicBool,
}

enum PumpEnd {
    Shutdown,
    Dropped(String),
}

impl SessionSocket {
    pub fn new(url: impl Into<String>, policy: ReconnectPolicy, client_state: ClientState) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(SocketInner {
                url: url.into(),
                policy,
                client_state,
                state_tx,
                outbound: Mutex::new(None),
                handlers: Mutex::new(Handlers::default()),
                shutdown: CancellationToken::new(),
                started: AtomicBool::new(false),
                gave_up: AtomicBool::new(false),
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Open the channel. Resolves on open; fails if this first dial fails.
    ///
    /// Calling `connect()` on a socket that is already running is a no-op.
    pub async fn connect(&self) -> ClientResult<()> {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return Err(ClientError::Connection("socket was closed".to_string()));
        }
        if inner.started.swap(true, Ordering::SeqCst) {
            debug!(url = %inner.url, "connect() called on a running socket");
            return Ok(());
        }

        inner.set_state(ConnectionState::Connecting);
        info!(url = %inner.url, "Connecting");

        let stream = match connect_async(inner.url.as_str()).await {
            Ok((stream, _response)) => stream,
            Err(err) => {
                inner.started.store(false, Ordering::SeqCst);
                inner.set_state(ConnectionState::Disconnected);
                error!(url = %inner.url, error = %err, "WebSocket connection failed");
                return Err(ClientError::Connection(format!(
                    "failed to connect to {}: {}",
                    inner.url, err
                )));
            }
        };

        if inner.shutdown.is_cancelled() {
            inner.set_state(ConnectionState::Disconnected);
            return Err(ClientError::Connection("socket closed while connecting".to_string()));
        }

        let outbound_rx = inner.open_outbound();
        inner.set_state(ConnectionState::Connected);
        info!(url = %inner.url, "Connection opened");

        tokio::spawn(Arc::clone(inner).run(stream, outbound_rx));
        Ok(())
    }

    /// Register the handler for one message type. Last registration wins.
    pub fn on<F>(&self, message_type: &str, handler: F)
    where
        F: FnMut(&Envelope) + Send + 'static,
    {
        self.inner
            .handlers()
            .typed
            .insert(message_type.to_string(), Box::new(handler));
    }

    /// Register the handler invoked for every inbound message, after the typed handler.
    pub fn on_any<F>(&self, handler: F)
    where
        F: FnMut(&Envelope) + Send + 'static,
    {
        self.inner.handlers().wildcard = Some(Box::new(handler));
    }

    /// Register the handler invoked after each successful automatic reconnect,
    /// with the attempt number that succeeded.
    pub fn on_reconnect<F>(&self, handler: F)
    where
        F: FnMut(u32, &Outbox) + Send + 'static,
    {
        self.inner.handlers().reconnect = Some(Box::new(handler));
    }

    /// Send a message if the channel is open.
    ///
    /// Sending on a closed channel is expected (user action racing teardown): it is
    /// logged, counted and reported as `false`, never an error.
    pub fn send<T: Serialize>(&self, message: &T) -> bool {
        match self.inner.outbox() {
            Some(outbox) => outbox.send(message),
            None => {
                self.inner.client_state.record_send_refused();
                warn!(url = %self.inner.url, state = %self.state(), "Cannot send - WebSocket is not connected");
                false
            }
        }
    }

    /// Explicit teardown. No reconnect happens after this.
    pub fn close(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        info!(url = %self.inner.url, "Closing connection");
        self.inner.shutdown.cancel();
        *self.inner.outbound_slot() = None;
        self.inner.set_state(ConnectionState::Disconnected);
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch connection state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// True once reconnects were exhausted. The caller should show a persistent
    /// "disconnected" indicator; nothing will bring this socket back.
    pub fn gave_up(&self) -> bool {
        self.inner.gave_up.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    pub fn downgrade(&self) -> WeakSessionSocket {
        WeakSessionSocket {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl SocketInner {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(url = %self.url, from = %previous, to = %state, "Connection state changed");
        }
    }

    fn handlers(&self) -> std::sync::MutexGuard<'_, Handlers> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn outbound_slot(&self) -> std::sync::MutexGuard<'_, Option<mpsc::UnboundedSender<String>>> {
        self.outbound.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open_outbound(&self) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.outbound_slot() = Some(tx);
        rx
    }

    /// Stop accepting frames for a finished connection and count the ones left unwritten.
    /// A racing `Outbox::send` sees the closed channel and reports `false`.
    fn retire_outbound(&self, outbound_rx: &mut mpsc::UnboundedReceiver<String>) -> usize {
        outbound_rx.close();
        *self.outbound_slot() = None;
        let mut lost = 0;
        while outbound_rx.try_recv().is_ok() {
            lost += 1;
        }
        lost
    }

    fn outbox(&self) -> Option<Outbox> {
        self.outbound_slot().as_ref().map(|tx| Outbox {
            tx: tx.clone(),
            client_state: self.client_state.clone(),
        })
    }

    async fn run(
        self: Arc<Self>,
        mut stream: WsStream,
        mut outbound_rx: mpsc::UnboundedReceiver<String>,
    ) {
        loop {
            let end = self.pump(stream, &mut outbound_rx).await;
            let lost = self.retire_outbound(&mut outbound_rx);
            if lost > 0 {
                warn!(url = %self.url, lost, "Queued frames were not written before the connection ended");
            }
            self.set_state(ConnectionState::Disconnected);

            match end {
                PumpEnd::Shutdown => {
                    info!(url = %self.url, "Connection closed by client");
                    return;
                }
                PumpEnd::Dropped(reason) => {
                    warn!(url = %self.url, reason = %reason, "Connection lost");
                }
            }

            match self.reconnect().await {
                Some((next_stream, next_rx)) => {
                    stream = next_stream;
                    outbound_rx = next_rx;
                }
                None => return,
            }
        }
    }

    async fn pump(
        &self,
        stream: WsStream,
        outbound_rx: &mut mpsc::UnboundedReceiver<String>,
    ) -> PumpEnd {
        let (mut write, mut read) = stream.split();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    if let Err(err) = write.send(WsMessage::Close(None)).await {
                        debug!(error = %err, "Close frame not delivered");
                    }
                    return PumpEnd::Shutdown;
                }
                frame = read.next() => {
                    match frame {
                        Some(Ok(WsMessage::Text(text))) => self.dispatch(&text),
                        Some(Ok(WsMessage::Binary(data))) => {
                            warn!(bytes = data.len(), "Ignoring unexpected binary frame");
                        }
                        Some(Ok(WsMessage::Close(reason))) => {
                            return PumpEnd::Dropped(format!("closed by server: {:?}", reason));
                        }
                        // Ping/Pong are answered by tungstenite
                        Some(Ok(_)) => {}
                        Some(Err(err)) => return PumpEnd::Dropped(format!("read error: {}", err)),
                        None => return PumpEnd::Dropped("stream ended".to_string()),
                    }
                }
                Some(json) = outbound_rx.recv() => {
                    if let Err(err) = write.send(WsMessage::Text(json)).await {
                        return PumpEnd::Dropped(format!("send error: {}", err));
                    }
                }
            }
        }
    }

    fn dispatch(&self, text: &str) {
        let envelope = match Envelope::parse(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                self.client_state.record_malformed();
                error!(url = %self.url, error = %err, "Dropping malformed message");
                return;
            }
        };

        self.client_state.record_inbound(&envelope.kind);
        debug!(message_type = %envelope.kind, "Message received");
        self.handlers().dispatch(&envelope);
    }

    async fn reconnect(&self) -> Option<(WsStream, mpsc::UnboundedReceiver<String>)> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let Some(delay) = self.policy.delay_for(attempt) else {
                error!(
                    url = %self.url,
                    attempts = self.policy.max_attempts,
                    "Giving up on reconnect"
                );
                self.gave_up.store(true, Ordering::SeqCst);
                self.set_state(ConnectionState::Disconnected);
                return None;
            };

            info!(
                url = %self.url,
                attempt,
                max = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "Reconnect scheduled"
            );

            tokio::select! {
                _ = self.shutdown.cancelled() => return None,
                _ = tokio::time::sleep(delay) => {}
            }

            self.client_state.record_reconnect_attempt();
            self.set_state(ConnectionState::Connecting);

            match connect_async(self.url.as_str()).await {
                Ok((stream, _response)) => {
                    if self.shutdown.is_cancelled() {
                        self.set_state(ConnectionState::Disconnected);
                        return None;
                    }
                    let outbound_rx = self.open_outbound();
                    self.set_state(ConnectionState::Connected);
                    info!(url = %self.url, attempt, "Reconnected");

                    if let Some(outbox) = self.outbox() {
                        if let Some(handler) = self.handlers().reconnect.as_mut() {
                            handler(attempt, &outbox);
                        }
                    }
                    return Some((stream, outbound_rx));
                }
                Err(err) => {
                    warn!(url = %self.url, attempt, error = %err, "Reconnect failed");
                    self.set_state(ConnectionState::Disconnected);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_linear_backoff_with_cap() {
        let policy = ReconnectPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_for(0), None);
        assert_eq!(policy.delay_for(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay_for(3), Some(Duration::from_millis(300)));
        assert_eq!(policy.delay_for(4), None);
    }

    #[test]
    fn test_typed_handler_runs_before_wildcard_and_last_registration_wins() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handlers = Handlers::default();

        let o = Arc::clone(&order);
        handlers
            .typed
            .insert("ai_message".into(), Box::new(move |_| o.lock().unwrap().push("first")));
        let o = Arc::clone(&order);
        handlers
            .typed
            .insert("ai_message".into(), Box::new(move |_| o.lock().unwrap().push("typed")));
        let o = Arc::clone(&order);
        handlers.wildcard = Some(Box::new(move |_| o.lock().unwrap().push("wildcard")));

        let env = Envelope::parse(r#"{"type": "ai_message", "text": "hi"}"#).unwrap();
        handlers.dispatch(&env);
        let env = Envelope::parse(r#"{"type": "streaming_end"}"#).unwrap();
        handlers.dispatch(&env);

        assert_eq!(*order.lock().unwrap(), vec!["typed", "wildcard", "wildcard"]);
    }

    #[tokio::test]
    async fn test_send_before_connect_is_a_reported_no_op() {
        let state = ClientState::new(AppConfig::default());
        let socket = SessionSocket::new("ws://127.0.0.1:9/ws/trial/x", ReconnectPolicy::default(), state.clone());

        assert!(!socket.send(&json!({"type": "audio", "audio": ""})));
        assert_eq!(socket.state(), ConnectionState::Disconnected);
        assert_eq!(state.get_metrics_snapshot().sends_refused, 1);
    }

    #[test]
    fn test_retired_outbound_refuses_and_counts_unwritten() {
        let state = ClientState::new(AppConfig::default());
        let socket = SessionSocket::new("ws://unused", ReconnectPolicy::default(), state.clone());
        let mut rx = socket.inner.open_outbound();
        let outbox = socket.inner.outbox().unwrap();

        assert!(outbox.send(&json!({"type": "text", "text": "one"})));
        assert!(outbox.send(&json!({"type": "text", "text": "two"})));
        assert_eq!(socket.inner.retire_outbound(&mut rx), 2);

        // A handle taken before the drop must not report success
        assert!(!outbox.send(&json!({"type": "text", "text": "three"})));
        assert!(!socket.send(&json!({"type": "text", "text": "four"})));
        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.messages_sent, 2);
        assert_eq!(metrics.sends_refused, 2);
    }

    #[tokio::test]
    async fn test_connect_after_close_fails() {
        let socket = SessionSocket::new(
            "ws://127.0.0.1:9/ws/trial/x",
            ReconnectPolicy::default(),
            ClientState::new(AppConfig::default()),
        );
        socket.close();
        assert!(socket.is_closed());
        assert!(matches!(socket.connect().await, Err(ClientError::Connection(_))));
    }

    #[test]
    fn test_malformed_frames_are_counted_not_dispatched() {
        let state = ClientState::new(AppConfig::default());
        let socket = SessionSocket::new("ws://unused", ReconnectPolicy::default(), state.clone());
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        socket.on_any(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        socket.inner.dispatch("not json at all");
        socket.inner.dispatch(r#"{"no_type": true}"#);
        socket.inner.dispatch(r#"{"type": "processing"}"#);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.malformed_dropped, 2);
        assert_eq!(metrics.messages_received, 1);
    }
}
