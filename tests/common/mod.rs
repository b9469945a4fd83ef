//! In-process WebSocket backend for integration tests.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;

use trial_session_client::config::AppConfig;
use trial_session_client::state::ClientState;

pub const WAIT: Duration = Duration::from_secs(5);

/// Accepts WebSocket upgrades on an ephemeral port and hands each one to the test.
pub struct TestServer {
    pub addr: SocketAddr,
    connections: mpsc::UnboundedReceiver<ServerConn>,
    accept_task: JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, connections) = mpsc::unbounded_channel();

        let accept_task = tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                if let Ok(ws) = tokio_tungstenite::accept_async(tcp).await {
                    if tx.send(ServerConn { ws }).is_err() {
                        return;
                    }
                }
            }
        });

        Self {
            addr,
            connections,
            accept_task,
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Next accepted connection.
    pub async fn accept(&mut self) -> ServerConn {
        tokio::time::timeout(WAIT, self.connections.recv())
            .await
            .expect("no client connected in time")
            .expect("accept loop ended")
    }

    /// Asserts no client dials within `window`.
    pub async fn expect_no_connection(&mut self, window: Duration) {
        if let Ok(Some(_)) = tokio::time::timeout(window, self.connections.recv()).await {
            panic!("client connected unexpectedly");
        }
    }

    /// Stop listening. Further dials are refused.
    pub fn stop_accepting(&self) {
        self.accept_task.abort();
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

pub struct ServerConn {
    ws: WebSocketStream<TcpStream>,
}

impl ServerConn {
    pub async fn send_json(&mut self, value: Value) {
        self.ws.send(WsMessage::Text(value.to_string())).await.unwrap();
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.ws.send(WsMessage::Text(text.to_string())).await.unwrap();
    }

    /// Next JSON text frame from the client, or `None` if the client went away.
    pub async fn recv_json(&mut self) -> Option<Value> {
        loop {
            let frame = tokio::time::timeout(WAIT, self.ws.next()).await.ok()??;
            match frame {
                Ok(WsMessage::Text(text)) => return serde_json::from_str(&text).ok(),
                Ok(WsMessage::Close(_)) | Err(_) => return None,
                Ok(_) => continue,
            }
        }
    }

    /// Asserts nothing arrives within `window`.
    pub async fn expect_silence(&mut self, window: Duration) {
        if let Ok(Some(Ok(WsMessage::Text(text)))) =
            tokio::time::timeout(window, self.ws.next()).await
        {
            panic!("unexpected frame from client: {text}");
        }
    }

    /// Drop the TCP connection without a close handshake.
    pub fn kill(self) {
        drop(self);
    }
}

/// Configuration pointing at `server` with fast reconnects.
pub fn test_state(server: &TestServer, max_attempts: u32) -> ClientState {
    let mut config = AppConfig::default();
    config.server.ws_url = server.ws_url();
    config.server.http_url = format!("http://{}", server.addr);
    config.connection.max_reconnect_attempts = max_attempts;
    config.connection.reconnect_base_delay_ms = 20;
    config.audio.speaking_fallback_ms = 200;
    ClientState::new(config)
}

/// Poll `condition` until it holds or the wait expires.
pub async fn eventually<F: FnMut() -> bool>(mut condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
