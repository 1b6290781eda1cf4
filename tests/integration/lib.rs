//! Shared harness for end-to-end bridge tests.
//!
//! [`FakeGateway`] plays the upstream gateway on a loopback port, [`Client`]
//! plays a downstream chat client, and [`TestBridge`] runs a real bridge
//! between them.

use clawbridge_core::config::BindMode;
use clawbridge_core::{Identity, ResolvedSettings, SecretString};
use clawbridge_gateway::Bridge;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Upper bound for any single expected event.
pub const WAIT: Duration = Duration::from_secs(5);

/// Reconnect delay used by test bridges.
pub const RECONNECT_DELAY: Duration = Duration::from_millis(200);

/// A request the bridge sent upstream.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub id: String,
    pub method: String,
    pub params: Value,
}

/// Fake upstream gateway accepting WebSocket connections on loopback.
pub struct FakeGateway {
    addr: SocketAddr,
    connections: mpsc::UnboundedReceiver<UpstreamConn>,
    accept_task: JoinHandle<()>,
}

impl FakeGateway {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, connections) = mpsc::unbounded_channel();

        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                    if tx.send(UpstreamConn { ws }).is_err() {
                        break;
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

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Wait for the bridge to connect.
    pub async fn accept(&mut self) -> UpstreamConn {
        tokio::time::timeout(WAIT, self.connections.recv())
            .await
            .expect("bridge did not connect upstream")
            .expect("gateway listener stopped")
    }

    /// Wait for a connection and complete its handshake.
    pub async fn accept_ready(&mut self, session_key: &str) -> UpstreamConn {
        let mut conn = self.accept().await;
        conn.complete_handshake(Some(session_key)).await;
        conn
    }
}

impl Drop for FakeGateway {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

/// One upstream connection, seen from the gateway side.
pub struct UpstreamConn {
    ws: WebSocketStream<TcpStream>,
}

impl UpstreamConn {
    /// Next request frame from the bridge.
    pub async fn next_request(&mut self) -> UpstreamRequest {
        loop {
            let msg = tokio::time::timeout(WAIT, self.ws.next())
                .await
                .expect("no request from bridge")
                .expect("bridge closed the connection")
                .expect("transport error");
            if let Message::Text(text) = msg {
                let frame: Value = serde_json::from_str(&text).unwrap();
                assert_eq!(frame["type"], "req");
                return UpstreamRequest {
                    id: frame["id"].as_str().unwrap().to_string(),
                    method: frame["method"].as_str().unwrap().to_string(),
                    params: frame["params"].clone(),
                };
            }
        }
    }

    /// Wait until the bridge hangs up.
    pub async fn expect_closed(&mut self) {
        loop {
            match tokio::time::timeout(WAIT, self.ws.next())
                .await
                .expect("bridge kept the connection open")
            {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return,
                Some(Ok(_)) => continue,
            }
        }
    }

    pub async fn send_raw(&mut self, text: impl Into<String>) {
        self.ws.send(Message::Text(text.into())).await.unwrap();
    }

    pub async fn reply(&mut self, id: &str, payload: Value) {
        self.send_raw(json!({"type": "res", "id": id, "ok": true, "payload": payload}).to_string())
            .await;
    }

    pub async fn reject(&mut self, id: &str, message: &str) {
        self.send_raw(
            json!({"type": "res", "id": id, "ok": false, "error": {"message": message}})
                .to_string(),
        )
        .await;
    }

    pub async fn event(&mut self, event: &str, payload: Value) {
        self.send_raw(json!({"type": "event", "event": event, "payload": payload}).to_string())
            .await;
    }

    /// Streamed chat delta whose message carries `text`.
    pub async fn chat_delta(&mut self, run_id: &str, text: &str) {
        self.event(
            "chat",
            json!({
                "state": "delta",
                "runId": run_id,
                "message": {"role": "assistant", "content": [{"type": "text", "text": text}]}
            }),
        )
        .await;
    }

    /// Answer the `connect` request. Returns its params.
    pub async fn complete_handshake(&mut self, session_key: Option<&str>) -> Value {
        let request = self.next_request().await;
        assert_eq!(request.method, "connect");

        let payload = match session_key {
            Some(key) => json!({"snapshot": {"sessionDefaults": {"mainSessionKey": key}}}),
            None => json!({}),
        };
        self.reply(&request.id, payload).await;
        request.params
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

/// A downstream client.
pub struct Client {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Client {
    pub async fn connect(addr: SocketAddr) -> Self {
        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
            .await
            .expect("client connect");
        Self { ws }
    }

    pub async fn send(&mut self, value: Value) {
        self.ws.send(Message::Text(value.to_string())).await.unwrap();
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.ws.send(Message::Text(text.to_string())).await.unwrap();
    }

    /// Next JSON message.
    pub async fn recv(&mut self) -> Value {
        loop {
            let msg = tokio::time::timeout(WAIT, self.ws.next())
                .await
                .expect("no message from bridge")
                .expect("bridge closed the client connection")
                .expect("transport error");
            if let Message::Text(text) = msg {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    /// Next message of the given `type`, skipping others.
    pub async fn recv_type(&mut self, kind: &str) -> Value {
        loop {
            let value = self.recv().await;
            if value["type"] == kind {
                return value;
            }
        }
    }

    /// Assert nothing arrives for `window`.
    pub async fn expect_silence(&mut self, window: Duration) {
        if let Ok(Some(Ok(Message::Text(text)))) = tokio::time::timeout(window, self.ws.next()).await {
            panic!("unexpected message: {}", text);
        }
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

/// A bridge serving on an ephemeral loopback port.
pub struct TestBridge {
    pub addr: SocketAddr,
    pub bridge: Arc<Bridge>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestBridge {
    pub async fn start(upstream_url: &str) -> Self {
        Self::start_with(settings(upstream_url), Identity::new("Tron", "Alan")).await
    }

    pub async fn start_with(settings: ResolvedSettings, identity: Identity) -> Self {
        let bridge = Arc::new(Bridge::new(&settings, identity));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown, signal) = oneshot::channel::<()>();

        {
            let bridge = bridge.clone();
            tokio::spawn(async move {
                let _ = bridge
                    .serve(listener, async {
                        let _ = signal.await;
                    })
                    .await;
            });
        }

        Self {
            addr,
            bridge,
            shutdown: Some(shutdown),
        }
    }

    pub async fn client(&self) -> Client {
        Client::connect(self.addr).await
    }

    pub fn health_url(&self) -> String {
        format!("http://{}/health", self.addr)
    }
}

impl Drop for TestBridge {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Settings for a loopback test bridge.
pub fn settings(upstream_url: &str) -> ResolvedSettings {
    ResolvedSettings {
        bind: BindMode::Loopback,
        port: 0,
        static_dir: None,
        upstream_url: upstream_url.to_string(),
        token: Some(SecretString::new("test-token")),
        request_timeout: Duration::from_secs(10),
        reconnect_delay: RECONNECT_DELAY,
        session_key: "main".to_string(),
        workspace: PathBuf::from("/nonexistent"),
    }
}

/// A loopback URL nothing listens on.
pub async fn dead_upstream_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{}", addr)
}
