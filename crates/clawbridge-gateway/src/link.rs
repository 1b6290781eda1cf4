//! Upstream link management.
//!
//! [`LinkState`] is the single state-machine object for the upstream
//! connection: `Disconnected → Connecting → Handshaking → Connected →
//! Disconnected`. Every component that needs link or session state gets it
//! injected; transitions are its only mutation points.
//!
//! [`UpstreamLink`] drives the machine: it opens the transport through a
//! [`Connector`], performs the handshake, feeds inbound frames to the router
//! in arrival order, and reconnects after a fixed delay forever.

use crate::correlator::Correlator;
use crate::error::BridgeError;
use crate::hub::Hub;
use crate::protocol::ServerMessage;
use crate::router::EventRouter;
use crate::Result;
use async_trait::async_trait;
use clawbridge_core::{ResolvedSettings, SecretString};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Upstream protocol version spoken by the bridge.
pub const PROTOCOL_VERSION: u32 = 3;

/// Client identifier announced in the handshake.
pub const CLIENT_ID: &str = "gateway-client";

/// Default delay between a disconnect and the next connection attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Upstream link phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkPhase {
    Disconnected,
    Connecting,
    Handshaking,
    Connected,
}

#[derive(Debug)]
struct LinkInner {
    phase: LinkPhase,
    /// Connection handle: frames queued here are written to the transport.
    outbound: Option<mpsc::UnboundedSender<String>>,
    session_key: String,
    run_id: Option<String>,
    reconnect_at: Option<Instant>,
}

/// Point-in-time view of the link, for health reporting.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkSnapshot {
    pub phase: LinkPhase,
    pub connected: bool,
    pub ready: bool,
    pub session_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

/// Process-wide upstream link and session state.
#[derive(Debug)]
pub struct LinkState {
    inner: Mutex<LinkInner>,
}

impl LinkState {
    /// Create a disconnected link with an initial session key.
    pub fn new(session_key: impl Into<String>) -> Self {
        Self {
            inner: Mutex::new(LinkInner {
                phase: LinkPhase::Disconnected,
                outbound: None,
                session_key: session_key.into(),
                run_id: None,
                reconnect_at: None,
            }),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> LinkPhase {
        self.inner.lock().phase
    }

    /// Whether a transport is open. Requests may be sent from this point on,
    /// including the handshake itself.
    pub fn is_open(&self) -> bool {
        self.inner.lock().outbound.is_some()
    }

    /// Whether the handshake completed; domain commands are gated on this.
    pub fn is_ready(&self) -> bool {
        let inner = self.inner.lock();
        inner.phase == LinkPhase::Connected && inner.outbound.is_some()
    }

    /// Active session key.
    pub fn session_key(&self) -> String {
        self.inner.lock().session_key.clone()
    }

    /// Run currently in flight, if any.
    pub fn run_id(&self) -> Option<String> {
        self.inner.lock().run_id.clone()
    }

    /// When the next connection attempt is due, if one is scheduled.
    pub fn reconnect_at(&self) -> Option<Instant> {
        self.inner.lock().reconnect_at
    }

    /// Handle for queueing frames on the open transport.
    pub fn sender(&self) -> Option<mpsc::UnboundedSender<String>> {
        self.inner.lock().outbound.clone()
    }

    /// Snapshot for reporting.
    pub fn snapshot(&self) -> LinkSnapshot {
        let inner = self.inner.lock();
        LinkSnapshot {
            phase: inner.phase,
            connected: inner.outbound.is_some(),
            ready: inner.phase == LinkPhase::Connected && inner.outbound.is_some(),
            session_key: inner.session_key.clone(),
            run_id: inner.run_id.clone(),
        }
    }

    /// `Disconnected → Connecting`. Returns false if an attempt is already
    /// outstanding or a connection is up.
    pub fn begin_connect(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.phase != LinkPhase::Disconnected {
            return false;
        }
        inner.phase = LinkPhase::Connecting;
        inner.reconnect_at = None;
        true
    }

    /// `Connecting → Disconnected` when the transport could not be opened.
    pub fn connect_failed(&self) {
        let mut inner = self.inner.lock();
        if inner.phase == LinkPhase::Connecting {
            inner.phase = LinkPhase::Disconnected;
        }
    }

    /// `Connecting → Handshaking`: the transport is open.
    pub fn transport_opened(&self, outbound: mpsc::UnboundedSender<String>) {
        let mut inner = self.inner.lock();
        inner.phase = LinkPhase::Handshaking;
        inner.outbound = Some(outbound);
    }

    /// `Handshaking → Connected`. Adopts the upstream's default session key
    /// when one is given. Returns false if the link left `Handshaking`.
    pub fn handshake_completed(&self, session_default: Option<String>) -> bool {
        let mut inner = self.inner.lock();
        if inner.phase != LinkPhase::Handshaking {
            return false;
        }
        inner.phase = LinkPhase::Connected;
        if let Some(key) = session_default.filter(|k| !k.is_empty()) {
            inner.session_key = key;
        }
        true
    }

    /// Any phase `→ Disconnected`, discarding the connection handle.
    /// Returns whether a transport had been open.
    pub fn transport_closed(&self) -> bool {
        let mut inner = self.inner.lock();
        inner.phase = LinkPhase::Disconnected;
        inner.outbound.take().is_some()
    }

    /// Record that the next attempt is due after `delay`.
    pub fn schedule_reconnect(&self, delay: Duration) -> Instant {
        let at = Instant::now() + delay;
        self.inner.lock().reconnect_at = Some(at);
        at
    }

    /// Mark a run as in flight.
    pub fn start_run(&self, run_id: impl Into<String>) {
        self.inner.lock().run_id = Some(run_id.into());
    }

    /// Forget the in-flight run.
    pub fn clear_run(&self) {
        self.inner.lock().run_id = None;
    }
}

/// An open upstream transport, as a pair of text-frame queues.
///
/// Dropping `outbound` (and every clone of it) closes the transport; `inbound`
/// yields `None` once the transport has closed.
pub struct Transport {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<String>,
}

/// Opens upstream transports.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<Transport>;
}

/// WebSocket connector over `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Transport> {
        let (socket, _) = tokio_tungstenite::connect_async(url).await?;
        let (mut sink, mut stream) = socket.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    warn!("Upstream write failed: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                let text = match msg {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(_) => {
                            debug!("Dropping non-UTF-8 binary frame from upstream");
                            continue;
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        info!("Upstream closed connection: {:?}", frame);
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        warn!("Upstream transport error: {}", e);
                        break;
                    }
                };
                if in_tx.send(text).is_err() {
                    break;
                }
            }
        });

        Ok(Transport {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

/// Upstream link options.
#[derive(Debug, Clone)]
pub struct LinkOptions {
    pub url: String,
    pub token: Option<SecretString>,
    pub reconnect_delay: Duration,
}

impl LinkOptions {
    pub fn from_settings(settings: &ResolvedSettings) -> Self {
        Self {
            url: settings.upstream_url.clone(),
            token: settings.token.clone(),
            reconnect_delay: settings.reconnect_delay,
        }
    }
}

/// Owns the single upstream connection and keeps it alive.
pub struct UpstreamLink {
    options: LinkOptions,
    link: Arc<LinkState>,
    correlator: Arc<Correlator>,
    router: EventRouter,
    hub: Arc<Hub>,
    connector: Arc<dyn Connector>,
}

impl UpstreamLink {
    pub fn new(
        options: LinkOptions,
        link: Arc<LinkState>,
        correlator: Arc<Correlator>,
        router: EventRouter,
        hub: Arc<Hub>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            options,
            link,
            correlator,
            router,
            hub,
            connector,
        }
    }

    /// Connect, serve, and reconnect forever.
    pub async fn run(self: Arc<Self>) {
        loop {
            self.connect_once().await;

            let at = self
                .link
                .reconnect_at()
                .unwrap_or_else(|| Instant::now() + self.options.reconnect_delay);
            tokio::time::sleep_until(at).await;
        }
    }

    /// One connection attempt, served until the transport closes.
    async fn connect_once(self: &Arc<Self>) {
        if !self.link.begin_connect() {
            return;
        }

        info!("Connecting to upstream gateway at {}", self.options.url);
        let transport = match self.connector.connect(&self.options.url).await {
            Ok(transport) => transport,
            Err(e) => {
                warn!("Upstream connection failed: {}", e);
                self.link.connect_failed();
                self.link.schedule_reconnect(self.options.reconnect_delay);
                return;
            }
        };

        self.serve(transport).await;
    }

    async fn serve(self: &Arc<Self>, transport: Transport) {
        let Transport {
            outbound,
            mut inbound,
        } = transport;

        self.link.transport_opened(outbound);
        info!("Upstream transport open, handshaking");

        let abandon = Arc::new(Notify::new());
        tokio::spawn(self.clone().handshake(abandon.clone()));

        // Frames are handled one at a time, in arrival order.
        loop {
            tokio::select! {
                frame = inbound.recv() => match frame {
                    Some(text) => self.router.handle_frame(&text),
                    None => break,
                },
                _ = abandon.notified() => {
                    warn!("Dropping upstream connection after failed handshake");
                    break;
                }
            }
        }

        drop(inbound);
        self.on_transport_closed();
    }

    /// `Connected → Disconnected` side effects, in order: mark the link
    /// down and drop its handle, tell every client, fail every pending
    /// request, schedule the reconnect.
    pub fn on_transport_closed(&self) {
        let was_open = self.link.transport_closed();
        info!("Upstream disconnected");

        if was_open {
            self.hub.broadcast(&ServerMessage::Status {
                connected: false,
                agent_name: None,
                user_name: None,
            });
        }

        let failed = self.correlator.flush();
        if failed > 0 {
            debug!(failed, "Failed pending requests after link loss");
        }

        self.link.schedule_reconnect(self.options.reconnect_delay);
    }

    async fn handshake(self: Arc<Self>, abandon: Arc<Notify>) {
        let params = self.handshake_params();

        match self.correlator.send(&self.link, "connect", params).await {
            Ok(hello) => {
                let session_default = hello
                    .pointer("/snapshot/sessionDefaults/mainSessionKey")
                    .and_then(Value::as_str)
                    .map(str::to_string);

                if !self.link.handshake_completed(session_default) {
                    debug!("Handshake finished after the link moved on; ignoring");
                    return;
                }

                let session_key = self.link.session_key();
                info!(session_key = %session_key, "Upstream handshake complete");
                self.hub.announce_ready(&session_key);
            }
            Err(BridgeError::NotConnected) => {
                debug!("Handshake abandoned: link lost");
            }
            Err(e) => {
                warn!("Upstream handshake failed: {}", e);
                abandon.notify_one();
            }
        }
    }

    /// Parameters of the `connect` request.
    pub fn handshake_params(&self) -> Value {
        let mut params = json!({
            "minProtocol": PROTOCOL_VERSION,
            "maxProtocol": PROTOCOL_VERSION,
            "client": {
                "id": CLIENT_ID,
                "version": env!("CARGO_PKG_VERSION"),
                "platform": std::env::consts::OS,
                "mode": "backend",
                "instanceId": uuid::Uuid::new_v4().to_string(),
            },
            "role": "operator",
            "scopes": ["operator.admin"],
            "caps": [],
        });

        if let Some(token) = self.options.token.as_ref().filter(|t| !t.is_empty()) {
            params["auth"] = json!({ "token": token.expose_secret() });
        }

        params
    }
}
