//! Downstream HTTP/WebSocket server.

use crate::correlator::Correlator;
use crate::error::BridgeError;
use crate::hub::Hub;
use crate::link::{Connector, LinkOptions, LinkState, UpstreamLink, WsConnector};
use crate::reassembler::StreamReassembler;
use crate::router::EventRouter;
use crate::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use clawbridge_core::config::BindMode;
use clawbridge_core::{Identity, ResolvedSettings};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeFile;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Default downstream port.
pub const DEFAULT_PORT: u16 = 3100;

/// Origins allowed for CORS and WebSocket origin validation.
const ALLOWED_ORIGINS: &[&str] = &[
    "http://localhost",
    "http://127.0.0.1",
    "https://localhost",
    "https://127.0.0.1",
];

/// State shared with request handlers.
struct ServerState {
    hub: Arc<Hub>,
    link: Arc<LinkState>,
    bind: BindMode,
}

impl ServerState {
    /// Validate the WebSocket Origin header.
    fn validate_origin(&self, headers: &HeaderMap) -> bool {
        if self.bind == BindMode::Loopback {
            return true;
        }

        let origin = match headers.get(header::ORIGIN).and_then(|v| v.to_str().ok()) {
            Some(o) => o,
            None => return true, // non-browser client
        };

        // Prefix match to allow any port
        if ALLOWED_ORIGINS.iter().any(|allowed| origin.starts_with(allowed)) {
            return true;
        }

        warn!("Rejected WebSocket connection from untrusted origin: {}", origin);
        false
    }
}

/// The bridge: one upstream link, many downstream clients.
pub struct Bridge {
    bind: BindMode,
    port: u16,
    static_dir: Option<PathBuf>,
    state: Arc<ServerState>,
    upstream: Arc<UpstreamLink>,
}

impl Bridge {
    /// Create a bridge that connects upstream over WebSocket.
    pub fn new(settings: &ResolvedSettings, identity: Identity) -> Self {
        Self::with_connector(settings, identity, Arc::new(WsConnector))
    }

    /// Create a bridge with a custom upstream connector.
    pub fn with_connector(
        settings: &ResolvedSettings,
        identity: Identity,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let link = Arc::new(LinkState::new(settings.session_key.clone()));
        let correlator = Arc::new(Correlator::new(settings.request_timeout));
        let reassembler = StreamReassembler::shared();

        let hub = Arc::new(Hub::new(
            identity,
            link.clone(),
            correlator.clone(),
            reassembler.clone(),
        ));
        let router = EventRouter::new(link.clone(), correlator.clone(), reassembler, hub.clone());
        let upstream = Arc::new(UpstreamLink::new(
            LinkOptions::from_settings(settings),
            link.clone(),
            correlator,
            router,
            hub.clone(),
            connector,
        ));

        Self {
            bind: settings.bind,
            port: settings.port,
            static_dir: settings.static_dir.clone(),
            state: Arc::new(ServerState {
                hub,
                link,
                bind: settings.bind,
            }),
            upstream,
        }
    }

    /// Downstream client hub.
    pub fn hub(&self) -> &Arc<Hub> {
        &self.state.hub
    }

    /// Upstream link state.
    pub fn link(&self) -> &Arc<LinkState> {
        &self.state.link
    }

    /// Address the server binds to.
    pub fn bind_address(&self) -> SocketAddr {
        let ip = match self.bind {
            BindMode::Loopback => [127, 0, 0, 1],
            BindMode::Lan => [0, 0, 0, 0],
        };
        SocketAddr::from((ip, self.port))
    }

    /// Bind and serve until the process ends.
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Bind and serve until `shutdown` resolves.
    pub async fn run_until(&self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        let addr = self.bind_address();

        if self.bind != BindMode::Loopback {
            warn!("========================================");
            warn!("  SECURITY WARNING: bridge binding to {}", addr);
            warn!("  Downstream clients drive the upstream session");
            warn!("  with operator rights and no authentication.");
            warn!("========================================");
        }

        let listener = TcpListener::bind(addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already-bound listener. Starts the upstream link.
    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let local = listener.local_addr()?;
        info!("Bridge listening on http://{}", local);
        info!("WebSocket endpoint: ws://{}/ws", local);

        let upstream = tokio::spawn(self.upstream.clone().run());

        let served = axum::serve(
            listener,
            self.create_router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await;

        upstream.abort();
        served.map_err(|e| BridgeError::Internal(e.to_string()))
    }

    /// Create the axum router.
    pub fn create_router(&self) -> Router {
        let mut router = Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler));

        if let Some(dir) = &self.static_dir {
            router = router.route_service("/", ServeFile::new(dir.join("index.html")));
        }

        router
            .with_state(self.state.clone())
            .layer(Self::create_cors_layer())
            .layer(TraceLayer::new_for_http())
    }

    fn create_cors_layer() -> CorsLayer {
        let origins: Vec<HeaderValue> = ALLOWED_ORIGINS
            .iter()
            .filter_map(|o| HeaderValue::from_str(o).ok())
            .collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE])
            .max_age(std::time::Duration::from_secs(3600))
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<Arc<ServerState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> std::result::Result<impl IntoResponse, StatusCode> {
    if !state.validate_origin(&headers) {
        return Err(StatusCode::FORBIDDEN);
    }

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, addr)))
}

/// Serve one downstream client until it goes away.
async fn handle_socket(socket: WebSocket, state: Arc<ServerState>, remote_addr: SocketAddr) {
    let (client_id, mut outbound) = state.hub.register(Some(remote_addr));
    debug!(client = %client_id, addr = %remote_addr, "WebSocket upgraded");

    let (mut sender, mut receiver) = socket.split();

    // Ends once the hub drops the client's queue.
    tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                // Issued in arrival order; only reply waits run detached.
                state.hub.handle_text(&client_id, &text);
            }
            Ok(Message::Close(_)) => {
                debug!(client = %client_id, "Client closed connection");
                break;
            }
            Err(e) => {
                warn!(client = %client_id, "WebSocket error: {}", e);
                break;
            }
            _ => {}
        }
    }

    state.hub.unregister(&client_id);
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let link = state.link.snapshot();
    Json(json!({
        "status": "ok",
        "clients": state.hub.client_count(),
        "upstream": {
            "connected": link.connected,
            "ready": link.ready,
            "sessionKey": link.session_key,
        },
    }))
}
