//! Downstream client registry and fan-out.
//!
//! Each registered client is an unbounded outbound queue drained by its own
//! socket writer task, so a broadcast never waits on a slow client. Commands
//! from clients are translated into upstream requests here.

use crate::correlator::Correlator;
use crate::error::BridgeError;
use crate::extract::extract_text;
use crate::link::LinkState;
use crate::protocol::{ClientCommand, HistoryEntry, ServerMessage, StreamState};
use crate::reassembler::SharedReassembler;
use chrono::{DateTime, Utc};
use clawbridge_core::Identity;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Number of history messages requested from upstream.
pub const HISTORY_LIMIT: u32 = 100;

/// A registered downstream client.
#[derive(Debug)]
pub struct ClientHandle {
    pub id: String,
    pub connected_at: DateTime<Utc>,
    pub remote_addr: Option<SocketAddr>,
    tx: mpsc::UnboundedSender<String>,
}

/// Fan-out hub for downstream clients.
pub struct Hub {
    clients: DashMap<String, ClientHandle>,
    identity: Identity,
    link: Arc<LinkState>,
    correlator: Arc<Correlator>,
    reassembler: SharedReassembler,
}

impl Hub {
    pub fn new(
        identity: Identity,
        link: Arc<LinkState>,
        correlator: Arc<Correlator>,
        reassembler: SharedReassembler,
    ) -> Self {
        Self {
            clients: DashMap::new(),
            identity,
            link,
            correlator,
            reassembler,
        }
    }

    /// Shared link state.
    pub fn link(&self) -> &Arc<LinkState> {
        &self.link
    }

    /// Register a client and queue its greeting: the current status with
    /// identity, plus `hello` when the link is ready.
    pub fn register(
        &self,
        remote_addr: Option<SocketAddr>,
    ) -> (String, mpsc::UnboundedReceiver<String>) {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::unbounded_channel();

        let ready = self.link.is_ready();
        let mut greeting = vec![ServerMessage::Status {
            connected: ready,
            agent_name: Some(self.identity.agent_name.clone()),
            user_name: Some(self.identity.user_name.clone()),
        }];
        if ready {
            greeting.push(self.hello(self.link.session_key()));
        }
        for message in &greeting {
            queue(&tx, message);
        }

        self.clients.insert(
            id.clone(),
            ClientHandle {
                id: id.clone(),
                connected_at: Utc::now(),
                remote_addr,
                tx,
            },
        );
        info!(client = %id, clients = self.clients.len(), "Client connected");

        (id, rx)
    }

    /// Remove a client. Removing an unknown client is a no-op.
    pub fn unregister(&self, id: &str) -> bool {
        let Some((_, handle)) = self.clients.remove(id) else {
            return false;
        };
        let secs = (Utc::now() - handle.connected_at).num_seconds();
        info!(
            client = %id,
            addr = ?handle.remote_addr,
            connected_secs = secs,
            "Client disconnected"
        );
        true
    }

    /// Number of registered clients.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Send a message to every client whose connection is still open.
    /// Closed clients are skipped; they leave through [`Hub::unregister`].
    /// Returns how many were reached.
    pub fn broadcast(&self, message: &ServerMessage) -> usize {
        let text = match message.to_text() {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to encode broadcast: {}", e);
                return 0;
            }
        };

        let mut delivered = 0;
        for client in self.clients.iter() {
            if client.tx.send(text.clone()).is_ok() {
                delivered += 1;
            } else {
                debug!(client = %client.id, "Skipping closed client");
            }
        }
        delivered
    }

    /// Send a message to one client.
    pub fn send_to(&self, id: &str, message: &ServerMessage) -> bool {
        match self.clients.get(id) {
            Some(client) => queue(&client.tx, message),
            None => false,
        }
    }

    /// Tell every client the link is up and the session ready.
    pub fn announce_ready(&self, session_key: &str) {
        self.broadcast(&ServerMessage::Status {
            connected: true,
            agent_name: Some(self.identity.agent_name.clone()),
            user_name: Some(self.identity.user_name.clone()),
        });
        self.broadcast(&self.hello(session_key.to_string()));
    }

    /// Handle one text frame from a client. Undecodable frames are dropped.
    ///
    /// Everything up to writing the upstream request happens before this
    /// returns, so commands from one client reach upstream in arrival order.
    /// The wait for the reply runs in the returned task.
    pub fn handle_text(self: &Arc<Self>, client_id: &str, text: &str) -> Option<JoinHandle<()>> {
        match ClientCommand::parse(text) {
            Ok(command) => self.handle_command(client_id, command),
            Err(e) => {
                debug!(client = %client_id, "Dropping client frame: {}", e);
                None
            }
        }
    }

    /// Execute a client command. See [`Hub::handle_text`].
    pub fn handle_command(
        self: &Arc<Self>,
        client_id: &str,
        command: ClientCommand,
    ) -> Option<JoinHandle<()>> {
        match command {
            ClientCommand::Chat { message } => self.chat(client_id, message),
            ClientCommand::Abort => self.abort(),
            ClientCommand::History => self.history(client_id),
        }
    }

    fn chat(self: &Arc<Self>, client_id: &str, message: Option<String>) -> Option<JoinHandle<()>> {
        let text = message
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())?;

        if !self.link.is_ready() {
            self.send_to(
                client_id,
                &ServerMessage::error(BridgeError::NotConnected.client_message()),
            );
            return None;
        }

        let run_id = uuid::Uuid::new_v4().to_string();
        self.link.start_run(run_id.clone());
        self.reassembler.lock().reset(Some(run_id.clone()));
        self.broadcast(&ServerMessage::stream_state(
            StreamState::Start,
            Some(run_id.clone()),
        ));

        let params = json!({
            "sessionKey": self.link.session_key(),
            "message": text,
            "deliver": false,
            "idempotencyKey": &run_id,
        });

        let reply = match self.correlator.start(&self.link, "chat.send", params) {
            Ok(reply) => reply,
            Err(e) => {
                self.chat_failed(client_id, &run_id, e);
                return None;
            }
        };

        let hub = self.clone();
        let client_id = client_id.to_string();
        Some(tokio::spawn(async move {
            if let Err(e) = reply.wait().await {
                hub.chat_failed(&client_id, &run_id, e);
            }
        }))
    }

    fn chat_failed(&self, client_id: &str, run_id: &str, error: BridgeError) {
        warn!(run_id = %run_id, "chat.send failed: {}", error);
        self.link.clear_run();
        self.send_to(client_id, &ServerMessage::error(error.client_message()));
    }

    fn abort(&self) -> Option<JoinHandle<()>> {
        if !self.link.is_ready() {
            return None;
        }

        let mut params = json!({ "sessionKey": self.link.session_key() });
        if let Some(run_id) = self.link.run_id() {
            params["runId"] = Value::String(run_id);
        }

        match self.correlator.start(&self.link, "chat.abort", params) {
            Ok(reply) => Some(tokio::spawn(async move {
                if let Err(e) = reply.wait().await {
                    warn!("chat.abort failed: {}", e);
                }
            })),
            Err(e) => {
                warn!("chat.abort failed: {}", e);
                None
            }
        }
    }

    fn history(self: &Arc<Self>, client_id: &str) -> Option<JoinHandle<()>> {
        let reply = if self.link.is_ready() {
            let params = json!({
                "sessionKey": self.link.session_key(),
                "limit": HISTORY_LIMIT,
            });
            self.correlator
                .start(&self.link, "chat.history", params)
                .map_err(|e| warn!("chat.history failed: {}", e))
                .ok()
        } else {
            None
        };

        let Some(reply) = reply else {
            self.send_to(client_id, &ServerMessage::History { messages: Vec::new() });
            return None;
        };

        let hub = self.clone();
        let client_id = client_id.to_string();
        Some(tokio::spawn(async move {
            let messages = match reply.wait().await {
                Ok(payload) => history_entries(&payload),
                Err(e) => {
                    warn!("chat.history failed: {}", e);
                    Vec::new()
                }
            };
            hub.send_to(&client_id, &ServerMessage::History { messages });
        }))
    }

    fn hello(&self, session_key: String) -> ServerMessage {
        ServerMessage::Hello {
            session_key,
            agent_name: self.identity.agent_name.clone(),
            user_name: self.identity.user_name.clone(),
        }
    }
}

fn queue(tx: &mpsc::UnboundedSender<String>, message: &ServerMessage) -> bool {
    match message.to_text() {
        Ok(text) => tx.send(text).is_ok(),
        Err(e) => {
            warn!("Failed to encode client message: {}", e);
            false
        }
    }
}

/// Map a `chat.history` payload to display entries.
fn history_entries(payload: &Value) -> Vec<HistoryEntry> {
    let Some(messages) = payload.get("messages").and_then(Value::as_array) else {
        return Vec::new();
    };

    messages
        .iter()
        .map(|m| HistoryEntry {
            role: m.get("role").and_then(Value::as_str).map(str::to_string),
            text: extract_text(m).unwrap_or_default(),
            timestamp: m.get("timestamp").cloned(),
        })
        .collect()
}
