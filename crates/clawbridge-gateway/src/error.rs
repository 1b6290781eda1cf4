//! Bridge error types.

use thiserror::Error;

/// Errors that can occur in the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// No usable upstream link.
    #[error("gateway not connected")]
    NotConnected,

    /// No response within the request timeout.
    #[error("request timeout")]
    Timeout,

    /// Upstream answered `ok: false`.
    #[error("{0}")]
    Remote(String),

    /// Inbound text that does not decode as a frame.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Whether the failure was caused by a missing or lost upstream link.
    pub fn is_not_connected(&self) -> bool {
        matches!(self, Self::NotConnected)
    }

    /// Text of the `{type:"error"}` notice shown to the requesting client.
    pub fn client_message(&self) -> String {
        match self {
            Self::NotConnected => "Gateway not connected".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for BridgeError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(e.to_string())
    }
}
