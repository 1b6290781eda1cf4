//! Wire frames.
//!
//! Upstream (consumed): `{type:"req"}` out, `{type:"res"}` / `{type:"event"}` in.
//! Downstream (exposed): client commands in, [`ServerMessage`] out.

use crate::error::BridgeError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Fallback message when upstream rejects a request without saying why.
pub const DEFAULT_REMOTE_ERROR: &str = "request failed";

// ---------------------------------------------------------------------------
// Upstream
// ---------------------------------------------------------------------------

/// Request envelope sent upstream.
#[derive(Debug, Clone, Serialize)]
pub struct RequestFrame<'a> {
    #[serde(rename = "type")]
    kind: &'static str,

    /// Correlation identifier.
    pub id: &'a str,

    /// Remote procedure name.
    pub method: &'a str,

    /// Procedure parameters.
    pub params: &'a Value,
}

impl<'a> RequestFrame<'a> {
    /// Create a request envelope.
    pub fn new(id: &'a str, method: &'a str, params: &'a Value) -> Self {
        Self {
            kind: "req",
            id,
            method,
            params,
        }
    }

    /// Serialize to a text frame.
    pub fn to_text(&self) -> Result<String, BridgeError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Any frame received from upstream.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundFrame {
    /// Response to a request we sent.
    Res(ResponseFrame),

    /// Unsolicited event.
    Event(EventFrame),
}

impl InboundFrame {
    /// Decode a text frame.
    pub fn parse(text: &str) -> Result<Self, BridgeError> {
        serde_json::from_str(text).map_err(|e| BridgeError::MalformedFrame(e.to_string()))
    }
}

/// Response envelope.
///
/// Fields are read leniently so that a response with an oddly shaped field
/// still reaches the request waiting for it.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseFrame {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: String,

    #[serde(default, deserialize_with = "lenient_bool")]
    pub ok: bool,

    #[serde(default)]
    pub payload: Option<Value>,

    #[serde(default)]
    pub error: Option<Value>,
}

impl ResponseFrame {
    /// Payload on success, remote error message on failure.
    pub fn into_result(self) -> Result<Value, BridgeError> {
        if self.ok {
            Ok(self.payload.unwrap_or(Value::Null))
        } else {
            let message = self
                .error
                .as_ref()
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .filter(|m| !m.is_empty())
                .unwrap_or(DEFAULT_REMOTE_ERROR);
            Err(BridgeError::Remote(message.to_string()))
        }
    }
}

/// Event envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct EventFrame {
    pub event: String,

    #[serde(default)]
    pub payload: Value,
}

/// Payload of a `chat` event.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEventPayload {
    #[serde(default, deserialize_with = "lenient_string")]
    pub state: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub run_id: Option<String>,

    #[serde(default)]
    pub message: Option<Value>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub error_message: Option<String>,
}

/// Payload of an `agent` event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentEventPayload {
    #[serde(default, deserialize_with = "lenient_string")]
    pub stream: Option<String>,

    #[serde(default, deserialize_with = "lenient_tool_data")]
    pub data: Option<ToolEventData>,
}

/// Tool activity carried by an `agent` event on the `tool` stream.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolEventData {
    #[serde(default, deserialize_with = "lenient_string")]
    pub phase: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub name: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub tool_call_id: Option<String>,
}

/// Text of a scalar JSON value. Objects, arrays and null have none.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(scalar_text))
}

fn lenient_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_string(deserializer)?.unwrap_or_default())
}

fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(matches!(Option::<Value>::deserialize(deserializer)?, Some(Value::Bool(true))))
}

fn lenient_tool_data<'de, D>(deserializer: D) -> Result<Option<ToolEventData>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| serde_json::from_value(v).ok()))
}

// ---------------------------------------------------------------------------
// Downstream
// ---------------------------------------------------------------------------

/// Command sent by a downstream client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientCommand {
    /// Send a chat message.
    Chat {
        #[serde(default)]
        message: Option<String>,
    },

    /// Abort the active run.
    Abort,

    /// Fetch recent conversation history.
    History,
}

impl ClientCommand {
    /// Decode a client text frame.
    pub fn parse(text: &str) -> Result<Self, BridgeError> {
        serde_json::from_str(text).map_err(|e| BridgeError::MalformedFrame(e.to_string()))
    }
}

/// Stream lifecycle state reported downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    Start,
    Delta,
    Final,
    Aborted,
    Error,
}

/// Tool activity phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolPhase {
    Start,
    Result,
}

impl ToolPhase {
    /// Parse an upstream phase string. Other phases are not forwarded.
    pub fn from_upstream(phase: &str) -> Option<Self> {
        match phase {
            "start" => Some(Self::Start),
            "result" => Some(Self::Result),
            _ => None,
        }
    }
}

/// One message of conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    pub text: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
}

/// Message sent to downstream clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Upstream link status, with identity on first contact.
    #[serde(rename_all = "camelCase")]
    Status {
        connected: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_name: Option<String>,
    },

    /// Session is ready for commands.
    #[serde(rename_all = "camelCase")]
    Hello {
        session_key: String,
        agent_name: String,
        user_name: String,
    },

    /// Streamed reply progress.
    #[serde(rename_all = "camelCase")]
    Stream {
        state: StreamState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        run_id: Option<String>,
    },

    /// Tool activity notice.
    #[serde(rename_all = "camelCase")]
    Tool {
        phase: ToolPhase,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_call_id: Option<String>,
    },

    /// History reply.
    History { messages: Vec<HistoryEntry> },

    /// Private error notice.
    Error { error: String },
}

impl ServerMessage {
    /// Stream message without text.
    pub fn stream_state(state: StreamState, run_id: Option<String>) -> Self {
        Self::Stream {
            state,
            text: None,
            error: None,
            run_id,
        }
    }

    /// Stream message carrying reply text.
    pub fn stream_text(state: StreamState, text: String, run_id: Option<String>) -> Self {
        Self::Stream {
            state,
            text: Some(text),
            error: None,
            run_id,
        }
    }

    /// Error notice.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    /// Serialize to a text frame.
    pub fn to_text(&self) -> Result<String, BridgeError> {
        Ok(serde_json::to_string(self)?)
    }
}
