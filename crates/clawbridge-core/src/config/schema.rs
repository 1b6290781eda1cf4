//! Configuration schema definitions.

use crate::secret::SecretString;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main clawbridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Downstream HTTP/WebSocket server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Upstream gateway link settings.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Display-name overrides and workspace location.
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Downstream server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind mode.
    #[serde(default)]
    pub bind: BindMode,

    /// Port number.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory holding the UI's `index.html`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: BindMode::default(),
            port: default_port(),
            static_dir: None,
        }
    }
}

fn default_port() -> u16 {
    3100
}

/// Bind mode for the downstream server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindMode {
    /// Bind to loopback only (127.0.0.1).
    #[default]
    Loopback,

    /// Bind to all interfaces.
    Lan,
}

impl std::str::FromStr for BindMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "loopback" => Ok(Self::Loopback),
            "lan" => Ok(Self::Lan),
            other => Err(format!("Invalid bind mode: {}", other)),
        }
    }
}

/// Upstream gateway link configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Gateway WebSocket URL.
    #[serde(default = "default_upstream_url")]
    pub url: String,

    /// Bearer credential forwarded in the handshake.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<SecretString>,

    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Fixed delay before a reconnect attempt, in seconds.
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,

    /// Session key used until the handshake supplies a default.
    #[serde(default = "default_session_key")]
    pub session_key: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: default_upstream_url(),
            token: None,
            request_timeout_secs: default_request_timeout(),
            reconnect_delay_secs: default_reconnect_delay(),
            session_key: default_session_key(),
        }
    }
}

fn default_upstream_url() -> String {
    "ws://127.0.0.1:18789".to_string()
}

fn default_request_timeout() -> u64 {
    60
}

fn default_reconnect_delay() -> u64 {
    3
}

fn default_session_key() -> String {
    "main".to_string()
}

/// Identity configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Agent workspace holding `IDENTITY.md` and `USER.md`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,

    /// Agent display name override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,

    /// User display name override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default)]
    pub level: LogLevel,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

/// Log level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Filter directive for this level.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// The subset of the upstream gateway's own config file the bridge reads.
///
/// The file belongs to the gateway; the bridge never writes it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayFileConfig {
    #[serde(default)]
    pub gateway: GatewaySection,

    #[serde(default)]
    pub agents: AgentsSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewaySection {
    #[serde(default)]
    pub auth: GatewayAuthSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayAuthSection {
    #[serde(default)]
    pub token: Option<SecretString>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentsSection {
    #[serde(default)]
    pub defaults: AgentDefaultsSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentDefaultsSection {
    #[serde(default)]
    pub workspace: Option<String>,
}

/// Settings resolved once at startup. Read-only afterwards.
#[derive(Debug, Clone)]
pub struct ResolvedSettings {
    pub bind: BindMode,
    pub port: u16,
    pub static_dir: Option<PathBuf>,
    pub upstream_url: String,
    pub token: Option<SecretString>,
    pub request_timeout: Duration,
    pub reconnect_delay: Duration,
    pub session_key: String,
    pub workspace: PathBuf,
}
