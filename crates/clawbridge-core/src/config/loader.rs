//! Configuration loading and persistence.

use super::{BridgeConfig, GatewayFileConfig, ResolvedSettings};
use crate::env::{self, vars};
use crate::error::ConfigError;
use crate::paths;
use crate::secret::SecretString;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

impl BridgeConfig {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = paths::config_file()?;
        Self::load(&path)
    }

    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        json5::from_str(content).map_err(|e| ConfigError::Json5(e.to_string()))
    }

    /// Load from `path` (or the default path), falling back to defaults when
    /// no file exists. A file that exists but does not parse is an error.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        let result = match path {
            Some(path) => Self::load(path),
            None => Self::load_default(),
        };

        match result {
            Ok(config) => Ok(config),
            Err(e) if e.is_not_found() => {
                debug!("No bridge config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Apply environment overrides: `PORT`, `GATEWAY_URL`, `GATEWAY_TOKEN`.
    pub fn apply_env(&mut self) {
        if let Some(port) = env::get_u16(vars::PORT) {
            self.server.port = port;
        }
        if let Some(url) = env::get_var(vars::GATEWAY_URL) {
            self.upstream.url = url;
        }
        if let Some(token) = env::get_var(vars::GATEWAY_TOKEN) {
            self.upstream.token = Some(SecretString::new(token));
        }
    }

    /// Save configuration to a file path.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = self.to_json5()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write atomically
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &content)?;
        fs::rename(&temp_path, path)?;

        Ok(())
    }

    /// Serialize to JSON5 string.
    pub fn to_json5(&self) -> Result<String, ConfigError> {
        // json5 doesn't have a serializer, so we use serde_json with pretty print
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Validate the configuration, collecting all errors before returning.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push("Server port cannot be 0".to_string());
        }

        match url::Url::parse(&self.upstream.url) {
            Ok(url) if matches!(url.scheme(), "ws" | "wss") => {}
            Ok(url) => errors.push(format!(
                "Upstream url must use ws:// or wss://, got '{}://'",
                url.scheme()
            )),
            Err(e) => errors.push(format!("Invalid upstream url '{}': {}", self.upstream.url, e)),
        }

        if self.upstream.request_timeout_secs == 0 {
            errors.push("Upstream request_timeout_secs must be greater than 0".to_string());
        }

        if self.upstream.reconnect_delay_secs == 0 {
            errors.push("Upstream reconnect_delay_secs must be greater than 0".to_string());
        }

        if self.upstream.session_key.trim().is_empty() {
            errors.push("Upstream session_key must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors.join("; ")))
        }
    }

    /// Validate and merge with the gateway's own config into the settings
    /// the bridge runs with.
    ///
    /// The bridge's token wins over the gateway file's; the identity
    /// workspace override wins over the gateway's agent default.
    pub fn resolve(&self, gateway: &GatewayFileConfig) -> Result<ResolvedSettings, ConfigError> {
        self.validate()?;

        let token = self
            .upstream
            .token
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| gateway.gateway.auth.token.clone().filter(|t| !t.is_empty()));

        let workspace = match self
            .identity
            .workspace
            .as_deref()
            .or(gateway.agents.defaults.workspace.as_deref())
        {
            Some(ws) => paths::expand_tilde(ws),
            None => paths::default_workspace()?,
        };

        Ok(ResolvedSettings {
            bind: self.server.bind,
            port: self.server.port,
            static_dir: self.server.static_dir.clone(),
            upstream_url: self.upstream.url.clone(),
            token,
            request_timeout: Duration::from_secs(self.upstream.request_timeout_secs),
            reconnect_delay: Duration::from_secs(self.upstream.reconnect_delay_secs),
            session_key: self.upstream.session_key.clone(),
            workspace,
        })
    }
}

impl GatewayFileConfig {
    /// Load the gateway's config from a file path.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse the gateway's config. Unknown keys are ignored.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        json5::from_str(content).map_err(|e| ConfigError::Json5(e.to_string()))
    }

    /// Best-effort load from `~/.openclaw/openclaw.json`.
    ///
    /// A missing or unreadable file yields an empty config; the bridge then
    /// runs without a credential and with the default workspace.
    pub fn load_or_empty() -> Self {
        let loaded = paths::gateway_config_file().and_then(|path| Self::load(&path));
        match loaded {
            Ok(config) => {
                if config.gateway.auth.token.is_some() {
                    debug!("Gateway token loaded from gateway config");
                }
                config
            }
            Err(e) => {
                warn!("Could not read gateway config: {}", e);
                Self::default()
            }
        }
    }
}
