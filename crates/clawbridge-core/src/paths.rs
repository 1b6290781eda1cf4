//! Path resolution utilities.

use crate::error::ConfigError;
use std::path::{Path, PathBuf};

fn home_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or_else(|| {
        ConfigError::Validation("Could not determine home directory".to_string())
    })
}

/// Get the clawbridge base directory (~/.clawbridge).
pub fn base_dir() -> Result<PathBuf, ConfigError> {
    Ok(home_dir()?.join(".clawbridge"))
}

/// Get the bridge config file path (~/.clawbridge/clawbridge.json5).
pub fn config_file() -> Result<PathBuf, ConfigError> {
    Ok(base_dir()?.join("clawbridge.json5"))
}

/// Get the upstream gateway's config file (~/.openclaw/openclaw.json).
pub fn gateway_config_file() -> Result<PathBuf, ConfigError> {
    Ok(home_dir()?.join(".openclaw").join("openclaw.json"))
}

/// Default agent workspace (~/clawd), used when the gateway config names none.
pub fn default_workspace() -> Result<PathBuf, ConfigError> {
    Ok(home_dir()?.join("clawd"))
}

/// Agent identity file inside a workspace.
pub fn identity_file(workspace: &Path) -> PathBuf {
    workspace.join("IDENTITY.md")
}

/// User profile file inside a workspace.
pub fn user_file(workspace: &Path) -> PathBuf {
    workspace.join("USER.md")
}

/// Expand tilde (~) in a path.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
