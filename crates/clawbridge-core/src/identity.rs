//! Agent and user display names.
//!
//! Names come from the agent workspace's `IDENTITY.md` and `USER.md`, which
//! carry a `**Name:** <value>` line. They are resolved once at startup and
//! sent to every downstream client.

use crate::config::IdentityConfig;
use crate::paths;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::path::Path;
use tracing::debug;

/// Fallback agent name.
pub const DEFAULT_AGENT_NAME: &str = "AGENT";

/// Fallback user name.
pub const DEFAULT_USER_NAME: &str = "USER";

static NAME_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\*\*Name:\*\*\s*(.+)").expect("valid name regex"));

static NAME_CUT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*[(—\-]").expect("valid name cut regex"));

/// Resolved display names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub agent_name: String,
    pub user_name: String,
}

impl Default for Identity {
    fn default() -> Self {
        Self {
            agent_name: DEFAULT_AGENT_NAME.to_string(),
            user_name: DEFAULT_USER_NAME.to_string(),
        }
    }
}

impl Identity {
    /// Create an identity from explicit names.
    pub fn new(agent_name: impl Into<String>, user_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            user_name: user_name.into(),
        }
    }

    /// Resolve names from the workspace files, with config overrides on top.
    pub fn resolve(workspace: &Path, overrides: &IdentityConfig) -> Self {
        let agent_name = overrides
            .agent_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| {
                name_from_file(&paths::identity_file(workspace), DEFAULT_AGENT_NAME)
            });

        let user_name = overrides
            .user_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| name_from_file(&paths::user_file(workspace), DEFAULT_USER_NAME));

        Self {
            agent_name,
            user_name,
        }
    }
}

/// Read a markdown file and extract its name, falling back on any failure.
fn name_from_file(path: &Path, fallback: &str) -> String {
    match std::fs::read_to_string(path) {
        Ok(content) => parse_name(&content, fallback),
        Err(e) => {
            debug!("Identity file {} unreadable: {}", path.display(), e);
            fallback.to_string()
        }
    }
}

/// Extract the display name from a `**Name:** ...` line.
///
/// Only the leading name is kept: anything from the first parenthesis,
/// em-dash, or hyphen onward is dropped.
pub fn parse_name(markdown: &str, fallback: &str) -> String {
    let Some(captures) = NAME_LINE.captures(markdown) else {
        return fallback.to_string();
    };

    let raw = captures[1].trim();
    let clean = NAME_CUT.split(raw).next().unwrap_or("").trim();

    if clean.is_empty() {
        fallback.to_string()
    } else {
        clean.to_string()
    }
}
