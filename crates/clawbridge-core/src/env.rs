//! Environment variable handling.

use std::env;

/// Get an environment variable, returning None if not set or empty.
pub fn get_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

/// Get an environment variable as a u16 (e.g., for ports).
pub fn get_u16(name: &str) -> Option<u16> {
    get_var(name).and_then(|v| v.parse().ok())
}

/// Environment variable names the bridge reads.
pub mod vars {
    /// Listening port for the downstream HTTP/WebSocket server.
    pub const PORT: &str = "PORT";

    /// Upstream gateway WebSocket URL.
    pub const GATEWAY_URL: &str = "GATEWAY_URL";

    /// Upstream gateway bearer token.
    pub const GATEWAY_TOKEN: &str = "GATEWAY_TOKEN";

    /// Bridge config file override.
    pub const CLAWBRIDGE_CONFIG: &str = "CLAWBRIDGE_CONFIG";

    /// Log filter directive.
    pub const CLAWBRIDGE_LOG: &str = "CLAWBRIDGE_LOG";
}
