//! # clawbridge-core
//!
//! Configuration, identity, and utilities shared by the clawbridge crates.
//!
//! - **Configuration**: loading and validation of the bridge config file, plus
//!   the read-only bits of the upstream gateway's own config
//! - **Identity**: agent/user display names resolved from workspace files
//! - **Utilities**: path resolution, environment helpers, secret handling

pub mod config;
pub mod env;
pub mod error;
pub mod identity;
pub mod paths;
pub mod secret;

// Re-exports for convenience
pub use config::{BridgeConfig, ResolvedSettings};
pub use error::ConfigError;
pub use identity::Identity;
pub use secret::SecretString;
