//! CLI command implementations.

pub mod config;
pub mod doctor;
pub mod identity;
pub mod serve;
pub mod status;

use clawbridge_core::BridgeConfig;
use std::path::Path;

/// Load the bridge config (or defaults) with environment overrides applied.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<BridgeConfig> {
    let mut config = BridgeConfig::load_or_default(path)?;
    config.apply_env();
    Ok(config)
}
