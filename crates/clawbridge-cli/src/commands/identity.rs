//! Identity command.

use clawbridge_core::config::GatewayFileConfig;
use clawbridge_core::{paths, Identity};
use std::path::Path;

/// Print the names the bridge would announce to clients.
pub fn run(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let settings = config.resolve(&GatewayFileConfig::load_or_empty())?;
    let identity = Identity::resolve(&settings.workspace, &config.identity);

    println!("Workspace: {}", settings.workspace.display());
    println!("  Agent: {}  ({})", identity.agent_name, paths::identity_file(&settings.workspace).display());
    println!("  User:  {}  ({})", identity.user_name, paths::user_file(&settings.workspace).display());
    Ok(())
}
