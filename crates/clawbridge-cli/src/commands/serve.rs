//! Serve command.

use clap::Args;
use clawbridge_core::config::{BindMode, GatewayFileConfig};
use clawbridge_core::{BridgeConfig, Identity};
use clawbridge_gateway::Bridge;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Serve command arguments. Flags win over the config file and environment.
#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Bind mode (loopback, lan)
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Port for the HTTP/WebSocket server
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Upstream gateway WebSocket URL
    #[arg(long)]
    pub gateway_url: Option<String>,

    /// Directory holding the client's index.html
    #[arg(long)]
    pub static_dir: Option<PathBuf>,

    /// Session key to use until the gateway announces its default
    #[arg(long)]
    pub session_key: Option<String>,
}

impl ServeArgs {
    /// Apply command-line overrides to a loaded config.
    pub fn apply(&self, config: &mut BridgeConfig) -> anyhow::Result<()> {
        if let Some(bind) = &self.bind {
            config.server.bind = bind.parse::<BindMode>().map_err(anyhow::Error::msg)?;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(url) = &self.gateway_url {
            config.upstream.url = url.clone();
        }
        if let Some(dir) = &self.static_dir {
            config.server.static_dir = Some(dir.clone());
        }
        if let Some(key) = &self.session_key {
            config.upstream.session_key = key.clone();
        }
        Ok(())
    }
}

/// Run the serve command.
pub async fn run(args: ServeArgs, config_path: Option<&Path>) -> anyhow::Result<()> {
    let mut config = super::load_config(config_path)?;
    args.apply(&mut config)?;

    let gateway = GatewayFileConfig::load_or_empty();
    let settings = config.resolve(&gateway)?;

    let identity = Identity::resolve(&settings.workspace, &config.identity);
    info!(agent = %identity.agent_name, user = %identity.user_name, "Identity resolved");

    if settings.token.is_none() {
        warn!("No gateway token configured; connecting without credentials");
    }
    info!("Upstream gateway: {}", settings.upstream_url);

    let bridge = Bridge::new(&settings, identity);
    bridge.run_until(shutdown_signal()).await?;

    info!("Bridge stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutting down"),
        Err(e) => {
            warn!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
