//! Status command: query a running bridge's health endpoint.

use clap::Args;
use console::{style, Emoji};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use url::Url;

static CHECK: Emoji = Emoji("✓", "+");
static CROSS: Emoji = Emoji("✗", "x");
static WARN: Emoji = Emoji("⚠", "!");

/// Status command arguments.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Bridge base URL (default: loopback on the configured port)
    #[arg(long)]
    pub url: Option<String>,

    /// Print the raw health document
    #[arg(long)]
    pub json: bool,
}

/// `/health` response.
#[derive(Debug, Deserialize)]
pub struct Health {
    pub status: String,
    pub clients: usize,
    pub upstream: UpstreamHealth,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamHealth {
    pub connected: bool,
    pub ready: bool,
    pub session_key: String,
}

/// Health endpoint for a bridge base URL.
pub fn health_url(base: &str) -> anyhow::Result<Url> {
    Ok(Url::parse(base)?.join("/health")?)
}

/// Run the status command.
pub async fn run(args: StatusArgs, config_path: Option<&Path>) -> anyhow::Result<()> {
    let base = match args.url {
        Some(url) => url,
        None => {
            let config = super::load_config(config_path)?;
            format!("http://127.0.0.1:{}", config.server.port)
        }
    };
    let url = health_url(&base)?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;

    let response = match client.get(url.clone()).send().await {
        Ok(response) => response,
        Err(e) if e.is_connect() || e.is_timeout() => {
            println!("{} Bridge is not running at {}", style(CROSS).red(), base);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    if args.json {
        println!("{}", response.text().await?);
        return Ok(());
    }

    let health: Health = response.error_for_status()?.json().await?;
    println!(
        "{} Bridge is running at {} ({})",
        style(CHECK).green(),
        base,
        health.status
    );
    println!("  Clients: {}", health.clients);

    let upstream = &health.upstream;
    if upstream.ready {
        println!(
            "  {} Upstream ready, session {}",
            style(CHECK).green(),
            style(&upstream.session_key).bold()
        );
    } else if upstream.connected {
        println!("  {} Upstream connected, handshake pending", style(WARN).yellow());
    } else {
        println!("  {} Upstream disconnected", style(CROSS).red());
    }

    Ok(())
}
