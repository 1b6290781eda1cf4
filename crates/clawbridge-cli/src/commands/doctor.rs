//! Diagnostic commands.

use clawbridge_core::config::GatewayFileConfig;
use clawbridge_core::error::ConfigError;
use clawbridge_core::{paths, BridgeConfig, Identity};
use console::{style, Emoji};
use std::path::Path;
use std::time::Duration;
use tokio::net::TcpStream;
use url::Url;

static CHECK: Emoji = Emoji("✓", "+");
static CROSS: Emoji = Emoji("✗", "x");
static WARN: Emoji = Emoji("⚠", "!");

/// `host:port` of a WebSocket URL, with the scheme's default port.
pub fn socket_target(ws_url: &str) -> Option<String> {
    let url = Url::parse(ws_url).ok()?;
    let host = url.host_str()?;
    let port = url.port_or_known_default()?;
    Some(format!("{}:{}", host, port))
}

/// Run the doctor command.
pub async fn run(config_path: Option<&Path>) -> anyhow::Result<()> {
    println!("clawbridge Doctor\n");

    let mut errors = 0;
    let mut warnings = 0;

    // Bridge config
    println!("Checking configuration...");

    let loaded = match config_path {
        Some(path) => BridgeConfig::load(path),
        None => BridgeConfig::load_default(),
    };
    let mut config = match loaded {
        Ok(config) => {
            println!("  {} Configuration loaded", style(CHECK).green());
            config
        }
        Err(ConfigError::NotFound(path)) => {
            println!("  {} No config file at {:?}, using defaults", style(WARN).yellow(), path);
            println!("    Run 'clawbridge config init' to create one");
            warnings += 1;
            BridgeConfig::default()
        }
        Err(e) => {
            println!("  {} Configuration error: {}", style(CROSS).red(), e);
            errors += 1;
            BridgeConfig::default()
        }
    };
    config.apply_env();

    match config.validate() {
        Ok(()) => println!("  {} Configuration valid", style(CHECK).green()),
        Err(e) => {
            println!("  {} Configuration invalid: {}", style(CROSS).red(), e);
            errors += 1;
        }
    }

    // Gateway's own config
    println!("\nChecking gateway config...");

    let gateway = match paths::gateway_config_file().and_then(|p| GatewayFileConfig::load(&p)) {
        Ok(gateway) => {
            println!("  {} Gateway config readable", style(CHECK).green());
            gateway
        }
        Err(e) => {
            println!("  {} Gateway config unavailable: {}", style(WARN).yellow(), e);
            warnings += 1;
            GatewayFileConfig::default()
        }
    };

    let has_token = config.upstream.token.as_ref().is_some_and(|t| !t.is_empty())
        || gateway.gateway.auth.token.as_ref().is_some_and(|t| !t.is_empty());
    if has_token {
        println!("  {} Gateway token configured", style(CHECK).green());
    } else {
        println!("  {} No gateway token; the handshake carries no credentials", style(WARN).yellow());
        warnings += 1;
    }

    // Workspace identity
    println!("\nChecking identity...");

    match config.resolve(&gateway) {
        Ok(settings) => {
            for file in [
                paths::identity_file(&settings.workspace),
                paths::user_file(&settings.workspace),
            ] {
                if file.exists() {
                    println!("  {} {:?}", style(CHECK).green(), file);
                } else {
                    println!("  {} Missing {:?}", style(WARN).yellow(), file);
                    warnings += 1;
                }
            }
            let identity = Identity::resolve(&settings.workspace, &config.identity);
            println!("  Agent: {}  User: {}", identity.agent_name, identity.user_name);

            if let Some(dir) = &settings.static_dir {
                let index = dir.join("index.html");
                if index.exists() {
                    println!("  {} Static index {:?}", style(CHECK).green(), index);
                } else {
                    println!("  {} Static index missing: {:?}", style(CROSS).red(), index);
                    errors += 1;
                }
            }
        }
        Err(e) => {
            println!("  {} Cannot resolve settings: {}", style(CROSS).red(), e);
            errors += 1;
        }
    }

    // Upstream reachability
    println!("\nChecking upstream gateway...");

    match socket_target(&config.upstream.url) {
        Some(target) => {
            let probe = tokio::time::timeout(Duration::from_secs(3), TcpStream::connect(&target));
            match probe.await {
                Ok(Ok(_)) => println!("  {} Gateway reachable at {}", style(CHECK).green(), target),
                _ => {
                    println!("  {} Gateway not reachable at {}", style(WARN).yellow(), target);
                    warnings += 1;
                }
            }
        }
        None => {
            println!("  {} Cannot derive an address from {}", style(CROSS).red(), config.upstream.url);
            errors += 1;
        }
    }

    // Summary
    println!("\n{}", style("Summary").bold());
    println!("  Errors: {}", if errors > 0 { style(errors).red() } else { style(errors).green() });
    println!("  Warnings: {}", if warnings > 0 { style(warnings).yellow() } else { style(warnings).green() });

    if errors > 0 {
        anyhow::bail!("{} error(s) found", errors);
    }

    Ok(())
}
