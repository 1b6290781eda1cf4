//! Configuration management commands.

use clap::Args;
use clawbridge_core::config::BridgeConfig;
use clawbridge_core::paths;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Config command arguments.
#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(clap::Subcommand)]
pub enum ConfigCommand {
    /// Show the effective configuration (credentials masked)
    Show,

    /// Get a configuration value
    Get {
        /// Configuration key (dot-separated path)
        key: String,
    },

    /// Write a default configuration file
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Show configuration file path
    Path,

    /// Validate configuration
    Validate,
}

/// Run the config command.
pub fn run(args: ConfigArgs, config_path: Option<&Path>) -> anyhow::Result<()> {
    match args.command {
        ConfigCommand::Show => {
            let config = super::load_config(config_path)?;
            println!("{}", serde_json::to_string_pretty(&masked(&config)?)?);
        }

        ConfigCommand::Get { key } => {
            let config = super::load_config(config_path)?;
            let json = masked(&config)?;
            match lookup(&json, &key) {
                Some(v) => println!("{}", serde_json::to_string_pretty(v)?),
                None => anyhow::bail!("Key not found: {}", key),
            }
        }

        ConfigCommand::Init { force } => {
            let path = target_path(config_path)?;

            if path.exists() && !force {
                anyhow::bail!(
                    "Config file already exists: {:?}. Use --force to overwrite.",
                    path
                );
            }

            BridgeConfig::default().save(&path)?;
            println!("Created config file: {:?}", path);
        }

        ConfigCommand::Path => {
            println!("{}", target_path(config_path)?.display());
        }

        ConfigCommand::Validate => {
            let path = target_path(config_path)?;
            let config = BridgeConfig::load(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
            match config.validate() {
                Ok(()) => println!("Configuration is valid"),
                Err(e) => anyhow::bail!("Configuration error: {}", e),
            }
        }
    }

    Ok(())
}

fn target_path(config_path: Option<&Path>) -> anyhow::Result<PathBuf> {
    match config_path {
        Some(path) => Ok(path.to_path_buf()),
        None => Ok(paths::config_file()?),
    }
}

/// Config as JSON with the upstream credential masked.
fn masked(config: &BridgeConfig) -> anyhow::Result<Value> {
    let mut json = serde_json::to_value(config)?;
    if let Some(token) = json.pointer_mut("/upstream/token") {
        *token = Value::String("********".to_string());
    }
    Ok(json)
}

/// Walk a dot-separated key path.
fn lookup<'a>(json: &'a Value, key: &str) -> Option<&'a Value> {
    key.split('.').try_fold(json, |acc, k| acc.get(k))
}
