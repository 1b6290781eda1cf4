//! clawbridge command-line interface.

pub mod commands;
pub mod logging;

use clap::{Parser, Subcommand};

/// clawbridge - WebSocket bridge between an agent gateway and chat clients
#[derive(Parser)]
#[command(name = "clawbridge")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to config file
    #[arg(short, long, env = "CLAWBRIDGE_CONFIG", global = true)]
    pub config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the bridge
    Serve(commands::serve::ServeArgs),

    /// Query a running bridge
    Status(commands::status::StatusArgs),

    /// Show the resolved agent and user names
    Identity,

    /// Configuration management
    Config(commands::config::ConfigArgs),

    /// Run diagnostics
    Doctor,

    /// Show version information
    Version,
}

/// Run the CLI with the given arguments.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Serve(args) => commands::serve::run(args, config_path).await,
        Commands::Status(args) => commands::status::run(args, config_path).await,
        Commands::Identity => commands::identity::run(config_path),
        Commands::Config(args) => commands::config::run(args, config_path),
        Commands::Doctor => commands::doctor::run(config_path).await,
        Commands::Version => {
            println!("clawbridge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
