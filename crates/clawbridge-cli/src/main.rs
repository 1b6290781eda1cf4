//! clawbridge CLI entry point.

use clap::Parser;
use clawbridge_cli::{logging, run, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli);

    run(cli).await
}
