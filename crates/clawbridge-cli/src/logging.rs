//! Tracing subscriber setup.

use crate::Cli;
use clawbridge_core::config::{LogLevel, LoggingConfig};
use clawbridge_core::env::{self, vars};
use clawbridge_core::BridgeConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the default filter directive for a verbosity count.
///
/// `-v` raises the configured level to debug, `-vv` and above to trace.
pub fn default_directive(level: LogLevel, verbose: u8) -> String {
    let level = match verbose {
        0 => level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    format!("clawbridge={level},clawbridge_core={level},clawbridge_gateway={level},clawbridge_cli={level}")
}

/// Install the global subscriber.
///
/// `CLAWBRIDGE_LOG` wins, then `RUST_LOG`, then the configured level.
pub fn init(cli: &Cli) {
    // Logging comes up before the config is validated; a broken file is
    // reported later by the command itself.
    let logging = BridgeConfig::load_or_default(cli.config.as_deref())
        .map(|c| c.logging)
        .unwrap_or_else(|_| LoggingConfig::default());

    let filter = env::get_var(vars::CLAWBRIDGE_LOG)
        .and_then(|directive| EnvFilter::try_new(directive).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(default_directive(logging.level, cli.verbose)));

    let registry = tracing_subscriber::registry().with(filter);
    if logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
