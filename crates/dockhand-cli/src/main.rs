//! # dockhand
//!
//! Launches a container a test suite depends on, waits until it is ready,
//! and tears it down again when interrupted.

mod commands;

use clap::Parser;
use dockhand_common::constants::DEFAULT_LOG_LEVEL;
use tracing_subscriber::EnvFilter;

use crate::commands::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;

    let level = cli
        .log_level
        .as_deref()
        .or(config.log_level.as_deref())
        .unwrap_or(DEFAULT_LOG_LEVEL);
    init_tracing(level, cli.json);

    commands::execute(cli.command, config).await
}

/// `RUST_LOG` wins over the configured level.
fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
