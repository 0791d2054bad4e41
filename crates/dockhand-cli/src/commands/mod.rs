//! CLI command definitions and dispatch.

pub mod down;
pub mod plan;
pub mod up;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dockhand_common::config::LauncherConfig;
use dockhand_common::constants::DEFAULT_CONFIG_FILE;
use dockhand_runtime::diagnostics::Diagnostics;
use dockhand_runtime::launch::LaunchSpec;
use dockhand_runtime::orchestrator::Orchestrator;

/// dockhand: container lifecycle for test dependencies.
#[derive(Parser, Debug)]
#[command(name = "dockhand", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Path to the YAML launcher configuration.
    #[arg(long, short, global = true, default_value = DEFAULT_CONFIG_FILE, env = "DOCKHAND_CONFIG")]
    pub config: PathBuf,

    /// Log filter used when `RUST_LOG` is unset (overrides the config file).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub json: bool,
}

impl Cli {
    /// Reads the configuration file named by `--config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_config(&self) -> anyhow::Result<LauncherConfig> {
        LauncherConfig::load(&self.config)
            .with_context(|| format!("failed to load {}", self.config.display()))
    }
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the container and hold it until Ctrl+C.
    Up(up::UpArgs),
    /// Stop and remove any instance left behind by a previous run.
    Down(down::DownArgs),
    /// Show the engine command line without running anything.
    Plan(plan::PlanArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub async fn execute(command: Command, config: LauncherConfig) -> anyhow::Result<()> {
    match command {
        Command::Up(args) => up::execute(args, config).await,
        Command::Down(args) => down::execute(args, config).await,
        Command::Plan(args) => plan::execute(&args, config),
    }
}

/// Builds the orchestrator described by `config`, rooted at the working directory.
fn build_orchestrator(config: LauncherConfig) -> anyhow::Result<Orchestrator> {
    let spec = LaunchSpec::from_current_dir(config.docker_options)?;
    let mut builder = Orchestrator::builder(spec);
    if config.debug {
        builder = builder.diagnostics(Diagnostics::new().with_stdout_echo(!config.log_to_stdout));
    }
    Ok(builder.build()?)
}
