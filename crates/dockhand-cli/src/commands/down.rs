//! `dockhand down` — Clean up an instance left behind by a crashed run.

use clap::Args;
use dockhand_common::config::LauncherConfig;

/// Arguments for the `down` command.
#[derive(Args, Debug)]
pub struct DownArgs {}

/// Executes the `down` command.
///
/// Stops and removes the container named by the image's identity token,
/// if any. Succeeds when there is nothing to clean.
///
/// # Errors
///
/// Returns an error if the configuration does not describe a valid launch.
pub async fn execute(_args: DownArgs, config: LauncherConfig) -> anyhow::Result<()> {
    let orchestrator = super::build_orchestrator(config)?;
    tracing::info!(
        image = orchestrator.spec().image(),
        token = %orchestrator.spec().identity_token().display(),
        "cleaning up"
    );
    orchestrator.stop().await;
    Ok(())
}
