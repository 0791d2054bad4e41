//! `dockhand up` — Start the container and hold it until interrupted.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use dockhand_common::config::LauncherConfig;
use dockhand_runtime::logs;
use dockhand_runtime::orchestrator::{RunningContainer, StartOutcome};
use dockhand_runtime::process::OutputEvent;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;

/// Arguments for the `up` command.
#[derive(Args, Debug)]
pub struct UpArgs {
    /// Shell command to run once the container is ready.
    #[arg(long)]
    pub on_ready: Option<String>,

    /// Stop the container as soon as the `--on-ready` command exits.
    #[arg(long, requires = "on_ready")]
    pub once: bool,
}

const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const RESET: &str = "\x1b[0m";

const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Executes the `up` command.
///
/// Ctrl+C at any point, including while the container is still starting,
/// stops the run and cleans up.
///
/// # Errors
///
/// Returns an error if the container fails to start or the `--on-ready`
/// command cannot be run.
pub async fn execute(args: UpArgs, config: LauncherConfig) -> anyhow::Result<()> {
    let redirect_target = config.docker_logs.clone();
    let log_to_stdout = config.log_to_stdout;
    let orchestrator = Arc::new(super::build_orchestrator(config)?);

    let shutdown = Arc::new(Notify::new());
    let signal = shutdown.clone();
    ctrlc::set_handler(move || signal.notify_one())
        .map_err(|e| anyhow::anyhow!("failed to set Ctrl+C handler: {e}"))?;

    let mut background = Vec::new();
    if let Some(target) = &redirect_target {
        background.push(logs::spawn_redirect(
            target,
            orchestrator.subscribe(),
            orchestrator.output_sink(),
        ));
    }
    if log_to_stdout {
        background.push(echo_to_stdout(orchestrator.output_sink()));
    }

    let mut start = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.start().await })
    };
    let outcome = tokio::select! {
        joined = &mut start => joined.context("start task panicked")?,
        () = shutdown.notified() => {
            eprintln!("  Interrupted, stopping...");
            orchestrator.stop().await;
            let _ = start.await;
            finish(background).await;
            return Ok(());
        }
    };

    let container = match outcome {
        Ok(StartOutcome::Running(container)) => container,
        Ok(StartOutcome::EngineUnavailable) => {
            eprintln!("  Docker is not installed; nothing to launch.");
            finish(background).await;
            return Ok(());
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start container");
            finish(background).await;
            return Err(e.into());
        }
    };
    print_running(&container);

    let mut result = Ok(());
    if let Some(hook) = &args.on_ready {
        result = run_hook(hook).await;
    }
    if !args.once {
        eprintln!();
        eprintln!("  Press {BOLD}Ctrl+C{RESET} to stop the container...");
        shutdown.notified().await;
    }

    eprintln!("  Stopping container...");
    orchestrator.stop().await;
    finish(background).await;
    eprintln!("  {GREEN}Container stopped.{RESET}");
    result
}

fn print_running(container: &RunningContainer) {
    eprintln!();
    eprintln!("  {GREEN}{BOLD}{}{RESET} is ready", container.image);
    if let Some(pid) = container.pid {
        eprintln!("  {DIM}engine pid: {pid}{RESET}");
    }
    eprintln!("  {DIM}identity token: {}{RESET}", container.identity_token.display());
}

/// Runs `hook` through the platform shell and reports its exit status.
async fn run_hook(hook: &str) -> anyhow::Result<()> {
    tracing::info!(command = hook, "running on-ready hook");
    let mut command = if cfg!(windows) {
        let mut c = tokio::process::Command::new("cmd");
        let _ = c.arg("/C").arg(hook);
        c
    } else {
        let mut c = tokio::process::Command::new("sh");
        let _ = c.arg("-c").arg(hook);
        c
    };
    let status = command
        .status()
        .await
        .with_context(|| format!("failed to run on-ready hook `{hook}`"))?;
    if status.success() {
        Ok(())
    } else {
        Err(anyhow::anyhow!("on-ready hook `{hook}` exited with {status}"))
    }
}

fn echo_to_stdout(mut output: mpsc::Receiver<OutputEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = output.recv().await {
            if let OutputEvent::Line { line, .. } = event {
                println!("{line}");
            }
        }
    })
}

/// Gives background consumers a moment to flush the final output lines.
async fn finish(tasks: Vec<JoinHandle<()>>) {
    for mut task in tasks {
        if tokio::time::timeout(FLUSH_TIMEOUT, &mut task).await.is_err() {
            task.abort();
        }
    }
}
