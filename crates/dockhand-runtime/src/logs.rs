//! Engine process output redirection to a log file.

use std::path::{Path, PathBuf};

use dockhand_common::constants::DEFAULT_LOG_FILENAME;
use dockhand_common::error::{DockhandError, Result};
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::orchestrator::LifecycleNotification;
use crate::process::OutputEvent;

const LOGS_TARGET: &str = "dockhand::logs";

/// Resolves the configured log target to a file path.
///
/// A path with an extension names the file itself; anything else is treated
/// as a directory receiving [`DEFAULT_LOG_FILENAME`].
#[must_use]
pub fn log_file_path(target: &Path) -> PathBuf {
    if target.extension().is_some() {
        target.to_path_buf()
    } else {
        target.join(DEFAULT_LOG_FILENAME)
    }
}

/// Writes engine output lines to `path` for one run.
///
/// Waits for [`LifecycleNotification::ProcessCreated`], then truncates (or
/// creates) the file and appends every stdout and stderr line until both
/// streams end. `output` should be a sink from
/// [`Orchestrator::output_sink`](crate::orchestrator::Orchestrator::output_sink),
/// which never drops lines. Returns the number of lines written; a run that
/// never creates a process writes nothing and leaves the file untouched.
///
/// # Errors
///
/// Returns an error if the file or its parent directory cannot be created
/// or written.
pub async fn redirect_output(
    path: &Path,
    mut notifications: broadcast::Receiver<LifecycleNotification>,
    mut output: mpsc::Receiver<OutputEvent>,
) -> Result<u64> {
    loop {
        match notifications.recv().await {
            Ok(LifecycleNotification::ProcessCreated { .. }) => break,
            Ok(LifecycleNotification::Stopped) | Err(RecvError::Closed) => return Ok(0),
            Ok(LifecycleNotification::Ready) | Err(RecvError::Lagged(_)) => {}
        }
    }

    let io_error = |source| DockhandError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| DockhandError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
    }
    let mut file = tokio::fs::File::create(path).await.map_err(io_error)?;
    tracing::debug!(target: LOGS_TARGET, path = %path.display(), "redirecting engine output");

    let mut written = 0_u64;
    let mut open = 2_u8;
    while open > 0 {
        match output.recv().await {
            Some(OutputEvent::Line { line, .. }) => {
                file.write_all(line.as_bytes()).await.map_err(io_error)?;
                file.write_all(b"\n").await.map_err(io_error)?;
                written += 1;
            }
            Some(OutputEvent::Eof(_)) => open -= 1,
            None => break,
        }
    }
    file.flush().await.map_err(io_error)?;
    Ok(written)
}

/// Runs [`redirect_output`] in the background, logging any failure.
pub fn spawn_redirect(
    target: &Path,
    notifications: broadcast::Receiver<LifecycleNotification>,
    output: mpsc::Receiver<OutputEvent>,
) -> JoinHandle<()> {
    let path = log_file_path(target);
    tokio::spawn(async move {
        match redirect_output(&path, notifications, output).await {
            Ok(lines) => {
                tracing::debug!(target: LOGS_TARGET, path = %path.display(), lines, "log redirection finished");
            }
            Err(e) => tracing::error!(target: LOGS_TARGET, error = %e, "log redirection failed"),
        }
    })
}
