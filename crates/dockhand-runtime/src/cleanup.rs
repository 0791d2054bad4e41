//! Stale instance cleanup.
//!
//! The identity-token file is shared with the engine and with any other run
//! of the same image on the host. Nothing here assumes exclusive access:
//! every step is best-effort and safe to repeat against a container or file
//! that is already gone.

use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

use dockhand_common::types::ContainerId;

use crate::command::{CommandLine, CommandRunner};
use crate::docker;

const CLEANUP_TARGET: &str = "dockhand::cleanup";

/// What a cleanup pass found and did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// No readable token referenced a container.
    NothingToClean,
    /// A container was referenced and stop/remove were attempted.
    Cleaned {
        /// Container named by the token.
        id: ContainerId,
        /// Whether `stop` succeeded.
        stopped: bool,
        /// Whether `rm` succeeded.
        removed: bool,
    },
}

/// Stops and removes the container named by an identity token.
pub struct StaleInstanceCleaner {
    runner: Arc<dyn CommandRunner>,
}

impl StaleInstanceCleaner {
    /// Creates a cleaner issuing commands through `runner`.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Cleans up whatever `token_path` references. Never fails.
    ///
    /// A missing token means there is nothing to do. Otherwise `stop` and
    /// then `rm` are issued, the second regardless of the first, and the
    /// token file is deleted last.
    pub async fn cleanup(&self, token_path: &Path) -> CleanupOutcome {
        let contents = match tokio::fs::read_to_string(token_path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(target: CLEANUP_TARGET, path = %token_path.display(), "no identity token");
                return CleanupOutcome::NothingToClean;
            }
            Err(e) => {
                tracing::warn!(
                    target: CLEANUP_TARGET,
                    path = %token_path.display(),
                    error = %e,
                    "identity token unreadable"
                );
                remove_token(token_path).await;
                return CleanupOutcome::NothingToClean;
            }
        };

        let Some(id) = ContainerId::from_token(&contents) else {
            remove_token(token_path).await;
            return CleanupOutcome::NothingToClean;
        };

        tracing::info!(target: CLEANUP_TARGET, %id, "shutting down running container");
        let stopped = self.attempt(&docker::stop(&id)).await;
        let removed = self.attempt(&docker::remove(&id)).await;
        remove_token(token_path).await;

        CleanupOutcome::Cleaned {
            id,
            stopped,
            removed,
        }
    }

    async fn attempt(&self, command: &CommandLine) -> bool {
        match self.runner.run_to_completion(command).await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(target: CLEANUP_TARGET, %command, error = %e, "cleanup step failed");
                false
            }
        }
    }
}

async fn remove_token(path: &Path) {
    tracing::info!(target: CLEANUP_TARGET, path = %path.display(), "cleaning up identity token");
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(
                target: CLEANUP_TARGET,
                path = %path.display(),
                error = %e,
                "failed to delete identity token"
            );
        }
    }
}
