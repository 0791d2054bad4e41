//! External command execution.
//!
//! [`CommandRunner`] is the seam between the orchestrator and the container
//! engine: one-shot commands run to completion, long-running ones come back
//! as a [`ProcessHandle`].

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use dockhand_common::error::{DockhandError, Result};
use tokio::process::Command;

use crate::process::ProcessHandle;

const COMMAND_TARGET: &str = "dockhand::command";

/// A program and its argument vector. No shell is involved.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommandLine {
    program: String,
    args: Vec<String>,
}

impl CommandLine {
    /// Creates a command line with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Program name.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Argument vector.
    #[must_use]
    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Engine subcommand (the first argument), e.g. `inspect`.
    #[must_use]
    pub fn subcommand(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Executes engine commands.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `command` to completion and returns its captured stdout.
    ///
    /// # Errors
    ///
    /// Returns [`DockhandError::ExecutableNotFound`] when the program is
    /// missing and [`DockhandError::CommandFailed`] on a non-zero exit.
    async fn run_to_completion(&self, command: &CommandLine) -> Result<String>;

    /// Spawns `command` and returns immediately with a live handle.
    ///
    /// # Errors
    ///
    /// Returns [`DockhandError::ExecutableNotFound`] when the program is
    /// missing, or an I/O error if spawning fails.
    async fn spawn_long_running(&self, command: &CommandLine) -> Result<ProcessHandle>;
}

/// Runs commands as real OS child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    /// Creates a new runner.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn resolve(program: &str) -> Result<PathBuf> {
        which::which(program).map_err(|_| DockhandError::ExecutableNotFound {
            program: program.to_string(),
        })
    }

    fn command(command: &CommandLine) -> Result<Command> {
        let path = Self::resolve(command.program())?;
        let mut cmd = Command::new(path);
        let _ = cmd
            .args(command.arguments())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        Ok(cmd)
    }
}

fn spawn_error(command: &CommandLine, e: std::io::Error) -> DockhandError {
    if e.kind() == std::io::ErrorKind::NotFound {
        DockhandError::ExecutableNotFound {
            program: command.program().to_string(),
        }
    } else {
        DockhandError::Io {
            path: PathBuf::from(command.program()),
            source: e,
        }
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run_to_completion(&self, command: &CommandLine) -> Result<String> {
        tracing::debug!(target: COMMAND_TARGET, %command, "running command");
        let output = Self::command(command)?
            .output()
            .await
            .map_err(|e| spawn_error(command, e))?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        tracing::debug!(
            target: COMMAND_TARGET,
            %command,
            code = ?output.status.code(),
            %stderr,
            "command failed"
        );
        Err(DockhandError::CommandFailed {
            command: command.to_string(),
            exit_code: output.status.code(),
            stderr,
        })
    }

    async fn spawn_long_running(&self, command: &CommandLine) -> Result<ProcessHandle> {
        tracing::debug!(target: COMMAND_TARGET, %command, "spawning long-running command");
        let child = Self::command(command)?
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_error(command, e))?;
        tracing::debug!(target: COMMAND_TARGET, %command, pid = ?child.id(), "process spawned");
        Ok(ProcessHandle::from_child(child))
    }
}
