//! Immutable launch description built once per orchestrator.

use std::path::{Path, PathBuf};

use dockhand_common::config::{DockerOptions, HealthCheckSpec, RunOptions};
use dockhand_common::constants::CID_EXTENSION;
use dockhand_common::error::{DockhandError, Result};

use crate::command::CommandLine;
use crate::docker;

/// Validated image, options, and the prebuilt `docker run` command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    image: String,
    identity_token: PathBuf,
    options: RunOptions,
    health_check: HealthCheckSpec,
    run_command: CommandLine,
}

impl LaunchSpec {
    /// Validates `options` and builds the launch command, deriving the
    /// identity-token path under `cwd`.
    ///
    /// # Errors
    ///
    /// Returns [`DockhandError::Config`] if the image reference is empty.
    pub fn new(options: DockerOptions, cwd: &Path) -> Result<Self> {
        let image = options.image.trim().to_string();
        if image.is_empty() {
            return Err(DockhandError::Config {
                message: "missing required image".into(),
            });
        }

        let identity_token = identity_token_path(cwd, &image);
        let defaults = RunOptions::new()
            .with("rm", true)
            .with("cidfile", identity_token.as_path());
        let merged = defaults.merged_with(&options.options);

        let run_command = docker::run(
            &merged,
            &image,
            options.command.as_deref(),
            options.args.as_deref(),
        );

        Ok(Self {
            image,
            identity_token,
            options: merged,
            health_check: options.health_check,
            run_command,
        })
    }

    /// Like [`LaunchSpec::new`], rooted at the process working directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the image is empty or the working directory
    /// cannot be determined.
    pub fn from_current_dir(options: DockerOptions) -> Result<Self> {
        let cwd = std::env::current_dir().map_err(|e| DockhandError::Io {
            path: PathBuf::from("."),
            source: e,
        })?;
        Self::new(options, &cwd)
    }

    /// Image reference.
    #[must_use]
    pub fn image(&self) -> &str {
        &self.image
    }

    /// Identity-token (cidfile) path for this image.
    #[must_use]
    pub fn identity_token(&self) -> &Path {
        &self.identity_token
    }

    /// Merged `docker run` options.
    #[must_use]
    pub const fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Readiness gate.
    #[must_use]
    pub const fn health_check(&self) -> &HealthCheckSpec {
        &self.health_check
    }

    /// The `docker run` command line.
    #[must_use]
    pub const fn run_command(&self) -> &CommandLine {
        &self.run_command
    }
}

/// Derives `<cwd>/<image with non-word runs replaced by "_">.cid`.
#[must_use]
pub fn identity_token_path(cwd: &Path, image: &str) -> PathBuf {
    let mut stem = String::with_capacity(image.len());
    let mut in_run = false;
    for c in image.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            stem.push(c);
            in_run = false;
        } else if !in_run {
            stem.push('_');
            in_run = true;
        }
    }
    cwd.join(format!("{stem}.{CID_EXTENSION}"))
}
