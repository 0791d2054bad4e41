//! Configuration model accepted by the orchestrator and the CLI.
//!
//! Field names are `snake_case`; the `camelCase` spellings used by
//! JavaScript-style host configs are accepted as aliases.

use std::path::{Path, PathBuf};
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_INSPECT_INTERVAL_MS, DEFAULT_MAX_RETRIES, DEFAULT_START_DELAY_MS,
};
use crate::error::{DockhandError, Result};

/// Value of a single `docker run` option.
///
/// Numbers in a config file are read as strings and `null` as `false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged, from = "Option<OptionValueInput>")]
pub enum OptionValue {
    /// `true` emits a bare flag; `false` omits the option.
    Flag(bool),
    /// Emits the flag followed by the value.
    Value(String),
    /// Emits the flag once per item.
    List(Vec<String>),
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        Self::Flag(value)
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        Self::Value(value.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(value: String) -> Self {
        Self::Value(value)
    }
}

impl From<&Path> for OptionValue {
    fn from(value: &Path) -> Self {
        Self::Value(value.display().to_string())
    }
}

impl From<Vec<String>> for OptionValue {
    fn from(value: Vec<String>) -> Self {
        Self::List(value)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Bool(bool),
    Integer(i64),
    Unsigned(u64),
    Float(f64),
}

impl Scalar {
    fn into_string(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Bool(flag) => flag.to_string(),
            Self::Integer(n) => n.to_string(),
            Self::Unsigned(n) => n.to_string(),
            Self::Float(n) => n.to_string(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OptionValueInput {
    Flag(bool),
    Scalar(Scalar),
    List(Vec<Scalar>),
}

impl From<Option<OptionValueInput>> for OptionValue {
    fn from(input: Option<OptionValueInput>) -> Self {
        match input {
            None => Self::Flag(false),
            Some(OptionValueInput::Flag(flag)) => Self::Flag(flag),
            Some(OptionValueInput::Scalar(scalar)) => Self::Value(scalar.into_string()),
            Some(OptionValueInput::List(items)) => {
                Self::List(items.into_iter().map(Scalar::into_string).collect())
            }
        }
    }
}

/// Insertion-ordered mapping of `docker run` option names to values.
///
/// Order is part of the contract: the serialized command line, and with it
/// the identity of a run, must not depend on hashing. Equality is
/// order-sensitive for the same reason.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Option<IndexMap<String, OptionValue>>")]
pub struct RunOptions(IndexMap<String, OptionValue>);

impl RunOptions {
    /// Creates an empty mapping.
    #[must_use]
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    /// Sets an option. An existing key keeps its position and takes the new value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<OptionValue>) {
        let _ = self.0.insert(key.into(), value.into());
    }

    /// Builder-style variant of [`RunOptions::insert`].
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<OptionValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Returns the value stored for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.0.get(key)
    }

    /// Returns a copy of `self` with every entry of `overrides` applied on top.
    #[must_use]
    pub fn merged_with(&self, overrides: &Self) -> Self {
        let mut merged = self.clone();
        merged
            .0
            .extend(overrides.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }

    /// Iterates over entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &OptionValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns whether the mapping is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl PartialEq for RunOptions {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len() && self.0.iter().eq(other.0.iter())
    }
}

impl Eq for RunOptions {}

impl From<Option<IndexMap<String, OptionValue>>> for RunOptions {
    fn from(entries: Option<IndexMap<String, OptionValue>>) -> Self {
        Self(entries.unwrap_or_default())
    }
}

impl<K: Into<String>, V: Into<OptionValue>> FromIterator<(K, V)> for RunOptions {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

/// Readiness gate configuration.
///
/// Deserializes from either a bare URL string or a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "HealthCheckInput")]
pub struct HealthCheckSpec {
    /// URL to probe; `None` disables the readiness gate.
    pub url: Option<String>,
    /// Maximum number of probes before giving up.
    pub max_retries: u32,
    /// Delay between probes, in milliseconds.
    pub inspect_interval: u64,
    /// Delay before the first probe, in milliseconds.
    pub start_delay: u64,
}

impl HealthCheckSpec {
    /// Creates a spec probing `url` with default timings.
    #[must_use]
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Sets the maximum number of probes.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the delay between probes, in milliseconds.
    #[must_use]
    pub const fn with_inspect_interval(mut self, millis: u64) -> Self {
        self.inspect_interval = millis;
        self
    }

    /// Sets the delay before the first probe, in milliseconds.
    #[must_use]
    pub const fn with_start_delay(mut self, millis: u64) -> Self {
        self.start_delay = millis;
        self
    }

    /// Delay between probes.
    #[must_use]
    pub const fn inspect_interval(&self) -> Duration {
        Duration::from_millis(self.inspect_interval)
    }

    /// Delay before the first probe.
    #[must_use]
    pub const fn start_delay(&self) -> Duration {
        Duration::from_millis(self.start_delay)
    }
}

impl Default for HealthCheckSpec {
    fn default() -> Self {
        Self {
            url: None,
            max_retries: DEFAULT_MAX_RETRIES,
            inspect_interval: DEFAULT_INSPECT_INTERVAL_MS,
            start_delay: DEFAULT_START_DELAY_MS,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HealthCheckInput {
    Url(String),
    Table(HealthCheckTable),
}

#[derive(Deserialize)]
struct HealthCheckTable {
    #[serde(default)]
    url: Option<String>,
    #[serde(default = "default_max_retries", alias = "maxRetries")]
    max_retries: u32,
    #[serde(default = "default_inspect_interval", alias = "inspectInterval")]
    inspect_interval: u64,
    #[serde(default = "default_start_delay", alias = "startDelay")]
    start_delay: u64,
}

const fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

const fn default_inspect_interval() -> u64 {
    DEFAULT_INSPECT_INTERVAL_MS
}

const fn default_start_delay() -> u64 {
    DEFAULT_START_DELAY_MS
}

impl From<HealthCheckInput> for HealthCheckSpec {
    fn from(input: HealthCheckInput) -> Self {
        match input {
            HealthCheckInput::Url(url) => Self::url(url),
            HealthCheckInput::Table(table) => Self {
                url: table.url,
                max_retries: table.max_retries,
                inspect_interval: table.inspect_interval,
                start_delay: table.start_delay,
            },
        }
    }
}

/// Caller-facing description of the container to run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerOptions {
    /// Image reference, e.g. `selenium/standalone-chrome:latest`.
    #[serde(default)]
    pub image: String,
    /// `docker run` options, merged over the defaults.
    #[serde(default)]
    pub options: RunOptions,
    /// Command appended after the image.
    #[serde(default)]
    pub command: Option<String>,
    /// Arguments appended after the command.
    #[serde(default)]
    pub args: Option<String>,
    /// Readiness gate.
    #[serde(default, alias = "healthCheck")]
    pub health_check: HealthCheckSpec,
}

impl DockerOptions {
    /// Creates options for `image` with no overrides.
    #[must_use]
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Self::default()
        }
    }

    /// Sets one `docker run` option.
    #[must_use]
    pub fn option(mut self, key: impl Into<String>, value: impl Into<OptionValue>) -> Self {
        self.options.insert(key, value);
        self
    }

    /// Sets the trailing command.
    #[must_use]
    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// Sets the trailing arguments.
    #[must_use]
    pub fn args(mut self, args: impl Into<String>) -> Self {
        self.args = Some(args.into());
        self
    }

    /// Sets the readiness gate.
    #[must_use]
    pub fn health_check(mut self, spec: HealthCheckSpec) -> Self {
        self.health_check = spec;
        self
    }
}

/// Host-level configuration file read by the CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LauncherConfig {
    /// Container description.
    #[serde(alias = "dockerOptions")]
    pub docker_options: DockerOptions,
    /// Enables the diagnostics capability (event and output echo).
    #[serde(default)]
    pub debug: bool,
    /// Directory or file receiving the engine process output.
    #[serde(default, alias = "dockerLogs")]
    pub docker_logs: Option<PathBuf>,
    /// Copies the engine process output to the host's stdout.
    #[serde(default, alias = "logToStdout")]
    pub log_to_stdout: bool,
    /// Log filter used when `RUST_LOG` is unset.
    #[serde(default, alias = "logLevel")]
    pub log_level: Option<String>,
}

impl LauncherConfig {
    /// Parses a YAML document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid YAML or does not match
    /// the configuration schema.
    pub fn from_yaml_str(input: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(input)?)
    }

    /// Reads and parses a YAML configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| DockhandError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_yaml_str(&content)
    }
}
