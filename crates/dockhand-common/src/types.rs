//! Domain primitive types used across the dockhand workspace.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DockhandError, Result};

/// Engine-assigned identifier of a container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a new container ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Parses the contents of an identity-token file.
    ///
    /// Returns `None` when the token holds nothing but whitespace.
    #[must_use]
    pub fn from_token(contents: &str) -> Option<Self> {
        let trimmed = contents.trim();
        (!trimmed.is_empty()).then(|| Self(trimmed.to_string()))
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A decoded record from the engine's event feed.
///
/// Only the category and action are interpreted; the full record is kept
/// verbatim as an opaque payload for observers.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineEvent {
    /// Object category, e.g. `image` or `container`.
    pub category: String,
    /// Action performed, e.g. `pull`, `start`, `stop`.
    pub action: String,
    /// The raw record as received from the engine.
    pub payload: serde_json::Value,
}

impl EngineEvent {
    /// Creates an event from its parts.
    #[must_use]
    pub fn new(
        category: impl Into<String>,
        action: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            category: category.into(),
            action: action.into(),
            payload,
        }
    }

    /// Parses one newline-delimited JSON record from the event feed.
    ///
    /// Accepts both the structured `Type`/`Action` fields and the legacy
    /// `status` field used by older engines (category `container`).
    ///
    /// # Errors
    ///
    /// Returns an error if the line is not a JSON object or carries no
    /// recognizable action.
    pub fn from_json_line(line: &str) -> Result<Self> {
        let malformed = |reason: String| DockhandError::MalformedEvent { reason };
        let payload: serde_json::Value =
            serde_json::from_str(line.trim()).map_err(|e| malformed(e.to_string()))?;
        let object = payload
            .as_object()
            .ok_or_else(|| malformed("not a JSON object".into()))?;

        let text = |key: &str| {
            object
                .get(key)
                .and_then(serde_json::Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let action = text("Action")
            .or_else(|| text("status"))
            .ok_or_else(|| malformed("no action".into()))?;
        let category = text("Type")
            .or_else(|| text("type"))
            .unwrap_or_else(|| "container".to_string());

        Ok(Self {
            category,
            action,
            payload,
        })
    }

    /// Returns the composite `<category>.<action>` name observers subscribe to.
    #[must_use]
    pub fn composite_name(&self) -> String {
        format!("{}.{}", self.category, self.action)
    }

    /// Returns the actor identifier, when present.
    #[must_use]
    pub fn actor_id(&self) -> Option<&str> {
        self.payload
            .get("Actor")
            .and_then(|a| a.get("ID"))
            .or_else(|| self.payload.get("id"))
            .and_then(serde_json::Value::as_str)
    }
}

/// Lifecycle state of the orchestrator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrchestratorState {
    /// Nothing launched; `start()` may be called.
    #[default]
    Idle,
    /// Removing a container left behind by a previous run.
    CleaningStale {
        /// Whether the cleanup is part of `stop()`.
        stopping: bool,
    },
    /// Checking whether the image is present locally.
    CheckingImage,
    /// Pulling an image that is not present locally.
    PullingImage,
    /// Spawning the engine `run` process.
    Launching,
    /// Waiting for the readiness gate.
    AwaitingHealthy,
    /// The container is serving traffic.
    Running,
}

impl OrchestratorState {
    /// Returns whether the orchestrator holds no run.
    #[must_use]
    pub const fn is_idle(self) -> bool {
        matches!(self, Self::Idle)
    }
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::CleaningStale { stopping: false } => write!(f, "cleaning-stale"),
            Self::CleaningStale { stopping: true } => write!(f, "cleaning-stale (stop)"),
            Self::CheckingImage => write!(f, "checking-image"),
            Self::PullingImage => write!(f, "pulling-image"),
            Self::Launching => write!(f, "launching"),
            Self::AwaitingHealthy => write!(f, "awaiting-healthy"),
            Self::Running => write!(f, "running"),
        }
    }
}
