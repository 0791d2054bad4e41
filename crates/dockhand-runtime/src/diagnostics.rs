//! Debug-mode diagnostics: engine events and process output echoed to the log.

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::events::{EventReceiver, EventStreamListener};
use crate::process::{OutputEvent, StreamKind};

const DIAGNOSTICS_TARGET: &str = "dockhand::diagnostics";

/// Logs engine events and process output for troubleshooting.
///
/// Stdout lines are echoed at `info` when `echo_stdout` is set and at
/// `debug` otherwise; stderr lines always go to `error`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Diagnostics {
    echo_stdout: bool,
}

impl Diagnostics {
    /// Diagnostics with stdout echoed at `debug`.
    #[must_use]
    pub const fn new() -> Self {
        Self { echo_stdout: false }
    }

    /// Echoes stdout lines at `info` instead of `debug`.
    #[must_use]
    pub const fn with_stdout_echo(mut self, enabled: bool) -> Self {
        self.echo_stdout = enabled;
        self
    }

    /// Reports the first `image.pull` event.
    pub fn watch_pull(&self, listener: &EventStreamListener) -> JoinHandle<()> {
        tokio::spawn(report(listener.once("image.pull")))
    }

    /// Reports the first `container.start` and `container.stop` events.
    pub fn watch_container(&self, listener: &EventStreamListener) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(report(listener.once("container.start"))),
            tokio::spawn(report(listener.once("container.stop"))),
        ]
    }

    /// Echoes process output until both streams reach end of file.
    pub fn echo_output(&self, mut output: broadcast::Receiver<OutputEvent>) -> JoinHandle<()> {
        let echo_stdout = self.echo_stdout;
        tokio::spawn(async move {
            let mut open = 2_u8;
            while open > 0 {
                match output.recv().await {
                    Ok(OutputEvent::Line {
                        stream: StreamKind::Stdout,
                        line,
                    }) => {
                        if echo_stdout {
                            tracing::info!(target: DIAGNOSTICS_TARGET, "{line}");
                        } else {
                            tracing::debug!(target: DIAGNOSTICS_TARGET, "{line}");
                        }
                    }
                    Ok(OutputEvent::Line {
                        stream: StreamKind::Stderr,
                        line,
                    }) => tracing::error!(target: DIAGNOSTICS_TARGET, "{line}"),
                    Ok(OutputEvent::Eof(_)) => open -= 1,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(target: DIAGNOSTICS_TARGET, skipped, "output echo lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

async fn report(mut events: EventReceiver) {
    if let Some(event) = events.recv().await {
        let rendered = serde_json::to_string_pretty(&event.payload)
            .unwrap_or_else(|_| event.payload.to_string());
        tracing::info!(
            target: DIAGNOSTICS_TARGET,
            event = %event.composite_name(),
            "{rendered}"
        );
    }
}
