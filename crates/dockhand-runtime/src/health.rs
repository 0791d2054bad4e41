//! Readiness polling.
//!
//! [`HealthChecker::await_ready`] has three outcomes: ready, exhausted
//! ([`DockhandError::HealthCheckExhausted`]) or cancelled
//! ([`DockhandError::Cancelled`]). Timers live inside the returned future,
//! so cancelling the token or dropping the future leaves nothing scheduled.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dockhand_common::config::HealthCheckSpec;
use dockhand_common::constants::PROBE_TIMEOUT_MS;
use dockhand_common::error::{DockhandError, Result};
use tokio_util::sync::CancellationToken;

const HEALTH_TARGET: &str = "dockhand::health";

/// Checks a readiness signal once.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Probes `url`, returning a description of the failure if not ready.
    async fn probe(&self, url: &str) -> std::result::Result<(), String>;
}

/// Probes over HTTP; any success status counts as ready.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    /// Builds a probe with the default per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(PROBE_TIMEOUT_MS))
            .build()
            .map_err(|e| DockhandError::Config {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self, url: &str) -> std::result::Result<(), String> {
        let response = self.client.get(url).send().await.map_err(|e| e.to_string())?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(format!("unexpected status {status}"))
        }
    }
}

/// How readiness was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// No URL was configured; ready as soon as the process exists.
    Immediate,
    /// A probe succeeded after this many attempts.
    Probed {
        /// Number of probes issued, including the successful one.
        attempts: u32,
    },
}

/// Polls a [`Probe`] according to a [`HealthCheckSpec`].
pub struct HealthChecker {
    probe: Arc<dyn Probe>,
}

impl HealthChecker {
    /// Creates a checker using `probe`.
    #[must_use]
    pub fn new(probe: Arc<dyn Probe>) -> Self {
        Self { probe }
    }

    /// Waits until the probe succeeds, the retry budget runs out, or
    /// `cancel` fires.
    ///
    /// Waits `start_delay`, then probes; after each failure waits
    /// `inspect_interval` before the next probe. Exactly one probe is in
    /// flight at a time. A `max_retries` of zero behaves like one.
    ///
    /// # Errors
    ///
    /// Returns [`DockhandError::HealthCheckExhausted`] with the last probe
    /// error, or [`DockhandError::Cancelled`].
    pub async fn await_ready(
        &self,
        spec: &HealthCheckSpec,
        cancel: &CancellationToken,
    ) -> Result<Readiness> {
        let Some(url) = spec.url.as_deref() else {
            return Ok(Readiness::Immediate);
        };

        tracing::debug!(
            target: HEALTH_TARGET,
            url,
            max_retries = spec.max_retries,
            interval_ms = spec.inspect_interval,
            delay_ms = spec.start_delay,
            "waiting for readiness"
        );
        pause(spec.start_delay(), cancel).await?;

        let max_attempts = spec.max_retries.max(1);
        let mut attempts = 0;
        loop {
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(DockhandError::Cancelled),
                result = self.probe.probe(url) => result,
            };
            attempts += 1;

            match result {
                Ok(()) => {
                    tracing::debug!(target: HEALTH_TARGET, url, attempts, "probe succeeded");
                    return Ok(Readiness::Probed { attempts });
                }
                Err(last_error) if attempts >= max_attempts => {
                    tracing::warn!(target: HEALTH_TARGET, url, attempts, error = %last_error, "readiness never observed");
                    return Err(DockhandError::HealthCheckExhausted {
                        url: url.to_string(),
                        attempts,
                        last_error,
                    });
                }
                Err(e) => {
                    tracing::debug!(target: HEALTH_TARGET, url, attempts, error = %e, "probe failed");
                }
            }

            pause(spec.inspect_interval(), cancel).await?;
        }
    }
}

/// Sleeps for `duration` unless cancelled first. A zero duration schedules no timer.
async fn pause(duration: Duration, cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(DockhandError::Cancelled);
    }
    if duration.is_zero() {
        return Ok(());
    }
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(DockhandError::Cancelled),
        () = tokio::time::sleep(duration) => Ok(()),
    }
}
