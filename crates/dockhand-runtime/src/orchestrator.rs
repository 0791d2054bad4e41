//! Lifecycle orchestrator: the single control flow driving one container.
//!
//! `start()` walks `Idle → CleaningStale → CheckingImage → (PullingImage) →
//! Launching → AwaitingHealthy → Running`. `stop()` may be called from any
//! state, including concurrently with an in-flight `start()`: it cancels the
//! run token, which every suspension point of `start()` observes, waits for
//! the interrupted `start()` to unwind, and then tears down whatever the run
//! created. A process spawned after cancellation is terminated on the spot.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dockhand_common::constants::{
    NOTIFICATION_CHANNEL_CAPACITY, OUTPUT_CHANNEL_CAPACITY, OUTPUT_DRAIN_TIMEOUT_MS,
};
use dockhand_common::error::{DockhandError, Result};
use dockhand_common::types::OrchestratorState;
use tokio::sync::{OwnedMutexGuard, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::cleanup::StaleInstanceCleaner;
use crate::command::{CommandRunner, SystemRunner};
use crate::diagnostics::Diagnostics;
use crate::docker;
use crate::events::EventStreamListener;
use crate::health::{HealthChecker, HttpProbe, Probe, Readiness};
use crate::launch::LaunchSpec;
use crate::process::{OutputEvent, OutputFanout, ProcessHandle, StreamKind, spawn_output_pump};

const ORCHESTRATOR_TARGET: &str = "dockhand::orchestrator";

/// Lifecycle milestones published to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleNotification {
    /// The engine process exists; sent before readiness polling begins.
    ProcessCreated {
        /// OS process ID of the engine `run` process, when known.
        pid: Option<u32>,
    },
    /// The readiness gate passed.
    Ready,
    /// `stop()` finished tearing the run down.
    Stopped,
}

/// A launched container that passed its readiness gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningContainer {
    /// Image reference.
    pub image: String,
    /// OS process ID of the engine `run` process, when known.
    pub pid: Option<u32>,
    /// Identity-token file written by the engine.
    pub identity_token: PathBuf,
    /// How readiness was established.
    pub readiness: Readiness,
}

/// Terminal success of [`Orchestrator::start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// The container is serving traffic.
    Running(RunningContainer),
    /// The engine binary is not installed; nothing was launched.
    EngineUnavailable,
}

/// How a failed `start()` is reported to the caller.
enum StartFailure {
    Cancelled,
    EngineMissing,
    Fatal(DockhandError),
}

/// Single classification point for start failures.
///
/// A missing engine binary is reported as a successful no-op start. This is
/// kept for compatibility with hosts that run the same suite with and
/// without an engine installed.
fn classify_start_failure(error: DockhandError, cancel: &CancellationToken) -> StartFailure {
    if cancel.is_cancelled() || error.is_cancelled() {
        StartFailure::Cancelled
    } else if error.is_engine_missing() {
        StartFailure::EngineMissing
    } else {
        StartFailure::Fatal(error)
    }
}

#[derive(Default)]
struct Inner {
    state: OrchestratorState,
    run: Option<CancellationToken>,
    process: Option<ProcessHandle>,
    pumps: Vec<JoinHandle<()>>,
    watchers: Vec<JoinHandle<()>>,
    sinks: Vec<mpsc::Sender<OutputEvent>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Configures an [`Orchestrator`].
pub struct OrchestratorBuilder {
    spec: LaunchSpec,
    runner: Option<Arc<dyn CommandRunner>>,
    probe: Option<Arc<dyn Probe>>,
    diagnostics: Option<Diagnostics>,
}

impl OrchestratorBuilder {
    /// Replaces the engine command runner.
    #[must_use]
    pub fn runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Replaces the readiness probe.
    #[must_use]
    pub fn probe(mut self, probe: Arc<dyn Probe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Attaches the diagnostics capability.
    #[must_use]
    pub const fn diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    /// Builds the orchestrator, defaulting to the system engine and an HTTP probe.
    ///
    /// # Errors
    ///
    /// Returns an error if the default HTTP probe cannot be created.
    pub fn build(self) -> Result<Orchestrator> {
        let runner = self
            .runner
            .unwrap_or_else(|| Arc::new(SystemRunner::new()));
        let probe = match self.probe {
            Some(probe) => probe,
            None => Arc::new(HttpProbe::new()?),
        };
        let (notifications, _) = broadcast::channel(NOTIFICATION_CHANNEL_CAPACITY);
        let (output, _) = broadcast::channel(OUTPUT_CHANNEL_CAPACITY);

        Ok(Orchestrator {
            cleaner: StaleInstanceCleaner::new(runner.clone()),
            listener: EventStreamListener::new(runner.clone()),
            health: HealthChecker::new(probe),
            diagnostics: self.diagnostics,
            spec: self.spec,
            runner,
            notifications,
            output,
            inner: Mutex::new(Inner::default()),
            active: Arc::new(tokio::sync::Mutex::new(())),
        })
    }
}

/// Drives one container through its lifecycle.
///
/// Share it behind an [`Arc`] to call [`Orchestrator::stop`] while
/// [`Orchestrator::start`] is in flight.
pub struct Orchestrator {
    spec: LaunchSpec,
    runner: Arc<dyn CommandRunner>,
    cleaner: StaleInstanceCleaner,
    listener: EventStreamListener,
    health: HealthChecker,
    diagnostics: Option<Diagnostics>,
    notifications: broadcast::Sender<LifecycleNotification>,
    output: broadcast::Sender<OutputEvent>,
    inner: Mutex<Inner>,
    /// Held by `start()` for the duration of a run.
    active: Arc<tokio::sync::Mutex<()>>,
}

impl Orchestrator {
    /// Starts configuring an orchestrator for `spec`.
    #[must_use]
    pub fn builder(spec: LaunchSpec) -> OrchestratorBuilder {
        OrchestratorBuilder {
            spec,
            runner: None,
            probe: None,
            diagnostics: None,
        }
    }

    /// Orchestrator using the system engine and an HTTP probe.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP probe cannot be created.
    pub fn new(spec: LaunchSpec) -> Result<Self> {
        Self::builder(spec).build()
    }

    /// The launch description this orchestrator was built with.
    #[must_use]
    pub const fn spec(&self) -> &LaunchSpec {
        &self.spec
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> OrchestratorState {
        lock(&self.inner).state
    }

    /// Subscribes to lifecycle notifications.
    ///
    /// Subscribe before calling `start()` to observe `ProcessCreated`.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleNotification> {
        self.notifications.subscribe()
    }

    /// Subscribes to the engine process output.
    ///
    /// Slow subscribers may miss lines; use [`Orchestrator::output_sink`]
    /// where every line matters.
    #[must_use]
    pub fn subscribe_output(&self) -> broadcast::Receiver<OutputEvent> {
        self.output.subscribe()
    }

    /// Registers a lossless receiver for the output of the next engine process.
    ///
    /// The channel is bounded: when it is full the output pump waits, which
    /// in turn holds back the engine process. It closes once both streams of
    /// that process have ended.
    #[must_use]
    pub fn output_sink(&self) -> mpsc::Receiver<OutputEvent> {
        let (sink, receiver) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        lock(&self.inner).sinks.push(sink);
        receiver
    }

    /// Launches the container and waits for it to become ready.
    ///
    /// # Errors
    ///
    /// Returns [`DockhandError::AlreadyStarted`] if a run is active,
    /// [`DockhandError::Cancelled`] if `stop()` interrupted the run, or the
    /// error of the failing stage. Any other failure tears the run down
    /// before returning.
    pub async fn start(&self) -> Result<StartOutcome> {
        let (cancel, active) = self.begin_run()?;
        let result = self.run(&cancel).await;
        drop(active);
        match result {
            Ok(container) => Ok(StartOutcome::Running(container)),
            Err(e) => match classify_start_failure(e, &cancel) {
                StartFailure::Cancelled => Err(DockhandError::Cancelled),
                StartFailure::EngineMissing => {
                    tracing::warn!(
                        target: ORCHESTRATOR_TARGET,
                        "container engine not found; skipping launch"
                    );
                    self.stop().await;
                    Ok(StartOutcome::EngineUnavailable)
                }
                StartFailure::Fatal(e) => {
                    tracing::debug!(target: ORCHESTRATOR_TARGET, error = %e, "start failed; tearing down");
                    self.stop().await;
                    Err(e)
                }
            },
        }
    }

    /// Tears down the current run, if any, and any stale instance.
    ///
    /// Never fails and is safe to call repeatedly or before `start()`.
    pub async fn stop(&self) {
        {
            let mut inner = lock(&self.inner);
            if let Some(run) = inner.run.take() {
                run.cancel();
            }
            inner.state = OrchestratorState::CleaningStale { stopping: true };
        }
        let active = self.active.lock().await;

        let (process, pumps, watchers) = {
            let mut inner = lock(&self.inner);
            (
                inner.process.take(),
                std::mem::take(&mut inner.pumps),
                std::mem::take(&mut inner.watchers),
            )
        };

        let _ = self.cleaner.cleanup(self.spec.identity_token()).await;
        if let Some(process) = process {
            if let Err(e) = process.terminate().await {
                tracing::warn!(target: ORCHESTRATOR_TARGET, error = %e, "failed to terminate engine process");
            }
        }

        let deadline = Instant::now() + Duration::from_millis(OUTPUT_DRAIN_TIMEOUT_MS);
        drain(pumps, deadline).await;
        self.listener.disconnect().await;
        drain(watchers, deadline).await;

        drop(active);
        lock(&self.inner).state = OrchestratorState::Idle;
        let _ = self.notifications.send(LifecycleNotification::Stopped);
        tracing::debug!(target: ORCHESTRATOR_TARGET, image = self.spec.image(), "stopped");
    }

    fn begin_run(&self) -> Result<(CancellationToken, OwnedMutexGuard<()>)> {
        let mut inner = lock(&self.inner);
        let active = match self.active.clone().try_lock_owned() {
            Ok(active) if inner.state.is_idle() => active,
            _ => {
                return Err(DockhandError::AlreadyStarted {
                    state: inner.state.to_string(),
                });
            }
        };
        let cancel = CancellationToken::new();
        inner.run = Some(cancel.clone());
        inner.state = OrchestratorState::CleaningStale { stopping: false };
        Ok((cancel, active))
    }

    /// Moves to `state` unless the run was cancelled.
    fn advance(&self, cancel: &CancellationToken, state: OrchestratorState) -> Result<()> {
        let mut inner = lock(&self.inner);
        if cancel.is_cancelled() {
            return Err(DockhandError::Cancelled);
        }
        inner.state = state;
        Ok(())
    }

    fn track(&self, tasks: impl IntoIterator<Item = JoinHandle<()>>) {
        lock(&self.inner).watchers.extend(tasks);
    }

    async fn run(&self, cancel: &CancellationToken) -> Result<RunningContainer> {
        let image = self.spec.image();

        if let Some(diagnostics) = &self.diagnostics {
            self.track([diagnostics.watch_pull(&self.listener)]);
        }
        if let Err(e) = self.listener.connect(&docker::image_filter(image)).await {
            if e.is_engine_missing() {
                return Err(e);
            }
            tracing::warn!(target: ORCHESTRATOR_TARGET, error = %e, "event feed unavailable");
        }
        if cancel.is_cancelled() {
            return Err(DockhandError::Cancelled);
        }

        let _ = cancellable(cancel, async {
            Ok(self.cleaner.cleanup(self.spec.identity_token()).await)
        })
        .await?;

        self.advance(cancel, OrchestratorState::CheckingImage)?;
        let inspected = cancellable(cancel, self.runner.run_to_completion(&docker::inspect(image))).await;
        match inspected {
            Ok(_) => {}
            Err(e) if e.is_cancelled() || e.is_engine_missing() => return Err(e),
            Err(e) => {
                tracing::debug!(target: ORCHESTRATOR_TARGET, error = %e, "image not present locally");
                tracing::warn!(
                    target: ORCHESTRATOR_TARGET,
                    image,
                    "NOTE: Pulling image for the first time. Please be patient."
                );
                self.advance(cancel, OrchestratorState::PullingImage)?;
                let _ = cancellable(cancel, self.runner.run_to_completion(&docker::pull(image))).await?;
            }
        }

        self.advance(cancel, OrchestratorState::Launching)?;
        if let Some(diagnostics) = &self.diagnostics {
            self.track(diagnostics.watch_container(&self.listener));
        }
        tracing::info!(target: ORCHESTRATOR_TARGET, image, "Launching docker image");
        tracing::debug!(target: ORCHESTRATOR_TARGET, command = %self.spec.run_command(), "spawning");
        // Not raced against the token: a spawned process must reach `adopt`.
        let process = self.runner.spawn_long_running(self.spec.run_command()).await?;
        let pid = self.adopt(cancel, process).await?;

        self.advance(cancel, OrchestratorState::AwaitingHealthy)?;
        let readiness = self.health.await_ready(self.spec.health_check(), cancel).await?;

        self.advance(cancel, OrchestratorState::Running)?;
        let _ = self.notifications.send(LifecycleNotification::Ready);
        tracing::info!(target: ORCHESTRATOR_TARGET, image, "Docker container is ready");

        Ok(RunningContainer {
            image: image.to_string(),
            pid,
            identity_token: self.spec.identity_token().to_path_buf(),
            readiness,
        })
    }

    /// Stores the process handle and wires its output, or terminates it if
    /// the run was cancelled while it was being spawned.
    async fn adopt(
        &self,
        cancel: &CancellationToken,
        mut process: ProcessHandle,
    ) -> Result<Option<u32>> {
        let orphan = {
            let mut inner = lock(&self.inner);
            if cancel.is_cancelled() {
                Some(process)
            } else {
                let pid = process.pid();
                if let Some(diagnostics) = &self.diagnostics {
                    inner.watchers.push(diagnostics.echo_output(self.output.subscribe()));
                }
                let fanout = OutputFanout::new(self.output.clone())
                    .with_sinks(std::mem::take(&mut inner.sinks));
                for (reader, stream) in [
                    (process.take_stdout(), StreamKind::Stdout),
                    (process.take_stderr(), StreamKind::Stderr),
                ] {
                    let fanout = fanout.clone();
                    inner.pumps.push(match reader {
                        Some(reader) => spawn_output_pump(reader, stream, fanout),
                        None => tokio::spawn(async move {
                            fanout.publish(OutputEvent::Eof(stream)).await;
                        }),
                    });
                }
                inner.process = Some(process);
                let _ = self
                    .notifications
                    .send(LifecycleNotification::ProcessCreated { pid });
                tracing::debug!(target: ORCHESTRATOR_TARGET, ?pid, "process created");
                return Ok(pid);
            }
        };

        if let Some(process) = orphan {
            if let Err(e) = process.terminate().await {
                tracing::warn!(target: ORCHESTRATOR_TARGET, error = %e, "failed to terminate engine process");
            }
        }
        Err(DockhandError::Cancelled)
    }
}

/// Runs `operation` unless `cancel` fires first.
async fn cancellable<T>(
    cancel: &CancellationToken,
    operation: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(DockhandError::Cancelled),
        result = operation => result,
    }
}

/// Awaits each task until `deadline`, aborting whatever is still running.
async fn drain(tasks: Vec<JoinHandle<()>>, deadline: Instant) {
    for mut task in tasks {
        if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
            task.abort();
        }
    }
}
