//! Scripted test doubles for the [`CommandRunner`] and [`Probe`] seams.
//!
//! They record every invocation so tests can assert the exact order of
//! engine commands and readiness probes without a container engine.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use dockhand_common::constants::ENGINE_BINARY;
use dockhand_common::error::{DockhandError, Result};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::{Notify, Semaphore};
use tokio::time::Instant;

use crate::command::{CommandLine, CommandRunner};
use crate::health::Probe;
use crate::process::{OutputStream, ProcessHandle, Terminate};

const PIPE_CAPACITY: usize = 64 * 1024;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A process spawned by [`ScriptedRunner`].
#[derive(Debug)]
pub struct FakeProcess {
    command: CommandLine,
    pid: u32,
    stdout: tokio::sync::Mutex<Option<DuplexStream>>,
    stderr: tokio::sync::Mutex<Option<DuplexStream>>,
    terminated: AtomicBool,
}

impl FakeProcess {
    /// Command line the process was spawned with.
    #[must_use]
    pub const fn command(&self) -> &CommandLine {
        &self.command
    }

    /// Fake OS process ID.
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    /// Whether the process was terminated through its handle.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Writes one line to the process stdout. Returns `false` once closed.
    pub async fn write_stdout(&self, line: &str) -> bool {
        write_line(&self.stdout, line).await
    }

    /// Writes one line to the process stderr. Returns `false` once closed.
    pub async fn write_stderr(&self, line: &str) -> bool {
        write_line(&self.stderr, line).await
    }

    /// Closes both output streams, as if the process exited on its own.
    pub async fn close_output(&self) {
        let _ = self.stdout.lock().await.take();
        let _ = self.stderr.lock().await.take();
    }
}

async fn write_line(pipe: &tokio::sync::Mutex<Option<DuplexStream>>, line: &str) -> bool {
    let mut guard = pipe.lock().await;
    let Some(writer) = guard.as_mut() else {
        return false;
    };
    let mut bytes = line.as_bytes().to_vec();
    bytes.push(b'\n');
    writer.write_all(&bytes).await.is_ok()
}

struct FakeTerminator(Arc<FakeProcess>);

#[async_trait]
impl Terminate for FakeTerminator {
    async fn terminate(&mut self) -> io::Result<()> {
        self.0.terminated.store(true, Ordering::SeqCst);
        self.0.close_output().await;
        Ok(())
    }
}

/// Commands with a held subcommand wait here until released.
#[derive(Debug)]
struct Hold {
    subcommand: String,
    reached: Notify,
    gate: Semaphore,
}

/// [`CommandRunner`] that answers from a script and records every call.
///
/// By default every one-shot command succeeds with empty output and every
/// spawn yields a [`FakeProcess`] whose streams stay open until terminated.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    calls: Mutex<Vec<CommandLine>>,
    failing: HashSet<String>,
    stdout: HashMap<String, String>,
    spawn_lines: HashMap<String, Vec<String>>,
    engine_missing: bool,
    hold: Option<Hold>,
    spawned: Mutex<Vec<Arc<FakeProcess>>>,
    next_pid: AtomicU32,
}

impl ScriptedRunner {
    /// Creates a runner where everything succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_pid: AtomicU32::new(1000),
            ..Self::default()
        }
    }

    /// Makes every command with this subcommand fail with exit code 1.
    #[must_use]
    pub fn fail_on(mut self, subcommand: &str) -> Self {
        let _ = self.failing.insert(subcommand.to_string());
        self
    }

    /// Makes one-shot commands with this subcommand print `stdout`.
    #[must_use]
    pub fn with_stdout(mut self, subcommand: &str, stdout: &str) -> Self {
        let _ = self.stdout.insert(subcommand.to_string(), stdout.to_string());
        self
    }

    /// Preloads lines into the stdout of processes spawned with this subcommand.
    #[must_use]
    pub fn with_spawn_output<I, S>(mut self, subcommand: &str, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let _ = self.spawn_lines.insert(
            subcommand.to_string(),
            lines.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// Behaves as if the engine binary is not installed.
    #[must_use]
    pub const fn without_engine(mut self) -> Self {
        self.engine_missing = true;
        self
    }

    /// Makes commands with this subcommand block after being recorded until
    /// [`ScriptedRunner::release`] is called.
    #[must_use]
    pub fn hold_on(mut self, subcommand: &str) -> Self {
        self.hold = Some(Hold {
            subcommand: subcommand.to_string(),
            reached: Notify::new(),
            gate: Semaphore::new(0),
        });
        self
    }

    /// Waits until a held command has been received.
    pub async fn held(&self) {
        if let Some(hold) = &self.hold {
            hold.reached.notified().await;
        }
    }

    /// Lets every held command proceed, now and from then on.
    pub fn release(&self) {
        if let Some(hold) = &self.hold {
            hold.gate.close();
        }
    }

    /// Every command received, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<CommandLine> {
        lock(&self.calls).clone()
    }

    /// Every command received, rendered as a string.
    #[must_use]
    pub fn rendered_calls(&self) -> Vec<String> {
        self.calls().iter().map(ToString::to_string).collect()
    }

    /// The subcommand of every command received.
    #[must_use]
    pub fn subcommands(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|c| c.subcommand().map(str::to_string))
            .collect()
    }

    /// Every process spawned so far.
    #[must_use]
    pub fn spawned(&self) -> Vec<Arc<FakeProcess>> {
        lock(&self.spawned).clone()
    }

    /// Processes spawned with the given subcommand.
    #[must_use]
    pub fn spawned_for(&self, subcommand: &str) -> Vec<Arc<FakeProcess>> {
        self.spawned()
            .into_iter()
            .filter(|p| p.command.subcommand() == Some(subcommand))
            .collect()
    }

    async fn record(&self, command: &CommandLine) -> Result<()> {
        lock(&self.calls).push(command.clone());
        if let Some(hold) = self
            .hold
            .as_ref()
            .filter(|hold| command.subcommand() == Some(hold.subcommand.as_str()))
        {
            hold.reached.notify_one();
            // Acquiring fails once the gate is closed.
            let _ = hold.gate.acquire().await;
        }
        if self.engine_missing {
            return Err(DockhandError::ExecutableNotFound {
                program: ENGINE_BINARY.to_string(),
            });
        }
        if let Some(sub) = command.subcommand() {
            if self.failing.contains(sub) {
                return Err(DockhandError::CommandFailed {
                    command: command.to_string(),
                    exit_code: Some(1),
                    stderr: format!("scripted failure for `{sub}`"),
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run_to_completion(&self, command: &CommandLine) -> Result<String> {
        self.record(command).await?;
        Ok(command
            .subcommand()
            .and_then(|sub| self.stdout.get(sub))
            .cloned()
            .unwrap_or_default())
    }

    async fn spawn_long_running(&self, command: &CommandLine) -> Result<ProcessHandle> {
        self.record(command).await?;

        let (stdout_writer, stdout_reader) = tokio::io::duplex(PIPE_CAPACITY);
        let (stderr_writer, stderr_reader) = tokio::io::duplex(PIPE_CAPACITY);
        let process = Arc::new(FakeProcess {
            command: command.clone(),
            pid: self.next_pid.fetch_add(1, Ordering::SeqCst),
            stdout: tokio::sync::Mutex::new(Some(stdout_writer)),
            stderr: tokio::sync::Mutex::new(Some(stderr_writer)),
            terminated: AtomicBool::new(false),
        });

        if let Some(lines) = command.subcommand().and_then(|sub| self.spawn_lines.get(sub)) {
            for line in lines {
                let _ = process.write_stdout(line).await;
            }
        }

        lock(&self.spawned).push(process.clone());
        Ok(ProcessHandle::new(
            Some(process.pid),
            Some(Box::new(stdout_reader) as OutputStream),
            Some(Box::new(stderr_reader) as OutputStream),
            Box::new(FakeTerminator(process)),
        ))
    }
}

/// [`Probe`] that answers from a script and records when it was called.
#[derive(Debug)]
pub struct ScriptedProbe {
    succeed_from: Option<u32>,
    calls: Mutex<Vec<Instant>>,
}

impl ScriptedProbe {
    /// A probe whose first call succeeds.
    #[must_use]
    pub fn succeeding() -> Self {
        Self::succeed_on(1)
    }

    /// A probe that never succeeds.
    #[must_use]
    pub fn always_failing() -> Self {
        Self {
            succeed_from: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A probe that fails until its `attempt`-th call (1-based).
    #[must_use]
    pub fn succeed_on(attempt: u32) -> Self {
        Self {
            succeed_from: Some(attempt),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Number of probes issued.
    #[must_use]
    pub fn calls(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Instants at which probes were issued.
    #[must_use]
    pub fn call_times(&self) -> Vec<Instant> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl Probe for ScriptedProbe {
    async fn probe(&self, url: &str) -> std::result::Result<(), String> {
        let attempt = {
            let mut calls = lock(&self.calls);
            calls.push(Instant::now());
            calls.len()
        };
        match self.succeed_from {
            Some(from) if attempt >= from as usize => Ok(()),
            _ => Err(format!("connection refused: {url}")),
        }
    }
}
