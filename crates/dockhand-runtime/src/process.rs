//! Handles to long-running engine processes and their output.
//!
//! A [`ProcessHandle`] represents the engine invocation (`docker run`,
//! `docker events`), not the container itself. Whoever holds it owns the
//! process lifetime and must eventually call [`ProcessHandle::terminate`].

use std::fmt;
use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// Readable output stream of a spawned process.
pub type OutputStream = Box<dyn AsyncRead + Send + Unpin>;

/// Terminates a spawned process.
#[async_trait]
pub trait Terminate: Send {
    /// Kills the process and waits for it to exit.
    ///
    /// # Errors
    ///
    /// Returns an error if the process could not be signaled or reaped.
    async fn terminate(&mut self) -> io::Result<()>;
}

#[async_trait]
impl Terminate for Child {
    async fn terminate(&mut self) -> io::Result<()> {
        if self.try_wait()?.is_some() {
            return Ok(());
        }
        self.kill().await
    }
}

/// Live handle to a spawned engine process.
pub struct ProcessHandle {
    pid: Option<u32>,
    stdout: Option<OutputStream>,
    stderr: Option<OutputStream>,
    process: Box<dyn Terminate>,
}

impl ProcessHandle {
    /// Assembles a handle from its parts.
    #[must_use]
    pub fn new(
        pid: Option<u32>,
        stdout: Option<OutputStream>,
        stderr: Option<OutputStream>,
        process: Box<dyn Terminate>,
    ) -> Self {
        Self {
            pid,
            stdout,
            stderr,
            process,
        }
    }

    /// Wraps a tokio child spawned with piped stdout and stderr.
    #[must_use]
    pub fn from_child(mut child: Child) -> Self {
        let pid = child.id();
        let stdout = child.stdout.take().map(|s| Box::new(s) as OutputStream);
        let stderr = child.stderr.take().map(|s| Box::new(s) as OutputStream);
        Self::new(pid, stdout, stderr, Box::new(child))
    }

    /// OS process ID, when known.
    #[must_use]
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Takes ownership of the stdout stream.
    pub fn take_stdout(&mut self) -> Option<OutputStream> {
        self.stdout.take()
    }

    /// Takes ownership of the stderr stream.
    pub fn take_stderr(&mut self) -> Option<OutputStream> {
        self.stderr.take()
    }

    /// Kills the process and consumes the handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the process could not be signaled or reaped.
    pub async fn terminate(mut self) -> io::Result<()> {
        tracing::debug!(target: "dockhand::process", pid = ?self.pid, "terminating process");
        self.process.terminate().await
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .finish_non_exhaustive()
    }
}

/// Which output stream a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

/// One event of the engine process output fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    /// A line of output, without its trailing newline.
    Line {
        /// Originating stream.
        stream: StreamKind,
        /// Line content, decoded lossily as UTF-8.
        line: String,
    },
    /// The stream reached end of file.
    Eof(StreamKind),
}

/// Destinations of the engine process output.
///
/// Broadcast subscribers that fall behind lose lines. Sinks are bounded
/// queues: a full sink holds the pump back until it is drained, so nothing
/// written to a sink is ever dropped.
#[derive(Debug, Clone)]
pub struct OutputFanout {
    broadcast: broadcast::Sender<OutputEvent>,
    sinks: Vec<mpsc::Sender<OutputEvent>>,
}

impl OutputFanout {
    /// Fan-out publishing only to `broadcast`.
    #[must_use]
    pub const fn new(broadcast: broadcast::Sender<OutputEvent>) -> Self {
        Self {
            broadcast,
            sinks: Vec::new(),
        }
    }

    /// Adds lossless sinks. Closed sinks are skipped.
    #[must_use]
    pub fn with_sinks(mut self, sinks: impl IntoIterator<Item = mpsc::Sender<OutputEvent>>) -> Self {
        self.sinks
            .extend(sinks.into_iter().filter(|sink| !sink.is_closed()));
        self
    }

    /// Publishes `event`, waiting for room in every open sink.
    pub async fn publish(&self, event: OutputEvent) {
        for sink in &self.sinks {
            let _ = sink.send(event.clone()).await;
        }
        let _ = self.broadcast.send(event);
    }
}

/// Reads `reader` line by line and publishes each line on `fanout`.
///
/// Invalid UTF-8 is replaced rather than treated as an error, so a single
/// bad line never ends the pump. An [`OutputEvent::Eof`] is always published
/// last.
pub fn spawn_output_pump(
    reader: OutputStream,
    stream: StreamKind,
    fanout: OutputFanout,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf)
                        .trim_end_matches(['\n', '\r'])
                        .to_string();
                    fanout.publish(OutputEvent::Line { stream, line }).await;
                }
                Err(e) => {
                    tracing::debug!(target: "dockhand::process", %stream, error = %e, "output stream failed");
                    break;
                }
            }
        }
        fanout.publish(OutputEvent::Eof(stream)).await;
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    struct Flag(Arc<AtomicBool>);

    #[async_trait]
    impl Terminate for Flag {
        async fn terminate(&mut self) -> io::Result<()> {
            self.0.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn terminate_invokes_process() {
        let killed = Arc::new(AtomicBool::new(false));
        let handle = ProcessHandle::new(Some(42), None, None, Box::new(Flag(killed.clone())));
        assert_eq!(handle.pid(), Some(42));
        handle.terminate().await.unwrap();
        assert!(killed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn streams_can_only_be_taken_once() {
        let stdout: OutputStream = Box::new(tokio::io::empty());
        let mut handle = ProcessHandle::new(
            None,
            Some(stdout),
            None,
            Box::new(Flag(Arc::new(AtomicBool::new(false)))),
        );
        assert!(handle.take_stdout().is_some());
        assert!(handle.take_stdout().is_none());
        assert!(handle.take_stderr().is_none());
    }

    #[tokio::test]
    async fn pump_publishes_lines_then_eof() {
        let (tx, mut rx) = broadcast::channel(16);
        let input: OutputStream = Box::new(&b"one\r\ntwo\n\xffthree"[..]);
        spawn_output_pump(input, StreamKind::Stderr, OutputFanout::new(tx))
            .await
            .unwrap();

        let mut lines = Vec::new();
        loop {
            match rx.recv().await.unwrap() {
                OutputEvent::Line { stream, line } => {
                    assert_eq!(stream, StreamKind::Stderr);
                    lines.push(line);
                }
                OutputEvent::Eof(stream) => {
                    assert_eq!(stream, StreamKind::Stderr);
                    break;
                }
            }
        }
        assert_eq!(lines, ["one", "two", "\u{fffd}three"]);
    }

    #[tokio::test]
    async fn sink_receives_every_line_despite_small_capacity() {
        let (tx, _) = broadcast::channel(2);
        let (sink, mut lines) = mpsc::channel(2);
        let text: String = (0..500).map(|i| format!("line {i}\n")).collect();
        let input: OutputStream = Box::new(std::io::Cursor::new(text.into_bytes()));
        let pump = spawn_output_pump(
            input,
            StreamKind::Stdout,
            OutputFanout::new(tx).with_sinks([sink]),
        );

        let mut received = 0;
        while let Some(event) = lines.recv().await {
            match event {
                OutputEvent::Line { line, .. } => {
                    assert_eq!(line, format!("line {received}"));
                    received += 1;
                }
                OutputEvent::Eof(stream) => {
                    assert_eq!(stream, StreamKind::Stdout);
                    break;
                }
            }
        }
        assert_eq!(received, 500);
        pump.await.unwrap();
    }

    #[tokio::test]
    async fn closed_sinks_are_skipped() {
        let (tx, mut rx) = broadcast::channel(4);
        let (sink, lines) = mpsc::channel(1);
        drop(lines);
        let input: OutputStream = Box::new(&b"alone\n"[..]);
        spawn_output_pump(input, StreamKind::Stdout, OutputFanout::new(tx).with_sinks([sink]))
            .await
            .unwrap();

        assert!(matches!(rx.recv().await.unwrap(), OutputEvent::Line { .. }));
        assert_eq!(rx.recv().await.unwrap(), OutputEvent::Eof(StreamKind::Stdout));
    }
}
