//! Engine event feed subscription.
//!
//! The feed is read by a background task that owns the `docker events`
//! process. Each record is decoded into an [`EngineEvent`] and delivered to
//! the observers registered for its composite name over per-observer
//! channels. Registration is synchronous; delivery is asynchronous.
//!
//! Every receiver handed out belongs to the listener's current session.
//! `disconnect()` ends the session, after which its receivers yield nothing,
//! including events that were already queued.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dockhand_common::error::Result;
use dockhand_common::types::EngineEvent;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::command::CommandRunner;
use crate::docker;
use crate::process::{OutputStream, ProcessHandle};

const EVENTS_TARGET: &str = "dockhand::events";

/// How many events an observer receives before its channel closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// At most one event.
    Once,
    /// At most this many events.
    Times(usize),
    /// Every matching event until disconnect.
    Unbounded,
}

impl Delivery {
    const fn budget(self) -> Option<usize> {
        match self {
            Self::Once => Some(1),
            Self::Times(n) => Some(n),
            Self::Unbounded => None,
        }
    }
}

struct Observer {
    name: String,
    remaining: Option<usize>,
    sender: mpsc::UnboundedSender<EngineEvent>,
}

type Observers = Arc<Mutex<Vec<Observer>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Receiving half of an observer registration.
#[derive(Debug)]
pub struct EventReceiver {
    events: mpsc::UnboundedReceiver<EngineEvent>,
    session: CancellationToken,
}

impl EventReceiver {
    /// Waits for the next event.
    ///
    /// Returns `None` once the delivery budget is spent or the listener
    /// has disconnected.
    pub async fn recv(&mut self) -> Option<EngineEvent> {
        tokio::select! {
            biased;
            () = self.session.cancelled() => None,
            event = self.events.recv() => event,
        }
    }

    /// Returns a queued event without waiting.
    pub fn try_recv(&mut self) -> Option<EngineEvent> {
        if self.session.is_cancelled() {
            return None;
        }
        self.events.try_recv().ok()
    }
}

struct Connection {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Subscribes to the engine event feed and re-emits events by name.
pub struct EventStreamListener {
    runner: Arc<dyn CommandRunner>,
    observers: Observers,
    connection: Mutex<Option<Connection>>,
    session: Mutex<CancellationToken>,
}

impl EventStreamListener {
    /// Creates a disconnected listener.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            observers: Arc::new(Mutex::new(Vec::new())),
            connection: Mutex::new(None),
            session: Mutex::new(CancellationToken::new()),
        }
    }

    /// Registers an observer for `<category>.<action>`.
    ///
    /// The returned receiver yields matching events and closes once the
    /// delivery budget is spent or the listener disconnects.
    pub fn subscribe(&self, name: impl Into<String>, delivery: Delivery) -> EventReceiver {
        let (sender, events) = mpsc::unbounded_channel();
        let remaining = delivery.budget();
        if remaining != Some(0) {
            lock(&self.observers).push(Observer {
                name: name.into(),
                remaining,
                sender,
            });
        }
        EventReceiver {
            events,
            session: lock(&self.session).clone(),
        }
    }

    /// Registers a one-shot observer.
    pub fn once(&self, name: impl Into<String>) -> EventReceiver {
        self.subscribe(name, Delivery::Once)
    }

    /// Opens the feed restricted to `filter`, e.g. `image=redis:7`.
    ///
    /// An existing subscription is closed first.
    ///
    /// # Errors
    ///
    /// Returns an error if the `docker events` process cannot be spawned.
    pub async fn connect(&self, filter: &str) -> Result<()> {
        self.close_connection().await;

        let mut process = self.runner.spawn_long_running(&docker::events(filter)).await?;
        let Some(stdout) = process.take_stdout() else {
            tracing::warn!(target: EVENTS_TARGET, "event process has no stdout");
            let _ = process.terminate().await;
            return Ok(());
        };

        let cancel = CancellationToken::new();
        let task = tokio::spawn(pump_events(
            stdout,
            process,
            self.observers.clone(),
            cancel.clone(),
        ));
        tracing::debug!(target: EVENTS_TARGET, filter, "connected to event feed");

        let previous = lock(&self.connection).replace(Connection { cancel, task });
        if let Some(previous) = previous {
            shutdown(previous).await;
        }
        Ok(())
    }

    /// Closes the feed and drops every observer. Safe to call repeatedly.
    ///
    /// Receivers obtained before the call yield nothing afterwards, even for
    /// events that were already queued.
    pub async fn disconnect(&self) {
        std::mem::take(&mut *lock(&self.session)).cancel();
        self.close_connection().await;
        lock(&self.observers).clear();
    }

    /// Whether a subscription task is running.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        lock(&self.connection)
            .as_ref()
            .is_some_and(|c| !c.task.is_finished())
    }

    /// Delivers `event` to its observers as if it came from the feed.
    pub fn dispatch(&self, event: &EngineEvent) {
        dispatch(&self.observers, event);
    }

    async fn close_connection(&self) {
        let connection = lock(&self.connection).take();
        if let Some(connection) = connection {
            shutdown(connection).await;
            tracing::debug!(target: EVENTS_TARGET, "disconnected from event feed");
        }
    }
}

async fn shutdown(connection: Connection) {
    connection.cancel.cancel();
    if let Err(e) = connection.task.await {
        tracing::debug!(target: EVENTS_TARGET, error = %e, "event task ended abnormally");
    }
}

fn dispatch(observers: &Mutex<Vec<Observer>>, event: &EngineEvent) {
    let name = event.composite_name();
    lock(observers).retain_mut(|observer| {
        if observer.sender.is_closed() {
            return false;
        }
        if observer.name != name {
            return true;
        }
        if observer.sender.send(event.clone()).is_err() {
            return false;
        }
        match observer.remaining.as_mut() {
            Some(remaining) => {
                *remaining -= 1;
                *remaining > 0
            }
            None => true,
        }
    });
}

async fn pump_events(
    stdout: OutputStream,
    process: ProcessHandle,
    observers: Observers,
    cancel: CancellationToken,
) {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            read = reader.read_until(b'\n', &mut buf) => read,
        };
        match read {
            Ok(0) => {
                tracing::debug!(target: EVENTS_TARGET, "event feed ended");
                break;
            }
            Ok(_) => {
                if cancel.is_cancelled() {
                    break;
                }
                let line = String::from_utf8_lossy(&buf);
                if line.trim().is_empty() {
                    continue;
                }
                match EngineEvent::from_json_line(&line) {
                    Ok(event) => dispatch(&observers, &event),
                    Err(e) => {
                        tracing::debug!(target: EVENTS_TARGET, error = %e, "dropping malformed event record");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(target: EVENTS_TARGET, error = %e, "event feed read failed");
                break;
            }
        }
    }
    if let Err(e) = process.terminate().await {
        tracing::debug!(target: EVENTS_TARGET, error = %e, "failed to terminate event process");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::testing::ScriptedRunner;

    const START: &str = r#"{"Type":"container","Action":"start","Actor":{"ID":"abc"}}"#;
    const STOP: &str = r#"{"Type":"container","Action":"stop","Actor":{"ID":"abc"}}"#;
    const PULL: &str = r#"{"Type":"image","Action":"pull","Actor":{"ID":"myapp:latest"}}"#;

    async fn recv(rx: &mut EventReceiver) -> Option<EngineEvent> {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn connect_spawns_filtered_feed() {
        let runner = Arc::new(ScriptedRunner::new());
        let listener = EventStreamListener::new(runner.clone());

        listener.connect("image=myapp:latest").await.unwrap();

        assert!(listener.is_connected());
        assert_eq!(
            runner.rendered_calls(),
            ["docker events --filter image=myapp:latest --format {{json .}}"]
        );
        listener.disconnect().await;
    }

    #[tokio::test]
    async fn events_are_re_emitted_by_composite_name() {
        let runner = Arc::new(ScriptedRunner::new());
        let listener = EventStreamListener::new(runner.clone());
        let mut starts = listener.subscribe("container.start", Delivery::Unbounded);
        let mut pulls = listener.once("image.pull");

        listener.connect("image=myapp:latest").await.unwrap();
        let feed = &runner.spawned_for("events")[0];
        assert!(feed.write_stdout(PULL).await);
        assert!(feed.write_stdout(START).await);

        assert_eq!(recv(&mut pulls).await.unwrap().composite_name(), "image.pull");
        let event = recv(&mut starts).await.unwrap();
        assert_eq!(event.actor_id(), Some("abc"));
        listener.disconnect().await;
    }

    #[tokio::test]
    async fn once_observer_fires_at_most_once() {
        let runner = Arc::new(ScriptedRunner::new());
        let listener = EventStreamListener::new(runner.clone());
        let mut once = listener.once("container.start");
        let mut twice = listener.subscribe("container.start", Delivery::Times(2));
        let mut all = listener.subscribe("container.start", Delivery::Unbounded);

        listener.connect("image=myapp:latest").await.unwrap();
        let feed = &runner.spawned_for("events")[0];
        for _ in 0..3 {
            assert!(feed.write_stdout(START).await);
        }
        for _ in 0..3 {
            assert!(recv(&mut all).await.is_some());
        }

        assert!(recv(&mut once).await.is_some());
        assert!(recv(&mut once).await.is_none());
        assert!(recv(&mut twice).await.is_some());
        assert!(recv(&mut twice).await.is_some());
        assert!(recv(&mut twice).await.is_none());
        listener.disconnect().await;
    }

    #[tokio::test]
    async fn malformed_records_do_not_end_subscription() {
        let runner = Arc::new(ScriptedRunner::new());
        let listener = EventStreamListener::new(runner.clone());
        let mut stops = listener.once("container.stop");

        listener.connect("image=myapp:latest").await.unwrap();
        let feed = &runner.spawned_for("events")[0];
        assert!(feed.write_stdout("{not json").await);
        assert!(feed.write_stdout("").await);
        assert!(feed.write_stdout(r#"{"Type":"container"}"#).await);
        assert!(feed.write_stdout(STOP).await);

        assert!(recv(&mut stops).await.is_some());
        assert!(listener.is_connected());
        listener.disconnect().await;
    }

    #[tokio::test]
    async fn disconnect_terminates_feed_and_closes_observers() {
        let runner = Arc::new(ScriptedRunner::new());
        let listener = EventStreamListener::new(runner.clone());
        let mut starts = listener.subscribe("container.start", Delivery::Unbounded);

        listener.connect("image=myapp:latest").await.unwrap();
        let feed = runner.spawned_for("events")[0].clone();
        listener.disconnect().await;

        assert!(feed.is_terminated());
        assert!(!listener.is_connected());
        assert!(!feed.write_stdout(START).await);
        assert!(recv(&mut starts).await.is_none());
    }

    #[tokio::test]
    async fn disconnect_without_connect_is_noop() {
        let listener = EventStreamListener::new(Arc::new(ScriptedRunner::new()));
        listener.disconnect().await;
        listener.disconnect().await;
        assert!(!listener.is_connected());
    }

    #[tokio::test]
    async fn connect_without_engine_fails() {
        let listener = EventStreamListener::new(Arc::new(ScriptedRunner::new().without_engine()));
        let err = listener.connect("image=x").await.unwrap_err();
        assert!(err.is_engine_missing());
    }

    #[test]
    fn zero_budget_registers_nothing() {
        let listener = EventStreamListener::new(Arc::new(ScriptedRunner::new()));
        let mut rx = listener.subscribe("container.start", Delivery::Times(0));
        listener.dispatch(&EngineEvent::new("container", "start", serde_json::Value::Null));
        assert!(rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn disconnect_discards_queued_events() {
        let runner = Arc::new(ScriptedRunner::new());
        let listener = EventStreamListener::new(runner.clone());
        let mut starts = listener.subscribe("container.start", Delivery::Unbounded);
        let mut marker = listener.once("container.stop");

        listener.connect("image=myapp:latest").await.unwrap();
        let feed = &runner.spawned_for("events")[0];
        assert!(feed.write_stdout(START).await);
        assert!(feed.write_stdout(STOP).await);
        // The stop record is dispatched after the start record.
        assert!(recv(&mut marker).await.is_some());

        listener.disconnect().await;

        assert!(starts.try_recv().is_none());
        assert!(recv(&mut starts).await.is_none());
    }

    #[tokio::test]
    async fn subscriptions_after_disconnect_belong_to_the_next_session() {
        let runner = Arc::new(ScriptedRunner::new());
        let listener = EventStreamListener::new(runner.clone());
        listener.connect("image=myapp:latest").await.unwrap();
        listener.disconnect().await;

        let mut starts = listener.once("container.start");
        listener.connect("image=myapp:latest").await.unwrap();
        let feed = &runner.spawned_for("events")[1];
        assert!(feed.write_stdout(START).await);

        assert!(recv(&mut starts).await.is_some());
        listener.disconnect().await;
    }
}
