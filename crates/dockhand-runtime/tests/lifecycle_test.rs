//! End-to-end lifecycle tests driven through the scripted engine and probe.
//!
//! Each scenario builds a real [`Orchestrator`] rooted in a temporary
//! working directory and asserts the exact sequence of engine commands,
//! notifications, and probes.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use dockhand_common::config::{DockerOptions, HealthCheckSpec};
use dockhand_common::error::DockhandError;
use dockhand_common::types::OrchestratorState;
use dockhand_runtime::diagnostics::Diagnostics;
use dockhand_runtime::health::Readiness;
use dockhand_runtime::launch::LaunchSpec;
use dockhand_runtime::logs;
use dockhand_runtime::orchestrator::{LifecycleNotification, Orchestrator, StartOutcome};
use dockhand_runtime::testing::{ScriptedProbe, ScriptedRunner};

fn orchestrator(
    cwd: &Path,
    options: DockerOptions,
    runner: &Arc<ScriptedRunner>,
    probe: &Arc<ScriptedProbe>,
) -> Orchestrator {
    let spec = LaunchSpec::new(options, cwd).expect("valid launch spec");
    Orchestrator::builder(spec)
        .runner(runner.clone())
        .probe(probe.clone())
        .build()
        .expect("orchestrator")
}

/// Starts a run, stops it while `runner` holds its chosen command, and
/// returns the error `start()` resolved with.
async fn stop_while_held(orch: &Arc<Orchestrator>, runner: &Arc<ScriptedRunner>) -> DockhandError {
    let start = {
        let orch = orch.clone();
        tokio::spawn(async move { orch.start().await })
    };
    runner.held().await;

    let stopper = {
        let orch = orch.clone();
        tokio::spawn(async move { orch.stop().await })
    };
    while orch.state() != (OrchestratorState::CleaningStale { stopping: true })
        && !stopper.is_finished()
    {
        tokio::task::yield_now().await;
    }
    runner.release();

    tokio::time::timeout(Duration::from_secs(5), stopper)
        .await
        .expect("stop finishes")
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), start)
        .await
        .expect("start finishes")
        .unwrap()
        .expect_err("start was interrupted")
}

fn assert_fully_torn_down(orch: &Orchestrator, runner: &ScriptedRunner) {
    assert_eq!(orch.state(), OrchestratorState::Idle);
    assert!(runner.spawned().iter().all(|p| p.is_terminated()));
}

fn running(outcome: StartOutcome) -> dockhand_runtime::orchestrator::RunningContainer {
    match outcome {
        StartOutcome::Running(container) => container,
        StartOutcome::EngineUnavailable => panic!("engine reported unavailable"),
    }
}

// ── Start sequence ───────────────────────────────────────────────────

#[tokio::test]
async fn start_without_health_check_runs_without_polling() {
    let dir = tempfile::tempdir().expect("tempdir");
    let runner = Arc::new(ScriptedRunner::new());
    let probe = Arc::new(ScriptedProbe::always_failing());
    let orch = orchestrator(dir.path(), DockerOptions::new("myapp:latest"), &runner, &probe);
    let mut notifications = orch.subscribe();

    let container = running(orch.start().await.unwrap());

    assert_eq!(runner.subcommands(), ["events", "inspect", "run"]);
    assert_eq!(
        runner.rendered_calls()[2],
        format!(
            "docker run --rm --cidfile {} myapp:latest",
            dir.path().join("myapp_latest.cid").display()
        )
    );
    assert!(matches!(
        notifications.recv().await.unwrap(),
        LifecycleNotification::ProcessCreated { pid: Some(_) }
    ));
    assert_eq!(notifications.recv().await.unwrap(), LifecycleNotification::Ready);
    assert_eq!(container.readiness, Readiness::Immediate);
    assert_eq!(probe.calls(), 0);
    assert_eq!(orch.state(), OrchestratorState::Running);

    orch.stop().await;
}

#[tokio::test]
async fn missing_image_is_pulled_before_launch() {
    let dir = tempfile::tempdir().expect("tempdir");
    let runner = Arc::new(ScriptedRunner::new().fail_on("inspect"));
    let probe = Arc::new(ScriptedProbe::succeeding());
    let orch = orchestrator(dir.path(), DockerOptions::new("myapp:latest"), &runner, &probe);

    let _ = running(orch.start().await.unwrap());

    assert_eq!(runner.subcommands(), ["events", "inspect", "pull", "run"]);
    assert_eq!(runner.rendered_calls()[2], "docker pull myapp:latest");
    orch.stop().await;
}

#[tokio::test]
async fn stale_instance_is_removed_before_launch() {
    let dir = tempfile::tempdir().expect("tempdir");
    let runner = Arc::new(ScriptedRunner::new());
    let probe = Arc::new(ScriptedProbe::succeeding());
    let orch = orchestrator(dir.path(), DockerOptions::new("myapp:latest"), &runner, &probe);
    std::fs::write(orch.spec().identity_token(), "c0ffee\n").unwrap();

    let _ = running(orch.start().await.unwrap());

    assert_eq!(runner.subcommands(), ["events", "stop", "rm", "inspect", "run"]);
    assert!(!orch.spec().identity_token().exists());
    orch.stop().await;
}

#[tokio::test(start_paused = true)]
async fn start_resolves_after_second_probe() {
    let dir = tempfile::tempdir().expect("tempdir");
    let runner = Arc::new(ScriptedRunner::new());
    let probe = Arc::new(ScriptedProbe::succeed_on(2));
    let options = DockerOptions::new("myapp:latest").health_check(
        HealthCheckSpec::url("http://localhost:8080")
            .with_max_retries(2)
            .with_inspect_interval(10),
    );
    let orch = orchestrator(dir.path(), options, &runner, &probe);

    let container = running(orch.start().await.unwrap());

    assert_eq!(container.readiness, Readiness::Probed { attempts: 2 });
    assert_eq!(probe.calls(), 2);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(probe.calls(), 2);
    orch.stop().await;
}

#[tokio::test]
async fn missing_engine_is_a_soft_success() {
    let dir = tempfile::tempdir().expect("tempdir");
    let runner = Arc::new(ScriptedRunner::new().without_engine());
    let probe = Arc::new(ScriptedProbe::succeeding());
    let orch = orchestrator(dir.path(), DockerOptions::new("myapp:latest"), &runner, &probe);

    let outcome = orch.start().await.unwrap();

    assert_eq!(outcome, StartOutcome::EngineUnavailable);
    assert!(runner.spawned().is_empty());
    assert_eq!(orch.state(), OrchestratorState::Idle);
}

#[test]
fn empty_image_fails_before_any_command() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = LaunchSpec::new(DockerOptions::new(""), dir.path()).unwrap_err();
    assert!(matches!(err, DockhandError::Config { .. }));
}

// ── Stop ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn stop_before_start_is_a_no_op() {
    let dir = tempfile::tempdir().expect("tempdir");
    let runner = Arc::new(ScriptedRunner::new());
    let probe = Arc::new(ScriptedProbe::succeeding());
    let orch = orchestrator(dir.path(), DockerOptions::new("myapp:latest"), &runner, &probe);
    let mut notifications = orch.subscribe();

    orch.stop().await;
    orch.stop().await;

    assert!(runner.calls().is_empty());
    assert_eq!(orch.state(), OrchestratorState::Idle);
    assert_eq!(notifications.recv().await.unwrap(), LifecycleNotification::Stopped);
}

#[tokio::test(start_paused = true)]
async fn stop_interrupts_in_flight_start() {
    let dir = tempfile::tempdir().expect("tempdir");
    let runner = Arc::new(ScriptedRunner::new());
    let probe = Arc::new(ScriptedProbe::always_failing());
    let options = DockerOptions::new("myapp:latest").health_check(
        HealthCheckSpec::url("http://localhost:8080")
            .with_max_retries(100)
            .with_inspect_interval(1_000),
    );
    let orch = Arc::new(orchestrator(dir.path(), options, &runner, &probe));
    let mut notifications = orch.subscribe();

    let start = {
        let orch = orch.clone();
        tokio::spawn(async move { orch.start().await })
    };
    assert!(matches!(
        notifications.recv().await.unwrap(),
        LifecycleNotification::ProcessCreated { .. }
    ));
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert_eq!(orch.state(), OrchestratorState::AwaitingHealthy);

    orch.stop().await;
    let err = start.await.unwrap().unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(orch.state(), OrchestratorState::Idle);
    assert!(!runner.spawned().is_empty());
    assert!(runner.spawned().iter().all(|p| p.is_terminated()));

    let probes = probe.calls();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(probe.calls(), probes);
}

#[tokio::test]
async fn stop_while_event_feed_is_connecting() {
    let dir = tempfile::tempdir().expect("tempdir");
    let runner = Arc::new(ScriptedRunner::new().hold_on("events"));
    let probe = Arc::new(ScriptedProbe::succeeding());
    let orch = Arc::new(orchestrator(dir.path(), DockerOptions::new("myapp:latest"), &runner, &probe));

    let err = stop_while_held(&orch, &runner).await;

    assert!(err.is_cancelled());
    assert_eq!(runner.spawned_for("events").len(), 1);
    assert!(runner.spawned_for("run").is_empty());
    assert_fully_torn_down(&orch, &runner);
}

#[tokio::test]
async fn stop_while_removing_stale_instance() {
    let dir = tempfile::tempdir().expect("tempdir");
    let runner = Arc::new(ScriptedRunner::new().hold_on("stop"));
    let probe = Arc::new(ScriptedProbe::succeeding());
    let orch = Arc::new(orchestrator(dir.path(), DockerOptions::new("myapp:latest"), &runner, &probe));
    std::fs::write(orch.spec().identity_token(), "c0ffee\n").unwrap();

    let err = stop_while_held(&orch, &runner).await;

    assert!(err.is_cancelled());
    assert!(!runner.subcommands().contains(&"inspect".to_string()));
    assert!(!orch.spec().identity_token().exists());
    assert_fully_torn_down(&orch, &runner);
}

#[tokio::test]
async fn stop_while_inspecting_image() {
    let dir = tempfile::tempdir().expect("tempdir");
    let runner = Arc::new(ScriptedRunner::new().hold_on("inspect"));
    let probe = Arc::new(ScriptedProbe::succeeding());
    let orch = Arc::new(orchestrator(dir.path(), DockerOptions::new("myapp:latest"), &runner, &probe));

    let err = stop_while_held(&orch, &runner).await;

    assert!(err.is_cancelled());
    assert_eq!(runner.subcommands(), ["events", "inspect"]);
    assert_fully_torn_down(&orch, &runner);
}

#[tokio::test]
async fn stop_while_pulling_image() {
    let dir = tempfile::tempdir().expect("tempdir");
    let runner = Arc::new(ScriptedRunner::new().fail_on("inspect").hold_on("pull"));
    let probe = Arc::new(ScriptedProbe::succeeding());
    let orch = Arc::new(orchestrator(dir.path(), DockerOptions::new("myapp:latest"), &runner, &probe));

    let err = stop_while_held(&orch, &runner).await;

    assert!(err.is_cancelled());
    assert_eq!(runner.subcommands(), ["events", "inspect", "pull"]);
    assert_fully_torn_down(&orch, &runner);
}

#[tokio::test]
async fn stop_while_spawning_engine_process() {
    let dir = tempfile::tempdir().expect("tempdir");
    let runner = Arc::new(ScriptedRunner::new().hold_on("run"));
    let probe = Arc::new(ScriptedProbe::succeeding());
    let orch = Arc::new(orchestrator(dir.path(), DockerOptions::new("myapp:latest"), &runner, &probe));
    let mut notifications = orch.subscribe();

    let err = stop_while_held(&orch, &runner).await;

    assert!(err.is_cancelled());
    let run = runner.spawned_for("run");
    assert_eq!(run.len(), 1);
    assert!(run[0].is_terminated());
    assert_eq!(notifications.recv().await.unwrap(), LifecycleNotification::Stopped);
    assert_fully_torn_down(&orch, &runner);
}

#[tokio::test]
async fn orchestrator_can_restart_after_stop() {
    let dir = tempfile::tempdir().expect("tempdir");
    let runner = Arc::new(ScriptedRunner::new());
    let probe = Arc::new(ScriptedProbe::succeeding());
    let orch = orchestrator(dir.path(), DockerOptions::new("redis:7"), &runner, &probe);

    let first = running(orch.start().await.unwrap());
    orch.stop().await;
    let second = running(orch.start().await.unwrap());
    orch.stop().await;

    assert_ne!(first.pid, second.pid);
    assert_eq!(runner.spawned_for("run").len(), 2);
    assert_eq!(runner.rendered_calls()[2], runner.rendered_calls()[5]);
}

// ── Diagnostics and log redirection ──────────────────────────────────

#[tokio::test]
async fn output_is_redirected_to_log_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let runner = Arc::new(
        ScriptedRunner::new().with_spawn_output("run", ["Ready to accept connections"]),
    );
    let probe = Arc::new(ScriptedProbe::succeeding());
    let spec = LaunchSpec::new(DockerOptions::new("redis:7"), dir.path()).unwrap();
    let orch = Orchestrator::builder(spec)
        .runner(runner.clone())
        .probe(probe)
        .diagnostics(Diagnostics::new())
        .build()
        .unwrap();
    let log_dir = dir.path().join("logs");
    let redirect = logs::spawn_redirect(&log_dir, orch.subscribe(), orch.output_sink());

    let _ = running(orch.start().await.unwrap());
    let process = runner.spawned_for("run")[0].clone();
    assert!(process.write_stderr("warning: no config file").await);
    orch.stop().await;
    tokio::time::timeout(Duration::from_secs(5), redirect)
        .await
        .unwrap()
        .unwrap();

    let contents = std::fs::read_to_string(log_dir.join("docker-log.txt")).unwrap();
    assert!(contents.contains("Ready to accept connections\n"));
    assert!(contents.contains("warning: no config file\n"));
}
