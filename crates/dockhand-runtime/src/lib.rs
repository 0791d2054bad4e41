//! Container lifecycle orchestration for test dependencies.
//!
//! The [`orchestrator::Orchestrator`] launches one image through the
//! `docker` CLI, cleans up instances left behind by crashed runs, and holds
//! the caller until the container passes its readiness gate.
//!
//! Every interaction with the engine goes through the
//! [`command::CommandRunner`] seam and every readiness probe through
//! [`health::Probe`], so the lifecycle can be driven by scripted fakes
//! without an engine installed. The fakes live in the `testing` module,
//! compiled for this crate's tests and behind the `testing` feature.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod cleanup;
pub mod command;
pub mod diagnostics;
pub mod docker;
pub mod events;
pub mod health;
pub mod launch;
pub mod logs;
pub mod options;
pub mod orchestrator;
pub mod process;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
