//! Engine command lines.
//!
//! Every command this crate sends to the engine is built here.

use dockhand_common::config::RunOptions;
use dockhand_common::constants::ENGINE_BINARY;
use dockhand_common::types::ContainerId;

use crate::command::CommandLine;
use crate::options::serialize_options;

fn engine() -> CommandLine {
    CommandLine::new(ENGINE_BINARY)
}

/// `docker run <options> <image> [<command>] [<args>]`.
///
/// `command` and `args` are split on whitespace into separate tokens.
#[must_use]
pub fn run(
    options: &RunOptions,
    image: &str,
    command: Option<&str>,
    args: Option<&str>,
) -> CommandLine {
    let trailing = command
        .into_iter()
        .chain(args)
        .flat_map(str::split_whitespace);
    engine()
        .arg("run")
        .args(serialize_options(options))
        .arg(image)
        .args(trailing)
}

/// `docker inspect <image>`.
#[must_use]
pub fn inspect(image: &str) -> CommandLine {
    engine().arg("inspect").arg(image)
}

/// `docker pull <image>`.
#[must_use]
pub fn pull(image: &str) -> CommandLine {
    engine().arg("pull").arg(image)
}

/// `docker stop <id>`.
#[must_use]
pub fn stop(id: &ContainerId) -> CommandLine {
    engine().arg("stop").arg(id.as_str())
}

/// `docker rm <id>`.
#[must_use]
pub fn remove(id: &ContainerId) -> CommandLine {
    engine().arg("rm").arg(id.as_str())
}

/// `docker events --filter <filter> --format {{json .}}`.
///
/// The format makes the feed newline-delimited JSON.
#[must_use]
pub fn events(filter: &str) -> CommandLine {
    engine()
        .arg("events")
        .arg("--filter")
        .arg(filter)
        .arg("--format")
        .arg("{{json .}}")
}

/// Event filter scoping the feed to one image.
#[must_use]
pub fn image_filter(image: &str) -> String {
    format!("image={image}")
}
