//! `dockhand plan` — Display the launch plan without executing it.

use std::fmt::Write as _;

use clap::Args;
use dockhand_common::config::LauncherConfig;
use dockhand_runtime::launch::LaunchSpec;

/// Arguments for the `plan` command.
#[derive(Args, Debug)]
pub struct PlanArgs {}

/// Executes the `plan` command.
///
/// # Errors
///
/// Returns an error if the configuration does not describe a valid launch.
pub fn execute(_args: &PlanArgs, config: LauncherConfig) -> anyhow::Result<()> {
    let spec = LaunchSpec::from_current_dir(config.docker_options)?;
    print!("{}", render(&spec));
    Ok(())
}

fn render(spec: &LaunchSpec) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Launch Plan for: {}", spec.image());
    let _ = writeln!(out, "{}", "\u{2550}".repeat(35));
    let _ = writeln!(out);
    let _ = writeln!(out, "  command:        {}", spec.run_command());
    let _ = writeln!(out, "  identity token: {}", spec.identity_token().display());

    let health = spec.health_check();
    match &health.url {
        Some(url) => {
            let _ = writeln!(out, "  health check:   {url}");
            let _ = writeln!(
                out,
                "      retries: {}, interval: {}ms, delay: {}ms",
                health.max_retries, health.inspect_interval, health.start_delay
            );
        }
        None => {
            let _ = writeln!(out, "  health check:   none (ready on launch)");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use dockhand_common::config::{DockerOptions, HealthCheckSpec};

    use super::*;

    #[test]
    fn renders_command_and_token() {
        let options = DockerOptions::new("redis:7").option("p", "6379:6379");
        let spec = LaunchSpec::new(options, Path::new("/work")).unwrap();

        let plan = render(&spec);

        assert!(plan.contains("docker run --rm --cidfile /work/redis_7.cid -p 6379:6379 redis:7"));
        assert!(plan.contains("identity token: /work/redis_7.cid"));
        assert!(plan.contains("none (ready on launch)"));
    }

    #[test]
    fn renders_health_check_budget() {
        let options = DockerOptions::new("myapp:latest").health_check(
            HealthCheckSpec::url("http://localhost:8080")
                .with_max_retries(2)
                .with_inspect_interval(10),
        );
        let spec = LaunchSpec::new(options, Path::new("/work")).unwrap();

        let plan = render(&spec);

        assert!(plan.contains("health check:   http://localhost:8080"));
        assert!(plan.contains("retries: 2, interval: 10ms, delay: 0ms"));
    }
}
