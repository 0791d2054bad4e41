//! System-wide constants and defaults.

/// Name of the container engine binary invoked for every engine command.
pub const ENGINE_BINARY: &str = "docker";

/// File extension of identity-token (container ID) files.
pub const CID_EXTENSION: &str = "cid";

/// Default number of readiness probes before a health check gives up.
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// Default delay between readiness probes, in milliseconds.
pub const DEFAULT_INSPECT_INTERVAL_MS: u64 = 500;

/// Default delay before the first readiness probe, in milliseconds.
pub const DEFAULT_START_DELAY_MS: u64 = 0;

/// Timeout applied to a single HTTP readiness probe, in milliseconds.
pub const PROBE_TIMEOUT_MS: u64 = 5_000;

/// File name used when log redirection targets a directory.
pub const DEFAULT_LOG_FILENAME: &str = "docker-log.txt";

/// Default configuration file read by the CLI.
pub const DEFAULT_CONFIG_FILE: &str = "dockhand.yaml";

/// Default log filter when neither `RUST_LOG` nor the config sets one.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Capacity of the lifecycle notification broadcast channel.
pub const NOTIFICATION_CHANNEL_CAPACITY: usize = 16;

/// Capacity of the process output broadcast channel.
pub const OUTPUT_CHANNEL_CAPACITY: usize = 1024;

/// Upper bound on how long `stop()` waits for output pumps to drain, in milliseconds.
pub const OUTPUT_DRAIN_TIMEOUT_MS: u64 = 2_000;

/// Application name used in CLI output.
pub const APP_NAME: &str = "dockhand";

/// Binary name for the CLI.
pub const BIN_NAME: &str = "dockhand";
