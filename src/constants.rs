//! Constants and default values for pidward.
//!
//! Defaults filled into a config when a start creates or completes it live here
//! alongside the timing used by the status poller.

use std::time::Duration;

/// Config file looked up in the current directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "pidward.yaml";

/// Pidfile used when the config does not name one.
pub const DEFAULT_PIDFILE: &str = "proc.pid";

/// Working directory used when the config does not name one.
pub const DEFAULT_WORKDIR: &str = ".";

/// Allowed drift in seconds between process start time and pidfile mtime.
pub const DEFAULT_ALLOW_SECS: i64 = 5;

/// Delay between two liveness probes while waiting for a state change.
pub const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Exit code reported for a hook that could not be spawned at all.
pub const HOOK_SPAWN_FAILURE_CODE: i32 = 127;

/// Offset added to a signal number when a hook dies from that signal.
pub const SIGNAL_EXIT_OFFSET: i32 = 128;

/// Prefix of environment variables exported to hooks.
pub const HOOK_ENV_PREFIX: &str = "PIDWARD";

/// Placeholder suffix the process table reports for unreaped processes.
pub const DEFUNCT_MARKER: &str = "<defunct>";
