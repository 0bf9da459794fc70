//! Error handling for pidward.
use std::path::PathBuf;

use thiserror::Error;

use crate::config::HookEvent;
use crate::status::ProcessStatus;

/// Defines all possible errors that can occur while supervising a command.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Bad or conflicting invocation, e.g. starting without a command.
    #[error("{0}")]
    Usage(String),

    /// The action needs a stored config and none exists.
    #[error("No configuration found at {0}")]
    ConfigMissing(PathBuf),

    /// `start` refuses to overwrite an existing config.
    #[error("Configuration already exists at {0}; use --stay or --restart instead")]
    ConfigExists(PathBuf),

    /// Error reading or accessing a configuration file.
    #[error("Failed to read config file: {0}")]
    ConfigRead(#[source] std::io::Error),

    /// Error parsing YAML configuration.
    #[error("Invalid YAML format: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// Error persisting the configuration.
    #[error("Failed to write config file {path}: {source}")]
    ConfigWrite {
        /// Destination that could not be written.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// A liveness check was requested for a config without a pidfile.
    #[error("No pidfile configured")]
    MissingPidfile,

    /// The explicit `match` pattern is not a valid regular expression.
    #[error("Invalid match pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// A lifecycle hook exited non-zero and its failure was not suppressed.
    #[error("{event} hook `{command}` failed with exit code {code}")]
    HookFailed {
        /// Lifecycle event whose hook failed.
        event: HookEvent,
        /// Rendered hook command.
        command: String,
        /// Exit code reported by the hook.
        code: i32,
        /// Status observed when the hook was run.
        status: ProcessStatus,
    },

    /// Error spawning the supervised command.
    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        /// Rendered command line.
        command: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Error delivering a signal.
    #[error("Failed to signal pid {pid}: {source}")]
    Signal {
        /// Target pid.
        pid: u32,
        /// The underlying errno.
        #[source]
        source: nix::errno::Errno,
    },

    /// The user declined the overwrite confirmation.
    #[error("Aborted")]
    Aborted,

    /// Catch-all for filesystem errors on the pidfile or prompt.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SupervisorError {
    /// Status captured alongside the error, if any.
    pub fn status(&self) -> Option<&ProcessStatus> {
        match self {
            SupervisorError::HookFailed { status, .. } => Some(status),
            _ => None,
        }
    }
}
