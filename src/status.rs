//! Liveness detection for the supervised command.
//!
//! A pid alone proves nothing: after a crash the kernel may hand the same pid
//! to an unrelated process. [`Inspector::inspect`] therefore cross-checks the
//! live entry against the command pattern and against the pidfile's mtime
//! before it reports [`StatusCode::Running`].
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use std::{
    fmt,
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
    thread,
    time::{Duration, Instant, UNIX_EPOCH},
};
use strum_macros::AsRefStr;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};
use tracing::debug;

use crate::config::Config;
use crate::constants::{DEFUNCT_MARKER, POLL_INTERVAL};
use crate::error::SupervisorError;

/// Observed or produced state of the supervised command.
///
/// Declaration order matches the numeric codes so comparisons on the enum
/// agree with comparisons on [`StatusCode::value`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, AsRefStr, Serialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i8)]
pub enum StatusCode {
    /// The pid is held by an exited, unreaped process.
    Zombie = -3,
    /// The pid is alive but fails pattern or drift verification.
    Inconsistent = -2,
    NotRunning = -1,
    Stopped = 0,
    Running = 1,
    Started = 2,
    Restarted = 3,
}

impl StatusCode {
    pub const fn value(self) -> i8 {
        self as i8
    }

    /// Codes at which a wait stops regardless of its target.
    pub fn ends_wait(self) -> bool {
        matches!(self, StatusCode::Zombie | StatusCode::Inconsistent)
    }

}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// Result of one inspection. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessStatus {
    pub code: StatusCode,
    /// Pid read from the pidfile, `0` when none could be read.
    pub pid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_line: Option<String>,
}

impl ProcessStatus {
    pub fn new(code: StatusCode, pid: u32) -> Self {
        Self {
            code,
            pid,
            command_line: None,
        }
    }

    fn with_command_line(code: StatusCode, pid: u32, command_line: &str) -> Self {
        Self {
            code,
            pid,
            command_line: Some(command_line.to_string()),
        }
    }

    /// Same pid and command line under a different code.
    pub fn promoted(&self, code: StatusCode) -> Self {
        Self {
            code,
            ..self.clone()
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} pid={}", self.code, self.pid)?;
        if let Some(command_line) = &self.command_line {
            write!(f, " cmd={command_line}")?;
        }
        Ok(())
    }
}

/// One row of a process table snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    pub command_line: String,
    /// Seconds since the Unix epoch.
    pub start_time: u64,
    /// The kernel only reports a placeholder command line for this entry.
    pub defunct: bool,
}

/// Source of point-in-time process table snapshots.
pub trait ProcessTable {
    fn list_processes(&self) -> Vec<ProcessEntry>;
}

/// Process table backed by `sysinfo`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoProcessTable;

impl ProcessTable for SysinfoProcessTable {
    fn list_processes(&self) -> Vec<ProcessEntry> {
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_cmd(UpdateKind::Always),
        );

        system
            .processes()
            .iter()
            .map(|(pid, process)| {
                let defunct = matches!(
                    process.status(),
                    sysinfo::ProcessStatus::Zombie | sysinfo::ProcessStatus::Dead
                );
                let command_line = if defunct {
                    format!("[{}] {DEFUNCT_MARKER}", process.name().to_string_lossy())
                } else {
                    process
                        .cmd()
                        .iter()
                        .map(|arg| arg.to_string_lossy().into_owned())
                        .collect::<Vec<_>>()
                        .join(" ")
                };

                ProcessEntry {
                    pid: pid.as_u32(),
                    command_line,
                    start_time: process.start_time(),
                    defunct,
                }
            })
            .collect()
    }
}

/// How a [`Inspector::wait_for`] call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Reached the target, `ZOMBIE` or `INCONSISTENT`.
    Settled(ProcessStatus),
    /// The deadline passed first; carries the last observation.
    TimedOut(ProcessStatus),
}

impl WaitOutcome {
    pub fn status(&self) -> &ProcessStatus {
        match self {
            WaitOutcome::Settled(status) | WaitOutcome::TimedOut(status) => status,
        }
    }

    pub fn into_status(self) -> ProcessStatus {
        match self {
            WaitOutcome::Settled(status) | WaitOutcome::TimedOut(status) => status,
        }
    }

    pub fn timed_out(&self) -> bool {
        matches!(self, WaitOutcome::TimedOut(_))
    }
}

/// Builds a pattern matching `command` however the shell spaced its arguments.
/// The program may carry a directory prefix; every argument must match whole.
pub fn derive_pattern(command: &[String]) -> String {
    let body = command
        .iter()
        .map(|arg| regex::escape(arg))
        .collect::<Vec<_>>()
        .join(r"\s+");
    format!(r"(?:^|\s|/){body}(?:\s|$)")
}

/// Pattern the live command line must satisfy, if verification is enabled.
pub fn verification_pattern(config: &Config) -> Result<Option<Regex>, SupervisorError> {
    match config.pattern.as_deref() {
        None => Ok(None),
        Some("") | Some(".") => {
            if config.command.is_empty() {
                debug!("No command to derive a match pattern from; skipping verification");
                return Ok(None);
            }
            Ok(Some(Regex::new(&derive_pattern(&config.command))?))
        }
        Some(explicit) => Ok(Some(Regex::new(explicit)?)),
    }
}

/// Reads the pid from the first line of `path` along with the file's mtime in
/// whole seconds since the epoch.
fn read_pidfile(path: &Path) -> Option<(u32, i64)> {
    let file = File::open(path).ok()?;
    let mtime = file
        .metadata()
        .and_then(|meta| meta.modified())
        .ok()?
        .duration_since(UNIX_EPOCH)
        .ok()?
        .as_secs() as i64;

    let mut first_line = String::new();
    BufReader::new(file).read_line(&mut first_line).ok()?;
    let pid = first_line.trim().parse::<u32>().ok()?;
    (pid > 0).then_some((pid, mtime))
}

fn format_epoch(secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .map(|time| time.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| secs.to_string())
}

/// Decides whether the configured command is alive.
pub struct Inspector {
    table: Box<dyn ProcessTable>,
    poll_interval: Duration,
}

impl Inspector {
    pub fn new(table: impl ProcessTable + 'static) -> Self {
        Self {
            table: Box::new(table),
            poll_interval: POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Computes a fresh status for `config`.
    pub fn inspect(&self, config: &Config) -> Result<ProcessStatus, SupervisorError> {
        let pidfile = config.pidfile_path().ok_or(SupervisorError::MissingPidfile)?;
        let pattern = verification_pattern(config)?;

        let Some((pid, mtime)) = read_pidfile(&pidfile) else {
            debug!("No readable pid in {}", pidfile.display());
            return Ok(ProcessStatus::new(StatusCode::NotRunning, 0));
        };

        let processes = self.table.list_processes();
        let Some(entry) = processes.iter().find(|entry| entry.pid == pid) else {
            debug!("Pid {pid} from {} is not alive", pidfile.display());
            return Ok(ProcessStatus::new(StatusCode::NotRunning, pid));
        };

        if entry.defunct {
            debug!("Pid {pid} is defunct");
            return Ok(ProcessStatus::with_command_line(
                StatusCode::Zombie,
                pid,
                &entry.command_line,
            ));
        }

        if let Some(pattern) = &pattern
            && !pattern.is_match(&entry.command_line)
        {
            debug!(
                "Pid {pid} runs `{}` which does not match /{}/",
                entry.command_line,
                pattern.as_str()
            );
            return Ok(ProcessStatus::with_command_line(
                StatusCode::Inconsistent,
                pid,
                &entry.command_line,
            ));
        }

        let allow = config.allow();
        if allow >= 0 {
            let started = entry.start_time as i64;
            let drift = (started - mtime).abs();
            if drift > allow {
                debug!(
                    "Pid {pid} started at {} but pidfile was written at {} ({drift}s apart, {allow}s allowed)",
                    format_epoch(started),
                    format_epoch(mtime)
                );
                return Ok(ProcessStatus::with_command_line(
                    StatusCode::Inconsistent,
                    pid,
                    &entry.command_line,
                ));
            }
        }

        Ok(ProcessStatus::with_command_line(
            StatusCode::Running,
            pid,
            &entry.command_line,
        ))
    }

    /// Polls until the status is `target`, `ZOMBIE` or `INCONSISTENT`, or
    /// until `timeout` elapses. Without a timeout this may block forever.
    pub fn wait_for(
        &self,
        config: &Config,
        target: StatusCode,
        timeout: Option<Duration>,
    ) -> Result<WaitOutcome, SupervisorError> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);

        loop {
            let status = self.inspect(config)?;
            if status.code == target || status.code.ends_wait() {
                debug!("Wait for {target} settled at {status}");
                return Ok(WaitOutcome::Settled(status));
            }

            if let Some(deadline) = deadline
                && Instant::now() >= deadline
            {
                debug!("Wait for {target} timed out at {status}");
                return Ok(WaitOutcome::TimedOut(status));
            }

            thread::sleep(self.poll_interval);
        }
    }
}
