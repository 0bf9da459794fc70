//! Command-line interface for pidward.
use std::{str::FromStr, time::Duration};

use clap::{ArgGroup, Parser};
use nix::sys::signal::Signal;
use tracing::level_filters::LevelFilter;

use crate::config::Overrides;
use crate::constants::DEFAULT_CONFIG_FILE;
use crate::supervisor::{Action, Request, SupervisorOptions};

/// Wrapper around `LevelFilter` so clap can parse log levels from either
/// string names ("info", "debug", etc.) or numeric shorthands (0-5).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// String representation suitable for an `EnvFilter` directive.
    pub fn as_str(&self) -> &'static str {
        match self.0 {
            LevelFilter::OFF => "off",
            LevelFilter::ERROR => "error",
            LevelFilter::WARN => "warn",
            LevelFilter::INFO => "info",
            LevelFilter::DEBUG => "debug",
            LevelFilter::TRACE => "trace",
        }
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("log level cannot be empty".into());
        }

        if let Ok(number) = trimmed.parse::<u8>() {
            let level = match number {
                0 => LevelFilter::OFF,
                1 => LevelFilter::ERROR,
                2 => LevelFilter::WARN,
                3 => LevelFilter::INFO,
                4 => LevelFilter::DEBUG,
                5 => LevelFilter::TRACE,
                _ => {
                    return Err(format!(
                        "unsupported log level number '{number}' (expected 0-5)"
                    ));
                }
            };

            return Ok(LogLevelArg(level));
        }

        let level = match trimmed.to_ascii_lowercase().as_str() {
            "off" => LevelFilter::OFF,
            "error" | "err" => LevelFilter::ERROR,
            "warn" | "warning" => LevelFilter::WARN,
            "info" | "information" => LevelFilter::INFO,
            "debug" => LevelFilter::DEBUG,
            "trace" => LevelFilter::TRACE,
            _ => return Err(format!("invalid log level '{trimmed}'")),
        };

        Ok(LogLevelArg(level))
    }
}

/// Accepts `TERM`, `SIGTERM` or `sigterm`.
fn parse_signal(value: &str) -> Result<Signal, String> {
    let upper = value.trim().to_ascii_uppercase();
    let name = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{upper}")
    };
    Signal::from_str(&name).map_err(|_| format!("unknown signal '{value}'"))
}

/// Seconds, fractional values allowed.
fn parse_seconds(value: &str) -> Result<Duration, String> {
    let secs = value
        .trim()
        .parse::<f64>()
        .map_err(|_| format!("invalid number of seconds '{value}'"))?;
    Duration::try_from_secs_f64(secs).map_err(|err| format!("invalid duration '{value}': {err}"))
}

/// Command-line interface for pidward.
#[derive(Parser, Debug)]
#[command(name = "pidward", version, author)]
#[command(
    about = "Keep a single command running, tracked through a pidfile",
    long_about = None
)]
#[command(group(
    ArgGroup::new("action")
        .required(true)
        .multiple(false)
        .args(["start", "stay", "restart", "kill", "check", "generate"])
))]
pub struct Cli {
    /// Create the configuration and start the command.
    #[arg(long)]
    pub start: bool,

    /// Start the command unless it is already running.
    #[arg(long)]
    pub stay: bool,

    /// Stop the command if it is running, then start it.
    #[arg(long)]
    pub restart: bool,

    /// Stop the running command.
    #[arg(long)]
    pub kill: bool,

    /// Report whether the command is running; exits 0 only if it is.
    #[arg(long)]
    pub check: bool,

    /// Write the configuration without starting anything.
    #[arg(long)]
    pub generate: bool,

    /// Path to the configuration file.
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG_FILE)]
    pub config: String,

    /// Apply changes for this run only; never write the configuration.
    #[arg(short, long)]
    pub temporary: bool,

    /// Overwrite an existing configuration without asking.
    #[arg(short, long)]
    pub yes: bool,

    /// Pidfile location, relative to the configuration file.
    #[arg(long, value_name = "FILE")]
    pub pidfile: Option<String>,

    /// Working directory of the command and its hooks.
    #[arg(long, value_name = "DIR")]
    pub workdir: Option<String>,

    /// File the command reads as standard input.
    #[arg(long, value_name = "FILE")]
    pub infile: Option<String>,

    /// File the command's standard output is appended to.
    #[arg(long, value_name = "FILE")]
    pub outfile: Option<String>,

    /// File the command's standard error is appended to.
    #[arg(long, value_name = "FILE")]
    pub errfile: Option<String>,

    /// Regex the live command line must match; "" or "." derives it from the command.
    #[arg(long = "match", value_name = "REGEX")]
    pub pattern: Option<String>,

    /// Seconds tolerated between process start and pidfile write; negative disables.
    #[arg(long, value_name = "SECS", allow_negative_numbers = true)]
    pub allow: Option<i64>,

    /// Print the final status as JSON.
    #[arg(long)]
    pub json: bool,

    /// Run the command attached and exit with its exit code.
    #[arg(long)]
    pub foreground: bool,

    /// Give up waiting for a state change after this many seconds.
    #[arg(long, value_name = "SECS", value_parser = parse_seconds)]
    pub wait_timeout: Option<Duration>,

    /// Signal used to stop the command.
    #[arg(long, value_name = "NAME", value_parser = parse_signal, default_value = "TERM")]
    pub signal: Signal,

    /// Override the logging verbosity for this invocation only.
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<LogLevelArg>,

    /// Command to supervise.
    #[arg(last = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

impl Cli {
    pub fn action(&self) -> Action {
        if self.start {
            Action::Start
        } else if self.stay {
            Action::Stay
        } else if self.restart {
            Action::Restart
        } else if self.kill {
            Action::Kill
        } else if self.generate {
            Action::Generate
        } else {
            Action::Check
        }
    }

    pub fn overrides(&self) -> Overrides {
        Overrides {
            workdir: self.workdir.clone(),
            pidfile: self.pidfile.clone(),
            outfile: self.outfile.clone(),
            infile: self.infile.clone(),
            errfile: self.errfile.clone(),
            pattern: self.pattern.clone(),
            allow: self.allow,
        }
    }

    pub fn request(&self) -> Request {
        Request::new(self.action())
            .with_overrides(self.overrides())
            .with_command(self.command.iter().cloned())
    }

    pub fn options(&self) -> SupervisorOptions {
        SupervisorOptions {
            wait_timeout: self.wait_timeout,
            stop_signal: self.signal,
            foreground: self.foreground,
            assume_yes: self.yes,
        }
    }
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Result<Cli, clap::Error> {
    Cli::try_parse()
}
