//! The action state machine.
//!
//! One [`Supervisor::run`] call handles exactly one [`Action`]: it loads the
//! stored config, inspects the current status and then starts, stops,
//! restarts or only reports, running hooks around each transition.
use nix::sys::signal::Signal;
use serde::Serialize;
use std::{
    fmt,
    io::{self, BufRead, Write},
    time::Duration,
};
use strum_macros::AsRefStr;
use tracing::{debug, error, info, warn};

use crate::config::{Config, ConfigStore, HookEvent, Overrides};
use crate::daemon::{Launch, LaunchRequest, OsProcessControl, ProcessControl, remove_pidfile};
use crate::error::SupervisorError;
use crate::hooks::HookRunner;
use crate::status::{
    Inspector, ProcessStatus, StatusCode, SysinfoProcessTable, WaitOutcome,
};

/// Supervisory action requested for one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Create the config and start the command.
    Start,
    /// Start the command unless it is already running.
    Stay,
    Restart,
    Kill,
    /// Report whether the command is running.
    Check,
    /// Write the config without touching the process.
    Generate,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// One supervisor invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub action: Action,
    pub overrides: Overrides,
    /// Replacement command; empty keeps the stored one.
    pub command: Vec<String>,
}

impl Request {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            overrides: Overrides::default(),
            command: Vec::new(),
        }
    }

    pub fn with_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        self.overrides = overrides;
        self
    }
}

/// Knobs that shape how transitions are carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorOptions {
    /// Upper bound for each wait; `None` waits indefinitely.
    pub wait_timeout: Option<Duration>,
    /// Signal delivered when stopping.
    pub stop_signal: Signal,
    /// Run the command attached instead of detaching it.
    pub foreground: bool,
    /// Answer yes to the overwrite prompt of `generate`.
    pub assume_yes: bool,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            wait_timeout: None,
            stop_signal: Signal::SIGTERM,
            foreground: false,
            assume_yes: false,
        }
    }
}

/// Final status of an invocation and the exit code it maps to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub action: Action,
    pub status: ProcessStatus,
    pub exit_code: i32,
}

impl Report {
    fn success(action: Action, status: ProcessStatus) -> Self {
        Self {
            action,
            status,
            exit_code: 0,
        }
    }

    fn failure(action: Action, status: ProcessStatus) -> Self {
        Self {
            action,
            status,
            exit_code: 1,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.status)
    }
}

/// Yes/no prompt used before overwriting an existing config.
pub trait Confirm {
    fn confirm(&self, question: &str) -> Result<bool, SupervisorError>;
}

/// Asks on stderr and reads the answer from stdin.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&self, question: &str) -> Result<bool, SupervisorError> {
        let mut stderr = io::stderr();
        write!(stderr, "{question} [y/N] ")?;
        stderr.flush()?;

        Ok(confirm_from(io::stdin().lock())?)
    }
}

/// Reads one answer line; only `y` or `yes`, in any case, count as consent.
fn confirm_from(mut reader: impl BufRead) -> io::Result<bool> {
    let mut response = String::new();
    reader.read_line(&mut response)?;
    let response = response.trim();
    Ok(response.eq_ignore_ascii_case("y") || response.eq_ignore_ascii_case("yes"))
}

/// Composes config storage, inspection, hooks and process control.
pub struct Supervisor {
    store: ConfigStore,
    inspector: Inspector,
    hooks: HookRunner,
    control: Box<dyn ProcessControl>,
    confirm: Box<dyn Confirm>,
    options: SupervisorOptions,
}

impl Supervisor {
    pub fn new(
        store: ConfigStore,
        inspector: Inspector,
        control: impl ProcessControl + 'static,
    ) -> Self {
        let hooks = HookRunner::new(store.path());
        Self {
            store,
            inspector,
            hooks,
            control: Box::new(control),
            confirm: Box::new(StdinConfirm),
            options: SupervisorOptions::default(),
        }
    }

    /// Supervisor wired to the real process table and process control.
    pub fn from_store(store: ConfigStore) -> Self {
        Self::new(store, Inspector::new(SysinfoProcessTable), OsProcessControl)
    }

    pub fn with_confirm(mut self, confirm: impl Confirm + 'static) -> Self {
        self.confirm = Box::new(confirm);
        self
    }

    pub fn with_options(mut self, options: SupervisorOptions) -> Self {
        self.options = options;
        self
    }

    /// Carries out `request` and reports the final status.
    pub fn run(&self, request: &Request) -> Result<Report, SupervisorError> {
        info!("Running '{}' with config {}", request.action, self.store.path().display());
        match request.action {
            Action::Check => self.check(request),
            Action::Stay => self.stay(request),
            Action::Start => self.start(request),
            Action::Restart => self.restart(request),
            Action::Kill => self.kill(request),
            Action::Generate => self.generate(request),
        }
    }

    /// Stored config with `overrides` applied and defaults filled in. Nothing
    /// is written back; only a start persists the merged config.
    fn load(&self, overrides: &Overrides) -> Result<Option<Config>, SupervisorError> {
        Ok(self.store.load()?.map(|mut config| {
            if config.merge(overrides) {
                debug!("Inspecting with command-line overrides applied");
            }
            config.fill_defaults();
            config
        }))
    }

    fn load_required(&self, overrides: &Overrides) -> Result<Config, SupervisorError> {
        self.load(overrides)?
            .ok_or_else(|| SupervisorError::ConfigMissing(self.store.path().to_path_buf()))
    }

    /// Stored config with the request's overrides and command applied and
    /// defaults filled in.
    fn prepare(&self, config: Config, request: &Request) -> Result<Config, SupervisorError> {
        let mut config = config;
        let mut changed = config.merge(&request.overrides);
        changed |= config.replace_command(&request.command);
        if changed {
            info!("Configuration updated from command line");
        }

        if config.command.is_empty() {
            return Err(SupervisorError::Usage(
                "No command configured; pass one after `--`".into(),
            ));
        }

        config.fill_defaults();
        Ok(config)
    }

    fn check(&self, request: &Request) -> Result<Report, SupervisorError> {
        let config = self.load_required(&request.overrides)?;
        let status = self.inspector.inspect(&config)?;
        if status.code == StatusCode::Running {
            Ok(Report::success(Action::Check, status))
        } else {
            Ok(Report::failure(Action::Check, status))
        }
    }

    fn stay(&self, request: &Request) -> Result<Report, SupervisorError> {
        let config = match self.load(&request.overrides)? {
            Some(config) => config,
            None => {
                info!("No stored configuration; creating one");
                self.prepare(self.store.blank(), request)?
            }
        };

        let status = self.inspector.inspect(&config)?;
        match status.code {
            StatusCode::Running => {
                info!("Already running as pid {}", status.pid);
                Ok(Report::success(Action::Stay, status))
            }
            StatusCode::Inconsistent => {
                warn!("Pidfile points at an unrelated process; refusing to start");
                Ok(Report::failure(Action::Stay, status))
            }
            StatusCode::Zombie => {
                info!("Pid {} is defunct; starting a fresh instance", status.pid);
                self.launch(Action::Stay, config, request, false)
            }
            _ => self.launch(Action::Stay, config, request, false),
        }
    }

    fn start(&self, request: &Request) -> Result<Report, SupervisorError> {
        if self.store.exists() {
            return Err(SupervisorError::ConfigExists(self.store.path().to_path_buf()));
        }

        let config = self.prepare(self.store.blank(), request)?;
        let status = self.inspector.inspect(&config)?;
        match status.code {
            StatusCode::Running => {
                warn!("Already running as pid {}", status.pid);
                Ok(Report::failure(Action::Start, status))
            }
            StatusCode::Inconsistent => {
                warn!("Pidfile points at an unrelated process; refusing to start");
                Ok(Report::failure(Action::Start, status))
            }
            _ => self.launch(Action::Start, config, request, false),
        }
    }

    fn restart(&self, request: &Request) -> Result<Report, SupervisorError> {
        let config = self.load_required(&request.overrides)?;
        let status = self.inspector.inspect(&config)?;
        match status.code {
            StatusCode::Running => {
                let stopped = self.stop(Action::Restart, &config, status)?;
                if !stopped.succeeded() {
                    return Ok(stopped);
                }
                self.launch(Action::Restart, config, request, true)
            }
            StatusCode::Inconsistent => {
                warn!("Pidfile points at an unrelated process; refusing to restart");
                Ok(Report::failure(Action::Restart, status))
            }
            _ => {
                info!("Not running; starting instead of restarting");
                self.launch(Action::Restart, config, request, false)
            }
        }
    }

    fn kill(&self, request: &Request) -> Result<Report, SupervisorError> {
        let config = self.load_required(&request.overrides)?;
        let status = self.inspector.inspect(&config)?;
        match status.code {
            StatusCode::Running => self.stop(Action::Kill, &config, status),
            StatusCode::Inconsistent => {
                warn!("Pidfile points at an unrelated process; refusing to signal it");
                Ok(Report::failure(Action::Kill, status))
            }
            _ => {
                warn!("Nothing to kill");
                Ok(Report::failure(Action::Kill, status))
            }
        }
    }

    fn generate(&self, request: &Request) -> Result<Report, SupervisorError> {
        let existing = self.store.load()?;
        if existing.is_some() && !self.options.assume_yes {
            let question = format!("Overwrite {}?", self.store.path().display());
            if !self.confirm.confirm(&question)? {
                return Err(SupervisorError::Aborted);
            }
        }

        let config = self.prepare(existing.unwrap_or_else(|| self.store.blank()), request)?;
        self.store.save(&config)?;
        let status = self.inspector.inspect(&config)?;
        Ok(Report::success(Action::Generate, status))
    }

    /// Stops the running command. `running` must be a `RUNNING` status.
    fn stop(
        &self,
        action: Action,
        config: &Config,
        running: ProcessStatus,
    ) -> Result<Report, SupervisorError> {
        self.hooks.run(config, HookEvent::BeforeStop, &running)?;

        info!("Stopping pid {}", running.pid);
        self.control.signal(running.pid, self.options.stop_signal)?;

        let outcome =
            self.inspector
                .wait_for(config, StatusCode::NotRunning, self.options.wait_timeout)?;
        if let WaitOutcome::TimedOut(status) = outcome {
            error!("Pid {} did not exit in time", running.pid);
            return Ok(Report::failure(action, status));
        }

        let settled = outcome.into_status();
        match settled.code {
            StatusCode::NotRunning | StatusCode::Zombie => {}
            _ => {
                error!("Unexpected status while stopping: {settled}");
                return Ok(Report::failure(action, settled));
            }
        }

        if let Some(pidfile) = config.pidfile_path() {
            remove_pidfile(&pidfile)?;
        }

        let stopped = running.promoted(StatusCode::Stopped);
        self.hooks.run(config, HookEvent::AfterStop, &stopped)?;
        info!("Stopped pid {}", stopped.pid);
        Ok(Report::success(action, stopped))
    }

    /// Applies the request to `config`, persists it and launches the command.
    fn launch(
        &self,
        action: Action,
        config: Config,
        request: &Request,
        restarted: bool,
    ) -> Result<Report, SupervisorError> {
        let config = self.prepare(config, request)?;
        self.store.save(&config)?;

        let current = self.inspector.inspect(&config)?;
        self.hooks.run(&config, HookEvent::BeforeStart, &current)?;

        let launch_request = LaunchRequest::from_config(&config, self.options.foreground)?;
        match self.control.launch(&launch_request)? {
            Launch::Foreground { pid, exit_code } => {
                let status = ProcessStatus {
                    code: StatusCode::Stopped,
                    pid,
                    command_line: Some(config.command_line()),
                };
                return Ok(Report {
                    action,
                    status,
                    exit_code,
                });
            }
            Launch::Background { pid } => info!("Waiting for pid {pid} to come up"),
        }

        let outcome =
            self.inspector
                .wait_for(&config, StatusCode::Running, self.options.wait_timeout)?;
        let status = outcome.into_status();
        if status.code != StatusCode::Running {
            error!("`{}` failed to start: {status}", config.command_line());
            return Ok(Report::failure(action, status));
        }

        let code = if restarted {
            StatusCode::Restarted
        } else {
            StatusCode::Started
        };
        let started = status.promoted(code);
        self.hooks.run(&config, HookEvent::AfterStart, &started)?;
        info!("`{}` is up as pid {}", config.command_line(), started.pid);
        Ok(Report::success(action, started))
    }
}
