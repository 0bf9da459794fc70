//! Lifecycle hook execution.
use std::{path::PathBuf, process::Command};
use tracing::{debug, error, info, warn};

use crate::config::{Config, HookCommand, HookEvent};
use crate::constants::{HOOK_ENV_PREFIX, HOOK_SPAWN_FAILURE_CODE};
use crate::daemon::exit_code;
use crate::error::SupervisorError;
use crate::status::ProcessStatus;

/// Runs the hooks configured for each lifecycle event.
#[derive(Debug, Clone)]
pub struct HookRunner {
    /// Config file path exported to hooks.
    config_path: PathBuf,
}

impl HookRunner {
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
        }
    }

    fn build_command(hook: &HookCommand) -> Option<Command> {
        match hook {
            HookCommand::Shell(line) => {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(line);
                Some(cmd)
            }
            HookCommand::Argv(argv) => {
                let (program, args) = argv.split_first()?;
                let mut cmd = Command::new(program);
                cmd.args(args);
                Some(cmd)
            }
        }
    }

    /// Runs the `event` hook, if one is configured.
    ///
    /// A non-zero exit is fatal unless `nocheck` (or `nocheck_<event>`)
    /// suppresses it, in which case it is only logged.
    pub fn run(
        &self,
        config: &Config,
        event: HookEvent,
        status: &ProcessStatus,
    ) -> Result<(), SupervisorError> {
        let Some(hook) = config.hooks.command(event) else {
            return Ok(());
        };
        let rendered = hook.render();
        let Some(mut cmd) = Self::build_command(hook) else {
            debug!("Empty {event} hook; nothing to run");
            return Ok(());
        };

        cmd.current_dir(config.workdir_path())
            .env(format!("{HOOK_ENV_PREFIX}_EVENT"), event.as_ref())
            .env(format!("{HOOK_ENV_PREFIX}_STATUS"), status.code.as_ref())
            .env(format!("{HOOK_ENV_PREFIX}_PID"), status.pid.to_string())
            .env(format!("{HOOK_ENV_PREFIX}_CONFIG"), &self.config_path);

        info!("Running {event} hook: `{rendered}`");
        let code = match cmd.status() {
            Ok(exit) => exit_code(exit),
            Err(err) => {
                warn!("Failed to spawn {event} hook `{rendered}`: {err}");
                HOOK_SPAWN_FAILURE_CODE
            }
        };

        if code == 0 {
            debug!("{event} hook completed successfully");
            return Ok(());
        }

        if config.hooks.suppressed(event) {
            warn!("{event} hook `{rendered}` exited with code {code}; ignoring (nocheck)");
            return Ok(());
        }

        error!("{event} hook `{rendered}` exited with code {code}");
        Err(SupervisorError::HookFailed {
            event,
            command: rendered,
            code,
            status: status.clone(),
        })
    }
}
