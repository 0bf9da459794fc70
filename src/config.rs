//! Configuration management for pidward.
//!
//! One YAML record per supervised directory describes the command, where its
//! pidfile lives and which hooks surround its lifecycle. On disk the `hooks`
//! section is an open mapping (`before_start: ...`, `nocheck_after_stop: true`);
//! in memory it is a fixed struct keyed by [`HookEvent`].
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt, fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};
use strum::IntoEnumIterator;
use strum_macros::{AsRefStr, EnumIter, EnumString};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::constants::{DEFAULT_ALLOW_SECS, DEFAULT_PIDFILE, DEFAULT_WORKDIR};
use crate::error::SupervisorError;

/// Lifecycle points at which a hook may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, AsRefStr, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum HookEvent {
    BeforeStart,
    AfterStart,
    BeforeStop,
    AfterStop,
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// A hook command: a shell string, or an argv executed without a shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HookCommand {
    Shell(String),
    Argv(Vec<String>),
}

impl HookCommand {
    /// Human-readable form used in logs and error messages.
    pub fn render(&self) -> String {
        match self {
            HookCommand::Shell(line) => line.clone(),
            HookCommand::Argv(argv) => argv.join(" "),
        }
    }
}

/// Command and failure policy for a single lifecycle event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hook {
    pub command: Option<HookCommand>,
    /// Per-event override of the global `nocheck` flag.
    pub nocheck: Option<bool>,
}

/// Hooks for every lifecycle event plus the global failure policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawHooks", into = "RawHooks")]
pub struct Hooks {
    pub before_start: Hook,
    pub after_start: Hook,
    pub before_stop: Hook,
    pub after_stop: Hook,
    /// Ignore hook failures unless an event overrides it.
    pub nocheck: Option<bool>,
}

impl Hooks {
    pub fn get(&self, event: HookEvent) -> &Hook {
        match event {
            HookEvent::BeforeStart => &self.before_start,
            HookEvent::AfterStart => &self.after_start,
            HookEvent::BeforeStop => &self.before_stop,
            HookEvent::AfterStop => &self.after_stop,
        }
    }

    pub fn get_mut(&mut self, event: HookEvent) -> &mut Hook {
        match event {
            HookEvent::BeforeStart => &mut self.before_start,
            HookEvent::AfterStart => &mut self.after_start,
            HookEvent::BeforeStop => &mut self.before_stop,
            HookEvent::AfterStop => &mut self.after_stop,
        }
    }

    /// Command configured for `event`, if any.
    pub fn command(&self, event: HookEvent) -> Option<&HookCommand> {
        self.get(event).command.as_ref()
    }

    /// Whether a failing `event` hook should be tolerated. The per-event flag
    /// wins when present, then the global flag.
    pub fn suppressed(&self, event: HookEvent) -> bool {
        self.get(event)
            .nocheck
            .or(self.nocheck)
            .unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self == &Hooks::default()
    }
}

/// Scalar or list value as it appears under `hooks:` on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawHookValue {
    Flag(bool),
    Command(HookCommand),
}

type RawHooks = BTreeMap<String, RawHookValue>;

const NOCHECK_KEY: &str = "nocheck";

impl TryFrom<RawHooks> for Hooks {
    type Error = String;

    fn try_from(raw: RawHooks) -> Result<Self, Self::Error> {
        let mut hooks = Hooks::default();

        for (key, value) in raw {
            if key == NOCHECK_KEY {
                match value {
                    RawHookValue::Flag(flag) => hooks.nocheck = Some(flag),
                    RawHookValue::Command(_) => {
                        return Err(format!("hooks.{key} must be a boolean"));
                    }
                }
                continue;
            }

            if let Some(event_name) = key
                .strip_prefix(NOCHECK_KEY)
                .and_then(|rest| rest.strip_prefix('_'))
            {
                let event = event_name
                    .parse::<HookEvent>()
                    .map_err(|_| format!("unknown hook event in '{key}'"))?;
                match value {
                    RawHookValue::Flag(flag) => hooks.get_mut(event).nocheck = Some(flag),
                    RawHookValue::Command(_) => {
                        return Err(format!("hooks.{key} must be a boolean"));
                    }
                }
                continue;
            }

            let event = key
                .parse::<HookEvent>()
                .map_err(|_| format!("unknown hook event '{key}'"))?;
            match value {
                RawHookValue::Command(command) => hooks.get_mut(event).command = Some(command),
                RawHookValue::Flag(_) => {
                    return Err(format!("hooks.{key} must be a command string or list"));
                }
            }
        }

        Ok(hooks)
    }
}

impl From<Hooks> for RawHooks {
    fn from(hooks: Hooks) -> Self {
        let mut raw = RawHooks::new();

        if let Some(flag) = hooks.nocheck {
            raw.insert(NOCHECK_KEY.to_string(), RawHookValue::Flag(flag));
        }

        for event in HookEvent::iter() {
            let hook = hooks.get(event);
            if let Some(command) = &hook.command {
                raw.insert(
                    event.as_ref().to_string(),
                    RawHookValue::Command(command.clone()),
                );
            }
            if let Some(flag) = hook.nocheck {
                raw.insert(
                    format!("{NOCHECK_KEY}_{}", event.as_ref()),
                    RawHookValue::Flag(flag),
                );
            }
        }

        raw
    }
}

/// The persisted record describing the supervised command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Argv of the supervised command.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pidfile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outfile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errfile: Option<String>,
    /// Regex checked against the live command line; `""` or `"."` derives one
    /// from `command`.
    #[serde(rename = "match", default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Tolerated seconds between process start and pidfile mtime; negative
    /// disables the check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow: Option<i64>,
    #[serde(default, skip_serializing_if = "Hooks::is_empty")]
    pub hooks: Hooks,
    /// Directory relative paths resolve against. Not persisted.
    #[serde(skip)]
    pub project_dir: Option<PathBuf>,
}

/// Values supplied by the caller for the mutable config fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub workdir: Option<String>,
    pub pidfile: Option<String>,
    pub outfile: Option<String>,
    pub infile: Option<String>,
    pub errfile: Option<String>,
    pub pattern: Option<String>,
    pub allow: Option<i64>,
}

impl Overrides {
    pub fn is_empty(&self) -> bool {
        self == &Overrides::default()
    }
}

fn merge_field<T: PartialEq + Clone + fmt::Debug>(
    name: &str,
    slot: &mut Option<T>,
    value: &Option<T>,
) -> bool {
    match value {
        Some(value) if slot.as_ref() != Some(value) => {
            debug!("Config field '{name}' changed: {:?} -> {:?}", slot, value);
            *slot = Some(value.clone());
            true
        }
        _ => false,
    }
}

impl Config {
    /// Effective drift tolerance in seconds.
    pub fn allow(&self) -> i64 {
        self.allow.unwrap_or(DEFAULT_ALLOW_SECS)
    }

    /// Applies every present override that differs from the stored value.
    /// Returns whether anything changed. `command` and `hooks` are untouched.
    pub fn merge(&mut self, overrides: &Overrides) -> bool {
        let mut changed = false;
        changed |= merge_field("workdir", &mut self.workdir, &overrides.workdir);
        changed |= merge_field("pidfile", &mut self.pidfile, &overrides.pidfile);
        changed |= merge_field("outfile", &mut self.outfile, &overrides.outfile);
        changed |= merge_field("infile", &mut self.infile, &overrides.infile);
        changed |= merge_field("errfile", &mut self.errfile, &overrides.errfile);
        changed |= merge_field("match", &mut self.pattern, &overrides.pattern);
        changed |= merge_field("allow", &mut self.allow, &overrides.allow);
        changed
    }

    /// Replaces the command when a non-empty, different one is supplied.
    pub fn replace_command(&mut self, command: &[String]) -> bool {
        if command.is_empty() || self.command == command {
            return false;
        }
        debug!("Config command changed: {:?} -> {:?}", self.command, command);
        self.command = command.to_vec();
        true
    }

    /// Fills `pidfile`, `workdir` and `allow` when they are unset.
    pub fn fill_defaults(&mut self) {
        self.pidfile.get_or_insert_with(|| DEFAULT_PIDFILE.to_string());
        self.workdir.get_or_insert_with(|| DEFAULT_WORKDIR.to_string());
        self.allow.get_or_insert(DEFAULT_ALLOW_SECS);
    }

    /// Resolves `raw` against the config's directory unless it is absolute.
    pub fn resolve(&self, raw: &str) -> PathBuf {
        let path = Path::new(raw);
        if path.is_absolute() {
            return path.to_path_buf();
        }
        match &self.project_dir {
            Some(base) => base.join(path),
            None => path.to_path_buf(),
        }
    }

    pub fn pidfile_path(&self) -> Option<PathBuf> {
        self.pidfile.as_deref().map(|raw| self.resolve(raw))
    }

    pub fn workdir_path(&self) -> PathBuf {
        self.resolve(self.workdir.as_deref().unwrap_or(DEFAULT_WORKDIR))
    }

    pub fn infile_path(&self) -> Option<PathBuf> {
        self.infile.as_deref().map(|raw| self.resolve(raw))
    }

    pub fn outfile_path(&self) -> Option<PathBuf> {
        self.outfile.as_deref().map(|raw| self.resolve(raw))
    }

    pub fn errfile_path(&self) -> Option<PathBuf> {
        self.errfile.as_deref().map(|raw| self.resolve(raw))
    }

    /// The command joined with spaces, for display.
    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }
}

/// Reads and writes the config file for one supervised directory.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    /// Skip writes; the in-memory config is used for this run only.
    temporary: bool,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            temporary: false,
        }
    }

    /// Marks every subsequent save as a no-op.
    pub fn temporary(mut self, temporary: bool) -> Self {
        self.temporary = temporary;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Directory holding the config file.
    pub fn base_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Loads the config, returning `None` when the file does not exist.
    pub fn load(&self) -> Result<Option<Config>, SupervisorError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(SupervisorError::ConfigRead(std::io::Error::new(
                    err.kind(),
                    format!("{} ({})", err, self.path.display()),
                )));
            }
        };

        let mut config: Config = if content.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(&content)?
        };
        config.project_dir = Some(self.base_dir());
        Ok(Some(config))
    }

    /// A fresh config rooted at this store's directory.
    pub fn blank(&self) -> Config {
        Config {
            project_dir: Some(self.base_dir()),
            ..Config::default()
        }
    }

    /// Atomically replaces the config file. Returns `false` when the store is
    /// temporary and nothing was written.
    pub fn save(&self, config: &Config) -> Result<bool, SupervisorError> {
        if self.temporary {
            info!(
                "Temporary run; not writing config to {}",
                self.path.display()
            );
            return Ok(false);
        }

        let write_error = |source: std::io::Error| SupervisorError::ConfigWrite {
            path: self.path.clone(),
            source,
        };

        let yaml = serde_yaml::to_string(config)?;
        let parent = self.base_dir();
        fs::create_dir_all(&parent).map_err(write_error)?;

        let mut staging = NamedTempFile::new_in(&parent).map_err(write_error)?;
        staging.write_all(yaml.as_bytes()).map_err(write_error)?;
        staging.as_file().sync_all().map_err(write_error)?;
        staging
            .persist(&self.path)
            .map_err(|err| write_error(err.error))?;

        debug!("Wrote config to {}", self.path.display());
        Ok(true)
    }
}
