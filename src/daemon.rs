//! Launching and signalling the supervised command.
//!
//! The supervisor never holds a handle to a running command across
//! invocations; the pidfile written here is the only link between them.
use nix::{
    errno::Errno,
    sys::signal::{self, Signal},
    unistd::Pid,
};
use std::{
    fs::{self, File, OpenOptions},
    io::ErrorKind,
    os::unix::process::{CommandExt, ExitStatusExt},
    path::{Path, PathBuf},
    process::{Command, ExitStatus, Stdio},
};
use tracing::{debug, error, info};

use crate::config::Config;
use crate::constants::SIGNAL_EXIT_OFFSET;
use crate::error::SupervisorError;

/// Everything needed to start the command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub command: Vec<String>,
    pub workdir: PathBuf,
    pub pidfile: PathBuf,
    pub stdin: Option<PathBuf>,
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
    /// Run attached and block until the command exits.
    pub foreground: bool,
}

impl LaunchRequest {
    pub fn from_config(config: &Config, foreground: bool) -> Result<Self, SupervisorError> {
        if config.command.is_empty() {
            return Err(SupervisorError::Usage("No command to launch".into()));
        }

        Ok(Self {
            command: config.command.clone(),
            workdir: config.workdir_path(),
            pidfile: config.pidfile_path().ok_or(SupervisorError::MissingPidfile)?,
            stdin: config.infile_path(),
            stdout: config.outfile_path(),
            stderr: config.errfile_path(),
            foreground,
        })
    }
}

/// What a launch produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Launch {
    /// The command runs detached; the supervisor continues.
    Background { pid: u32 },
    /// The command ran attached and has already exited.
    Foreground { pid: u32, exit_code: i32 },
}

/// OS-facing operations the supervisor needs.
pub trait ProcessControl {
    /// Starts the command and records its pid in the pidfile before returning.
    fn launch(&self, request: &LaunchRequest) -> Result<Launch, SupervisorError>;

    /// Delivers `signal` to `pid`. A pid that is already gone is not an error.
    fn signal(&self, pid: u32, signal: Signal) -> Result<(), SupervisorError>;
}

/// Translates an exit status into a shell-style exit code.
pub fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => SIGNAL_EXIT_OFFSET + signal,
        (None, None) => 1,
    }
}

/// Writes `pid` followed by a newline, creating parent directories.
pub fn write_pidfile(path: &Path, pid: u32) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, format!("{pid}\n"))
}

/// Removes the pidfile; a missing file is fine.
pub fn remove_pidfile(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed pidfile {}", path.display());
            Ok(())
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

fn open_input(path: Option<&Path>, foreground: bool) -> std::io::Result<Stdio> {
    match path {
        Some(path) => Ok(File::open(path)?.into()),
        None if foreground => Ok(Stdio::inherit()),
        None => Ok(Stdio::null()),
    }
}

fn open_output(path: Option<&Path>, foreground: bool) -> std::io::Result<Stdio> {
    match path {
        Some(path) => {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Ok(file.into())
        }
        None if foreground => Ok(Stdio::inherit()),
        None => Ok(Stdio::null()),
    }
}

/// Real process control: `std::process` to launch, `nix` to signal.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsProcessControl;

impl ProcessControl for OsProcessControl {
    fn launch(&self, request: &LaunchRequest) -> Result<Launch, SupervisorError> {
        let rendered = request.command.join(" ");
        let spawn_error = |source: std::io::Error| SupervisorError::Spawn {
            command: rendered.clone(),
            source,
        };

        let Some((program, args)) = request.command.split_first() else {
            return Err(SupervisorError::Usage("No command to launch".into()));
        };

        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&request.workdir);
        cmd.stdin(open_input(request.stdin.as_deref(), request.foreground).map_err(spawn_error)?);
        cmd.stdout(open_output(request.stdout.as_deref(), request.foreground).map_err(spawn_error)?);
        cmd.stderr(open_output(request.stderr.as_deref(), request.foreground).map_err(spawn_error)?);

        if !request.foreground {
            // Detach from our session so terminal hangups do not reach the command.
            unsafe {
                cmd.pre_exec(|| {
                    if libc::setsid() < 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }

        debug!("Executing command: {cmd:?}");
        let mut child = cmd.spawn().map_err(spawn_error)?;
        let pid = child.id();

        if let Err(err) = write_pidfile(&request.pidfile, pid) {
            error!(
                "Failed to record pid {pid} in {}: {err}",
                request.pidfile.display()
            );
            let _ = child.kill();
            let _ = child.wait();
            return Err(err.into());
        }

        if request.foreground {
            info!("Running `{rendered}` in the foreground as pid {pid}");
            let status = child.wait()?;
            remove_pidfile(&request.pidfile)?;
            let exit_code = exit_code(status);
            info!("`{rendered}` exited with code {exit_code}");
            return Ok(Launch::Foreground { pid, exit_code });
        }

        info!("Launched `{rendered}` as pid {pid}");
        Ok(Launch::Background { pid })
    }

    fn signal(&self, pid: u32, sig: Signal) -> Result<(), SupervisorError> {
        let raw = i32::try_from(pid).map_err(|_| SupervisorError::Signal {
            pid,
            source: Errno::EINVAL,
        })?;

        match signal::kill(Pid::from_raw(raw), sig) {
            Ok(()) => {
                debug!("Sent {} to pid {pid}", sig.as_str());
                Ok(())
            }
            Err(Errno::ESRCH) => {
                debug!("Pid {pid} already gone before {}", sig.as_str());
                Ok(())
            }
            Err(source) => Err(SupervisorError::Signal { pid, source }),
        }
    }
}
