//! In-memory collaborators for exercising the supervisor without real processes.
use std::{
    fs,
    sync::{Arc, Mutex, MutexGuard},
    time::{SystemTime, UNIX_EPOCH},
};

use nix::sys::signal::Signal;

use crate::daemon::{Launch, LaunchRequest, ProcessControl};
use crate::error::SupervisorError;
use crate::status::{ProcessEntry, ProcessTable};
use crate::supervisor::Confirm;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

/// Shared, mutable process table. Clones observe the same entries.
#[derive(Debug, Clone, Default)]
pub struct FakeProcessTable {
    entries: Arc<Mutex<Vec<ProcessEntry>>>,
}

impl FakeProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `entry`, replacing any entry with the same pid.
    pub fn insert(&self, entry: ProcessEntry) {
        let mut entries = lock(&self.entries);
        entries.retain(|existing| existing.pid != entry.pid);
        entries.push(entry);
    }

    pub fn remove(&self, pid: u32) {
        lock(&self.entries).retain(|entry| entry.pid != pid);
    }

    pub fn contains(&self, pid: u32) -> bool {
        lock(&self.entries).iter().any(|entry| entry.pid == pid)
    }
}

impl ProcessTable for FakeProcessTable {
    fn list_processes(&self) -> Vec<ProcessEntry> {
        lock(&self.entries).clone()
    }
}

/// Something [`RecordingControl`] was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    Launched { pid: u32, command: Vec<String> },
    Signalled { pid: u32, signal: Signal },
}

/// Launches into a [`FakeProcessTable`] and records every call.
#[derive(Debug, Clone)]
pub struct RecordingControl {
    table: FakeProcessTable,
    events: Arc<Mutex<Vec<ControlEvent>>>,
    next_pid: Arc<Mutex<u32>>,
    exit_immediately: bool,
    ignore_signals: bool,
}

impl RecordingControl {
    pub fn new(table: FakeProcessTable) -> Self {
        Self {
            table,
            events: Arc::new(Mutex::new(Vec::new())),
            next_pid: Arc::new(Mutex::new(4000)),
            exit_immediately: false,
            ignore_signals: false,
        }
    }

    /// Launched commands show up as defunct right away.
    pub fn exit_immediately(mut self) -> Self {
        self.exit_immediately = true;
        self
    }

    /// Signalled processes keep running.
    pub fn ignore_signals(mut self) -> Self {
        self.ignore_signals = true;
        self
    }

    pub fn events(&self) -> Vec<ControlEvent> {
        lock(&self.events).clone()
    }

    pub fn signalled(&self) -> bool {
        self.events()
            .iter()
            .any(|event| matches!(event, ControlEvent::Signalled { .. }))
    }
}

impl ProcessControl for RecordingControl {
    fn launch(&self, request: &LaunchRequest) -> Result<Launch, SupervisorError> {
        let pid = {
            let mut next_pid = lock(&self.next_pid);
            *next_pid += 1;
            *next_pid
        };

        if let Some(parent) = request.pidfile.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&request.pidfile, format!("{pid}\n"))?;

        self.table.insert(ProcessEntry {
            pid,
            command_line: request.command.join(" "),
            start_time: now_secs(),
            defunct: self.exit_immediately,
        });
        lock(&self.events).push(ControlEvent::Launched {
            pid,
            command: request.command.clone(),
        });

        if request.foreground {
            self.table.remove(pid);
            let _ = fs::remove_file(&request.pidfile);
            return Ok(Launch::Foreground { pid, exit_code: 0 });
        }

        Ok(Launch::Background { pid })
    }

    fn signal(&self, pid: u32, signal: Signal) -> Result<(), SupervisorError> {
        lock(&self.events).push(ControlEvent::Signalled { pid, signal });
        if !self.ignore_signals {
            self.table.remove(pid);
        }
        Ok(())
    }
}

/// Answers every confirmation with a fixed reply and counts the questions.
#[derive(Debug, Clone)]
pub struct ScriptedConfirm {
    answer: bool,
    asked: Arc<Mutex<usize>>,
}

impl ScriptedConfirm {
    pub fn new(answer: bool) -> Self {
        Self {
            answer,
            asked: Arc::new(Mutex::new(0)),
        }
    }

    pub fn asked(&self) -> usize {
        *lock(&self.asked)
    }
}

impl Confirm for ScriptedConfirm {
    fn confirm(&self, _question: &str) -> Result<bool, SupervisorError> {
        *lock(&self.asked) += 1;
        Ok(self.answer)
    }
}
