//! Per-child process state.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tokio::sync::RwLock;

use crate::output::OutputStore;

/// Lifecycle state of a supervised process.
///
/// Entries begin in `Running`; the reaper performs the single transition to
/// `Stopped`. The wire-level `Unspecified` sentinel never appears here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Stopped,
}

/// Point-in-time status snapshot of a supervised process.
#[derive(Debug, Clone)]
pub struct ProcessStatus {
    pub state: ProcessState,
    pub start_time: SystemTime,
    /// Set once the process has stopped.
    pub end_time: Option<SystemTime>,
    /// Set once the wait syscall reported an exit status; `-1` when the
    /// child was terminated by a signal, `None` when the wait itself failed.
    pub exit_code: Option<i32>,
}

/// The command a process was started with. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

/// In-memory record for one spawned child.
///
/// Owns the command, the status cell, and both output stores. Status readers
/// never wait on each other; the reaper takes the write lock exactly once,
/// at the terminal transition, so any snapshot observing `Stopped` also
/// observes the final `end_time` and `exit_code`.
pub struct ProcessEntry {
    id: String,
    command: CommandSpec,
    work_dir: PathBuf,
    pid: u32,
    status: RwLock<ProcessStatus>,
    stdout: OutputStore,
    stderr: OutputStore,
}

impl ProcessEntry {
    pub(crate) fn new(
        id: String,
        command: CommandSpec,
        work_dir: PathBuf,
        pid: u32,
        stdout: OutputStore,
        stderr: OutputStore,
    ) -> Self {
        Self {
            id,
            command,
            work_dir,
            pid,
            status: RwLock::new(ProcessStatus {
                state: ProcessState::Running,
                start_time: SystemTime::now(),
                end_time: None,
                exit_code: None,
            }),
            stdout,
            stderr,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn command(&self) -> &CommandSpec {
        &self.command
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// The child's working directory. Retained after the child exits.
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Returns a status snapshot by value.
    pub async fn status(&self) -> ProcessStatus {
        self.status.read().await.clone()
    }

    pub(crate) fn stdout_store(&self) -> &OutputStore {
        &self.stdout
    }

    pub(crate) fn stderr_store(&self) -> &OutputStore {
        &self.stderr
    }

    /// Terminal transition, performed once by the reaper.
    pub(crate) async fn finalize(&self, exit_code: Option<i32>) {
        let mut status = self.status.write().await;
        status.exit_code = exit_code;
        status.end_time = Some(SystemTime::now());
        status.state = ProcessState::Stopped;
    }
}
