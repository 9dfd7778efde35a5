//! Process supervision.
//!
//! The [`Supervisor`] is the registry of every child started by this daemon.
//! `start` spawns a child with its stdout/stderr piped into per-stream
//! [`OutputStore`]s and its own cgroup (root on Linux) or a fresh process
//! group (everywhere else); a reaper task awaits the child and performs the
//! single terminal status transition. All state is in-memory; entries live
//! until the supervisor is dropped.

pub mod cgroup;
mod entry;

pub use entry::{CommandSpec, ProcessEntry, ProcessState, ProcessStatus};

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tempfile::TempDir;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::output::{OutputStore, StoreWriter};

/// Capacity of the per-subscriber channels handed out by [`Supervisor::output`].
pub const OUTPUT_CHANNEL_CAPACITY: usize = 5;

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(10);
const STOP_WAIT_DEADLINE: Duration = Duration::from_secs(1);
const PUMP_BUF_SIZE: usize = 8 * 1024;

/// Errors from supervisor operations.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("command is required")]
    EmptyCommand,

    #[error("process not found: {id}")]
    NotFound { id: String },

    #[error("failed to spawn process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of [`Supervisor::start`].
#[derive(Debug)]
pub struct StartResult {
    pub id: String,
    pub status: ProcessStatus,
}

/// Outcome of [`Supervisor::status`] and [`Supervisor::stop`].
#[derive(Debug)]
pub struct StatusResult {
    pub command: CommandSpec,
    pub status: ProcessStatus,
}

/// Registry and lifecycle manager for supervised processes.
pub struct Supervisor {
    processes: RwLock<HashMap<String, Arc<ProcessEntry>>>,
    /// Working root for per-process CWDs; removed when the supervisor drops.
    base_dir: TempDir,
}

impl Supervisor {
    /// Creates a supervisor with a fresh `prn-` working root.
    pub fn new() -> std::io::Result<Self> {
        let base_dir = tempfile::Builder::new().prefix("prn-").tempdir()?;
        info!(base_dir = %base_dir.path().display(), "Supervisor working root created");
        Ok(Self {
            processes: RwLock::new(HashMap::new()),
            base_dir,
        })
    }

    /// Starts a new process and returns its identifier and initial status.
    pub async fn start(
        &self,
        program: &str,
        args: &[String],
    ) -> Result<StartResult, SupervisorError> {
        if program.is_empty() {
            return Err(SupervisorError::EmptyCommand);
        }

        let id = Uuid::new_v4().to_string();

        let work_dir = self.base_dir.path().join(&id);
        create_work_dir(&work_dir)?;

        let spawn_ctx = cgroup::prepare(&id)?;

        let (stdout_store, stdout_writer) = OutputStore::new();
        let (stderr_store, stderr_writer) = OutputStore::new();

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        configure_child(&mut cmd, &spawn_ctx);

        debug!(%id, program, "Spawning process");
        let mut child = cmd.spawn().map_err(SupervisorError::Spawn)?;
        // The child either joined its cgroup during pre_exec or never will;
        // release the parent's directory descriptor either way.
        drop(spawn_ctx);

        let pid = child.id().ok_or_else(|| {
            SupervisorError::Spawn(std::io::Error::other("spawned child has no pid"))
        })?;

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        let stdout_pump = tokio::spawn(pump(stdout_pipe, stdout_writer));
        let stderr_pump = tokio::spawn(pump(stderr_pipe, stderr_writer));

        let entry = Arc::new(ProcessEntry::new(
            id.clone(),
            CommandSpec {
                program: program.to_string(),
                args: args.to_vec(),
            },
            work_dir,
            pid,
            stdout_store,
            stderr_store,
        ));

        // Snapshot before the reaper runs so the initial status is always
        // `Running`, even for a child that exits immediately.
        let status = entry.status().await;

        self.processes
            .write()
            .await
            .insert(id.clone(), Arc::clone(&entry));

        tokio::spawn(reap(Arc::clone(&entry), child, stdout_pump, stderr_pump));

        info!(%id, pid, program, "Process started");
        Ok(StartResult { id, status })
    }

    /// Returns the command and current status of a process.
    pub async fn status(&self, id: &str) -> Result<StatusResult, SupervisorError> {
        let entry = self.get(id).await?;
        Ok(StatusResult {
            command: entry.command().clone(),
            status: entry.status().await,
        })
    }

    /// Kills a process (and every descendant) and returns its status.
    ///
    /// Idempotent: stopping an already-terminated process returns its
    /// terminal status unchanged. The status returned is whatever is current
    /// when the 1 s deadline expires; the reaper finalizes the entry
    /// regardless.
    pub async fn stop(&self, id: &str) -> Result<StatusResult, SupervisorError> {
        let entry = self.get(id).await?;
        let command = entry.command().clone();

        if entry.status().await.state == ProcessState::Stopped {
            return Ok(StatusResult {
                command,
                status: entry.status().await,
            });
        }

        // cgroup.kill reaches children that setsid away from the process
        // group; fall back to group SIGKILL when it is unavailable.
        if cgroup::kill(entry.id()) {
            debug!(%id, "Killed via cgroup");
        } else {
            kill_process_group(entry.pid());
        }

        let deadline = Instant::now() + STOP_WAIT_DEADLINE;
        loop {
            let status = entry.status().await;
            if status.state == ProcessState::Stopped || Instant::now() >= deadline {
                return Ok(StatusResult { command, status });
            }
            tokio::time::sleep(STOP_POLL_INTERVAL).await;
        }
    }

    /// Returns fresh stdout and stderr subscriber channels for a process.
    ///
    /// Each channel replays the stream from the first byte and closes once
    /// the process has terminated and the backlog is drained.
    pub async fn output(
        &self,
        id: &str,
    ) -> Result<(mpsc::Receiver<Bytes>, mpsc::Receiver<Bytes>), SupervisorError> {
        let entry = self.get(id).await?;
        Ok((
            entry.stdout_store().subscribe(OUTPUT_CHANNEL_CAPACITY),
            entry.stderr_store().subscribe(OUTPUT_CHANNEL_CAPACITY),
        ))
    }

    async fn get(&self, id: &str) -> Result<Arc<ProcessEntry>, SupervisorError> {
        self.processes
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| SupervisorError::NotFound { id: id.to_string() })
    }
}

/// Copies one child pipe into its output store until EOF.
async fn pump<R>(pipe: Option<R>, mut writer: StoreWriter)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let Some(mut pipe) = pipe else { return };
    let mut buf = vec![0u8; PUMP_BUF_SIZE];
    loop {
        match pipe.read(&mut buf).await {
            Ok(0) => return,
            Ok(n) => writer.write(&buf[..n]),
            Err(err) => {
                warn!(error = %err, "output pipe read failed");
                return;
            }
        }
    }
}

/// Awaits the child and performs the terminal transition.
///
/// The stores stop only after both pumps are joined, so every byte the child
/// wrote is in its store before any subscriber channel closes, and no append
/// can follow a stop.
async fn reap(
    entry: Arc<ProcessEntry>,
    mut child: Child,
    stdout_pump: JoinHandle<()>,
    stderr_pump: JoinHandle<()>,
) {
    let wait_result = child.wait().await;
    let _ = stdout_pump.await;
    let _ = stderr_pump.await;

    entry.stdout_store().stop();
    entry.stderr_store().stop();

    let exit_code = match &wait_result {
        Ok(status) => {
            debug!(id = entry.id(), ?status, "Process exited");
            // A signal-terminated child has no exit code; report -1 as the
            // wait path does.
            Some(status.code().unwrap_or(-1))
        }
        Err(err) => {
            warn!(id = entry.id(), error = %err, "Waiting for process failed");
            None
        }
    };

    entry.finalize(exit_code).await;

    if let Err(err) = cgroup::cleanup(entry.id()) {
        debug!(id = entry.id(), error = %err, "cgroup cleanup skipped");
    }
    info!(id = entry.id(), ?exit_code, "Process reaped");
}

fn create_work_dir(path: &Path) -> std::io::Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(path)
}

#[cfg(unix)]
fn configure_child(cmd: &mut Command, ctx: &cgroup::SpawnContext) {
    let cgroup_fd = ctx.cgroup_fd();
    // SAFETY: the hook runs between fork and exec and only performs
    // async-signal-safe syscalls (setpgid, openat, write, close).
    unsafe {
        cmd.pre_exec(move || {
            // New process group, so kill(-pid) reaches the whole group.
            if libc::setpgid(0, 0) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            if let Some(fd) = cgroup_fd {
                enter_cgroup(fd)?;
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn configure_child(_cmd: &mut Command, _ctx: &cgroup::SpawnContext) {}

/// Moves the calling task into the cgroup whose directory is open at
/// `dir_fd`. Runs in the forked child, where the parent's descriptor is
/// still valid (cloexec descriptors close only at exec).
#[cfg(unix)]
fn enter_cgroup(dir_fd: std::os::unix::io::RawFd) -> std::io::Result<()> {
    // SAFETY: dir_fd is an inherited open directory descriptor; writing "0"
    // to cgroup.procs moves the writing task itself.
    unsafe {
        let procs = libc::openat(
            dir_fd,
            c"cgroup.procs".as_ptr(),
            libc::O_WRONLY | libc::O_CLOEXEC,
        );
        if procs < 0 {
            return Err(std::io::Error::last_os_error());
        }
        let wrote = libc::write(procs, b"0".as_ptr().cast(), 1);
        let write_err = std::io::Error::last_os_error();
        libc::close(procs);
        if wrote != 1 {
            return Err(write_err);
        }
    }
    Ok(())
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    // SAFETY: kill(2) on a process group this supervisor created; a negative
    // pid addresses the whole group.
    #[allow(clippy::cast_possible_wrap)]
    let ret = unsafe { libc::kill(-(pid as i32), libc::SIGKILL) };
    if ret != 0 {
        warn!(
            pid,
            error = %std::io::Error::last_os_error(),
            "Failed to SIGKILL process group"
        );
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}
