//! Per-process cgroup-v2 management.
//!
//! Every supervised child gets its own cgroup under `/sys/fs/cgroup/prn`
//! with modest cpu/io weights and a memory.high ceiling, and is moved into
//! it between fork and exec via an inherited directory descriptor. Killing
//! through `cgroup.kill` reaches every task in the subtree, including
//! children that called `setsid` to leave the process group.
//!
//! All operations degrade to no-ops when not running as root on Linux, and
//! on every other platform; the spawner then relies on `setpgid` plus
//! process-group SIGKILL alone.

use std::fs::File;

/// Spawn-time cgroup state for one child.
///
/// Holds the open descriptor of the child's cgroup directory, if any. The
/// supervisor drops this immediately after the spawn; the child either moved
/// itself into the cgroup during `pre_exec` or never will.
#[derive(Debug, Default)]
pub struct SpawnContext {
    cgroup_dir: Option<File>,
}

impl SpawnContext {
    /// Raw descriptor of the cgroup directory, for the `pre_exec` hook.
    #[cfg(unix)]
    pub fn cgroup_fd(&self) -> Option<std::os::unix::io::RawFd> {
        use std::os::unix::io::AsRawFd;
        self.cgroup_dir.as_ref().map(AsRawFd::as_raw_fd)
    }
}

#[cfg(target_os = "linux")]
pub use imp::{cleanup, kill, prepare};

#[cfg(target_os = "linux")]
mod imp {
    use super::{File, SpawnContext};
    use std::collections::HashSet;
    use std::io;
    use std::path::{Path, PathBuf};
    use std::sync::OnceLock;
    use tracing::{debug, warn};

    const CGROUP_ROOT: &str = "/sys/fs/cgroup/prn";
    const MEMORY_HIGH_BYTES: u64 = 512 * 1024 * 1024;
    const CONTROLLERS: [&str; 3] = ["cpu", "io", "memory"];

    static ROOT_INIT: OnceLock<Result<(), String>> = OnceLock::new();

    fn running_as_root() -> bool {
        // SAFETY: geteuid has no preconditions and cannot fail.
        (unsafe { libc::geteuid() }) == 0
    }

    /// Creates and configures the cgroup for a process about to be spawned.
    ///
    /// Without root this is a no-op and the returned context carries no
    /// descriptor.
    pub fn prepare(id: &str) -> io::Result<SpawnContext> {
        if !running_as_root() {
            return Ok(SpawnContext::default());
        }

        if let Err(err) = init_root() {
            warn!(error = %err, "cgroup root init failed; continuing without it");
        }

        let dir = setup_process_cgroup(id)?;
        let cgroup_dir = File::open(&dir)?;
        debug!(id, dir = %dir.display(), "cgroup prepared");
        Ok(SpawnContext {
            cgroup_dir: Some(cgroup_dir),
        })
    }

    /// SIGKILLs every task in the process's cgroup subtree.
    ///
    /// Returns whether the kill file was written; the caller falls back to
    /// process-group signalling otherwise.
    pub fn kill(id: &str) -> bool {
        let path = Path::new(CGROUP_ROOT).join(id).join("cgroup.kill");
        match std::fs::write(&path, "1") {
            Ok(()) => true,
            Err(err) => {
                debug!(id, error = %err, "cgroup kill unavailable");
                false
            }
        }
    }

    /// Removes the process's cgroup directory. Called after reap, when the
    /// subtree is empty.
    pub fn cleanup(id: &str) -> io::Result<()> {
        std::fs::remove_dir(Path::new(CGROUP_ROOT).join(id))
    }

    /// Root-level init, performed once per daemon: ensure the prn root
    /// exists and that the cpu/io/memory controllers are delegated to it.
    fn init_root() -> Result<(), String> {
        ROOT_INIT
            .get_or_init(|| init_root_impl().map_err(|e| e.to_string()))
            .clone()
    }

    fn init_root_impl() -> io::Result<()> {
        std::fs::create_dir_all(CGROUP_ROOT)?;

        let root = Path::new(CGROUP_ROOT);
        let available = read_controller_set(&root.join("cgroup.controllers"))?;
        let enabled = read_controller_set(&root.join("cgroup.subtree_control"))?;

        let to_add: Vec<String> = CONTROLLERS
            .iter()
            .filter(|ctrl| available.contains(**ctrl) && !enabled.contains(**ctrl))
            .map(|ctrl| format!("+{ctrl}"))
            .collect();
        if !to_add.is_empty() {
            std::fs::write(root.join("cgroup.subtree_control"), to_add.join(" "))?;
        }
        Ok(())
    }

    fn setup_process_cgroup(id: &str) -> io::Result<PathBuf> {
        let dir = Path::new(CGROUP_ROOT).join(id);
        std::fs::create_dir_all(&dir)?;

        // Control files exist only for controllers enabled on the parent.
        let enabled = read_controller_set(&Path::new(CGROUP_ROOT).join("cgroup.subtree_control"))
            .unwrap_or_default();
        if enabled.contains("cpu") {
            std::fs::write(dir.join("cpu.weight"), "100")?;
        }
        if enabled.contains("io") {
            std::fs::write(dir.join("io.weight"), "100")?;
        }
        if enabled.contains("memory") {
            std::fs::write(dir.join("memory.high"), MEMORY_HIGH_BYTES.to_string())?;
        }
        Ok(dir)
    }

    fn read_controller_set(path: &Path) -> io::Result<HashSet<String>> {
        Ok(parse_controller_set(&std::fs::read_to_string(path)?))
    }

    /// Parses a `cgroup.controllers` / `cgroup.subtree_control` listing.
    fn parse_controller_set(content: &str) -> HashSet<String> {
        content
            .split_whitespace()
            .map(|field| field.trim_start_matches('+').to_string())
            .collect()
    }

    #[cfg(test)]
    #[allow(clippy::unwrap_used)]
    mod tests {
        use super::*;

        #[test]
        fn parse_controller_listing() {
            let set = parse_controller_set("cpuset cpu io memory pids\n");
            assert!(set.contains("cpu"));
            assert!(set.contains("memory"));
            assert!(!set.contains("rdma"));
        }

        #[test]
        fn parse_tolerates_plus_prefixes() {
            let set = parse_controller_set("+cpu +io");
            assert!(set.contains("cpu"));
            assert!(set.contains("io"));
        }

        #[test]
        fn parse_empty_listing() {
            assert!(parse_controller_set("").is_empty());
            assert!(parse_controller_set("\n").is_empty());
        }

        #[test]
        fn kill_unknown_process_reports_failure() {
            assert!(!kill("no-such-process-id"));
        }

        #[test]
        fn prepare_without_root_is_noop() {
            if running_as_root() {
                return;
            }
            let ctx = prepare("some-id").unwrap();
            assert!(ctx.cgroup_fd().is_none());
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod imp {
    use super::SpawnContext;
    use std::io;

    /// Cgroups are Linux-only; other platforms rely on process groups.
    pub fn prepare(_id: &str) -> io::Result<SpawnContext> {
        Ok(SpawnContext::default())
    }

    pub fn kill(_id: &str) -> bool {
        false
    }

    pub fn cleanup(_id: &str) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(not(target_os = "linux"))]
pub use imp::{cleanup, kill, prepare};
