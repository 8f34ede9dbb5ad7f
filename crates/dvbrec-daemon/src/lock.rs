//! Lock file marking a running daemon.
//!
//! `dvbrecd run` rewrites both state tables when it exits, so commands that
//! edit the saved state refuse to run while the lock is held.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context};
use tracing::{debug, warn};

pub const LOCK_FILENAME: &str = "dvbrecd.lock";

/// Held for the lifetime of `dvbrecd run`; removes the file on drop.
#[derive(Debug)]
pub struct DaemonLock {
    path: PathBuf,
}

impl Drop for DaemonLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

impl DaemonLock {
    /// Take the lock in `data_directory`, reclaiming it from a dead process.
    pub fn acquire(data_directory: &Path) -> anyhow::Result<Self> {
        fs::create_dir_all(data_directory)
            .with_context(|| format!("failed to create {}", data_directory.display()))?;
        let path = data_directory.join(LOCK_FILENAME);

        for _ in 0..2 {
            match OpenOptions::new().create_new(true).write(true).open(&path) {
                Ok(mut file) => {
                    writeln!(file, "{}", std::process::id())?;
                    debug!(path = %path.display(), "daemon lock taken");
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if let Some(pid) = live_holder(&path) {
                        bail!("dvbrecd is already running (pid {pid})");
                    }
                    warn!(path = %path.display(), "removing stale daemon lock");
                    let _ = fs::remove_file(&path);
                }
                Err(e) => return Err(anyhow!("failed to take lock {}: {e}", path.display())),
            }
        }
        bail!("could not take lock {}", path.display())
    }
}

/// Fail if a live daemon holds the lock in `data_directory`.
pub fn ensure_not_running(data_directory: &Path) -> anyhow::Result<()> {
    if let Some(pid) = live_holder(&data_directory.join(LOCK_FILENAME)) {
        bail!("dvbrecd is running (pid {pid}); stop it before changing saved state");
    }
    Ok(())
}

/// Pid recorded in the lock file, if that process is still alive.
fn live_holder(path: &Path) -> Option<u32> {
    let raw = fs::read_to_string(path).ok()?;
    // unreadable content from a crashed writer counts as stale
    let pid: u32 = raw.trim().parse().ok()?;
    process_alive(pid).then_some(pid)
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // Safety: signal 0 only checks that the process exists.
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}
