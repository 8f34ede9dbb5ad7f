//! `JobRunner`: owns one capture process from spawn to exit.
//!
//! Processes are always started from an argument vector. Channel and program
//! names come from operators and never reach a shell.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{Result, SchedulerError};

/// Program and arguments of a capture invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureCommand {
    program: PathBuf,
    args: Vec<String>,
}

impl CaptureCommand {
    /// Real capture: `dvbv5-zap -a <adapter> -I zap -o <output> -c <channels> -t <secs> <channel>`.
    pub fn zap(
        binary: &Path,
        adapter: usize,
        channel: &str,
        output: &Path,
        channels_conf: &Path,
        duration: u64,
    ) -> Self {
        Self {
            program: binary.to_path_buf(),
            args: vec![
                "-a".to_string(),
                adapter.to_string(),
                "-I".to_string(),
                "zap".to_string(),
                "-o".to_string(),
                output.display().to_string(),
                "-c".to_string(),
                channels_conf.display().to_string(),
                "-t".to_string(),
                duration.to_string(),
                channel.to_string(),
            ],
        }
    }

    /// Simulate mode: a plain `sleep <secs>`.
    pub fn simulate(binary: &Path, duration: u64) -> Self {
        Self {
            program: binary.to_path_buf(),
            args: vec![duration.to_string()],
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

/// A spawned capture process.
pub struct JobRunner {
    child: Child,
}

impl JobRunner {
    pub fn spawn(command: &CaptureCommand) -> Result<Self> {
        let child = Command::new(command.program())
            .args(command.args())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                SchedulerError::Spawn(format!("{}: {e}", command.program().display()))
            })?;
        debug!(pid = ?child.id(), program = %command.program().display(), "capture spawned");
        Ok(Self { child })
    }

    /// OS process id, `None` once the process has been reaped.
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the process to exit. A process killed by a signal reports `-1`.
    pub async fn wait(&mut self) -> Result<i32> {
        let status = self.child.wait().await?;
        Ok(status.code().unwrap_or(-1))
    }

    /// Ask the process to stop (SIGTERM). Does not wait for the exit.
    pub fn terminate(&mut self) -> Result<()> {
        #[cfg(unix)]
        {
            let Some(pid) = self.child.id() else {
                // already reaped
                return Ok(());
            };
            // Safety: pid is our direct child and has not been reaped yet.
            let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
            if rc != 0 {
                return Err(std::io::Error::last_os_error().into());
            }
            debug!(pid, "SIGTERM sent");
            Ok(())
        }
        #[cfg(not(unix))]
        {
            self.child.start_kill()?;
            Ok(())
        }
    }

    /// Run until the process exits, terminating it if `stop` fires first.
    ///
    /// Returns the exit code; wait failures are logged and reported as `-1`.
    pub async fn supervise(mut self, stop: oneshot::Receiver<()>) -> i32 {
        let result = tokio::select! {
            code = self.wait() => code,
            Ok(()) = stop => {
                if let Err(e) = self.terminate() {
                    warn!("capture terminate failed: {e}");
                }
                self.wait().await
            }
        };
        match result {
            Ok(code) => code,
            Err(e) => {
                warn!("capture wait failed: {e}");
                -1
            }
        }
    }
}
