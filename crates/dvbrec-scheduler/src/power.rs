//! Machine power-off, requested by recordings flagged `shutdown_after`.

use std::process::Stdio;

use tracing::info;

/// Seam for the machine shutdown side effect.
pub trait PowerControl: Send + Sync {
    /// Start powering the machine off. Returns once the request is issued.
    fn power_off(&self) -> std::io::Result<()>;
}

/// Runs the configured shutdown command (e.g. `sudo shutdown -h now`).
#[derive(Debug, Clone)]
pub struct SystemPower {
    command: Vec<String>,
}

impl SystemPower {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl PowerControl for SystemPower {
    fn power_off(&self) -> std::io::Result<()> {
        let Some((program, args)) = self.command.split_first() else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty shutdown command",
            ));
        };
        info!(command = ?self.command, "powering off");
        // Fire and forget; the tokio runtime reaps the orphan.
        tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        Ok(())
    }
}
