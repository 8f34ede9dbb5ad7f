use std::process::{Command, Stdio};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{Result, WakeError};

/// The single hardware wake alarm.
pub trait WakeTimer: Send {
    /// Program the alarm for `at`, replacing any previous one.
    fn arm(&mut self, at: DateTime<Utc>) -> Result<()>;

    /// Clear the alarm.
    fn disarm(&mut self) -> Result<()>;
}

/// Drives the RTC alarm through `rtcwake`.
///
/// `command` is the invocation prefix (e.g. `["sudo", "rtcwake"]`); the mode
/// arguments are appended per call.
#[derive(Debug, Clone)]
pub struct RtcWake {
    command: Vec<String>,
}

impl RtcWake {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }

    /// Full argument vector for arming at `at` (UTC epoch seconds).
    pub fn arm_args(&self, at: DateTime<Utc>) -> Vec<String> {
        let mut args = self.command.clone();
        args.extend(
            ["-m", "no", "-u", "-t"]
                .iter()
                .map(|s| s.to_string())
                .chain(std::iter::once(at.timestamp().to_string())),
        );
        args
    }

    pub fn disarm_args(&self) -> Vec<String> {
        let mut args = self.command.clone();
        args.extend(["-m".to_string(), "disable".to_string()]);
        args
    }

    fn run(args: &[String]) -> Result<()> {
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| WakeError::Timer("empty rtcwake command".to_string()))?;
        debug!(?args, "running rtcwake");
        let status = Command::new(program)
            .args(rest)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .status()
            .map_err(|e| WakeError::Timer(format!("{program}: {e}")))?;
        if !status.success() {
            return Err(WakeError::Timer(format!("{program} exited with {status}")));
        }
        Ok(())
    }
}

impl WakeTimer for RtcWake {
    fn arm(&mut self, at: DateTime<Utc>) -> Result<()> {
        Self::run(&self.arm_args(at))
    }

    fn disarm(&mut self) -> Result<()> {
        Self::run(&self.disarm_args())
    }
}
