use chrono::{DateTime, Utc};
use dvbrec_core::{ValidatedRequest, CAPTURE_EXTENSION};
use serde::{Deserialize, Serialize};

/// Monotonic job identifier; never reused within a scheduler's lifetime.
pub type JobId = u64;

/// Lifecycle state of a recording job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Fire timer armed, no process yet.
    Scheduled,
    /// Timer fired; trying to take the adapter.
    Waiting,
    /// Capture process alive.
    Running,
    /// Capture exited successfully.
    Completed,
    /// Capture exited with an error or could not be spawned.
    Failed,
    /// Removed on operator request.
    Cancelled,
    /// Adapter was busy when the timer fired.
    Dropped,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled | JobState::Dropped
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Scheduled => "scheduled",
            JobState::Waiting => "waiting",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
            JobState::Dropped => "dropped",
        };
        write!(f, "{s}")
    }
}

/// Everything needed to schedule a recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub adapter: usize,
    pub channel: String,
    pub program_name: String,
    /// Fire as soon as the engine sees the job, ignoring `begin_at`.
    pub immediate: bool,
    pub begin_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    /// Capture length in seconds.
    pub duration: u64,
    pub shutdown_after: bool,
}

impl From<ValidatedRequest> for JobSpec {
    fn from(req: ValidatedRequest) -> Self {
        Self {
            adapter: req.adapter,
            channel: req.channel,
            program_name: req.program_name,
            immediate: req.immediate,
            begin_at: req.begin_at,
            end_at: req.end_at,
            duration: req.duration,
            shutdown_after: req.shutdown_after,
        }
    }
}

/// Snapshot of a job as exposed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub adapter: usize,
    pub channel: String,
    pub program_name: String,
    pub begin_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub duration: u64,
    pub shutdown_after: bool,
    pub state: JobState,
}

impl Job {
    pub(crate) fn new(id: JobId, spec: JobSpec) -> Self {
        Self {
            id,
            adapter: spec.adapter,
            channel: spec.channel,
            program_name: spec.program_name,
            begin_at: spec.begin_at,
            end_at: spec.end_at,
            duration: spec.duration,
            shutdown_after: spec.shutdown_after,
            state: JobState::Scheduled,
        }
    }

    /// File name of the capture: spaces become hyphens, `.ts` appended.
    pub fn output_filename(&self) -> String {
        output_filename(&self.program_name)
    }

    /// The [`JobSpec`] this job is rescheduled from after a restart.
    pub fn spec(&self) -> JobSpec {
        JobSpec {
            adapter: self.adapter,
            channel: self.channel.clone(),
            program_name: self.program_name.clone(),
            immediate: false,
            begin_at: self.begin_at,
            end_at: self.end_at,
            duration: self.duration,
            shutdown_after: self.shutdown_after,
        }
    }
}

pub fn output_filename(program_name: &str) -> String {
    format!("{}.{CAPTURE_EXTENSION}", program_name.replace(' ', "-"))
}

/// Published on every job state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEvent {
    pub id: JobId,
    pub state: JobState,
}
