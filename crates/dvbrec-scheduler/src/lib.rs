//! `dvbrec-scheduler`: schedules DVB recordings onto a fixed pool of
//! adapters and runs each one as an external capture process.
//!
//! # Overview
//!
//! A [`RecordingScheduler`] task owns the job table, a fire queue ordered by
//! `(fire_time, job_id)` and the adapter [`ResourcePool`]. Callers talk to it
//! through a cloneable [`SchedulerHandle`].
//!
//! # Job lifecycle
//!
//! | State       | Meaning                                             |
//! |-------------|-----------------------------------------------------|
//! | `Scheduled` | Timer armed, nothing started                        |
//! | `Waiting`   | Timer fired, taking the adapter                     |
//! | `Running`   | Capture process alive                               |
//! | `Completed` | Capture exited with status 0                        |
//! | `Failed`    | Capture exited non-zero; partial file removed       |
//! | `Cancelled` | Removed on request (running captures get SIGTERM)   |
//! | `Dropped`   | Adapter busy at fire time; never retried            |
//!
//! Jobs leave the table as soon as they reach a terminal state.

pub mod db;
pub mod engine;
pub mod error;
pub mod pool;
pub mod power;
pub mod runner;
pub mod types;

pub use engine::{EngineTask, RecordingScheduler, SchedulerConfig, SchedulerHandle};
pub use error::{Result, SchedulerError};
pub use pool::ResourcePool;
pub use power::{PowerControl, SystemPower};
pub use runner::{CaptureCommand, JobRunner};
pub use types::{Job, JobEvent, JobId, JobSpec, JobState};
