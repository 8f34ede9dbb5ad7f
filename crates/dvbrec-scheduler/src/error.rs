use thiserror::Error;

/// Errors that can occur within the recording scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error while saving.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The job request violates a scheduler bound (adapter index, duration).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The capture process could not be started.
    #[error("Capture spawn failed: {0}")]
    Spawn(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The saved recordings exist but cannot be read back.
    #[error("Saved recordings are corrupt: {0}")]
    PersistenceCorrupt(String),

    /// The engine loop has stopped; no further commands are accepted.
    #[error("Scheduler engine is not running")]
    EngineStopped,
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
