use thiserror::Error;

/// Errors that can occur within the wake-up subsystem.
#[derive(Debug, Error)]
pub enum WakeError {
    /// Underlying SQLite / rusqlite error while saving.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The saved wake-ups exist but cannot be read back.
    #[error("Saved wake-ups are corrupt: {0}")]
    PersistenceCorrupt(String),

    /// The RTC alarm command could not be run or reported failure.
    #[error("Wake timer error: {0}")]
    Timer(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WakeError>;
