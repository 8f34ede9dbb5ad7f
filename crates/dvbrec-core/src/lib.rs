//! `dvbrec-core`: configuration, channel list and request validation shared
//! by the recording and wake-up schedulers.

pub mod channels;
pub mod config;
pub mod error;
pub mod request;

pub use config::DvbrecConfig;
pub use error::{CoreError, Result};
pub use request::{RecordingRequest, ValidatedRequest};

/// Extension appended to every capture file.
pub const CAPTURE_EXTENSION: &str = "ts";

/// Name of the SQLite file, inside `general.data_directory`, that holds the
/// persisted recordings and wake-ups.
pub const DATABASE_FILENAME: &str = "dvbrec.db";
