//! `dvbrec-wakeup`: keeps the RTC wake alarm armed for the nearest
//! requested wake-up time.
//!
//! The alarm hardware holds a single time, so the [`WakeScheduler`] keeps the
//! full set of requests and re-arms the [`WakeTimer`] for the earliest one on
//! every change. Expired requests are purged as a side effect of each change.

pub mod db;
pub mod error;
pub mod scheduler;
pub mod timer;

pub use error::{Result, WakeError};
pub use scheduler::{WakeEntry, WakeId, WakeScheduler};
pub use timer::{RtcWake, WakeTimer};
