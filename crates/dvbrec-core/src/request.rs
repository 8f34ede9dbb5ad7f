//! Validation of incoming recording requests.
//!
//! The schedulers trust what they are handed; this is the gate every
//! operator-facing surface goes through first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    config::DvbrecConfig,
    error::{CoreError, Result},
};

pub const PROGRAM_NAME_MIN_CHARS: usize = 5;
pub const PROGRAM_NAME_MAX_CHARS: usize = 128;

/// A recording request as submitted by an operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingRequest {
    pub adapter: usize,
    pub channel: String,
    pub program_name: String,
    /// `None` means "start now".
    pub begin_at: Option<DateTime<Utc>>,
    pub end_at: DateTime<Utc>,
    #[serde(default)]
    pub shutdown_after: bool,
}

/// A request that passed [`RecordingRequest::validate`]; every field the
/// recording scheduler needs is resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedRequest {
    pub adapter: usize,
    pub channel: String,
    pub program_name: String,
    pub immediate: bool,
    pub begin_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    /// Seconds between `begin_at` and `end_at`.
    pub duration: u64,
    pub shutdown_after: bool,
}

impl RecordingRequest {
    pub fn validate(
        self,
        config: &DvbrecConfig,
        channels: &[String],
        now: DateTime<Utc>,
    ) -> Result<ValidatedRequest> {
        if self.adapter >= config.general.adapter_count {
            return Err(invalid(format!(
                "adapter {} does not exist ({} configured)",
                self.adapter, config.general.adapter_count
            )));
        }
        if !channels.iter().any(|c| c == &self.channel) {
            return Err(invalid(format!("unknown channel: {}", self.channel)));
        }

        let name_len = self.program_name.trim().chars().count();
        if !(PROGRAM_NAME_MIN_CHARS..=PROGRAM_NAME_MAX_CHARS).contains(&name_len) {
            return Err(invalid(format!(
                "program name must be {PROGRAM_NAME_MIN_CHARS} to {PROGRAM_NAME_MAX_CHARS} characters"
            )));
        }
        // The name becomes a file name inside the recording directory.
        if self.program_name.contains('/') || self.program_name.contains('\0') {
            return Err(invalid("program name must not contain path separators".to_string()));
        }

        let (immediate, begin_at) = match self.begin_at {
            None => (true, now),
            Some(begin) if begin <= now => {
                return Err(invalid("begin date must be in the future".to_string()));
            }
            Some(begin) => (false, begin),
        };
        if begin_at >= self.end_at {
            return Err(invalid("begin date must be before end date".to_string()));
        }

        let duration = (self.end_at - begin_at).num_seconds().max(0) as u64;
        if duration > config.general.max_duration {
            return Err(invalid(format!(
                "recording lasts {duration}s, maximum is {}s",
                config.general.max_duration
            )));
        }

        Ok(ValidatedRequest {
            adapter: self.adapter,
            channel: self.channel,
            program_name: self.program_name.trim().to_string(),
            immediate,
            begin_at,
            end_at: self.end_at,
            duration,
            shutdown_after: self.shutdown_after,
        })
    }
}

fn invalid(reason: String) -> CoreError {
    CoreError::InvalidRequest(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn config() -> DvbrecConfig {
        let mut config = DvbrecConfig::default();
        config.general.adapter_count = 2;
        config.general.max_duration = 3600;
        config
    }

    fn channels() -> Vec<String> {
        vec!["TF1".to_string(), "France 2".to_string()]
    }

    fn request(now: DateTime<Utc>) -> RecordingRequest {
        RecordingRequest {
            adapter: 1,
            channel: "France 2".to_string(),
            program_name: "Evening News".to_string(),
            begin_at: Some(now + Duration::minutes(10)),
            end_at: now + Duration::minutes(40),
            shutdown_after: true,
        }
    }

    #[test]
    fn valid_future_request() {
        let now = Utc::now();
        let v = request(now).validate(&config(), &channels(), now).unwrap();
        assert!(!v.immediate);
        assert_eq!(v.duration, 30 * 60);
        assert_eq!(v.begin_at, now + Duration::minutes(10));
        assert!(v.shutdown_after);
    }

    #[test]
    fn missing_begin_means_immediate() {
        let now = Utc::now();
        let mut req = request(now);
        req.begin_at = None;
        let v = req.validate(&config(), &channels(), now).unwrap();
        assert!(v.immediate);
        assert_eq!(v.begin_at, now);
        assert_eq!(v.duration, 40 * 60);
    }

    #[test]
    fn past_begin_rejected() {
        let now = Utc::now();
        let mut req = request(now);
        req.begin_at = Some(now - Duration::seconds(1));
        let err = req.validate(&config(), &channels(), now).unwrap_err();
        assert!(err.to_string().contains("future"));
    }

    #[test]
    fn begin_after_end_rejected() {
        let now = Utc::now();
        let mut req = request(now);
        req.end_at = now + Duration::minutes(5);
        assert!(req.validate(&config(), &channels(), now).is_err());
    }

    #[test]
    fn too_long_rejected() {
        let now = Utc::now();
        let mut req = request(now);
        req.end_at = now + Duration::hours(3);
        let err = req.validate(&config(), &channels(), now).unwrap_err();
        assert!(matches!(err, CoreError::InvalidRequest(_)));
    }

    #[test]
    fn unknown_adapter_and_channel_rejected() {
        let now = Utc::now();
        let mut req = request(now);
        req.adapter = 2;
        assert!(req.validate(&config(), &channels(), now).is_err());

        let mut req = request(now);
        req.channel = "Arte".to_string();
        assert!(req.validate(&config(), &channels(), now).is_err());
    }

    #[test]
    fn program_name_bounds() {
        let now = Utc::now();
        let mut req = request(now);
        req.program_name = "News".to_string();
        assert!(req.validate(&config(), &channels(), now).is_err());

        let mut req = request(now);
        req.program_name = "../../etc/passwd".to_string();
        assert!(req.validate(&config(), &channels(), now).is_err());
    }
}
