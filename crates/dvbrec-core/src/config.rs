use std::path::PathBuf;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

pub const DEFAULT_ADAPTER_COUNT: usize = 1;
pub const DEFAULT_MAX_DURATION_SECS: u64 = 4 * 60 * 60;
pub const DEFAULT_LOG_FILTER: &str = "dvbrec=info";

/// Top-level config (dvbrec.toml + DVBREC_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DvbrecConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub power: PowerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Number of DVB adapters; adapters are addressed as `0..adapter_count`.
    #[serde(default = "default_adapter_count")]
    pub adapter_count: usize,
    /// dvbv5 zap-format channel file, also handed to the capture binary.
    #[serde(default = "default_channels_conf")]
    pub channels_conf: PathBuf,
    /// Upper bound for a single recording, in seconds.
    #[serde(default = "default_max_duration")]
    pub max_duration: u64,
    #[serde(default = "default_recording_directory")]
    pub recording_directory: PathBuf,
    /// When true, captures are replaced by a `sleep` of the same duration.
    #[serde(default)]
    pub simulate: bool,
    /// Directory holding the SQLite state file.
    #[serde(default = "default_data_directory")]
    pub data_directory: PathBuf,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            adapter_count: default_adapter_count(),
            channels_conf: default_channels_conf(),
            max_duration: default_max_duration(),
            recording_directory: default_recording_directory(),
            simulate: false,
            data_directory: default_data_directory(),
        }
    }
}

/// Binaries used to run a capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_zap_binary")]
    pub zap_binary: PathBuf,
    /// Stand-in used in simulate mode.
    #[serde(default = "default_sleep_binary")]
    pub sleep_binary: PathBuf,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            zap_binary: default_zap_binary(),
            sleep_binary: default_sleep_binary(),
        }
    }
}

/// Machine power commands. Both are argument vectors, never shell strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerConfig {
    #[serde(default = "default_shutdown_command")]
    pub shutdown_command: Vec<String>,
    /// Prefix for rtcwake invocations; the mode arguments are appended.
    #[serde(default = "default_rtcwake_command")]
    pub rtcwake_command: Vec<String>,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            shutdown_command: default_shutdown_command(),
            rtcwake_command: default_rtcwake_command(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive. `RUST_LOG` takes precedence.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_adapter_count() -> usize {
    DEFAULT_ADAPTER_COUNT
}
fn default_channels_conf() -> PathBuf {
    PathBuf::from("/etc/dvbrec/channels.conf")
}
fn default_max_duration() -> u64 {
    DEFAULT_MAX_DURATION_SECS
}
fn default_recording_directory() -> PathBuf {
    PathBuf::from("/srv/recordings")
}
fn default_data_directory() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(format!("{}/.dvbrec", home))
}
fn default_zap_binary() -> PathBuf {
    PathBuf::from("/usr/bin/dvbv5-zap")
}
fn default_sleep_binary() -> PathBuf {
    PathBuf::from("sleep")
}
fn default_shutdown_command() -> Vec<String> {
    ["sudo", "shutdown", "-h", "now"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_rtcwake_command() -> Vec<String> {
    vec!["sudo".to_string(), "rtcwake".to_string()]
}
fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

impl DvbrecConfig {
    /// Load config from a TOML file with DVBREC_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `DVBREC_GENERAL__SIMULATE=true`. A missing file is not an error: every
    /// field has a default.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: DvbrecConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("DVBREC_").split("__"))
            .extract()
            .map_err(|e| CoreError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject static configuration the schedulers cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.general.adapter_count == 0 {
            return Err(CoreError::Config(
                "general.adapter_count must be at least 1".to_string(),
            ));
        }
        if self.general.max_duration == 0 {
            return Err(CoreError::Config(
                "general.max_duration must be greater than 0".to_string(),
            ));
        }
        if self.power.shutdown_command.is_empty() {
            return Err(CoreError::Config(
                "power.shutdown_command must not be empty".to_string(),
            ));
        }
        if self.power.rtcwake_command.is_empty() {
            return Err(CoreError::Config(
                "power.rtcwake_command must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Path of the SQLite state file.
    pub fn database_path(&self) -> PathBuf {
        self.general.data_directory.join(crate::DATABASE_FILENAME)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.dvbrec/dvbrec.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = DvbrecConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.general.adapter_count, 1);
        assert!(!config.general.simulate);
        assert_eq!(config.power.shutdown_command[0], "sudo");
    }

    #[test]
    fn zero_adapters_is_fatal() {
        let mut config = DvbrecConfig::default();
        config.general.adapter_count = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
        assert!(err.to_string().contains("adapter_count"));
    }

    #[test]
    fn zero_max_duration_is_fatal() {
        let mut config = DvbrecConfig::default();
        config.general.max_duration = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_file_and_env_are_merged() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "dvbrec.toml",
                r#"
                [general]
                adapter_count = 2
                max_duration = 3600
                channels_conf = "channels.conf"
                "#,
            )?;
            jail.set_env("DVBREC_GENERAL__SIMULATE", "true");

            let config = DvbrecConfig::load(Some("dvbrec.toml")).expect("config loads");
            assert_eq!(config.general.adapter_count, 2);
            assert_eq!(config.general.max_duration, 3600);
            assert!(config.general.simulate);
            assert_eq!(config.general.channels_conf, PathBuf::from("channels.conf"));
            // untouched sections keep their defaults
            assert_eq!(config.capture.zap_binary, PathBuf::from("/usr/bin/dvbv5-zap"));
            Ok(())
        });
    }

    #[test]
    fn invalid_file_values_are_rejected_at_load() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("dvbrec.toml", "[general]\nadapter_count = 0\n")?;
            assert!(DvbrecConfig::load(Some("dvbrec.toml")).is_err());
            Ok(())
        });
    }
}
