//! One-shot commands on the saved state. Those that change it refuse to run
//! while `dvbrecd run` holds the daemon lock, since the daemon rewrites the
//! tables when it exits.

use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use dvbrec_core::{channels::load_channels, DvbrecConfig, RecordingRequest};
use dvbrec_scheduler::{db, JobId, JobSpec, PowerControl, SystemPower};
use dvbrec_wakeup::{RtcWake, WakeId, WakeScheduler};

use crate::cli::format_local_date;
use crate::lock::ensure_not_running;

pub fn channels(config: &DvbrecConfig) -> anyhow::Result<()> {
    let channels = load_channels(&config.general.channels_conf)?;
    for name in channels {
        println!("{name}");
    }
    Ok(())
}

pub fn add_recording(config: &DvbrecConfig, request: RecordingRequest) -> anyhow::Result<()> {
    ensure_not_running(&config.general.data_directory)?;
    let channels = load_channels(&config.general.channels_conf)?;
    let spec = JobSpec::from(request.validate(config, &channels, Utc::now())?);

    let path = config.database_path();
    ensure_parent_dir(&path)?;
    let conn = rusqlite::Connection::open(&path)
        .with_context(|| format!("opening {}", path.display()))?;
    let id = db::append_job(&conn, &spec)?;
    info!(job_id = id, program = %spec.program_name, "recording queued");
    println!("{id}");
    Ok(())
}

/// Returns whether a recording was removed. An unknown id is not an error.
pub fn cancel_recording(config: &DvbrecConfig, id: JobId) -> anyhow::Result<bool> {
    ensure_not_running(&config.general.data_directory)?;
    let path = config.database_path();
    if !path.exists() {
        println!("no recording {id}");
        return Ok(false);
    }
    let conn = rusqlite::Connection::open(&path)
        .with_context(|| format!("opening {}", path.display()))?;
    let removed = db::delete_job(&conn, id)?;
    if removed {
        info!(job_id = id, "recording removed");
        println!("recording {id} removed");
    } else {
        println!("no recording {id}");
    }
    Ok(removed)
}

pub fn add_wakeup(config: &DvbrecConfig, at: DateTime<Utc>) -> anyhow::Result<()> {
    ensure_not_running(&config.general.data_directory)?;
    if at <= Utc::now() {
        anyhow::bail!("wake-up time must be in the future");
    }
    let path = config.database_path();
    let mut wake = wake_scheduler(config);
    wake.load(&path)?;
    let id = wake.add(at);
    wake.save(&path)?;
    println!("{id}");
    Ok(())
}

/// Returns whether a wake-up was removed. The RTC is re-armed for whatever
/// remains, or disarmed.
pub fn cancel_wakeup(config: &DvbrecConfig, id: WakeId) -> anyhow::Result<bool> {
    ensure_not_running(&config.general.data_directory)?;
    let path = config.database_path();
    let mut wake = wake_scheduler(config);
    wake.load(&path)?;
    let removed = wake.cancel(id);
    wake.save(&path)?;
    if removed {
        println!("wake-up {id} removed");
    } else {
        println!("no wake-up {id}");
    }
    Ok(removed)
}

fn wake_scheduler(config: &DvbrecConfig) -> WakeScheduler {
    WakeScheduler::new(Box::new(RtcWake::new(
        config.power.rtcwake_command.clone(),
    )))
}

#[derive(Debug, Serialize)]
struct SavedRecording {
    id: JobId,
    #[serde(flatten)]
    spec: JobSpec,
}

#[derive(Debug, Serialize)]
struct SavedWakeup {
    id: WakeId,
    at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct SavedState {
    recordings: Vec<SavedRecording>,
    wakeups: Vec<SavedWakeup>,
}

pub fn list(config: &DvbrecConfig, json: bool) -> anyhow::Result<()> {
    let path = config.database_path();
    let state = SavedState {
        recordings: db::load_rows_from(&path)?
            .into_iter()
            .map(|(id, spec)| SavedRecording { id, spec })
            .collect(),
        wakeups: dvbrec_wakeup::db::load_from(&path)?
            .into_iter()
            .map(|(id, at)| SavedWakeup { id, at })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&state)?);
        return Ok(());
    }

    println!("recordings:");
    for SavedRecording { id, spec } in &state.recordings {
        println!(
            "  [{id}] {} -> {}  adapter {}  {:<16} {}{}",
            format_local_date(spec.begin_at),
            format_local_date(spec.end_at),
            spec.adapter,
            spec.channel,
            spec.program_name,
            if spec.shutdown_after { "  [shutdown]" } else { "" },
        );
    }
    println!("wake-ups:");
    for wakeup in &state.wakeups {
        println!("  [{}] {}", wakeup.id, format_local_date(wakeup.at));
    }
    Ok(())
}

pub fn halt(config: &DvbrecConfig) -> anyhow::Result<()> {
    info!("powering off on request");
    SystemPower::new(config.power.shutdown_command.clone())
        .power_off()
        .context("shutdown command failed")
}

fn ensure_parent_dir(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::DaemonLock;
    use chrono::Duration;

    fn config(dir: &Path) -> DvbrecConfig {
        let mut config = DvbrecConfig::default();
        config.general.data_directory = dir.to_path_buf();
        config.general.channels_conf = dir.join("channels.conf");
        // `true` stands in for rtcwake so nothing touches the real RTC
        config.power.rtcwake_command = vec!["true".to_string()];
        std::fs::write(&config.general.channels_conf, "TF1:1\nArte:2\n").unwrap();
        config
    }

    fn request(begin_in_hours: i64) -> RecordingRequest {
        let begin = Utc::now() + Duration::hours(begin_in_hours);
        RecordingRequest {
            adapter: 0,
            channel: "Arte".to_string(),
            program_name: "Night Documentary".to_string(),
            begin_at: Some(begin),
            end_at: begin + Duration::minutes(50),
            shutdown_after: false,
        }
    }

    #[test]
    fn edits_refused_while_daemon_holds_lock() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let _lock = DaemonLock::acquire(dir.path()).unwrap();

        let err = add_recording(&config, request(2)).unwrap_err();
        assert!(err.to_string().contains("is running"));
        assert!(add_wakeup(&config, Utc::now() + Duration::hours(1)).is_err());
        assert!(cancel_recording(&config, 1).is_err());
        assert!(cancel_wakeup(&config, 1).is_err());

        // nothing was written
        assert!(!config.database_path().exists());
    }

    #[test]
    fn queued_recording_can_be_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        add_recording(&config, request(2)).unwrap();
        add_recording(&config, request(4)).unwrap();

        assert!(cancel_recording(&config, 1).unwrap());
        assert!(!cancel_recording(&config, 1).unwrap());

        let rows = db::load_rows_from(&config.database_path()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, 2);
    }

    #[test]
    fn cancel_recording_without_database_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        assert!(!cancel_recording(&config, 7).unwrap());
        assert!(!config.database_path().exists());
    }

    #[test]
    fn queued_wakeup_can_be_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let now = Utc::now();
        add_wakeup(&config, now + Duration::hours(3)).unwrap();
        add_wakeup(&config, now + Duration::hours(1)).unwrap();

        let saved = dvbrec_wakeup::db::load_from(&config.database_path()).unwrap();
        let first = saved[0].0;
        assert!(cancel_wakeup(&config, first).unwrap());
        assert!(!cancel_wakeup(&config, first).unwrap());

        let saved = dvbrec_wakeup::db::load_from(&config.database_path()).unwrap();
        assert_eq!(saved.len(), 1);
        assert_ne!(saved[0].0, first);
    }
}
