use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use dvbrec_core::DvbrecConfig;
use dvbrec_scheduler::{JobEvent, JobState, RecordingScheduler, SchedulerConfig, SystemPower};
use dvbrec_wakeup::{RtcWake, WakeScheduler};

use crate::lock::DaemonLock;

const EVENT_QUEUE: usize = 256;

/// Restore saved state, run until SIGINT/SIGTERM, then persist and stop.
pub async fn run(config: DvbrecConfig) -> anyhow::Result<()> {
    let _lock = DaemonLock::acquire(&config.general.data_directory)?;
    let db_path = config.database_path();
    info!(path = %db_path.display(), "using state database");

    if let Err(e) = std::fs::create_dir_all(&config.general.recording_directory) {
        warn!(
            path = %config.general.recording_directory.display(),
            "cannot create recording directory: {e}"
        );
    }

    let (events_tx, events_rx) = mpsc::channel::<JobEvent>(EVENT_QUEUE);
    tokio::spawn(log_events(events_rx));

    let power = Arc::new(SystemPower::new(config.power.shutdown_command.clone()));
    let (recordings, engine) = RecordingScheduler::spawn(
        SchedulerConfig::from(&config),
        power,
        Some(events_tx),
    );

    // a corrupt state file is fatal; better than silently losing recordings
    recordings
        .load(&db_path)
        .await
        .context("restoring recordings")?;

    let mut wakeups = WakeScheduler::new(Box::new(RtcWake::new(
        config.power.rtcwake_command.clone(),
    )));
    wakeups.load(&db_path).context("restoring wake-ups")?;

    shutdown_signal().await;
    info!("shutting down");

    // save before cancelling, cancel_all empties the table
    if let Err(e) = recordings.save(&db_path).await {
        error!("saving recordings failed: {e}");
    }
    if let Err(e) = wakeups.save(&db_path) {
        error!("saving wake-ups failed: {e}");
    }
    match recordings.cancel_all().await {
        Ok(count) => info!(count, "recordings cancelled"),
        Err(e) => error!("cancelling recordings failed: {e}"),
    }
    engine.stop().await;
    Ok(())
}

async fn log_events(mut events: mpsc::Receiver<JobEvent>) {
    while let Some(event) = events.recv().await {
        match event.state {
            JobState::Failed | JobState::Dropped => {
                warn!(job_id = event.id, state = %event.state, "recording ended")
            }
            state if state.is_terminal() => {
                info!(job_id = event.id, state = %state, "recording ended")
            }
            state => info!(job_id = event.id, state = %state, "recording state changed"),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("cannot listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl-C"),
        _ = terminate => info!("received SIGTERM"),
    }
}
