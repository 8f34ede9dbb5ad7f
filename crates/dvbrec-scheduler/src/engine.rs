use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use dvbrec_core::DvbrecConfig;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::{
    db,
    error::{Result, SchedulerError},
    pool::ResourcePool,
    power::PowerControl,
    runner::{CaptureCommand, JobRunner},
    types::{Job, JobEvent, JobId, JobSpec, JobState},
};

const COMMAND_QUEUE: usize = 64;

/// Static settings the engine needs; a slice of [`DvbrecConfig`].
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub adapter_count: usize,
    pub max_duration: u64,
    pub channels_conf: PathBuf,
    pub recording_directory: PathBuf,
    pub simulate: bool,
    pub zap_binary: PathBuf,
    pub sleep_binary: PathBuf,
}

impl From<&DvbrecConfig> for SchedulerConfig {
    fn from(config: &DvbrecConfig) -> Self {
        Self {
            adapter_count: config.general.adapter_count,
            max_duration: config.general.max_duration,
            channels_conf: config.general.channels_conf.clone(),
            recording_directory: config.general.recording_directory.clone(),
            simulate: config.general.simulate,
            zap_binary: config.capture.zap_binary.clone(),
            sleep_binary: config.capture.sleep_binary.clone(),
        }
    }
}

impl SchedulerConfig {
    fn check(&self, spec: &JobSpec) -> Result<()> {
        if spec.adapter >= self.adapter_count {
            return Err(SchedulerError::InvalidRequest(format!(
                "adapter {} does not exist ({} configured)",
                spec.adapter, self.adapter_count
            )));
        }
        if spec.duration > self.max_duration {
            return Err(SchedulerError::InvalidRequest(format!(
                "duration {}s exceeds maximum {}s",
                spec.duration, self.max_duration
            )));
        }
        Ok(())
    }
}

enum Command {
    Schedule {
        spec: JobSpec,
        reply: oneshot::Sender<Result<JobId>>,
    },
    Cancel {
        id: JobId,
        reply: oneshot::Sender<bool>,
    },
    CancelAll {
        reply: oneshot::Sender<usize>,
    },
    List {
        reply: oneshot::Sender<Vec<Job>>,
    },
    Adapters {
        reply: oneshot::Sender<Vec<bool>>,
    },
}

/// Live resource owned by a job: the armed fire time, or the running capture.
enum JobHandle {
    Pending { fire_at: Instant },
    Active(ActiveCapture),
}

struct ActiveCapture {
    /// Taken when termination is requested.
    stop: Option<oneshot::Sender<()>>,
    /// Cancel callers waiting for the process to exit.
    waiters: Vec<oneshot::Sender<bool>>,
    cancelled: bool,
    output: Option<PathBuf>,
}

struct JobEntry {
    job: Job,
    handle: JobHandle,
}

struct CaptureExit {
    id: JobId,
    code: i32,
}

/// Cloneable front end to a running [`RecordingScheduler`].
///
/// Every call is a message to the engine task; all state lives there.
#[derive(Clone)]
pub struct SchedulerHandle {
    commands: mpsc::Sender<Command>,
    config: Arc<SchedulerConfig>,
}

impl SchedulerHandle {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| SchedulerError::EngineStopped)?;
        rx.await.map_err(|_| SchedulerError::EngineStopped)
    }

    /// Register a recording and arm its fire timer. Returns the new job id.
    pub async fn schedule(&self, spec: JobSpec) -> Result<JobId> {
        self.request(|reply| Command::Schedule { spec, reply }).await?
    }

    /// Cancel a job. Resolves only once a running capture has exited.
    ///
    /// Returns `false` for an unknown id.
    pub async fn cancel(&self, id: JobId) -> Result<bool> {
        self.request(|reply| Command::Cancel { id, reply }).await
    }

    /// Cancel every job; resolves once no capture process is left.
    pub async fn cancel_all(&self) -> Result<usize> {
        self.request(|reply| Command::CancelAll { reply }).await
    }

    /// Active and pending jobs, ordered by begin time then id.
    pub async fn list(&self) -> Result<Vec<Job>> {
        self.request(|reply| Command::List { reply }).await
    }

    /// Busy flag of every adapter.
    pub async fn busy_adapters(&self) -> Result<Vec<bool>> {
        self.request(|reply| Command::Adapters { reply }).await
    }

    /// Persist the jobs that have not started and still begin in the future.
    pub async fn save(&self, path: &Path) -> Result<usize> {
        let now = Utc::now();
        let pending: Vec<Job> = self
            .list()
            .await?
            .into_iter()
            .filter(|job| job.state == JobState::Scheduled && job.begin_at > now)
            .collect();
        db::save_to(path, &pending)?;
        info!(count = pending.len(), path = %path.display(), "recordings saved");
        Ok(pending.len())
    }

    /// Restore saved recordings, re-arming a timer for each one.
    ///
    /// Recordings whose begin time has passed are discarded. Restored jobs
    /// are checked against the current configuration and dropped with a
    /// warning if they no longer fit. Returns the number restored.
    pub async fn load(&self, path: &Path) -> Result<usize> {
        let specs = db::load_from(path)?;
        let now = Utc::now();
        let mut restored = 0;
        for spec in specs {
            if spec.begin_at <= now {
                debug!(program = %spec.program_name, "saved recording expired, discarded");
                continue;
            }
            if let Err(e) = self.config.check(&spec) {
                warn!(program = %spec.program_name, "saved recording no longer valid: {e}");
                continue;
            }
            self.schedule(spec).await?;
            restored += 1;
        }
        info!(count = restored, path = %path.display(), "recordings restored");
        Ok(restored)
    }
}

/// Running engine task plus the switch that stops it.
pub struct EngineTask {
    pub shutdown: watch::Sender<bool>,
    pub join: JoinHandle<()>,
}

impl EngineTask {
    /// Stop the engine; running captures are terminated and awaited first.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            error!("scheduler engine task failed: {e}");
        }
    }
}

/// The recording scheduler: job table, fire queue and adapter pool, driven
/// by a single task.
pub struct RecordingScheduler {
    config: Arc<SchedulerConfig>,
    pool: ResourcePool,
    jobs: BTreeMap<JobId, JobEntry>,
    queue: BinaryHeap<Reverse<(Instant, JobId)>>,
    next_id: JobId,
    power: Arc<dyn PowerControl>,
    events: Option<mpsc::Sender<JobEvent>>,
    commands: mpsc::Receiver<Command>,
    exit_tx: mpsc::UnboundedSender<CaptureExit>,
    exit_rx: mpsc::UnboundedReceiver<CaptureExit>,
}

impl RecordingScheduler {
    /// Build an engine and its handle.
    ///
    /// Pass `Some(tx)` to receive every [`JobEvent`]. The sender is
    /// non-blocking (`try_send`) so the engine loop is never stalled.
    pub fn new(
        config: SchedulerConfig,
        power: Arc<dyn PowerControl>,
        events: Option<mpsc::Sender<JobEvent>>,
    ) -> (Self, SchedulerHandle) {
        let config = Arc::new(config);
        let (commands_tx, commands) = mpsc::channel(COMMAND_QUEUE);
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        let engine = Self {
            pool: ResourcePool::new(config.adapter_count),
            config: Arc::clone(&config),
            jobs: BTreeMap::new(),
            queue: BinaryHeap::new(),
            next_id: 1,
            power,
            events,
            commands,
            exit_tx,
            exit_rx,
        };
        let handle = SchedulerHandle {
            commands: commands_tx,
            config,
        };
        (engine, handle)
    }

    /// Build an engine and run it on a new tokio task.
    pub fn spawn(
        config: SchedulerConfig,
        power: Arc<dyn PowerControl>,
        events: Option<mpsc::Sender<JobEvent>>,
    ) -> (SchedulerHandle, EngineTask) {
        let (engine, handle) = Self::new(config, power, events);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(engine.run(shutdown_rx));
        (handle, EngineTask { shutdown, join })
    }

    /// Main event loop. Runs until `shutdown` broadcasts `true` or every
    /// handle is dropped, then terminates whatever is still recording.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(adapters = self.config.adapter_count, simulate = self.config.simulate, "recording scheduler started");
        loop {
            let next_fire = self.queue.peek().map(|Reverse((at, _))| *at);
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },
                Some(exit) = self.exit_rx.recv() => self.on_exit(exit),
                _ = wait_until(next_fire) => self.fire_due(),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        self.teardown().await;
        info!("recording scheduler stopped");
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Schedule { spec, reply } => {
                let _ = reply.send(self.schedule(spec));
            }
            Command::Cancel { id, reply } => self.cancel(id, reply),
            Command::CancelAll { reply } => self.cancel_all(reply),
            Command::List { reply } => {
                let _ = reply.send(self.list());
            }
            Command::Adapters { reply } => {
                let _ = reply.send(self.pool.snapshot());
            }
        }
    }

    fn schedule(&mut self, spec: JobSpec) -> Result<JobId> {
        self.config.check(&spec)?;

        let id = self.next_id;
        self.next_id += 1;

        // A begin time already in the past fires right away.
        let delay = if spec.immediate {
            std::time::Duration::ZERO
        } else {
            (spec.begin_at - Utc::now()).to_std().unwrap_or_default()
        };
        let fire_at = Instant::now() + delay;

        info!(
            job_id = id,
            program = %spec.program_name,
            channel = %spec.channel,
            adapter = spec.adapter,
            minutes = (spec.duration + 30) / 60,
            "recording scheduled"
        );

        self.queue.push(Reverse((fire_at, id)));
        self.jobs.insert(
            id,
            JobEntry {
                job: Job::new(id, spec),
                handle: JobHandle::Pending { fire_at },
            },
        );
        self.emit(id, JobState::Scheduled);
        Ok(id)
    }

    fn cancel(&mut self, id: JobId, reply: oneshot::Sender<bool>) {
        let Some(entry) = self.jobs.get_mut(&id) else {
            debug!(job_id = id, "cancel of unknown job ignored");
            let _ = reply.send(false);
            return;
        };
        info!(job_id = id, program = %entry.job.program_name, "cancelling recording");

        if let JobHandle::Active(capture) = &mut entry.handle {
            capture.cancelled = true;
            if let Some(stop) = capture.stop.take() {
                let _ = stop.send(());
            }
            capture.waiters.push(reply);
            return;
        }

        // Pending: the queue entry goes stale and is skipped when it surfaces.
        self.jobs.remove(&id);
        self.compact_queue();
        self.emit(id, JobState::Cancelled);
        let _ = reply.send(true);
    }

    /// Drop stale fire-queue entries once they outnumber the live jobs.
    fn compact_queue(&mut self) {
        let live = self.jobs.len();
        if self.queue.len() <= live * 2 {
            return;
        }
        let jobs = &self.jobs;
        self.queue.retain(|Reverse((at, id))| is_armed(jobs, *id, *at));
        debug!(remaining = self.queue.len(), "fire queue compacted");
    }

    fn cancel_all(&mut self, reply: oneshot::Sender<usize>) {
        let ids: Vec<JobId> = self.jobs.keys().copied().collect();
        let mut pending_exits = Vec::new();
        for id in &ids {
            let (tx, rx) = oneshot::channel();
            self.cancel(*id, tx);
            pending_exits.push(rx);
        }
        let count = ids.len();
        if count > 0 {
            info!(count, "all recordings cancelled");
        }
        // Running captures answer on exit; wait for them off the engine loop.
        tokio::spawn(async move {
            for rx in pending_exits {
                let _ = rx.await;
            }
            let _ = reply.send(count);
        });
    }

    fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.values().map(|e| e.job.clone()).collect();
        jobs.sort_by_key(|job| (job.begin_at, job.id));
        jobs
    }

    /// Fire every job whose time has come.
    fn fire_due(&mut self) {
        let now = Instant::now();
        while let Some(Reverse((at, id))) = self.queue.peek().copied() {
            if at > now {
                break;
            }
            self.queue.pop();
            if is_armed(&self.jobs, id, at) {
                self.fire(id);
            }
        }
    }

    fn fire(&mut self, id: JobId) {
        let Some(entry) = self.jobs.get_mut(&id) else {
            return;
        };
        entry.job.state = JobState::Waiting;
        let job = entry.job.clone();
        self.emit(id, JobState::Waiting);

        info!(job_id = id, file = %job.output_filename(), "recording starting");

        if !self.pool.try_acquire(job.adapter) {
            warn!(job_id = id, adapter = job.adapter, "adapter busy, recording dropped");
            self.jobs.remove(&id);
            self.emit(id, JobState::Dropped);
            return;
        }

        let (command, output) = self.capture_command(&job);
        let runner = match JobRunner::spawn(&command) {
            Ok(runner) => runner,
            Err(e) => {
                warn!(job_id = id, "recording could not start: {e}");
                self.pool.release(job.adapter);
                self.jobs.remove(&id);
                self.emit(id, JobState::Failed);
                return;
            }
        };
        debug!(job_id = id, pid = ?runner.pid(), "capture process started");

        let (stop_tx, stop_rx) = oneshot::channel();
        let exit_tx = self.exit_tx.clone();
        tokio::spawn(async move {
            let code = runner.supervise(stop_rx).await;
            let _ = exit_tx.send(CaptureExit { id, code });
        });

        if let Some(entry) = self.jobs.get_mut(&id) {
            entry.job.state = JobState::Running;
            entry.handle = JobHandle::Active(ActiveCapture {
                stop: Some(stop_tx),
                waiters: Vec::new(),
                cancelled: false,
                output,
            });
        }
        self.emit(id, JobState::Running);
    }

    fn capture_command(&self, job: &Job) -> (CaptureCommand, Option<PathBuf>) {
        if self.config.simulate {
            return (
                CaptureCommand::simulate(&self.config.sleep_binary, job.duration),
                None,
            );
        }
        let output = self.config.recording_directory.join(job.output_filename());
        let command = CaptureCommand::zap(
            &self.config.zap_binary,
            job.adapter,
            &job.channel,
            &output,
            &self.config.channels_conf,
            job.duration,
        );
        (command, Some(output))
    }

    fn on_exit(&mut self, exit: CaptureExit) {
        let Some(entry) = self.jobs.remove(&exit.id) else {
            return;
        };
        self.pool.release(entry.job.adapter);
        let JobHandle::Active(capture) = entry.handle else {
            error!(job_id = exit.id, "exit reported for a job that was not running");
            return;
        };
        debug!(job_id = exit.id, code = exit.code, "capture process exited");

        let success = self.config.simulate || exit.code == 0;
        if !success {
            if let Some(output) = &capture.output {
                remove_capture(output);
            }
        }

        // A capture that finished cleanly before the stop landed still counts.
        let state = if capture.cancelled && exit.code != 0 {
            JobState::Cancelled
        } else if success {
            JobState::Completed
        } else {
            JobState::Failed
        };
        match state {
            JobState::Completed => info!(job_id = exit.id, "recording finished"),
            JobState::Failed => warn!(job_id = exit.id, code = exit.code, "recording failed"),
            _ => info!(job_id = exit.id, "recording stopped"),
        }

        if state == JobState::Completed && entry.job.shutdown_after {
            info!(job_id = exit.id, "shutdown requested after recording");
            if let Err(e) = self.power.power_off() {
                error!(job_id = exit.id, "shutdown failed: {e}");
            }
        }

        self.emit(exit.id, state);
        for waiter in capture.waiters {
            let _ = waiter.send(true);
        }
    }

    /// Terminate running captures and wait for every one to exit.
    async fn teardown(&mut self) {
        let ids: Vec<JobId> = self.jobs.keys().copied().collect();
        for id in ids {
            let (tx, _rx) = oneshot::channel();
            self.cancel(id, tx);
        }
        while !self.jobs.is_empty() {
            match self.exit_rx.recv().await {
                Some(exit) => self.on_exit(exit),
                None => break,
            }
        }
    }

    fn emit(&self, id: JobId, state: JobState) {
        if let Some(ref tx) = self.events {
            if tx.try_send(JobEvent { id, state }).is_err() {
                warn!(job_id = id, %state, "event channel full or closed, event dropped");
            }
        }
    }
}

/// Whether the queue entry `(at, id)` still belongs to a pending job.
fn is_armed(jobs: &BTreeMap<JobId, JobEntry>, id: JobId, at: Instant) -> bool {
    matches!(
        jobs.get(&id),
        Some(JobEntry { handle: JobHandle::Pending { fire_at }, .. }) if *fire_at == at
    )
}

async fn wait_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn remove_capture(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => info!(file = %path.display(), "partial capture removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(file = %path.display(), "could not remove partial capture: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingPower {
        calls: AtomicUsize,
    }

    impl PowerControl for CountingPower {
        fn power_off(&self) -> std::io::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            adapter_count: 1,
            max_duration: 3600,
            channels_conf: PathBuf::from("channels.conf"),
            recording_directory: std::env::temp_dir(),
            simulate: false,
            zap_binary: PathBuf::from("/usr/bin/dvbv5-zap"),
            sleep_binary: PathBuf::from("sleep"),
        }
    }

    fn spec(begin_in_mins: i64, shutdown_after: bool) -> JobSpec {
        let begin_at = Utc::now() + Duration::minutes(begin_in_mins);
        JobSpec {
            adapter: 0,
            channel: "TF1".to_string(),
            program_name: "Late Movie".to_string(),
            immediate: false,
            begin_at,
            end_at: begin_at + Duration::minutes(30),
            duration: 1800,
            shutdown_after,
        }
    }

    fn engine(
        events: Option<mpsc::Sender<JobEvent>>,
    ) -> (RecordingScheduler, Arc<CountingPower>) {
        let power = Arc::new(CountingPower::default());
        let (engine, _handle) = RecordingScheduler::new(config(), power.clone(), events);
        (engine, power)
    }

    fn cancel_now(engine: &mut RecordingScheduler, id: JobId) -> bool {
        let (tx, mut rx) = oneshot::channel();
        engine.cancel(id, tx);
        rx.try_recv().unwrap_or(false)
    }

    /// Put `id` in the running state without spawning anything, as if the
    /// engine had fired it and a stop had already been requested.
    fn mark_running_and_cancelled(engine: &mut RecordingScheduler, id: JobId) {
        assert!(engine.pool.try_acquire(0));
        let entry = engine.jobs.get_mut(&id).unwrap();
        entry.job.state = JobState::Running;
        entry.handle = JobHandle::Active(ActiveCapture {
            stop: None,
            waiters: Vec::new(),
            cancelled: true,
            output: None,
        });
    }

    fn drain(events: &mut mpsc::Receiver<JobEvent>) -> Vec<JobState> {
        let mut states = Vec::new();
        while let Ok(event) = events.try_recv() {
            states.push(event.state);
        }
        states
    }

    #[tokio::test]
    async fn schedule_cancel_churn_keeps_queue_small() {
        let (mut engine, _power) = engine(None);
        for _ in 0..1000 {
            let id = engine.schedule(spec(600, false)).unwrap();
            assert!(cancel_now(&mut engine, id));
        }
        assert!(engine.jobs.is_empty());
        assert!(engine.queue.len() <= 1, "queue grew to {}", engine.queue.len());
    }

    #[tokio::test]
    async fn compaction_keeps_live_entries() {
        let (mut engine, _power) = engine(None);
        let ids: Vec<JobId> = (0..10)
            .map(|i| engine.schedule(spec(600 + i, false)).unwrap())
            .collect();
        let keep = ids[9];
        for id in &ids[..9] {
            assert!(cancel_now(&mut engine, *id));
        }
        assert!(engine.queue.len() < ids.len());
        let Reverse((at, id)) = *engine.queue.peek().unwrap();
        assert_eq!(id, keep);
        assert!(is_armed(&engine.jobs, id, at));
    }

    #[tokio::test]
    async fn clean_exit_wins_over_late_cancel() {
        let (tx, mut events) = mpsc::channel(16);
        let (mut engine, power) = engine(Some(tx));
        let id = engine.schedule(spec(60, true)).unwrap();
        mark_running_and_cancelled(&mut engine, id);

        engine.on_exit(CaptureExit { id, code: 0 });

        assert_eq!(drain(&mut events).last(), Some(&JobState::Completed));
        assert_eq!(power.calls.load(Ordering::SeqCst), 1);
        assert!(engine.jobs.is_empty());
        assert_eq!(engine.pool.snapshot(), vec![false]);
    }

    #[tokio::test]
    async fn terminated_capture_is_cancelled() {
        let (tx, mut events) = mpsc::channel(16);
        let (mut engine, power) = engine(Some(tx));
        let id = engine.schedule(spec(60, true)).unwrap();
        mark_running_and_cancelled(&mut engine, id);

        engine.on_exit(CaptureExit { id, code: -1 });

        assert_eq!(drain(&mut events).last(), Some(&JobState::Cancelled));
        assert_eq!(power.calls.load(Ordering::SeqCst), 0);
    }
}
