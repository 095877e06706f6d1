//! Fetch orchestrator: runs one job from start to close
//!
//! The orchestrator spawns the feeder and the workers, then runs the control
//! loop: it reports throughput, retunes the pools, evicts slow pools when the
//! job is too slow, and decides when the job ends.
//!
//! ```text
//! Starting -> Running -> Halting | TimedOut | MissionComplete -> Closed
//! ```

use crate::config::FetchConfig;
use crate::fetch::feeder::{run_feeder, FeederContext, FeederReport};
use crate::fetch::liveness::JobLiveness;
use crate::fetch::monitor::{TaskCounts, TaskMonitor, TASK_REMAINDER_NUMBER};
use crate::fetch::scheduler::{TaskScheduler, ThroughputStatus};
use crate::fetch::worker::{run_worker, WorkerContext, WorkerReport};
use crate::protocol::Protocol;
use crate::source::TaskSource;
use crate::storage::SharedStore;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Pending timeout used once few tasks remain
const SHORT_PENDING_TIMEOUT: Duration = Duration::from_secs(120);

/// Below this many remaining tasks the short pending timeout applies
const FEW_TASKS_THRESHOLD: usize = 20;

/// How long aborted workers get to release their slots
const ABORT_GRACE: Duration = Duration::from_secs(2);

static NEXT_JOB_ID: AtomicU32 = AtomicU32::new(1);

/// Lifecycle of a fetch job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Starting,
    Running,
    Halting,
    TimedOut,
    MissionComplete,
    Closed,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Starting => "starting",
            JobState::Running => "running",
            JobState::Halting => "halting",
            JobState::TimedOut => "timed_out",
            JobState::MissionComplete => "mission_complete",
            JobState::Closed => "closed",
        };
        write!(f, "{}", name)
    }
}

/// Summary of a finished job
#[derive(Debug, Clone)]
pub struct JobReport {
    pub job_id: u32,
    pub job_name: String,

    /// Why the job ended: `Halting`, `TimedOut` or `MissionComplete`
    pub end_state: JobState,

    pub elapsed: Duration,
    pub feeder: FeederReport,
    pub workers: Vec<WorkerReport>,
    pub pages: u64,
    pub bytes: u64,
    pub errors: u64,

    /// Task counters just before the pools were dropped
    pub counts: TaskCounts,
}

impl JobReport {
    pub fn served(&self) -> usize {
        self.workers.iter().map(|w| w.served).sum()
    }
}

/// Timing and thresholds of the control loop
#[derive(Debug, Clone)]
struct ControlSettings {
    job_name: String,
    worker_count: usize,
    job_timeout: Duration,
    task_timeout: Duration,
    pending_timeout: Duration,
    retune_interval: Duration,
    check_interval: Duration,
    idle_sleep: Duration,
    shutdown_timeout: Duration,
    halt_file: Option<PathBuf>,
    min_page_rate: f64,
    max_low_count: u32,
    throughput_check_interval: Duration,
}

impl ControlSettings {
    fn from_config(config: &FetchConfig) -> Self {
        Self {
            job_name: config.fetch.job_name.clone(),
            worker_count: config.fetch.worker_count,
            job_timeout: config.fetch.job_timeout(),
            task_timeout: config.fetch.task_timeout(),
            pending_timeout: config.fetch.pending_timeout(),
            retune_interval: config.fetch.retune_interval(),
            check_interval: config.fetch.check_interval(),
            idle_sleep: config.fetch.idle_sleep(),
            shutdown_timeout: config.fetch.shutdown_timeout(),
            halt_file: config.fetch.halt_file.clone(),
            min_page_rate: config.throughput.min_page_rate,
            max_low_count: config.throughput.max_low_count,
            throughput_check_interval: config.throughput.check_interval(),
        }
    }

    fn max_total_low_count(&self) -> u32 {
        self.max_low_count * 10
    }
}

/// Mutable state of the control loop
struct ControlLoop {
    started_at: Instant,
    last_lap: Instant,
    last_retune: Instant,
    next_throughput_check: Instant,
    pending_timeout: Duration,
    low_count: u32,
    total_low_count: u32,
}

impl ControlLoop {
    fn new(started_at: Instant, settings: &ControlSettings) -> Self {
        Self {
            started_at,
            last_lap: started_at,
            last_retune: started_at,
            next_throughput_check: started_at + settings.throughput_check_interval,
            pending_timeout: settings.pending_timeout,
            low_count: 0,
            total_low_count: 0,
        }
    }
}

/// Runs fetch jobs over a monitor, a scheduler and a protocol
pub struct FetchOrchestrator {
    job_id: u32,
    monitor: Arc<TaskMonitor>,
    scheduler: Arc<TaskScheduler>,
    protocol: Arc<dyn Protocol>,
    liveness: Arc<JobLiveness>,
    settings: Mutex<ControlSettings>,
    state: Mutex<JobState>,
    halt: CancellationToken,
    abort: CancellationToken,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FetchOrchestrator {
    pub fn new(config: &FetchConfig, store: SharedStore, protocol: Arc<dyn Protocol>) -> Self {
        let monitor = Arc::new(TaskMonitor::new(config));
        let scheduler = Arc::new(TaskScheduler::new(monitor.clone(), store, config));
        let settings = ControlSettings::from_config(config);

        tracing::info!(
            "Fetch job {:?}: {} workers, job timeout {:?}, task timeout {:?}, check interval {:?}",
            settings.job_name,
            settings.worker_count,
            settings.job_timeout,
            settings.task_timeout,
            settings.check_interval
        );

        Self {
            job_id: NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed),
            monitor,
            scheduler,
            protocol,
            liveness: Arc::new(JobLiveness::new()),
            settings: Mutex::new(settings),
            state: Mutex::new(JobState::Starting),
            halt: CancellationToken::new(),
            abort: CancellationToken::new(),
        }
    }

    pub fn job_id(&self) -> u32 {
        self.job_id
    }

    pub fn monitor(&self) -> &Arc<TaskMonitor> {
        &self.monitor
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    pub fn liveness(&self) -> &Arc<JobLiveness> {
        &self.liveness
    }

    pub fn state(&self) -> JobState {
        *lock(&self.state)
    }

    fn set_state(&self, state: JobState) {
        let mut current = lock(&self.state);
        if *current != state {
            tracing::info!("Fetch job {} -> {}", *current, state);
            *current = state;
        }
    }

    /// Asks a running job to stop
    pub fn halt(&self) {
        self.halt.cancel();
    }

    /// Token that halts the job when cancelled
    pub fn halt_token(&self) -> CancellationToken {
        self.halt.clone()
    }

    /// Applies new settings to the control loop, the monitor and the scheduler
    pub fn reload(&self, config: &FetchConfig) {
        *lock(&self.settings) = ControlSettings::from_config(config);
        self.monitor.reload(config);
        self.scheduler.reload(config);
        tracing::info!("Fetch orchestrator reloaded");
    }

    /// Runs the job to completion
    ///
    /// # Arguments
    ///
    /// * `source` - Where the feeder reads its tasks from
    ///
    /// # Returns
    ///
    /// The job report; ending by halt or timeout is not an error
    pub async fn run(&self, source: Box<dyn TaskSource>) -> JobReport {
        let settings = lock(&self.settings).clone();
        let started_at = Instant::now();

        let feeder = self.spawn_feeder(&settings, started_at, source);
        let workers = self.spawn_workers(&settings);
        self.set_state(JobState::Running);

        let end_state = self.control_loop(started_at).await;
        self.set_state(end_state);

        let (feeder, workers) = self.join_all(feeder, workers).await;
        let counts = self.monitor.counts();

        self.monitor.close();
        self.scheduler.close();
        self.set_state(JobState::Closed);

        JobReport {
            job_id: self.job_id,
            job_name: settings.job_name,
            end_state,
            elapsed: started_at.elapsed(),
            feeder,
            workers,
            pages: self.scheduler.total_pages(),
            bytes: self.scheduler.total_bytes(),
            errors: self.scheduler.fetch_errors(),
            counts,
        }
    }

    fn spawn_feeder(
        &self,
        settings: &ControlSettings,
        started_at: Instant,
        source: Box<dyn TaskSource>,
    ) -> JoinHandle<FeederReport> {
        // Registered before spawning so workers never see a complete mission
        // ahead of the first batch
        self.liveness.register_feeder();

        let ctx = FeederContext {
            job_id: self.job_id,
            monitor: self.monitor.clone(),
            liveness: self.liveness.clone(),
            worker_count: settings.worker_count,
            deadline: started_at + settings.job_timeout,
            idle_sleep: settings.idle_sleep,
            halt: self.halt.clone(),
        };

        tokio::spawn(run_feeder(ctx, source))
    }

    fn spawn_workers(&self, settings: &ControlSettings) -> Vec<JoinHandle<WorkerReport>> {
        (0..settings.worker_count)
            .map(|worker_id| {
                let ctx = WorkerContext {
                    worker_id,
                    scheduler: self.scheduler.clone(),
                    protocol: self.protocol.clone(),
                    liveness: self.liveness.clone(),
                    idle_sleep: settings.idle_sleep,
                    halt: self.halt.clone(),
                    abort: self.abort.clone(),
                };
                tokio::spawn(run_worker(ctx))
            })
            .collect()
    }

    async fn control_loop(&self, started_at: Instant) -> JobState {
        let mut ctl = ControlLoop::new(started_at, &lock(&self.settings));

        loop {
            let check_interval = lock(&self.settings).check_interval;
            tokio::select! {
                _ = self.halt.cancelled() => {}
                _ = tokio::time::sleep(check_interval) => {}
            }

            if let Some(end_state) = self.check(&mut ctl).await {
                return end_state;
            }
        }
    }

    /// One round of the control loop; returns the end state once the job must stop
    async fn check(&self, ctl: &mut ControlLoop) -> Option<JobState> {
        let settings = lock(&self.settings).clone();

        let now = Instant::now();
        let status = self.scheduler.lap(now.duration_since(ctl.last_lap));
        ctl.last_lap = now;
        tracing::info!("{}", self.scheduler.format_status(&status));

        let job_time = now.duration_since(ctl.started_at);
        let idle_time = now.saturating_duration_since(self.scheduler.last_task_finish());

        self.retune_pools(ctl, &settings, now, idle_time);
        self.monitor.maintain();

        let remaining = self.monitor.counts().remaining();
        if !self.liveness.is_feeder_alive() && remaining > 0 && remaining <= TASK_REMAINDER_NUMBER
        {
            tracing::info!("Only {} tasks remain", remaining);
            self.monitor.dump(TASK_REMAINDER_NUMBER, false);
        }

        if now >= ctl.next_throughput_check {
            ctl.next_throughput_check = now + settings.throughput_check_interval;
            if status.pages_per_sec < settings.min_page_rate {
                self.check_throughput(ctl, &settings, &status);
            }
        }

        if self.halt.is_cancelled() {
            tracing::info!("Received halt command, exit the job ...");
            return Some(JobState::Halting);
        }

        if let Some(path) = settings.halt_file.as_deref() {
            if has_finish_command(path, &settings.job_name).await {
                self.halt.cancel();
                let removed = self.monitor.clear_ready_tasks();
                tracing::info!(
                    "Found finish-job command in {}, {} ready tasks cleared, exit the job ...",
                    path.display(),
                    removed
                );
                return Some(JobState::Halting);
            }
        }

        if self.liveness.is_mission_complete(&self.monitor) {
            tracing::info!("All done, exit the job ...");
            return Some(JobState::MissionComplete);
        }

        if job_time > settings.job_timeout {
            let removed = self.monitor.clear_ready_tasks();
            tracing::info!(
                "Hit fetch job timeout {}s, {} ready tasks cleared, exit the job ...",
                job_time.as_secs(),
                removed
            );
            return Some(JobState::TimedOut);
        }

        if idle_time > settings.task_timeout {
            tracing::warn!(
                "Hit fetch task timeout {}s, exit the job ...\n{}",
                idle_time.as_secs(),
                self.liveness.dump_workers()
            );
            return Some(JobState::TimedOut);
        }

        None
    }

    fn retune_pools(
        &self,
        ctl: &mut ControlLoop,
        settings: &ControlSettings,
        now: Instant,
        idle_time: Duration,
    ) {
        if self.monitor.counts().remaining() < FEW_TASKS_THRESHOLD {
            ctl.pending_timeout = SHORT_PENDING_TIMEOUT;
        }

        // Not on every check
        if now <= ctl.last_retune + settings.check_interval * 2 {
            return;
        }

        if now > ctl.last_retune + settings.retune_interval || idle_time > ctl.pending_timeout {
            let reclaimed = self.monitor.retune(false);
            tracing::debug!("Retuned pools, {} pending tasks reclaimed", reclaimed);
            ctl.last_retune = now;
        }
    }

    fn check_throughput(
        &self,
        ctl: &mut ControlLoop,
        settings: &ControlSettings,
        status: &ThroughputStatus,
    ) {
        ctl.low_count += 1;
        ctl.total_low_count += 1;

        if ctl.low_count > settings.max_low_count {
            let removed = self.monitor.try_clear_slowest_queue();
            tracing::info!(
                "Unaccepted throughput {:.2} < {:.2} pages/s {} times, clearing slowest pool, {} tasks removed",
                status.pages_per_sec,
                settings.min_page_rate,
                ctl.low_count,
                removed
            );
            ctl.low_count = 0;
        }

        if ctl.total_low_count > settings.max_total_low_count() {
            let removed = self.monitor.clear_ready_tasks();
            tracing::info!(
                "Unaccepted throughput {} times in total, all pools are cleared, {} tasks removed",
                ctl.total_low_count,
                removed
            );
            ctl.total_low_count = 0;
        }
    }

    async fn join_all(
        &self,
        mut feeder: JoinHandle<FeederReport>,
        workers: Vec<JoinHandle<WorkerReport>>,
    ) -> (FeederReport, Vec<WorkerReport>) {
        self.halt.cancel();

        let shutdown_timeout = lock(&self.settings).shutdown_timeout;
        let deadline = tokio::time::Instant::now() + shutdown_timeout;

        let mut reports = Vec::with_capacity(workers.len());
        let mut stragglers = Vec::new();
        for mut handle in workers {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(report)) => reports.push(report),
                Ok(Err(e)) => tracing::error!("Fetch worker failed: {}", e),
                Err(_) => stragglers.push(handle),
            }
        }

        if !stragglers.is_empty() {
            tracing::warn!(
                "{} workers still busy after {:?}, aborting their fetches\n{}",
                stragglers.len(),
                shutdown_timeout,
                self.liveness.dump_workers()
            );
            self.abort.cancel();

            let grace = tokio::time::Instant::now() + ABORT_GRACE;
            for mut handle in stragglers {
                match tokio::time::timeout_at(grace, &mut handle).await {
                    Ok(Ok(report)) => reports.push(report),
                    Ok(Err(e)) => tracing::error!("Fetch worker failed: {}", e),
                    Err(_) => handle.abort(),
                }
            }
        }

        let feeder_deadline = deadline.max(tokio::time::Instant::now());
        let feeder = match tokio::time::timeout_at(feeder_deadline, &mut feeder).await {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => {
                tracing::error!("Feeder failed: {}", e);
                FeederReport::default()
            }
            Err(_) => {
                tracing::warn!("Feeder did not stop in time, aborting it");
                feeder.abort();
                self.monitor.set_feeder_completed();
                self.liveness.unregister_feeder();
                FeederReport::default()
            }
        };

        reports.sort_by_key(|r| r.worker_id);
        (feeder, reports)
    }
}

/// True if the halt file holds a `finish <job-name>` line
async fn has_finish_command(path: &Path, job_name: &str) -> bool {
    let Ok(content) = tokio::fs::read_to_string(path).await else {
        return false;
    };

    let command = format!("finish {}", job_name);
    content.lines().any(|line| line.trim() == command)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchTask;
    use crate::protocol::{ProtocolOutput, ProtocolStatus};
    use crate::source::{SourceEntry, VecSource};
    use crate::fetch::{next_batch_size, PoolId};
    use crate::storage::{share, PageStore, SqlitePageStore};
    use async_trait::async_trait;
    use url::Url;

    struct StaticProtocol {
        delay: Duration,
    }

    #[async_trait]
    impl Protocol for StaticProtocol {
        async fn fetch(&self, _task: &FetchTask) -> ProtocolOutput {
            tokio::time::sleep(self.delay).await;
            let mut output = ProtocolOutput::status(ProtocolStatus::Success);
            output.status_code = Some(200);
            output.content = Some(b"<html></html>".to_vec());
            output
        }
    }

    fn create_test_config() -> FetchConfig {
        let mut config = FetchConfig::default();
        config.fetch.worker_count = 2;
        config.fetch.check_interval_secs = 1;
        config.fetch.idle_sleep_ms = 10;
        config.fetch.shutdown_timeout_secs = 1;
        config.politeness.crawl_delay_ms = 0;
        config.fetch.pool_threads = 10;
        config
    }

    fn source_for(store: &SharedStore, urls: &[String]) -> Box<dyn TaskSource> {
        let mut store = lock_store(store);
        let entries = urls
            .iter()
            .map(|url| {
                let page = store.insert_or_get_page(url, "", 0).unwrap();
                SourceEntry::new(url.as_str(), page, 0)
            })
            .collect();
        Box::new(VecSource::new(entries))
    }

    fn lock_store(store: &SharedStore) -> MutexGuard<'_, dyn PageStore + Send + 'static> {
        store.lock().unwrap()
    }

    fn urls(hosts: &[&str], per_host: usize) -> Vec<String> {
        hosts
            .iter()
            .flat_map(|host| (0..per_host).map(move |i| format!("http://{}/{}", host, i)))
            .collect()
    }

    fn orchestrator_for(config: &FetchConfig) -> FetchOrchestrator {
        FetchOrchestrator::new(
            config,
            share(SqlitePageStore::new_in_memory().unwrap()),
            Arc::new(StaticProtocol {
                delay: Duration::ZERO,
            }),
        )
    }

    fn control_for(orchestrator: &FetchOrchestrator) -> ControlLoop {
        ControlLoop::new(Instant::now(), &lock(&orchestrator.settings))
    }

    fn produce(monitor: &TaskMonitor, host: &str, n: usize) {
        for i in 0..n {
            let url = format!("http://{}/{}", host, i);
            assert!(monitor.produce(FetchTask::new(1, 0, &url, i as i64).unwrap()));
        }
    }

    #[test]
    fn test_job_state_display() {
        assert_eq!(JobState::MissionComplete.to_string(), "mission_complete");
        assert_eq!(JobState::TimedOut.to_string(), "timed_out");
    }

    #[tokio::test]
    async fn test_finish_command() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("command");
        assert!(!has_finish_command(&path, "crawl").await);

        std::fs::write(&path, "finish other\nfinish crawl\n").unwrap();
        assert!(has_finish_command(&path, "crawl").await);
        assert!(!has_finish_command(&path, "craw").await);
    }

    #[tokio::test]
    async fn test_run_to_mission_complete() {
        let config = create_test_config();
        let store = share(SqlitePageStore::new_in_memory().unwrap());
        let source = source_for(&store, &urls(&["a.com", "b.com", "c.com"], 3));

        let orchestrator = FetchOrchestrator::new(
            &config,
            store.clone(),
            Arc::new(StaticProtocol {
                delay: Duration::ZERO,
            }),
        );
        let report = orchestrator.run(source).await;

        assert_eq!(report.end_state, JobState::MissionComplete);
        assert_eq!(orchestrator.state(), JobState::Closed);
        assert_eq!(report.feeder.fed, 9);
        assert_eq!(report.served(), 9);
        assert_eq!(report.pages, 9);
        assert_eq!(report.counts.remaining(), 0);
        assert_eq!(report.workers.len(), 2);
        assert_eq!(lock_store(&store).fetchable_pages(3).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_job_timeout_clears_ready_tasks() {
        let mut config = create_test_config();
        config.fetch.job_timeout_secs = 1;
        // One slot per host and a long delay: only the first task can go out
        config.fetch.pool_threads = 1;
        config.politeness.crawl_delay_ms = 600_000;

        let store = share(SqlitePageStore::new_in_memory().unwrap());
        let source = source_for(&store, &urls(&["a.com"], 10));

        let orchestrator = FetchOrchestrator::new(
            &config,
            store,
            Arc::new(StaticProtocol {
                delay: Duration::ZERO,
            }),
        );
        let report = orchestrator.run(source).await;

        assert_eq!(report.end_state, JobState::TimedOut);
        assert_eq!(orchestrator.state(), JobState::Closed);
        assert_eq!(report.served(), 1);
        assert_eq!(report.counts.ready, 0);
        assert_eq!(report.counts.pending, 0);
    }

    #[tokio::test]
    async fn test_halt_token_stops_job() {
        let config = create_test_config();
        let store = share(SqlitePageStore::new_in_memory().unwrap());
        let source = source_for(&store, &urls(&["a.com"], 5));

        let orchestrator = FetchOrchestrator::new(
            &config,
            store,
            Arc::new(StaticProtocol {
                delay: Duration::from_secs(30),
            }),
        );
        let token = orchestrator.halt_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            token.cancel();
        });

        let started = Instant::now();
        let report = orchestrator.run(source).await;

        assert_eq!(report.end_state, JobState::Halting);
        // Stuck fetches are aborted after the shutdown timeout
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(report.served(), 0);
        assert_eq!(report.counts.pending, 0);
    }

    #[tokio::test]
    async fn test_halt_file_stops_job() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("command");
        std::fs::write(&path, "finish halted-job\n").unwrap();

        let mut config = create_test_config();
        config.fetch.job_name = "halted-job".to_string();
        config.fetch.halt_file = Some(path);
        config.fetch.pool_threads = 1;
        config.politeness.crawl_delay_ms = 600_000;

        let store = share(SqlitePageStore::new_in_memory().unwrap());
        let source = source_for(&store, &urls(&["a.com"], 5));

        let orchestrator = FetchOrchestrator::new(
            &config,
            store,
            Arc::new(StaticProtocol {
                delay: Duration::ZERO,
            }),
        );
        let report = orchestrator.run(source).await;

        assert_eq!(report.end_state, JobState::Halting);
        assert_eq!(report.counts.ready, 0);
    }

    #[tokio::test]
    async fn test_reload_updates_settings() {
        let config = create_test_config();
        let store = share(SqlitePageStore::new_in_memory().unwrap());
        let orchestrator = FetchOrchestrator::new(
            &config,
            store,
            Arc::new(StaticProtocol {
                delay: Duration::ZERO,
            }),
        );

        let mut reloaded = config.clone();
        reloaded.fetch.job_timeout_secs = 42;
        orchestrator.reload(&reloaded);

        assert_eq!(
            lock(&orchestrator.settings).job_timeout,
            Duration::from_secs(42)
        );
        assert_eq!(orchestrator.state(), JobState::Starting);
    }

    #[tokio::test]
    async fn test_gone_host_pool_is_retired_while_others_run() {
        let orchestrator = orchestrator_for(&create_test_config());
        let monitor = orchestrator.monitor().clone();
        orchestrator.liveness().register_feeder();

        produce(&monitor, "dead.com", 30);
        produce(&monitor, "live.com", 5);

        let dead = Url::parse("http://dead.com/").unwrap();
        for _ in 0..3 {
            assert!(!monitor.track_host_failure(&dead));
        }
        assert!(monitor.track_host_failure(&dead));

        // live.com keeps being served, so no consume ever misses
        let live = PoolId::new(0, "http", "live.com");
        let task = monitor.consume(Some(&live)).unwrap();
        assert!(monitor.finish(&live, task.item_id, false));
        assert_eq!(monitor.queue_count(), 2);
        assert_eq!(monitor.counts().ready, 34);

        let mut ctl = control_for(&orchestrator);
        assert_eq!(orchestrator.check(&mut ctl).await, None);

        assert_eq!(monitor.queue_count(), 1);
        assert_eq!(monitor.counts().ready, 4);
        assert!(next_batch_size(10, monitor.counts().ready, 10) > 0);
    }

    #[tokio::test]
    async fn test_idle_job_times_out() {
        let mut config = create_test_config();
        config.fetch.task_timeout_secs = 1;
        let orchestrator = orchestrator_for(&config);
        let liveness = orchestrator.liveness().clone();
        liveness.register_feeder();
        liveness.register_worker();
        liveness.set_busy(0, "http://a.com/stuck");

        let mut ctl = control_for(&orchestrator);
        assert_eq!(orchestrator.check(&mut ctl).await, None);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(orchestrator.check(&mut ctl).await, Some(JobState::TimedOut));
        assert!(liveness
            .dump_workers()
            .contains("worker #0 fetching http://a.com/stuck"));
    }

    #[tokio::test]
    async fn test_low_throughput_evicts_progressively() {
        let mut config = create_test_config();
        config.throughput.min_page_rate = 1.0;
        config.throughput.max_low_count = 2;
        config.throughput.check_interval_secs = 0;
        let orchestrator = orchestrator_for(&config);
        let monitor = orchestrator.monitor().clone();
        orchestrator.liveness().register_feeder();

        // slow.com takes 10 s per page
        produce(&monitor, "slow.com", 5);
        let slow = PoolId::new(0, "http", "slow.com");
        let t0 = Instant::now();
        let task = monitor.consume_at(Some(&slow), t0).unwrap();
        assert!(monitor.finish_at(&slow, task.item_id, false, t0 + Duration::from_secs(10)));

        let mut ctl = control_for(&orchestrator);
        for _ in 0..2 {
            assert_eq!(orchestrator.check(&mut ctl).await, None);
        }
        assert_eq!(monitor.queue_count(), 1);
        assert_eq!(ctl.low_count, 2);

        // One more slow check than allowed evicts the slowest pool
        assert_eq!(orchestrator.check(&mut ctl).await, None);
        assert_eq!(monitor.queue_count(), 0);
        assert_eq!(monitor.counts().ready, 0);
        assert_eq!(ctl.low_count, 0);
        assert_eq!(ctl.total_low_count, 3);

        // Slow for too long overall: every ready task is dropped
        produce(&monitor, "other.com", 3);
        ctl.total_low_count = 20;
        assert_eq!(orchestrator.check(&mut ctl).await, None);
        assert_eq!(monitor.counts().ready, 0);
        assert_eq!(ctl.total_low_count, 0);
        assert_eq!(ctl.low_count, 1);
    }

    #[tokio::test]
    async fn test_pending_timeout_shrinks_when_few_tasks_remain() {
        let orchestrator = orchestrator_for(&create_test_config());
        orchestrator.liveness().register_feeder();
        produce(orchestrator.monitor(), "a.com", 3);

        let mut ctl = control_for(&orchestrator);
        let started = ctl.last_retune;
        assert_eq!(ctl.pending_timeout, Duration::from_secs(960));

        assert_eq!(orchestrator.check(&mut ctl).await, None);
        assert_eq!(ctl.pending_timeout, SHORT_PENDING_TIMEOUT);
        assert_eq!(ctl.last_retune, started);
    }

    #[tokio::test]
    async fn test_retune_reclaims_stuck_tasks_on_cadence() {
        let mut config = create_test_config();
        config.fetch.pending_timeout_secs = 1;
        config.fetch.retune_interval_secs = 2;
        let orchestrator = orchestrator_for(&config);
        let monitor = orchestrator.monitor().clone();
        orchestrator.liveness().register_feeder();
        produce(&monitor, "a.com", 3);

        let a = PoolId::new(0, "http", "a.com");
        monitor
            .consume_at(Some(&a), Instant::now() - Duration::from_secs(5))
            .unwrap();

        // Too soon after the last retune: the stuck task stays pending
        let mut ctl = control_for(&orchestrator);
        assert_eq!(orchestrator.check(&mut ctl).await, None);
        assert_eq!(monitor.counts().pending, 1);

        let last_retune = Instant::now() - Duration::from_secs(3);
        ctl.last_retune = last_retune;
        assert_eq!(orchestrator.check(&mut ctl).await, None);

        assert_eq!(monitor.counts().pending, 0);
        assert_eq!(monitor.counts().ready, 3);
        assert!(ctl.last_retune > last_retune);
    }
}
