//! Task scheduler: dispatch with bandwidth admission, and outcome handling
//!
//! The scheduler sits between the workers and the [`TaskMonitor`]. On the way
//! out it refuses to dispatch when the bandwidth budget is exhausted; on the
//! way back it frees the task's slot first and then turns the protocol outcome
//! into a page update and host/URL liveness tracking.

use crate::config::FetchConfig;
use crate::fetch::monitor::TaskMonitor;
use crate::fetch::task::{FetchTask, PoolId};
use crate::output::StatusLine;
use crate::protocol::{ProtocolOutput, ProtocolStatus};
use crate::state::CrawlStatus;
use crate::storage::{FetchUpdate, SharedStore};
use crate::url::{choose_repr, SHORTEST_VALID_URL_LENGTH};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Pages in flight may use at most this many seconds of bandwidth
const BANDWIDTH_WINDOW_SECS: f64 = 30.0;

/// Throughput measured over one reporting interval
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThroughputStatus {
    pub pages_per_sec: f64,
    pub bytes_per_sec: f64,
    pub ready: usize,
    pub pending: usize,
}

#[derive(Debug, Clone, Copy)]
struct SchedulerSettings {
    bandwidth_bits: Option<f64>,
    store_content: bool,
}

impl SchedulerSettings {
    fn from_config(config: &FetchConfig) -> Self {
        Self {
            bandwidth_bits: config.throughput.bandwidth_bits(),
            store_content: config.output.store_content,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct LapMark {
    pages: u64,
    bytes: u64,
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct TaskScheduler {
    monitor: Arc<TaskMonitor>,
    store: SharedStore,
    settings: Mutex<SchedulerSettings>,

    // Last representative URL seen by each worker, so a redirect chain
    // followed by one worker converges on one URL
    repr_urls: Mutex<HashMap<usize, String>>,

    started_at: Instant,
    last_task_start: Mutex<Instant>,
    last_task_finish: Mutex<Instant>,

    total_pages: AtomicU64,
    total_bytes: AtomicU64,
    fetch_errors: AtomicU64,
    store_errors: AtomicU64,
    redirects: AtomicU64,

    last_lap: Mutex<LapMark>,
    average_page_size: Mutex<f64>,
}

impl TaskScheduler {
    pub fn new(monitor: Arc<TaskMonitor>, store: SharedStore, config: &FetchConfig) -> Self {
        let settings = SchedulerSettings::from_config(config);
        let now = Instant::now();

        tracing::info!(
            "Task scheduler: bandwidth {}, store content {}",
            settings
                .bandwidth_bits
                .map_or_else(|| "unlimited".to_string(), |b| format!("{} bits/s", b)),
            settings.store_content
        );

        Self {
            monitor,
            store,
            settings: Mutex::new(settings),
            repr_urls: Mutex::new(HashMap::new()),
            started_at: now,
            last_task_start: Mutex::new(now),
            last_task_finish: Mutex::new(now),
            total_pages: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            fetch_errors: AtomicU64::new(0),
            store_errors: AtomicU64::new(0),
            redirects: AtomicU64::new(0),
            last_lap: Mutex::new(LapMark::default()),
            average_page_size: Mutex::new(0.0),
        }
    }

    pub fn monitor(&self) -> &Arc<TaskMonitor> {
        &self.monitor
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Dispatches up to `n` tasks, optionally only from one pool
    ///
    /// Returns nothing when the bandwidth budget is exhausted.
    pub fn schedule(&self, pool_id: Option<&PoolId>, n: usize) -> Vec<FetchTask> {
        if n == 0 {
            tracing::warn!("Required no fetch task");
            return Vec::new();
        }

        if self.bandwidth_exhausted() {
            tracing::info!("Bandwidth exhausted, slows down the scheduling");
            return Vec::new();
        }

        let mut tasks = Vec::with_capacity(n);
        for _ in 0..n {
            match self.monitor.consume(pool_id) {
                Some(task) => tasks.push(task),
                None => break,
            }
        }

        if !tasks.is_empty() {
            *lock(&self.last_task_start) = Instant::now();
        }

        tasks
    }

    fn bandwidth_exhausted(&self) -> bool {
        let Some(bandwidth_bits) = lock(&self.settings).bandwidth_bits else {
            return false;
        };

        let pending = self.monitor.counts().pending as f64;
        let average_page_size = *lock(&self.average_page_size);
        pending * average_page_size * 8.0 > BANDWIDTH_WINDOW_SECS * bandwidth_bits
    }

    /// Completes a task and records its outcome
    ///
    /// The slot is freed before anything else, even if the outcome cannot be
    /// recorded. Store failures are logged, never returned.
    ///
    /// # Returns
    ///
    /// The crawl status written to the task's page
    pub fn finish(&self, worker_id: usize, task: &FetchTask, output: ProtocolOutput) -> CrawlStatus {
        if !self.monitor.finish(&task.pool_id(), task.item_id, false) {
            tracing::debug!("Task {} was no longer pending, recording its outcome anyway", task);
        }
        *lock(&self.last_task_finish) = Instant::now();

        let status = output.status;
        if status.is_host_failure() && self.monitor.track_host_failure(&task.url) {
            tracing::info!("Host {} is gone after repeated failures", task.host);
        }

        let crawl_status = match status {
            ProtocolStatus::Success => {
                self.monitor.track_success(&task.host);
                self.total_pages.fetch_add(1, Ordering::Relaxed);
                self.total_bytes
                    .fetch_add(output.content_length() as u64, Ordering::Relaxed);
                CrawlStatus::Fetched
            }
            ProtocolStatus::NotModified => CrawlStatus::NotModified,
            ProtocolStatus::Moved | ProtocolStatus::TempMoved => {
                let temp = status == ProtocolStatus::TempMoved;
                if let Some(location) = output.location.as_deref() {
                    self.handle_redirect(worker_id, task, location, temp);
                }
                if temp {
                    CrawlStatus::RedirTemp
                } else {
                    CrawlStatus::RedirPerm
                }
            }
            ProtocolStatus::Exception => {
                tracing::warn!("Fetch failed, {} ({})", task.url, status);
                self.fetch_errors.fetch_add(1, Ordering::Relaxed);
                CrawlStatus::Retry
            }
            ProtocolStatus::Timeout
            | ProtocolStatus::UnknownHost
            | ProtocolStatus::Blocked
            | ProtocolStatus::Retry => CrawlStatus::Retry,
            ProtocolStatus::Gone
            | ProtocolStatus::NotFound
            | ProtocolStatus::AccessDenied
            | ProtocolStatus::RobotsDenied => {
                self.monitor.track_url_gone(&task.url);
                CrawlStatus::Gone
            }
            ProtocolStatus::Other(code) => {
                tracing::warn!("Unknown protocol status {} for {}", code, task.url);
                CrawlStatus::Retry
            }
        };

        tracing::debug!("Finished {} -> {} ({})", task, crawl_status, status);
        self.record(task, output, crawl_status);
        crawl_status
    }

    /// Releases a task's slot without a fetch result
    pub fn finish_unchecked(&self, task: &FetchTask) {
        self.monitor.finish(&task.pool_id(), task.item_id, true);
        *lock(&self.last_task_finish) = Instant::now();
    }

    fn handle_redirect(&self, worker_id: usize, task: &FetchTask, location: &str, temp: bool) {
        let url = task.url_str();
        if location.is_empty() || location == url {
            return;
        }

        let repr_url = {
            let mut repr_urls = lock(&self.repr_urls);
            let previous = repr_urls
                .get(&worker_id)
                .cloned()
                .unwrap_or_else(|| url.to_string());
            let repr_url = choose_repr(&previous, location, temp).to_string();

            if repr_url.len() < SHORTEST_VALID_URL_LENGTH {
                tracing::warn!("Representative url is too short: {:?}", repr_url);
                return;
            }

            repr_urls.insert(worker_id, repr_url.clone());
            repr_url
        };

        self.redirects.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            "[{}] {} -> {}",
            if temp { "temp" } else { "perm" },
            url,
            repr_url
        );

        if let Err(e) = lock(&self.store).set_repr_url(task.page, &repr_url) {
            self.store_errors.fetch_add(1, Ordering::Relaxed);
            tracing::error!("Failed to record representative url of {}: {}", url, e);
        }
    }

    fn record(&self, task: &FetchTask, output: ProtocolOutput, crawl_status: CrawlStatus) {
        let store_content = lock(&self.settings).store_content;
        let content_length = output.content.as_ref().map(Vec::len);
        let content_type = output.content_type().map(str::to_string);

        let update = FetchUpdate {
            status: crawl_status,
            status_code: output.status_code,
            content_type,
            content_length,
            content: if store_content { output.content } else { None },
        };

        if let Err(e) = lock(&self.store).update_fetch_result(task.page, &update) {
            self.store_errors.fetch_add(1, Ordering::Relaxed);
            tracing::error!("Failed to record fetch result of {}: {}", task.url, e);
        }
    }

    /// Measures throughput since the previous lap
    ///
    /// # Arguments
    ///
    /// * `elapsed` - Time since the previous lap
    pub fn lap(&self, elapsed: Duration) -> ThroughputStatus {
        let pages = self.total_pages.load(Ordering::Relaxed);
        let bytes = self.total_bytes.load(Ordering::Relaxed);

        let previous = std::mem::replace(&mut *lock(&self.last_lap), LapMark { pages, bytes });

        let secs = elapsed.as_secs_f64();
        let (pages_per_sec, bytes_per_sec) = if secs > 0.0 {
            (
                pages.saturating_sub(previous.pages) as f64 / secs,
                bytes.saturating_sub(previous.bytes) as f64 / secs,
            )
        } else {
            (0.0, 0.0)
        };

        if pages_per_sec > 0.0 {
            *lock(&self.average_page_size) = bytes_per_sec / pages_per_sec;
        }

        let counts = self.monitor.counts();
        ThroughputStatus {
            pages_per_sec,
            bytes_per_sec,
            ready: counts.ready,
            pending: counts.pending,
        }
    }

    /// Builds the periodic status line
    pub fn format_status(&self, status: &ThroughputStatus) -> String {
        StatusLine {
            pages: self.total_pages(),
            errors: self.fetch_errors(),
            average_pages_per_sec: self.average_page_throughput(),
            pages_per_sec: status.pages_per_sec,
            average_bytes_per_sec: self.average_bytes_throughput(),
            bytes_per_sec: status.bytes_per_sec,
            ready: status.ready,
            pending: status.pending,
            queues: self.monitor.queue_count(),
        }
        .to_string()
    }

    /// Pages per second since the scheduler started
    pub fn average_page_throughput(&self) -> f64 {
        let secs = self.started_at.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.total_pages() as f64 / secs
        } else {
            0.0
        }
    }

    /// Bytes per second since the scheduler started
    pub fn average_bytes_throughput(&self) -> f64 {
        let secs = self.started_at.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.total_bytes() as f64 / secs
        } else {
            0.0
        }
    }

    pub fn total_pages(&self) -> u64 {
        self.total_pages.load(Ordering::Relaxed)
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }

    pub fn fetch_errors(&self) -> u64 {
        self.fetch_errors.load(Ordering::Relaxed)
    }

    pub fn store_errors(&self) -> u64 {
        self.store_errors.load(Ordering::Relaxed)
    }

    pub fn redirects(&self) -> u64 {
        self.redirects.load(Ordering::Relaxed)
    }

    pub fn last_task_start(&self) -> Instant {
        *lock(&self.last_task_start)
    }

    pub fn last_task_finish(&self) -> Instant {
        *lock(&self.last_task_finish)
    }

    pub fn reload(&self, config: &FetchConfig) {
        *lock(&self.settings) = SchedulerSettings::from_config(config);
        tracing::info!("Task scheduler reloaded");
    }

    /// Logs the final report
    pub fn close(&self) {
        tracing::info!(
            "Closing task scheduler: {} pages, {} bytes, {} errors, {} redirects, {} store errors",
            self.total_pages(),
            self.total_bytes(),
            self.fetch_errors(),
            self.redirects(),
            self.store_errors()
        );
    }
}
