//! Fetch pool: the per-(priority, protocol, host) task queue
//!
//! A pool holds:
//! - A FIFO of ready tasks
//! - The pending (dispatched, unfinished) tasks with their dispatch time
//! - Finished, slow and expedited counters plus time-cost samples
//! - Politeness state: the delay enforced between dispatches to the host

use crate::config::FetchConfig;
use crate::fetch::task::{FetchTask, PoolId};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::time::{Duration, Instant};

/// Number of finished tasks kept in the recent time-cost window before it resets
pub const RECENT_TASKS_LIMIT: u64 = 100;

/// A task that costs more than this is counted as slow
pub const SLOW_TASK_THRESHOLD: Duration = Duration::from_millis(500);

/// Lifecycle status of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolStatus {
    /// Accepts and serves tasks
    Active,

    /// Drained after the feed completed; re-enabled if new tasks arrive
    Disabled,

    /// Host judged unreachable; terminal
    Retired,
}

impl fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Disabled => "disabled",
            Self::Retired => "retired",
        };
        write!(f, "{}", s)
    }
}

/// Settings every pool is created with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    /// Maximum number of pending tasks; 0 means unlimited
    pub allowed_threads: usize,
    pub crawl_delay: Duration,
    pub min_crawl_delay: Duration,
    pub pending_timeout: Duration,
}

impl PoolSettings {
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            allowed_threads: config.fetch.pool_threads,
            crawl_delay: config.politeness.crawl_delay(),
            min_crawl_delay: config.politeness.min_crawl_delay(),
            pending_timeout: config.fetch.pending_timeout(),
        }
    }

    /// Delay enforced between two dispatches to the same host
    ///
    /// Pools that run several threads only keep the minimum delay. The minimum
    /// is a floor the delay never drops below.
    pub fn effective_delay(&self) -> Duration {
        if self.allowed_threads > 1 {
            self.min_crawl_delay
        } else {
            std::cmp::max(self.crawl_delay, self.min_crawl_delay)
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self::from_config(&FetchConfig::default())
    }
}

/// A dispatched task awaiting its result
#[derive(Debug, Clone)]
pub struct PendingTask {
    pub task: FetchTask,
    pub dispatched_at: Instant,
}

/// Queue of fetch tasks for one pool id
#[derive(Debug)]
pub struct FetchPool {
    id: PoolId,
    settings: PoolSettings,
    status: PoolStatus,

    ready: VecDeque<FetchTask>,
    pending: BTreeMap<u64, PendingTask>,

    last_dispatch: Option<Instant>,

    recent_finished: u64,
    recent_cost: Duration,
    total_finished: u64,
    total_cost: Duration,
    slow_tasks: u64,
    expedited: u64,
}

impl FetchPool {
    pub fn new(id: PoolId, settings: PoolSettings) -> Self {
        Self {
            id,
            settings,
            status: PoolStatus::Active,
            ready: VecDeque::new(),
            pending: BTreeMap::new(),
            last_dispatch: None,
            recent_finished: 0,
            recent_cost: Duration::ZERO,
            total_finished: 0,
            total_cost: Duration::ZERO,
            slow_tasks: 0,
            expedited: 0,
        }
    }

    pub fn id(&self) -> &PoolId {
        &self.id
    }

    pub fn priority(&self) -> i32 {
        self.id.priority
    }

    pub fn host(&self) -> &str {
        &self.id.host
    }

    pub fn status(&self) -> PoolStatus {
        self.status
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: PoolSettings) {
        self.settings = settings;
    }

    /// Appends a task to the ready queue
    ///
    /// # Returns
    ///
    /// * `true` - The task was queued
    /// * `false` - The pool is retired, or the item id is already queued or pending
    pub fn produce(&mut self, task: FetchTask) -> bool {
        if self.status == PoolStatus::Retired {
            tracing::warn!("Pool {} is retired, dropping task {}", self.id, task);
            return false;
        }

        if task.pool_id() != self.id {
            tracing::warn!("Task {} does not belong to pool {}", task, self.id);
            return false;
        }

        if self.contains(task.item_id) {
            tracing::warn!("Task {} is already in pool {}", task, self.id);
            return false;
        }

        self.ready.push_back(task);
        true
    }

    /// Dispatches the oldest ready task
    ///
    /// Returns `None` if the pool is not active, has reached its thread cap,
    /// is still inside the politeness window, or has nothing ready.
    pub fn consume(&mut self, now: Instant) -> Option<FetchTask> {
        if self.status != PoolStatus::Active {
            return None;
        }

        if self.settings.allowed_threads > 0 && self.pending.len() >= self.settings.allowed_threads {
            return None;
        }

        if !self.is_polite_at(now) {
            return None;
        }

        let task = self.ready.pop_front()?;
        self.pending.insert(
            task.item_id,
            PendingTask {
                task: task.clone(),
                dispatched_at: now,
            },
        );
        self.last_dispatch = Some(now);

        Some(task)
    }

    /// Returns true if a dispatch at `now` respects the crawl delay
    pub fn is_polite_at(&self, now: Instant) -> bool {
        match self.last_dispatch {
            Some(last) => now.saturating_duration_since(last) >= self.settings.effective_delay(),
            None => true,
        }
    }

    /// Completes a pending task
    ///
    /// `asap` marks an expedited completion; it is only counted, it does not
    /// change when the next task may be dispatched.
    ///
    /// # Returns
    ///
    /// * `true` - The task was pending and is now finished
    /// * `false` - The item id is not pending in this pool
    pub fn finish(&mut self, item_id: u64, asap: bool, now: Instant) -> bool {
        let Some(pending) = self.pending.remove(&item_id) else {
            return false;
        };

        let cost = now.saturating_duration_since(pending.dispatched_at);
        if cost > SLOW_TASK_THRESHOLD {
            self.slow_tasks += 1;
        }
        if asap {
            self.expedited += 1;
        }

        self.recent_finished += 1;
        self.recent_cost += cost;
        if self.recent_finished >= RECENT_TASKS_LIMIT {
            self.recent_finished = 0;
            self.recent_cost = Duration::ZERO;
        }

        self.total_finished += 1;
        self.total_cost += cost;

        true
    }

    /// Moves stuck pending tasks back to the front of the ready queue
    ///
    /// With `force` every pending task is reclaimed, otherwise only those
    /// dispatched longer ago than the pending timeout.
    ///
    /// # Returns
    ///
    /// The number of tasks moved back to ready
    pub fn retune(&mut self, force: bool, now: Instant) -> usize {
        let timeout = self.settings.pending_timeout;
        let expired: Vec<u64> = self
            .pending
            .iter()
            .filter(|(_, p)| force || now.saturating_duration_since(p.dispatched_at) > timeout)
            .map(|(id, _)| *id)
            .collect();

        // Push in reverse so the reclaimed tasks keep their order at the front
        for item_id in expired.iter().rev() {
            if let Some(pending) = self.pending.remove(item_id) {
                self.ready.push_front(pending.task);
            }
        }

        if !expired.is_empty() {
            tracing::debug!("Pool {}: {} pending tasks back to ready", self.id, expired.len());
        }

        expired.len()
    }

    /// Drops every ready task, returning how many were removed
    pub fn clear_ready_queue(&mut self) -> usize {
        let count = self.ready.len();
        self.ready.clear();
        count
    }

    /// Drops all pending tasks, but only if there are at most `limit` of them
    ///
    /// # Returns
    ///
    /// The number of pending tasks dropped, 0 if there were more than `limit`
    pub fn clear_pending_tasks_if_few(&mut self, limit: usize) -> usize {
        let count = self.pending.len();
        if count == 0 || count > limit {
            return 0;
        }

        let now = Instant::now();
        for pending in self.pending.values() {
            tracing::info!(
                "Dropping slow pending task {} after {:?}",
                pending.task.url,
                now.saturating_duration_since(pending.dispatched_at)
            );
        }

        self.pending.clear();
        count
    }

    /// Removes up to `limit` tasks from the front of the ready queue
    pub fn drain_ready(&mut self, limit: usize) -> Vec<FetchTask> {
        let n = limit.min(self.ready.len());
        self.ready.drain(..n).collect()
    }

    pub fn ready_tasks(&self) -> impl Iterator<Item = &FetchTask> {
        self.ready.iter()
    }

    pub fn pending_tasks(&self) -> impl Iterator<Item = &PendingTask> {
        self.pending.values()
    }

    pub fn find_pending(&self, item_id: u64) -> Option<&FetchTask> {
        self.pending.get(&item_id).map(|p| &p.task)
    }

    pub fn is_pending(&self, item_id: u64) -> bool {
        self.pending.contains_key(&item_id)
    }

    fn contains(&self, item_id: u64) -> bool {
        self.pending.contains_key(&item_id) || self.ready.iter().any(|t| t.item_id == item_id)
    }

    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn finished_count(&self) -> u64 {
        self.total_finished
    }

    pub fn slow_task_count(&self) -> u64 {
        self.slow_tasks
    }

    pub fn expedited_count(&self) -> u64 {
        self.expedited
    }

    pub fn has_ready_tasks(&self) -> bool {
        !self.ready.is_empty()
    }

    pub fn has_pending_tasks(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn has_tasks(&self) -> bool {
        self.has_ready_tasks() || self.has_pending_tasks()
    }

    pub fn is_active(&self) -> bool {
        self.status == PoolStatus::Active
    }

    pub fn enable(&mut self) {
        self.status = PoolStatus::Active;
    }

    pub fn disable(&mut self) {
        self.status = PoolStatus::Disabled;
    }

    pub fn retire(&mut self) {
        self.status = PoolStatus::Retired;
    }

    /// Average seconds per finished task over the whole job
    pub fn average_time_cost(&self) -> f64 {
        if self.total_finished == 0 {
            0.0
        } else {
            self.total_cost.as_secs_f64() / self.total_finished as f64
        }
    }

    /// Average seconds per finished task over the recent window
    pub fn average_recent_time_cost(&self) -> f64 {
        if self.recent_finished == 0 {
            0.0
        } else {
            self.recent_cost.as_secs_f64() / self.recent_finished as f64
        }
    }

    /// Finished tasks per second; infinite until something has taken measurable time
    pub fn average_throughput(&self) -> f64 {
        let secs = self.total_cost.as_secs_f64();
        if self.total_finished == 0 || secs == 0.0 {
            f64::INFINITY
        } else {
            self.total_finished as f64 / secs
        }
    }

    /// One-line cost summary used in reports
    pub fn cost_report(&self) -> String {
        format!(
            "{:>40} -> avg cost: {:.2}s/p, avg rate: {:.2}p/s, expedited: {}",
            self.id.to_string(),
            self.average_time_cost(),
            self.average_throughput(),
            self.expedited
        )
    }
}

impl fmt::Display for FetchPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} status: {}, ready: {}, pending: {}, finished: {}, slow: {}, expedited: {}, threads: {}, delay: {:?}",
            self.id,
            self.status,
            self.ready.len(),
            self.pending.len(),
            self.total_finished,
            self.slow_tasks,
            self.expedited,
            self.settings.allowed_threads,
            self.settings.effective_delay()
        )
    }
}
