//! Task monitor: the synchronized scheduling state machine
//!
//! All pool state, the task counters and host liveness live behind one mutex.
//! Every operation here is short and CPU-bound, and none of them awaits while
//! holding the lock.
//!
//! The monitor implements:
//! - Admission (`produce`), rejecting tasks for gone hosts and URLs
//! - Dispatch (`consume`) under the priority drain barrier
//! - Completion (`finish`), tolerant of tasks whose pool has gone away
//! - Maintenance, retuning and throughput-based eviction

use crate::config::FetchConfig;
use crate::fetch::pool::{FetchPool, PoolSettings};
use crate::fetch::registry::PoolRegistry;
use crate::fetch::task::{FetchTask, PoolId};
use crate::state::HostTracker;
use crate::url::extract_host;
use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use url::Url;

/// Pending tasks of an evicted slow pool are dropped only if there are at most this many
const MIN_PENDING_SLOW_TASKS: usize = 2;

/// Maximum number of lines in a cost report
const COST_REPORT_LIMIT: usize = 100;

/// Number of remaining tasks listed in reports
pub const TASK_REMAINDER_NUMBER: usize = 5;

/// Snapshot of the global task counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskCounts {
    pub ready: usize,
    pub pending: usize,
    pub finished: u64,
}

impl TaskCounts {
    /// Ready plus pending tasks
    pub fn remaining(&self) -> usize {
        self.ready + self.pending
    }
}

#[derive(Debug)]
struct MonitorState {
    registry: PoolRegistry,
    hosts: HostTracker,
    settings: PoolSettings,
    min_page_throughput: f64,
    feeder_completed: bool,
    last_priority: Option<i32>,
    counts: TaskCounts,

    // Recent average cost (ms) of each pool, indexed both ways
    cost_index: BTreeSet<(u64, PoolId)>,
    costs: HashMap<PoolId, u64>,
}

/// Synchronized facade over the pool registry
#[derive(Debug)]
pub struct TaskMonitor {
    state: Mutex<MonitorState>,
}

impl TaskMonitor {
    pub fn new(config: &FetchConfig) -> Self {
        let state = MonitorState {
            registry: PoolRegistry::new(),
            hosts: HostTracker::new(config.politeness.host_failure_threshold),
            settings: PoolSettings::from_config(config),
            min_page_throughput: config.throughput.min_page_rate,
            feeder_completed: false,
            last_priority: None,
            counts: TaskCounts::default(),
            cost_index: BTreeSet::new(),
            costs: HashMap::new(),
        };

        tracing::info!(
            "Task monitor: pool threads {}, crawl delay {:?}, min crawl delay {:?}, pending timeout {:?}",
            state.settings.allowed_threads,
            state.settings.crawl_delay,
            state.settings.min_crawl_delay,
            state.settings.pending_timeout
        );

        Self {
            state: Mutex::new(state),
        }
    }

    // Poisoning is ignored: counters are rebuilt from pool truth by recompute()
    fn state(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admits a task into its pool
    ///
    /// # Returns
    ///
    /// * `true` - The task is now ready
    /// * `false` - The host or URL is gone, or the pool refused the task
    pub fn produce(&self, task: FetchTask) -> bool {
        self.state().produce(task)
    }

    /// Dispatches the next task, optionally only from one pool
    pub fn consume(&self, pool_id: Option<&PoolId>) -> Option<FetchTask> {
        self.consume_at(pool_id, Instant::now())
    }

    pub(crate) fn consume_at(&self, pool_id: Option<&PoolId>, now: Instant) -> Option<FetchTask> {
        self.state().consume(pool_id, now)
    }

    /// Completes a dispatched task
    ///
    /// Unknown pools and items are logged and ignored: the task may have been
    /// reclaimed by retuning or evicted while in flight.
    pub fn finish(&self, pool_id: &PoolId, item_id: u64, asap: bool) -> bool {
        self.finish_at(pool_id, item_id, asap, Instant::now())
    }

    pub(crate) fn finish_at(&self, pool_id: &PoolId, item_id: u64, asap: bool, now: Instant) -> bool {
        self.state().finish(pool_id, item_id, asap, now)
    }

    /// Retires pools of gone hosts and disables drained pools once the feed is done
    pub fn maintain(&self) {
        self.state().maintain();
    }

    /// Retires gone-host pools and reclaims stuck pending tasks
    ///
    /// # Returns
    ///
    /// The number of pending tasks moved back to ready
    pub fn retune(&self, force: bool) -> usize {
        self.retune_at(force, Instant::now())
    }

    pub(crate) fn retune_at(&self, force: bool, now: Instant) -> usize {
        self.state().retune(force, now)
    }

    /// Evicts the slowest pool if its throughput is below the minimum
    ///
    /// # Returns
    ///
    /// The number of tasks removed, 0 if nothing was evicted
    pub fn try_clear_slowest_queue(&self) -> usize {
        self.state().try_clear_slowest_queue()
    }

    /// Drops every ready task in every pool
    pub fn clear_ready_tasks(&self) -> usize {
        self.state().clear_ready_tasks()
    }

    pub fn set_feeder_completed(&self) {
        self.state().feeder_completed = true;
    }

    pub fn is_feeder_completed(&self) -> bool {
        self.state().feeder_completed
    }

    pub fn counts(&self) -> TaskCounts {
        self.state().counts
    }

    /// Number of pools, active or disabled
    pub fn queue_count(&self) -> usize {
        self.state().registry.len()
    }

    /// Reports the first `limit` ready tasks and the slowest pools
    ///
    /// With `drop` the listed tasks are removed from their pools.
    pub fn dump(&self, limit: usize, drop: bool) -> String {
        let report = self.state().dump(limit, drop);
        tracing::info!("{}", report);
        report
    }

    /// Lists the `limit` slowest pools, slowest first
    pub fn cost_report(&self, limit: usize) -> String {
        self.state().cost_report(limit)
    }

    /// Records a successful fetch from a host
    pub fn track_success(&self, host: &str) {
        self.state().hosts.mark_success(host);
    }

    /// Records a host-level failure for the URL's host
    ///
    /// # Returns
    ///
    /// `true` if the host just became gone. Its pool stops being consumable
    /// right away and is retired by the next maintenance pass.
    pub fn track_host_failure(&self, url: &Url) -> bool {
        let Some(host) = extract_host(url) else {
            return false;
        };

        self.state().hosts.mark_failure(&host)
    }

    /// Marks a single URL gone; it will not be admitted again
    pub fn track_url_gone(&self, url: &Url) {
        self.state().hosts.mark_url_gone(url.as_str());
    }

    pub fn is_host_reachable(&self, host: &str) -> bool {
        self.state().hosts.is_reachable(host)
    }

    /// Finds a pending task in an active or disabled pool
    pub fn find_pending(&self, pool_id: &PoolId, item_id: u64) -> Option<FetchTask> {
        self.state()
            .registry
            .find_extended(pool_id)
            .and_then(|p| p.find_pending(item_id))
            .cloned()
    }

    /// Applies new settings to the monitor and every existing pool
    pub fn reload(&self, config: &FetchConfig) {
        let mut state = self.state();
        let settings = PoolSettings::from_config(config);

        state.settings = settings;
        state.min_page_throughput = config.throughput.min_page_rate;
        state.hosts.set_failure_threshold(config.politeness.host_failure_threshold);
        for pool in state.registry.iter_mut() {
            pool.set_settings(settings);
        }

        tracing::info!("Task monitor reloaded, {} pools updated", state.registry.len());
    }

    /// Logs final reports and drops all pools
    pub fn close(&self) {
        let mut state = self.state();
        tracing::info!("Closing task monitor");

        let report = state.dump(TASK_REMAINDER_NUMBER, false);
        tracing::info!("{}", report);

        let gone: Vec<&String> = state.hosts.gone_hosts().collect();
        if !gone.is_empty() {
            tracing::info!("Gone hosts: {:?}", gone);
        }

        state.registry.clear();
        state.cost_index.clear();
        state.costs.clear();
        state.recompute();
    }
}

impl MonitorState {
    fn produce(&mut self, task: FetchTask) -> bool {
        if self.hosts.is_gone(&task.host) || self.hosts.is_url_gone(task.url_str()) {
            tracing::warn!("Ignoring unreachable url {}", task.url);
            return false;
        }

        let id = task.pool_id();
        let settings = self.settings;
        let pool = self
            .registry
            .find_or_create_active(&id, || FetchPool::new(id.clone(), settings));

        if !pool.produce(task) {
            return false;
        }

        self.counts.ready += 1;
        // New work starts out fast so the pool is not judged slow right away
        self.set_cost(&id, 0);
        true
    }

    fn is_consumable(&self, pool: &FetchPool) -> bool {
        pool.is_active() && pool.has_ready_tasks() && self.hosts.is_reachable(pool.host())
    }

    fn consume(&mut self, pool_id: Option<&PoolId>, now: Instant) -> Option<FetchTask> {
        if self.registry.is_empty() {
            return None;
        }

        let Some(top) = self.registry.peek_top_priority().map(|id| id.priority) else {
            self.maintain();
            return None;
        };

        // Drain barrier: nothing below the highest in-flight priority starts
        let floor = self.registry.max_pending_priority();
        if let Some(floor) = floor {
            if top < floor {
                return None;
            }
        }
        let floor = floor.unwrap_or(i32::MIN);

        let candidates: Vec<PoolId> = match pool_id {
            Some(id) => self
                .registry
                .find(id)
                .filter(|p| p.priority() >= floor && self.is_consumable(p))
                .map(|p| vec![p.id().clone()])
                .unwrap_or_default(),
            None => self
                .registry
                .iter()
                .take_while(|p| p.priority() >= floor)
                .filter(|p| self.is_consumable(p))
                .map(|p| p.id().clone())
                .collect(),
        };

        if candidates.is_empty() {
            self.maintain();
            return None;
        }

        for id in candidates {
            let Some(task) = self.registry.find_mut(&id).and_then(|p| p.consume(now)) else {
                continue;
            };

            self.counts.ready = self.counts.ready.saturating_sub(1);
            self.counts.pending += 1;

            if let Some(last) = self.last_priority {
                if task.priority < last {
                    tracing::info!("Fetch priority changed: {} -> {}", last, task.priority);
                }
            }
            self.last_priority = Some(task.priority);

            tracing::debug!("Dispatching {}", task);
            return Some(task);
        }

        None
    }

    fn finish(&mut self, pool_id: &PoolId, item_id: u64, asap: bool, now: Instant) -> bool {
        let registry_empty = self.registry.is_empty();
        let Some(pool) = self.registry.find_extended_mut(pool_id) else {
            tracing::warn!("Attempt to finish item #{} from unknown pool {}", item_id, pool_id);
            return false;
        };

        if !pool.finish(item_id, asap, now) {
            if !registry_empty {
                tracing::warn!("Attempt to finish unknown item #{} in pool {}", item_id, pool_id);
            }
            return false;
        }

        let cost_ms = (pool.average_recent_time_cost() * 1000.0).round() as u64;

        self.counts.pending = self.counts.pending.saturating_sub(1);
        self.counts.finished += 1;
        self.set_cost(pool_id, cost_ms);

        true
    }

    fn maintain(&mut self) {
        let mut retired = false;

        for id in self.registry.ids() {
            let Some(pool) = self.registry.find_extended(&id) else {
                continue;
            };
            let last_status = pool.status();

            if self.hosts.is_gone(pool.host()) {
                if let Some(pool) = self.retire_pool(&id) {
                    tracing::info!(
                        "Pool {}: {} -> {}, ready {}, pending {}, finished {}",
                        id,
                        last_status,
                        pool.status(),
                        pool.ready_count(),
                        pool.pending_count(),
                        pool.finished_count()
                    );
                    retired = true;
                }
            } else if self.feeder_completed && pool.is_active() && !pool.has_tasks() {
                let finished = pool.finished_count();
                self.registry.disable(&id);
                tracing::info!(
                    "Pool {}: {} -> disabled, finished {}",
                    id,
                    last_status,
                    finished
                );
            }
        }

        if retired {
            self.recompute();
        }
    }

    fn retune(&mut self, force: bool, now: Instant) -> usize {
        let gone: Vec<PoolId> = self
            .registry
            .iter()
            .filter(|p| self.hosts.is_gone(p.host()))
            .map(|p| p.id().clone())
            .collect();

        for id in &gone {
            self.retire_pool(id);
        }

        if !gone.is_empty() {
            let ids: Vec<String> = gone.iter().map(|id| id.to_string()).collect();
            tracing::info!("Retired unavailable pools: {}", ids.join(", "));
        }

        let reclaimed = self
            .registry
            .iter_mut()
            .map(|p| p.retune(force, now))
            .sum();

        self.recompute();
        reclaimed
    }

    fn try_clear_slowest_queue(&mut self) -> usize {
        let Some(id) = self.pop_slowest() else {
            return 0;
        };
        let Some(pool) = self.registry.find_extended(&id) else {
            return 0;
        };

        if pool.average_throughput() >= self.min_page_throughput {
            tracing::info!(
                "Efficient queue {}: ready {}, pending {}, finished {}, slow {}, {:.2}s/p, {:.2}p/s",
                id,
                pool.ready_count(),
                pool.pending_count(),
                pool.finished_count(),
                pool.slow_task_count(),
                pool.average_time_cost(),
                pool.average_throughput()
            );
            return 0;
        }

        let Some(mut pool) = self.retire_pool(&id) else {
            return 0;
        };

        let lost = pool.clear_pending_tasks_if_few(MIN_PENDING_SLOW_TASKS);
        let deleted = pool.clear_ready_queue();

        tracing::info!(
            "Slowest queue {} retired: pending {}, finished {}, slow {}, {:.2}s/p, {:.2}p/s, deleted {}, lost {}",
            id,
            pool.pending_count(),
            pool.finished_count(),
            pool.slow_task_count(),
            pool.average_time_cost(),
            pool.average_throughput(),
            deleted,
            lost
        );

        self.recompute();
        deleted + lost
    }

    fn clear_ready_tasks(&mut self) -> usize {
        let mut count = 0;
        for pool in self.registry.iter_mut() {
            count += pool.clear_ready_queue();
        }

        tracing::info!("{}", self.cost_report(COST_REPORT_LIMIT));
        self.recompute();
        count
    }

    fn dump(&mut self, limit: usize, drop: bool) -> String {
        let mut report = String::new();
        let _ = writeln!(
            report,
            "Pools: {}, ready: {}, pending: {}, finished: {}",
            self.registry.len(),
            self.counts.ready,
            self.counts.pending,
            self.counts.finished
        );

        let verb = if drop { "Dropping" } else { "Remaining" };
        let _ = writeln!(report, "{} tasks:", verb);

        let mut listed = 0;
        for pool in self.registry.iter_mut() {
            if listed >= limit {
                break;
            }
            if !pool.has_tasks() {
                continue;
            }
            let _ = writeln!(report, "  {}", pool);

            let take = limit - listed;
            let tasks: Vec<FetchTask> = if drop {
                pool.drain_ready(take)
            } else {
                pool.ready_tasks().take(take).cloned().collect()
            };
            for task in tasks {
                listed += 1;
                let _ = writeln!(report, "  {:>3}. {}", listed, task.url);
            }
        }

        report.push_str(&self.cost_report(limit));

        if drop {
            self.recompute();
        }
        report
    }

    fn cost_report(&self, limit: usize) -> String {
        let mut pools: Vec<&FetchPool> = self.registry.iter().collect();
        pools.sort_by(|a, b| b.average_time_cost().total_cmp(&a.average_time_cost()));

        let mut report = String::from("Top slow pools:\n");
        for pool in pools.into_iter().take(limit) {
            let _ = writeln!(report, "{}", pool.cost_report());
        }
        report
    }

    /// Recomputes ready and pending counts from pool truth
    fn recompute(&mut self) {
        self.counts.ready = self.registry.ready_total();
        self.counts.pending = self.registry.pending_total();
    }

    fn retire_pool(&mut self, id: &PoolId) -> Option<FetchPool> {
        if let Some(cost) = self.costs.remove(id) {
            self.cost_index.remove(&(cost, id.clone()));
        }
        self.registry.retire(id)
    }

    fn set_cost(&mut self, id: &PoolId, cost_ms: u64) {
        if let Some(old) = self.costs.insert(id.clone(), cost_ms) {
            self.cost_index.remove(&(old, id.clone()));
        }
        self.cost_index.insert((cost_ms, id.clone()));
    }

    /// Removes and returns the costliest pool that is still registered
    fn pop_slowest(&mut self) -> Option<PoolId> {
        while let Some((_, id)) = self.cost_index.pop_last() {
            self.costs.remove(&id);
            if self.registry.find_extended(&id).is_some() {
                return Some(id);
            }
        }
        None
    }
}
