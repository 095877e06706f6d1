//! Registration of the feeder and workers of a running job

use crate::fetch::monitor::TaskMonitor;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Which of a job's tasks are still alive, and what the workers are doing
#[derive(Debug, Default)]
pub struct JobLiveness {
    feeder_alive: AtomicBool,
    active_workers: AtomicUsize,
    idle_workers: AtomicUsize,

    // worker id -> (url, dispatch time) of the fetch in progress
    busy: Mutex<BTreeMap<usize, (String, Instant)>>,
}

impl JobLiveness {
    pub fn new() -> Self {
        Self::default()
    }

    fn busy(&self) -> MutexGuard<'_, BTreeMap<usize, (String, Instant)>> {
        self.busy.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register_feeder(&self) {
        self.feeder_alive.store(true, Ordering::SeqCst);
    }

    pub fn unregister_feeder(&self) {
        self.feeder_alive.store(false, Ordering::SeqCst);
    }

    pub fn is_feeder_alive(&self) -> bool {
        self.feeder_alive.load(Ordering::SeqCst)
    }

    pub fn register_worker(&self) {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
    }

    pub fn unregister_worker(&self, worker_id: usize) {
        self.active_workers.fetch_sub(1, Ordering::SeqCst);
        self.busy().remove(&worker_id);
    }

    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::SeqCst)
    }

    pub fn register_idle(&self) {
        self.idle_workers.fetch_add(1, Ordering::SeqCst);
    }

    pub fn unregister_idle(&self) {
        self.idle_workers.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn idle_workers(&self) -> usize {
        self.idle_workers.load(Ordering::SeqCst)
    }

    pub fn set_busy(&self, worker_id: usize, url: &str) {
        self.busy().insert(worker_id, (url.to_string(), Instant::now()));
    }

    pub fn clear_busy(&self, worker_id: usize) {
        self.busy().remove(&worker_id);
    }

    /// The feed is exhausted and every admitted task has finished
    pub fn is_mission_complete(&self, monitor: &TaskMonitor) -> bool {
        !self.is_feeder_alive() && monitor.counts().remaining() == 0
    }

    /// Lists the workers and the fetches they are stuck in
    pub fn dump_workers(&self) -> String {
        let mut report = format!(
            "Fetch workers: active {}, idle {}",
            self.active_workers(),
            self.idle_workers()
        );

        for (worker_id, (url, since)) in self.busy().iter() {
            report.push_str(&format!(
                "\n  worker #{} fetching {} for {:?}",
                worker_id,
                url,
                since.elapsed()
            ));
        }

        report
    }
}
