//! Fetch worker loop

use crate::fetch::liveness::JobLiveness;
use crate::fetch::scheduler::TaskScheduler;
use crate::fetch::task::PoolId;
use crate::protocol::Protocol;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Dependencies of one worker
pub struct WorkerContext {
    pub worker_id: usize,
    pub scheduler: Arc<TaskScheduler>,
    pub protocol: Arc<dyn Protocol>,
    pub liveness: Arc<JobLiveness>,
    pub idle_sleep: Duration,

    /// Stops the loop between tasks
    pub halt: CancellationToken,

    /// Interrupts a fetch in progress
    pub abort: CancellationToken,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub worker_id: usize,
    pub served: usize,
}

/// Fetches tasks until the job halts or the mission is complete
///
/// A worker stays on the pool it last served while that pool has work, and
/// falls back to the highest-priority pool otherwise.
pub async fn run_worker(ctx: WorkerContext) -> WorkerReport {
    let monitor = ctx.scheduler.monitor().clone();
    let mut served = 0;
    let mut pinned: Option<PoolId> = None;

    ctx.liveness.register_worker();
    tracing::debug!("Worker #{} started", ctx.worker_id);

    loop {
        if ctx.halt.is_cancelled() || ctx.liveness.is_mission_complete(&monitor) {
            break;
        }

        let mut tasks = ctx.scheduler.schedule(pinned.as_ref(), 1);
        if tasks.is_empty() && pinned.take().is_some() {
            tasks = ctx.scheduler.schedule(None, 1);
        }

        let Some(task) = tasks.pop() else {
            ctx.liveness.register_idle();
            tokio::select! {
                _ = ctx.halt.cancelled() => {}
                _ = tokio::time::sleep(ctx.idle_sleep) => {}
            }
            ctx.liveness.unregister_idle();
            continue;
        };

        pinned = Some(task.pool_id());
        ctx.liveness.set_busy(ctx.worker_id, task.url_str());

        let output = tokio::select! {
            _ = ctx.abort.cancelled() => None,
            output = ctx.protocol.fetch(&task) => Some(output),
        };

        ctx.liveness.clear_busy(ctx.worker_id);

        match output {
            Some(output) => {
                ctx.scheduler.finish(ctx.worker_id, &task, output);
                served += 1;
            }
            None => {
                tracing::info!("Worker #{} aborted while fetching {}", ctx.worker_id, task.url);
                ctx.scheduler.finish_unchecked(&task);
                break;
            }
        }
    }

    ctx.liveness.unregister_worker(ctx.worker_id);
    tracing::debug!("Worker #{} exits after {} tasks", ctx.worker_id, served);

    WorkerReport {
        worker_id: ctx.worker_id,
        served,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FetchConfig;
    use crate::fetch::{FetchTask, TaskMonitor};
    use crate::protocol::{ProtocolOutput, ProtocolStatus};
    use crate::storage::{share, PageStore, SqlitePageStore};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct RecordingProtocol {
        delay: Duration,
        fetched: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Protocol for RecordingProtocol {
        async fn fetch(&self, task: &FetchTask) -> ProtocolOutput {
            tokio::time::sleep(self.delay).await;
            self.fetched.lock().unwrap().push(task.url.to_string());
            let mut output = ProtocolOutput::status(ProtocolStatus::Success);
            output.content = Some(b"ok".to_vec());
            output
        }
    }

    fn setup(urls: &[&str]) -> (Arc<TaskScheduler>, Arc<JobLiveness>) {
        let mut config = FetchConfig::default();
        config.politeness.crawl_delay_ms = 0;
        config.fetch.pool_threads = 10;

        let mut store = SqlitePageStore::new_in_memory().unwrap();
        let monitor = Arc::new(TaskMonitor::new(&config));
        for url in urls {
            let page = store.insert_or_get_page(url, "", 0).unwrap();
            monitor.produce(FetchTask::new(1, 0, url, page).unwrap());
        }
        monitor.set_feeder_completed();

        let scheduler = Arc::new(TaskScheduler::new(monitor, share(store), &config));
        (scheduler, Arc::new(JobLiveness::new()))
    }

    fn context(
        scheduler: Arc<TaskScheduler>,
        liveness: Arc<JobLiveness>,
        protocol: Arc<RecordingProtocol>,
    ) -> WorkerContext {
        WorkerContext {
            worker_id: 0,
            scheduler,
            protocol,
            liveness,
            idle_sleep: Duration::from_millis(10),
            halt: CancellationToken::new(),
            abort: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn test_worker_serves_until_mission_complete() {
        let (scheduler, liveness) = setup(&["http://a.com/1", "http://a.com/2", "http://b.com/1"]);
        let protocol = Arc::new(RecordingProtocol {
            delay: Duration::ZERO,
            fetched: Mutex::new(Vec::new()),
        });

        let report = run_worker(context(scheduler.clone(), liveness.clone(), protocol.clone())).await;

        assert_eq!(report.served, 3);
        assert_eq!(scheduler.total_pages(), 3);
        assert_eq!(scheduler.monitor().counts().finished, 3);
        assert_eq!(liveness.active_workers(), 0);
        assert_eq!(protocol.fetched.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_halted_worker_exits() {
        let (scheduler, liveness) = setup(&["http://a.com/1"]);
        let protocol = Arc::new(RecordingProtocol {
            delay: Duration::ZERO,
            fetched: Mutex::new(Vec::new()),
        });

        let ctx = context(scheduler.clone(), liveness, protocol);
        ctx.halt.cancel();
        let report = run_worker(ctx).await;

        assert_eq!(report.served, 0);
        assert_eq!(scheduler.monitor().counts().ready, 1);
    }

    #[tokio::test]
    async fn test_abort_releases_slot() {
        let (scheduler, liveness) = setup(&["http://a.com/slow"]);
        let protocol = Arc::new(RecordingProtocol {
            delay: Duration::from_secs(60),
            fetched: Mutex::new(Vec::new()),
        });

        let ctx = context(scheduler.clone(), liveness, protocol);
        let abort = ctx.abort.clone();
        let handle = tokio::spawn(run_worker(ctx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(scheduler.monitor().counts().pending, 1);

        abort.cancel();
        let report = handle.await.unwrap();

        assert_eq!(report.served, 0);
        let counts = scheduler.monitor().counts();
        assert_eq!(counts.pending, 0);
        assert_eq!(counts.finished, 1);
    }
}
