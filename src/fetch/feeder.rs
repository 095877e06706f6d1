//! Feeder: moves entries from the task source into the monitor
//!
//! The batch size adapts to how full the ready queues are: it grows while the
//! workers are starving, shrinks when the queues are comfortably full and
//! pauses when they are oversupplied.

use crate::fetch::liveness::JobLiveness;
use crate::fetch::monitor::TaskMonitor;
use crate::fetch::task::FetchTask;
use crate::source::TaskSource;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Dependencies of a feeder run
pub struct FeederContext {
    pub job_id: u32,
    pub monitor: Arc<TaskMonitor>,
    pub liveness: Arc<JobLiveness>,
    pub worker_count: usize,
    pub deadline: Instant,
    pub idle_sleep: Duration,
    pub halt: CancellationToken,
}

/// What a feeder run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeederReport {
    /// Tasks admitted into the monitor
    pub fed: usize,

    /// Tasks refused because their host or URL is gone
    pub rejected: usize,

    /// Entries with an unusable URL
    pub skipped: usize,

    /// Entries left in the source when the feeder stopped
    pub discarded: usize,
}

/// Computes the next batch size from the current one and the ready count
pub fn next_batch_size(current: usize, ready: usize, workers: usize) -> usize {
    let current = current.max(1);

    if ready <= workers {
        (current as f64 * 1.2).floor() as usize
    } else if ready <= 2 * workers {
        (current as f64 * 0.8).floor() as usize
    } else {
        0
    }
}

/// Feeds the monitor until the source runs out, the job halts or the deadline passes
///
/// On exit the rest of the source is discarded and the monitor is told the
/// feed is complete, which lets it disable drained pools.
pub async fn run_feeder(ctx: FeederContext, mut source: Box<dyn TaskSource>) -> FeederReport {
    let mut report = FeederReport::default();
    let mut batch_size = ctx.worker_count.max(1);

    tracing::info!("Feeder started, initial batch size {}", batch_size);

    loop {
        if ctx.halt.is_cancelled() {
            tracing::info!("Feeder halted");
            break;
        }

        if Instant::now() >= ctx.deadline {
            tracing::info!("Feeder hit the job deadline");
            break;
        }

        if !source.has_more() {
            tracing::info!("Task source exhausted");
            break;
        }

        if batch_size > 0 {
            let entries = match source.next_batch(batch_size).await {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::error!("Failed to read from task source: {}", e);
                    break;
                }
            };

            for entry in entries {
                match FetchTask::new(ctx.job_id, entry.priority, &entry.url, entry.page) {
                    Ok(task) => {
                        if ctx.monitor.produce(task) {
                            report.fed += 1;
                        } else {
                            report.rejected += 1;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Skipping {}: {}", entry.url, e);
                        report.skipped += 1;
                    }
                }
            }
        }

        let ready = ctx.monitor.counts().ready;
        batch_size = next_batch_size(batch_size, ready, ctx.worker_count);

        if batch_size == 0 {
            tokio::select! {
                _ = ctx.halt.cancelled() => {}
                _ = tokio::time::sleep(ctx.idle_sleep) => {}
            }
        } else {
            tokio::task::yield_now().await;
        }
    }

    match source.drain().await {
        Ok(0) => {}
        Ok(n) => {
            report.discarded = n;
            tracing::info!("Discarded {} unfed source entries", n);
        }
        Err(e) => tracing::warn!("Failed to drain task source: {}", e),
    }

    ctx.monitor.set_feeder_completed();
    ctx.liveness.unregister_feeder();

    tracing::info!(
        "Feeder finished: {} fed, {} rejected, {} skipped",
        report.fed,
        report.rejected,
        report.skipped
    );

    report
}
