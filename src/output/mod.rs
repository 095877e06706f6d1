//! Output module for job reports and statistics
//!
//! This module handles:
//! - The periodic status line of a running job
//! - The summary of a finished job
//! - Page statistics read back from the store

pub mod stats;
mod status;

pub use stats::{load_statistics, print_statistics, CrawlStatistics};
pub use status::{kbits_per_sec, StatusLine};

use crate::fetch::JobReport;
use std::fmt::Write as _;

/// Formats the summary of a finished job
///
/// # Arguments
///
/// * `report` - The report returned by the orchestrator
///
/// # Returns
///
/// A multi-line, human-readable summary
pub fn format_job_report(report: &JobReport) -> String {
    let secs = report.elapsed.as_secs_f64();
    let pages_per_sec = if secs > 0.0 {
        report.pages as f64 / secs
    } else {
        0.0
    };

    let mut out = String::new();
    let _ = writeln!(out, "=== Fetch Job {} #{} ===", report.job_name, report.job_id);
    let _ = writeln!(out, "Ended: {} after {:.1}s", report.end_state, secs);
    let _ = writeln!(
        out,
        "Feeder: {} fed, {} rejected, {} skipped, {} discarded",
        report.feeder.fed, report.feeder.rejected, report.feeder.skipped, report.feeder.discarded
    );
    let _ = writeln!(
        out,
        "Fetched: {} pages, {} bytes, {} errors, {:.2} pages/s",
        report.pages, report.bytes, report.errors, pages_per_sec
    );
    let _ = writeln!(
        out,
        "Tasks: {} served, {} finished, {} ready and {} pending left",
        report.served(),
        report.counts.finished,
        report.counts.ready,
        report.counts.pending
    );

    for worker in &report.workers {
        let _ = writeln!(out, "  worker #{}: {} tasks", worker.worker_id, worker.served);
    }

    out
}
