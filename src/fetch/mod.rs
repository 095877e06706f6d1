//! The fetch scheduling core
//!
//! Tasks flow through this module as follows:
//! - The feeder pulls entries from a [`TaskSource`](crate::source::TaskSource)
//!   and admits them into the [`TaskMonitor`], which groups them into one
//!   [`FetchPool`] per priority, protocol and host
//! - Workers ask the [`TaskScheduler`] for work; the monitor dispatches under
//!   the priority drain barrier and per-host politeness
//! - Fetch outcomes come back through the scheduler, which frees the slot and
//!   records the result in the page store
//! - The [`FetchOrchestrator`] supervises the job and decides when it ends

mod feeder;
mod liveness;
mod monitor;
mod orchestrator;
mod pool;
mod registry;
mod scheduler;
mod task;
mod worker;

pub use feeder::{next_batch_size, run_feeder, FeederContext, FeederReport};
pub use liveness::JobLiveness;
pub use monitor::{TaskCounts, TaskMonitor, TASK_REMAINDER_NUMBER};
pub use orchestrator::{FetchOrchestrator, JobReport, JobState};
pub use pool::{FetchPool, PendingTask, PoolSettings, PoolStatus};
pub use registry::PoolRegistry;
pub use scheduler::{TaskScheduler, ThroughputStatus};
pub use task::{FetchTask, PageHandle, PoolId};
pub use worker::{run_worker, WorkerContext, WorkerReport};
