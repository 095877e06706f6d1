//! State module for tracking fetch progress
//!
//! # Components
//!
//! - `CrawlStatus`: Lifecycle status of a page in the store (unfetched, fetched, retry, gone, ...)
//! - `HostTracker`: Per-host liveness, deciding when a host is unreachable for the rest of the job

mod crawl_status;
mod host_tracker;

// Re-export main types
pub use crawl_status::CrawlStatus;
pub use host_tracker::HostTracker;
