//! Page store trait and error types

use crate::state::CrawlStatus;
use crate::storage::{FetchUpdate, PageRecord};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Page not found: {0}")]
    PageNotFound(i64),

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Persistence for pages and their fetch results
///
/// The fetch engine only reads and writes what it needs to schedule and
/// record fetches; content parsing and indexing live elsewhere.
pub trait PageStore {
    // ===== Run Management =====

    /// Creates a new job run and returns its id
    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64>;

    /// Marks a run finished with a final status string
    fn complete_run(&mut self, run_id: i64, status: &str) -> StorageResult<()>;

    // ===== Page Management =====

    /// Inserts a new page or gets the existing page id
    ///
    /// # Arguments
    ///
    /// * `url` - The page URL
    /// * `host` - The host extracted from the URL
    /// * `priority` - Fetch priority, larger is more urgent
    ///
    /// # Returns
    ///
    /// The page id (either newly created or existing)
    fn insert_or_get_page(&mut self, url: &str, host: &str, priority: i32) -> StorageResult<i64>;

    /// Gets a page by id
    fn get_page(&self, page_id: i64) -> StorageResult<PageRecord>;

    /// Records the outcome of a fetch
    ///
    /// A `Retry` outcome also increments the page's retry count.
    fn update_fetch_result(&mut self, page_id: i64, update: &FetchUpdate) -> StorageResult<()>;

    /// Records the representative URL of a redirected page
    fn set_repr_url(&mut self, page_id: i64, repr_url: &str) -> StorageResult<()>;

    /// Pages still to fetch: unfetched, or retried at most `max_retries` times
    ///
    /// Highest priority first, then in insertion order.
    fn fetchable_pages(&self, max_retries: u32) -> StorageResult<Vec<PageRecord>>;

    // ===== Statistics =====

    fn count_by_status(&self) -> StorageResult<HashMap<CrawlStatus, u64>>;

    fn count_total_pages(&self) -> StorageResult<u64>;
}
