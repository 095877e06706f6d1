//! Storage module for persisting pages and fetch results
//!
//! This module handles all database operations for the fetch engine:
//! - SQLite database initialization and schema management
//! - Page records and their crawl status
//! - Fetch outcomes (status code, content, fetch time, retry count)
//! - Job run tracking

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqlitePageStore;
pub use traits::{PageStore, StorageError, StorageResult};

use crate::state::CrawlStatus;
use crate::TidepoolError;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// A page store shared between the feeder, workers and the orchestrator
pub type SharedStore = Arc<Mutex<dyn PageStore + Send>>;

/// Opens or creates the SQLite page store
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqlitePageStore)` - Successfully opened store
/// * `Err(TidepoolError)` - Failed to open or initialize the database
pub fn open_store(path: &Path) -> Result<SqlitePageStore, TidepoolError> {
    SqlitePageStore::new(path)
}

/// Wraps a store for sharing across tasks
pub fn share<S: PageStore + Send + 'static>(store: S) -> SharedStore {
    Arc::new(Mutex::new(store))
}

/// Represents a page in the store
#[derive(Debug, Clone)]
pub struct PageRecord {
    pub id: i64,
    pub url: String,
    pub host: String,
    pub crawl_status: CrawlStatus,
    pub priority: i32,
    pub retry_count: u32,
    pub repr_url: Option<String>,
    pub status_code: Option<u16>,
    pub content_type: Option<String>,
    pub content_length: Option<i64>,
    pub fetch_time: Option<String>,
    pub created_at: String,
}

/// The outcome of one fetch, as written back to a page
#[derive(Debug, Clone, PartialEq)]
pub struct FetchUpdate {
    pub status: CrawlStatus,
    pub status_code: Option<u16>,
    pub content_type: Option<String>,
    pub content_length: Option<usize>,
    pub content: Option<Vec<u8>>,
}

impl FetchUpdate {
    /// An update carrying only a crawl status
    pub fn status(status: CrawlStatus) -> Self {
        Self {
            status,
            status_code: None,
            content_type: None,
            content_length: None,
            content: None,
        }
    }
}
