//! SQLite page store
//!
//! This module provides a SQLite-based implementation of the PageStore trait.

use crate::state::CrawlStatus;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{PageStore, StorageError, StorageResult};
use crate::storage::{FetchUpdate, PageRecord};
use crate::TidepoolError;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;

const PAGE_COLUMNS: &str = "id, url, host, crawl_status, priority, retry_count, repr_url,
     status_code, content_type, content_length, fetch_time, created_at";

/// SQLite page store backend
pub struct SqlitePageStore {
    conn: Connection,
}

impl SqlitePageStore {
    /// Opens or creates a page store
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqlitePageStore)` - Successfully opened/created database
    /// * `Err(TidepoolError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, TidepoolError> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA mmap_size = 268435456;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory store, used by dry runs and tests
    pub fn new_in_memory() -> Result<Self, TidepoolError> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    fn page_from_row(row: &Row<'_>) -> rusqlite::Result<PageRecord> {
        Ok(PageRecord {
            id: row.get(0)?,
            url: row.get(1)?,
            host: row.get(2)?,
            crawl_status: CrawlStatus::from_db_string(&row.get::<_, String>(3)?)
                .unwrap_or(CrawlStatus::Unfetched),
            priority: row.get(4)?,
            retry_count: row.get(5)?,
            repr_url: row.get(6)?,
            status_code: row.get(7)?,
            content_type: row.get(8)?,
            content_length: row.get(9)?,
            fetch_time: row.get(10)?,
            created_at: row.get(11)?,
        })
    }

    /// Reads back the stored content of a page
    pub fn get_content(&self, page_id: i64) -> StorageResult<Option<Vec<u8>>> {
        let content: Option<Option<Vec<u8>>> = self
            .conn
            .query_row(
                "SELECT content FROM pages WHERE id = ?1",
                params![page_id],
                |row| row.get(0),
            )
            .optional()?;

        content.ok_or(StorageError::PageNotFound(page_id))
    }
}

impl PageStore for SqlitePageStore {
    // ===== Run Management =====

    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![now, config_hash, "running"],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn complete_run(&mut self, run_id: i64, status: &str) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let updated = self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status, now, run_id],
        )?;

        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    // ===== Page Management =====

    fn insert_or_get_page(&mut self, url: &str, host: &str, priority: i32) -> StorageResult<i64> {
        let existing: Option<i64> = self
            .conn
            .query_row("SELECT id FROM pages WHERE url = ?1", params![url], |row| {
                row.get(0)
            })
            .optional()?;

        if let Some(id) = existing {
            return Ok(id);
        }

        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO pages (url, host, crawl_status, priority, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![url, host, CrawlStatus::Unfetched.to_db_string(), priority, now],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    fn get_page(&self, page_id: i64) -> StorageResult<PageRecord> {
        let sql = format!("SELECT {} FROM pages WHERE id = ?1", PAGE_COLUMNS);
        self.conn
            .query_row(&sql, params![page_id], Self::page_from_row)
            .optional()?
            .ok_or(StorageError::PageNotFound(page_id))
    }

    fn update_fetch_result(&mut self, page_id: i64, update: &FetchUpdate) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let retry_increment = i64::from(update.status == CrawlStatus::Retry);
        let content_length = update.content_length.map(|n| n as i64);

        let updated = self.conn.execute(
            "UPDATE pages SET crawl_status = ?1, status_code = ?2, content_type = ?3,
             content_length = ?4, content = ?5, fetch_time = ?6,
             retry_count = retry_count + ?7 WHERE id = ?8",
            params![
                update.status.to_db_string(),
                update.status_code,
                update.content_type,
                content_length,
                update.content,
                now,
                retry_increment,
                page_id
            ],
        )?;

        if updated == 0 {
            return Err(StorageError::PageNotFound(page_id));
        }
        Ok(())
    }

    fn set_repr_url(&mut self, page_id: i64, repr_url: &str) -> StorageResult<()> {
        let updated = self.conn.execute(
            "UPDATE pages SET repr_url = ?1 WHERE id = ?2",
            params![repr_url, page_id],
        )?;

        if updated == 0 {
            return Err(StorageError::PageNotFound(page_id));
        }
        Ok(())
    }

    fn fetchable_pages(&self, max_retries: u32) -> StorageResult<Vec<PageRecord>> {
        let sql = format!(
            "SELECT {} FROM pages
             WHERE crawl_status = ?1 OR (crawl_status = ?2 AND retry_count <= ?3)
             ORDER BY priority DESC, id ASC",
            PAGE_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;

        let pages = stmt
            .query_map(
                params![
                    CrawlStatus::Unfetched.to_db_string(),
                    CrawlStatus::Retry.to_db_string(),
                    max_retries
                ],
                Self::page_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(pages)
    }

    // ===== Statistics =====

    fn count_by_status(&self) -> StorageResult<HashMap<CrawlStatus, u64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT crawl_status, COUNT(*) FROM pages GROUP BY crawl_status")?;

        let rows = stmt.query_map([], |row| {
            let status: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok((status, count))
        })?;

        let mut summary = HashMap::new();
        for row in rows {
            let (status, count) = row?;
            if let Some(status) = CrawlStatus::from_db_string(&status) {
                summary.insert(status, count as u64);
            }
        }

        Ok(summary)
    }

    fn count_total_pages(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM pages", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}
