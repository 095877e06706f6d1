//! Upstream task sources feeding the fetch engine
//!
//! A source yields `(url, page, priority)` entries in batches. The feeder pulls
//! from it until it is exhausted, the job is halted, or the job deadline passes.

use crate::fetch::PageHandle;
use crate::storage::SharedStore;
use crate::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::PoisonError;

/// One URL to fetch, with its page in the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub url: String,
    pub page: PageHandle,
    pub priority: i32,
}

impl SourceEntry {
    pub fn new(url: impl Into<String>, page: PageHandle, priority: i32) -> Self {
        Self {
            url: url.into(),
            page,
            priority,
        }
    }
}

/// Supplies batches of entries to the feeder
#[async_trait]
pub trait TaskSource: Send {
    /// Returns up to `n` entries; fewer only when the source runs out
    async fn next_batch(&mut self, n: usize) -> Result<Vec<SourceEntry>>;

    fn has_more(&self) -> bool;

    /// Discards every remaining entry and returns how many there were
    async fn drain(&mut self) -> Result<usize>;
}

/// In-memory source, mostly for tests and seed lists
#[derive(Debug, Default)]
pub struct VecSource {
    entries: VecDeque<SourceEntry>,
}

impl VecSource {
    pub fn new(entries: Vec<SourceEntry>) -> Self {
        Self {
            entries: entries.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl TaskSource for VecSource {
    async fn next_batch(&mut self, n: usize) -> Result<Vec<SourceEntry>> {
        let n = n.min(self.entries.len());
        Ok(self.entries.drain(..n).collect())
    }

    fn has_more(&self) -> bool {
        !self.entries.is_empty()
    }

    async fn drain(&mut self) -> Result<usize> {
        let remaining = self.entries.len();
        self.entries.clear();
        Ok(remaining)
    }
}

/// Source over the pages of a store that still need fetching
///
/// The fetchable pages are read once, highest priority first, when the
/// source is opened.
#[derive(Debug)]
pub struct StoreSource {
    inner: VecSource,
}

impl StoreSource {
    /// Reads the fetchable pages of a store
    ///
    /// # Arguments
    ///
    /// * `store` - The page store
    /// * `max_retries` - Pages retried more often than this are skipped
    pub fn open(store: &SharedStore, max_retries: u32) -> Result<Self> {
        let pages = store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .fetchable_pages(max_retries)?;

        let entries = pages
            .into_iter()
            .map(|page| SourceEntry::new(page.url, page.id, page.priority))
            .collect();

        let inner = VecSource::new(entries);
        tracing::info!("Opened store source with {} fetchable pages", inner.len());
        Ok(Self { inner })
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[async_trait]
impl TaskSource for StoreSource {
    async fn next_batch(&mut self, n: usize) -> Result<Vec<SourceEntry>> {
        self.inner.next_batch(n).await
    }

    fn has_more(&self) -> bool {
        self.inner.has_more()
    }

    async fn drain(&mut self) -> Result<usize> {
        self.inner.drain().await
    }
}
