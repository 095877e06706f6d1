//! Fetch tasks and the pool key they are partitioned by

use crate::url::parse_with_host;
use crate::UrlResult;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use url::Url;

/// Opaque reference to a page in the page store
pub type PageHandle = i64;

static NEXT_ITEM_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies a fetch pool: tasks share a pool iff their ids are equal
///
/// Pool ids sort with the highest priority first, then by protocol and host,
/// so iterating a sorted collection of pools visits the most urgent first.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolId {
    /// Larger is more urgent
    pub priority: i32,
    pub protocol: String,
    pub host: String,
}

impl PoolId {
    pub fn new(priority: i32, protocol: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            priority,
            protocol: protocol.into(),
            host: host.into(),
        }
    }
}

// Reverse comparison on priority so higher priorities come first
impl Ord for PoolId {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.protocol.cmp(&other.protocol))
            .then_with(|| self.host.cmp(&other.host))
    }
}

impl PartialOrd for PoolId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{} [{}]", self.protocol, self.host, self.priority)
    }
}

/// One unit of fetch work
#[derive(Debug, Clone)]
pub struct FetchTask {
    pub job_id: u32,

    /// Unique across the process, and therefore within any pool
    pub item_id: u64,

    pub url: Url,

    /// Lowercase host of `url`
    pub host: String,

    /// URL scheme, e.g. `http`
    pub protocol: String,

    /// Larger is more urgent; never changes after creation
    pub priority: i32,

    pub page: PageHandle,

    pub created_at: DateTime<Utc>,
}

impl FetchTask {
    /// Creates a task for a URL
    ///
    /// # Arguments
    ///
    /// * `job_id` - The job this task belongs to
    /// * `priority` - Scheduling priority, larger is more urgent
    /// * `url` - The URL to fetch
    /// * `page` - Handle of the page record in the store
    ///
    /// # Returns
    ///
    /// * `Ok(FetchTask)` - A task with a fresh item id
    /// * `Err(UrlError)` - The URL is malformed or has no host
    pub fn new(job_id: u32, priority: i32, url: &str, page: PageHandle) -> UrlResult<Self> {
        let (url, host) = parse_with_host(url)?;
        let protocol = url.scheme().to_string();

        Ok(Self {
            job_id,
            item_id: NEXT_ITEM_ID.fetch_add(1, AtomicOrdering::Relaxed),
            url,
            host,
            protocol,
            priority,
            page,
            created_at: Utc::now(),
        })
    }

    /// Returns the id of the pool this task belongs to
    pub fn pool_id(&self) -> PoolId {
        PoolId::new(self.priority, self.protocol.clone(), self.host.clone())
    }

    pub fn url_str(&self) -> &str {
        self.url.as_str()
    }
}

impl fmt::Display for FetchTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {} [{}]", self.item_id, self.url, self.priority)
    }
}
