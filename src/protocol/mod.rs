//! Protocol layer: how a task's URL is actually fetched
//!
//! The scheduler never looks at HTTP directly. A [`Protocol`] turns a task into
//! a [`ProtocolOutput`] whose [`ProtocolStatus`] decides the page's next crawl
//! status and whether the host or URL is tracked as failing.

mod http;

pub use http::HttpProtocol;

use crate::fetch::FetchTask;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;

/// Classified outcome of a fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolStatus {
    Success,
    NotModified,

    /// Permanent redirect
    Moved,

    /// Temporary redirect
    TempMoved,

    Timeout,
    UnknownHost,

    /// The server is throttling us
    Blocked,

    /// Transient server-side failure
    Retry,

    /// The fetch failed locally (body read, decoding, ...)
    Exception,

    Gone,
    NotFound,
    AccessDenied,
    RobotsDenied,

    /// Any status code without a dedicated variant
    Other(u16),
}

impl ProtocolStatus {
    pub fn is_redirect(&self) -> bool {
        matches!(self, ProtocolStatus::Moved | ProtocolStatus::TempMoved)
    }

    /// Failures that count against the host rather than the URL
    pub fn is_host_failure(&self) -> bool {
        matches!(self, ProtocolStatus::Timeout | ProtocolStatus::UnknownHost)
    }
}

impl fmt::Display for ProtocolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolStatus::Other(code) => write!(f, "other({})", code),
            status => write!(f, "{}", format!("{:?}", status).to_lowercase()),
        }
    }
}

/// Everything a protocol reports back about one fetch
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolOutput {
    pub status: ProtocolStatus,
    pub status_code: Option<u16>,

    /// Response headers, lowercase names
    pub headers: BTreeMap<String, String>,

    /// Absolute redirect target for `Moved`/`TempMoved`
    pub location: Option<String>,

    pub content: Option<Vec<u8>>,
}

impl ProtocolOutput {
    /// An output carrying only a status
    pub fn status(status: ProtocolStatus) -> Self {
        Self {
            status,
            status_code: None,
            headers: BTreeMap::new(),
            location: None,
            content: None,
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type").map(String::as_str)
    }

    pub fn content_length(&self) -> usize {
        self.content.as_ref().map_or(0, Vec::len)
    }
}

/// Fetches the content of a task's URL
#[async_trait]
pub trait Protocol: Send + Sync {
    /// Fetches one task
    ///
    /// Failures are reported through the output's status, never as errors.
    async fn fetch(&self, task: &FetchTask) -> ProtocolOutput;
}
