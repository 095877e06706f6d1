/// Crawl status definitions for pages in the store
///
/// A page enters as `Unfetched`, and each fetch outcome moves it to one of the
/// other states. `Retry` pages are fed again until they exceed the retry budget.
use std::fmt;

/// Represents the crawl status of a page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrawlStatus {
    /// Page is known but has never been fetched
    Unfetched,

    /// Page was fetched successfully
    Fetched,

    /// Server reported the page unchanged since the last fetch
    NotModified,

    /// Page permanently redirects elsewhere
    RedirPerm,

    /// Page temporarily redirects elsewhere
    RedirTemp,

    /// Fetch failed transiently and should be tried again
    Retry,

    /// Page is gone for good (404, 410, denied, ...)
    Gone,
}

impl CrawlStatus {
    /// Returns true if the page may be handed to the feeder again
    pub fn is_fetchable(&self) -> bool {
        matches!(self, Self::Unfetched | Self::Retry)
    }

    /// Returns true if this represents a successful fetch
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Fetched | Self::NotModified)
    }

    /// Returns true if this is a redirect status
    pub fn is_redirect(&self) -> bool {
        matches!(self, Self::RedirPerm | Self::RedirTemp)
    }

    /// Converts the status to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Unfetched => "unfetched",
            Self::Fetched => "fetched",
            Self::NotModified => "not_modified",
            Self::RedirPerm => "redir_perm",
            Self::RedirTemp => "redir_temp",
            Self::Retry => "retry",
            Self::Gone => "gone",
        }
    }

    /// Parses a status from its database string representation
    ///
    /// Returns None if the string doesn't match any known status.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "unfetched" => Some(Self::Unfetched),
            "fetched" => Some(Self::Fetched),
            "not_modified" => Some(Self::NotModified),
            "redir_perm" => Some(Self::RedirPerm),
            "redir_temp" => Some(Self::RedirTemp),
            "retry" => Some(Self::Retry),
            "gone" => Some(Self::Gone),
            _ => None,
        }
    }

    /// Returns all crawl statuses
    pub fn all_states() -> Vec<Self> {
        vec![
            Self::Unfetched,
            Self::Fetched,
            Self::NotModified,
            Self::RedirPerm,
            Self::RedirTemp,
            Self::Retry,
            Self::Gone,
        ]
    }
}

impl fmt::Display for CrawlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
