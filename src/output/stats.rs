//! Statistics from the page store
//!
//! This module provides functionality for extracting and displaying
//! crawl status counts from the storage layer.

use crate::state::CrawlStatus;
use crate::storage::PageStore;
use crate::TidepoolError;
use std::collections::HashMap;

/// Page counts by crawl status
#[derive(Debug, Clone)]
pub struct CrawlStatistics {
    /// Total number of pages in the store
    pub total_pages: u64,

    /// Count of pages by crawl status
    pub pages_by_status: HashMap<CrawlStatus, u64>,
}

impl CrawlStatistics {
    pub fn count(&self, status: CrawlStatus) -> u64 {
        self.pages_by_status.get(&status).copied().unwrap_or(0)
    }

    /// Pages that are still unfetched or waiting for a retry
    pub fn fetchable(&self) -> u64 {
        self.pages_by_status
            .iter()
            .filter(|(status, _)| status.is_fetchable())
            .map(|(_, count)| count)
            .sum()
    }

    /// Share of pages fetched successfully, in percent
    pub fn success_rate(&self) -> f64 {
        if self.total_pages == 0 {
            return 0.0;
        }

        let succeeded: u64 = self
            .pages_by_status
            .iter()
            .filter(|(status, _)| status.is_success())
            .map(|(_, count)| count)
            .sum();
        succeeded as f64 / self.total_pages as f64 * 100.0
    }
}

/// Loads statistics from a page store
///
/// # Arguments
///
/// * `store` - The page store to query
///
/// # Returns
///
/// * `Ok(CrawlStatistics)` - Successfully loaded statistics
/// * `Err(TidepoolError)` - Failed to query the store
pub fn load_statistics(store: &dyn PageStore) -> Result<CrawlStatistics, TidepoolError> {
    Ok(CrawlStatistics {
        total_pages: store.count_total_pages()?,
        pages_by_status: store.count_by_status()?,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &CrawlStatistics) {
    println!("=== Page Statistics ===\n");
    println!("Total pages: {}", stats.total_pages);
    println!();

    println!("Pages by Status:");
    for status in CrawlStatus::all_states() {
        let count = stats.count(status);
        if count == 0 {
            continue;
        }

        let percentage = count as f64 / stats.total_pages as f64 * 100.0;
        println!("  {}: {} ({:.1}%)", status, count, percentage);
    }
    println!();

    println!(
        "Success Rate: {:.1}%, {} pages still to fetch",
        stats.success_rate(),
        stats.fetchable()
    );
}
