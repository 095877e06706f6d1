use std::collections::{HashMap, HashSet};

/// Tracks host liveness during a fetch job
///
/// Each host accumulates failures (timeouts, unknown host). Once a host fails
/// more often than the threshold it is considered gone and no further tasks
/// are admitted or dispatched for it. Individual URLs can also be marked gone.
#[derive(Debug, Clone)]
pub struct HostTracker {
    failure_threshold: u32,
    failures: HashMap<String, u32>,
    successes: HashMap<String, u64>,
    gone_hosts: HashSet<String>,
    gone_urls: HashSet<String>,
}

impl HostTracker {
    /// Creates a tracker that marks a host gone after `failure_threshold` failures are exceeded
    pub fn new(failure_threshold: u32) -> Self {
        Self {
            failure_threshold,
            failures: HashMap::new(),
            successes: HashMap::new(),
            gone_hosts: HashSet::new(),
            gone_urls: HashSet::new(),
        }
    }

    pub fn set_failure_threshold(&mut self, failure_threshold: u32) {
        self.failure_threshold = failure_threshold;
    }

    /// Returns true if the host has not been marked gone
    pub fn is_reachable(&self, host: &str) -> bool {
        !self.gone_hosts.contains(host)
    }

    pub fn is_gone(&self, host: &str) -> bool {
        self.gone_hosts.contains(host)
    }

    pub fn is_url_gone(&self, url: &str) -> bool {
        self.gone_urls.contains(url)
    }

    /// Records a successful fetch from a host
    ///
    /// A success clears the host's failure count, so only consecutive
    /// failures can push it over the threshold.
    pub fn mark_success(&mut self, host: &str) {
        self.failures.remove(host);
        *self.successes.entry(host.to_string()).or_insert(0) += 1;
    }

    /// Records a failure for a host
    ///
    /// # Returns
    ///
    /// * `true` - If this failure flipped the host to gone
    /// * `false` - If the host is still reachable, or was already gone
    pub fn mark_failure(&mut self, host: &str) -> bool {
        if self.gone_hosts.contains(host) {
            return false;
        }

        let count = self.failures.entry(host.to_string()).or_insert(0);
        *count += 1;

        if *count > self.failure_threshold {
            self.gone_hosts.insert(host.to_string());
            tracing::warn!(
                "Host {} is gone after {} failures",
                host,
                count
            );
            return true;
        }

        false
    }

    /// Marks a single URL as gone
    pub fn mark_url_gone(&mut self, url: &str) {
        self.gone_urls.insert(url.to_string());
    }

    pub fn failure_count(&self, host: &str) -> u32 {
        self.failures.get(host).copied().unwrap_or(0)
    }

    pub fn success_count(&self, host: &str) -> u64 {
        self.successes.get(host).copied().unwrap_or(0)
    }

    pub fn gone_hosts(&self) -> impl Iterator<Item = &String> {
        self.gone_hosts.iter()
    }

    pub fn gone_host_count(&self) -> usize {
        self.gone_hosts.len()
    }

    pub fn gone_url_count(&self) -> usize {
        self.gone_urls.len()
    }
}

impl Default for HostTracker {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_tracker_everything_reachable() {
        let tracker = HostTracker::default();
        assert!(tracker.is_reachable("example.com"));
        assert!(!tracker.is_gone("example.com"));
        assert_eq!(tracker.failure_count("example.com"), 0);
    }

    #[test]
    fn test_host_gone_after_threshold_exceeded() {
        let mut tracker = HostTracker::new(3);

        assert!(!tracker.mark_failure("a.com"));
        assert!(!tracker.mark_failure("a.com"));
        assert!(!tracker.mark_failure("a.com"));
        assert!(tracker.is_reachable("a.com"));

        // The fourth failure flips it
        assert!(tracker.mark_failure("a.com"));
        assert!(tracker.is_gone("a.com"));

        // Already gone, does not flip again
        assert!(!tracker.mark_failure("a.com"));
        assert_eq!(tracker.gone_host_count(), 1);
    }

    #[test]
    fn test_success_resets_failures() {
        let mut tracker = HostTracker::new(1);

        assert!(!tracker.mark_failure("a.com"));
        tracker.mark_success("a.com");
        assert_eq!(tracker.failure_count("a.com"), 0);
        assert_eq!(tracker.success_count("a.com"), 1);

        assert!(!tracker.mark_failure("a.com"));
        assert!(tracker.is_reachable("a.com"));
    }

    #[test]
    fn test_zero_threshold_flips_on_first_failure() {
        let mut tracker = HostTracker::new(0);
        assert!(tracker.mark_failure("a.com"));
    }

    #[test]
    fn test_url_gone() {
        let mut tracker = HostTracker::default();
        tracker.mark_url_gone("http://a.com/missing");

        assert!(tracker.is_url_gone("http://a.com/missing"));
        assert!(!tracker.is_url_gone("http://a.com/"));
        assert!(tracker.is_reachable("a.com"));
        assert_eq!(tracker.gone_url_count(), 1);
    }
}
