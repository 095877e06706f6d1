//! Periodic status line

use std::fmt;

/// One line of job progress, written to the log every check interval
#[derive(Debug, Clone, PartialEq)]
pub struct StatusLine {
    pub pages: u64,
    pub errors: u64,
    pub average_pages_per_sec: f64,
    pub pages_per_sec: f64,
    pub average_bytes_per_sec: f64,
    pub bytes_per_sec: f64,
    pub ready: usize,
    pub pending: usize,
    pub queues: usize,
}

/// Bytes per second as kilobits per second
pub fn kbits_per_sec(bytes_per_sec: f64) -> f64 {
    bytes_per_sec * 8.0 / 1024.0
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} pages, {} errors, {:.1} {:.1} pages/s, {:.1} {:.1} kb/s, {} ready {} pending URLs in {} queues",
            self.pages,
            self.errors,
            self.average_pages_per_sec,
            self.pages_per_sec,
            kbits_per_sec(self.average_bytes_per_sec),
            kbits_per_sec(self.bytes_per_sec),
            self.ready,
            self.pending,
            self.queues
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_line_format() {
        let line = StatusLine {
            pages: 120,
            errors: 3,
            average_pages_per_sec: 2.0,
            pages_per_sec: 1.5,
            average_bytes_per_sec: 1024.0,
            bytes_per_sec: 512.0,
            ready: 40,
            pending: 10,
            queues: 7,
        };

        assert_eq!(
            line.to_string(),
            "120 pages, 3 errors, 2.0 1.5 pages/s, 8.0 4.0 kb/s, 40 ready 10 pending URLs in 7 queues"
        );
    }
}
