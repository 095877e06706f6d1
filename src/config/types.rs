use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for Tidepool
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub fetch: JobConfig,
    pub politeness: PolitenessConfig,
    pub throughput: ThroughputConfig,
    pub http: HttpConfig,
    pub output: OutputConfig,
}

/// Job-level settings: workers, timeouts, cadences
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Name of the job, used by the finish-job sentinel command
    #[serde(rename = "job-name")]
    pub job_name: String,

    /// Number of concurrent fetch workers
    #[serde(rename = "worker-count")]
    pub worker_count: usize,

    /// Maximum number of in-flight tasks per pool
    #[serde(rename = "pool-threads")]
    pub pool_threads: usize,

    /// Wall-clock limit for the whole job (seconds)
    #[serde(rename = "job-timeout-secs")]
    pub job_timeout_secs: u64,

    /// Maximum time without any finished task before workers are presumed hung (seconds)
    #[serde(rename = "task-timeout-secs")]
    pub task_timeout_secs: u64,

    /// Age after which a pending task is reclaimed by retuning (seconds)
    #[serde(rename = "pending-timeout-secs")]
    pub pending_timeout_secs: u64,

    /// Fixed cadence for pool retuning (seconds)
    #[serde(rename = "retune-interval-secs")]
    pub retune_interval_secs: u64,

    /// Interval of the orchestrator check/report loop (seconds)
    #[serde(rename = "check-interval-secs")]
    pub check_interval_secs: u64,

    /// How long an idle worker sleeps before asking again (milliseconds)
    #[serde(rename = "idle-sleep-ms")]
    pub idle_sleep_ms: u64,

    /// Deadline for joining workers on shutdown (seconds)
    #[serde(rename = "shutdown-timeout-secs")]
    pub shutdown_timeout_secs: u64,

    /// Pages retried more often than this are no longer fed
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    /// Optional command file polled for a `finish <job-name>` line
    #[serde(rename = "halt-file")]
    pub halt_file: Option<PathBuf>,
}

/// Per-host politeness and liveness settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolitenessConfig {
    /// Delay between dispatches to the same host (milliseconds)
    #[serde(rename = "crawl-delay-ms")]
    pub crawl_delay_ms: u64,

    /// Hard floor for the dispatch delay (milliseconds)
    #[serde(rename = "min-crawl-delay-ms")]
    pub min_crawl_delay_ms: u64,

    /// Number of failures a host may accumulate before it is considered gone
    #[serde(rename = "host-failure-threshold")]
    pub host_failure_threshold: u32,
}

/// Throughput control settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThroughputConfig {
    /// Minimum acceptable pages per second; negative disables throughput control
    #[serde(rename = "min-page-rate")]
    pub min_page_rate: f64,

    /// Consecutive low-throughput checks before the slowest queue is evicted
    #[serde(rename = "max-low-count")]
    pub max_low_count: u32,

    /// Interval between throughput checks (seconds)
    #[serde(rename = "check-interval-secs")]
    pub check_interval_secs: u64,

    /// Available bandwidth in megabits per second; 0 means unlimited
    #[serde(rename = "bandwidth-mbps")]
    pub bandwidth_mbps: u64,
}

/// HTTP protocol settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    #[serde(rename = "user-agent")]
    pub user_agent: String,

    #[serde(rename = "timeout-secs")]
    pub timeout_secs: u64,

    #[serde(rename = "connect-timeout-secs")]
    pub connect_timeout_secs: u64,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Whether fetched content is kept in the page store
    #[serde(rename = "store-content")]
    pub store_content: bool,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            job_name: "fetch".to_string(),
            worker_count: 10,
            pool_threads: 1,
            job_timeout_secs: 3600,
            task_timeout_secs: 600,
            pending_timeout_secs: 960,
            retune_interval_secs: 480,
            check_interval_secs: 20,
            idle_sleep_ms: 1000,
            shutdown_timeout_secs: 30,
            max_retries: 3,
            halt_file: None,
        }
    }
}

impl Default for PolitenessConfig {
    fn default() -> Self {
        Self {
            crawl_delay_ms: 5000,
            min_crawl_delay_ms: 0,
            host_failure_threshold: 3,
        }
    }
}

impl Default for ThroughputConfig {
    fn default() -> Self {
        Self {
            min_page_rate: -1.0,
            max_low_count: 10,
            check_interval_secs: 120,
            bandwidth_mbps: 0,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("tidepool/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: 30,
            connect_timeout_secs: 10,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            database_path: "./tidepool.db".to_string(),
            store_content: true,
        }
    }
}

impl JobConfig {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn pending_timeout(&self) -> Duration {
        Duration::from_secs(self.pending_timeout_secs)
    }

    pub fn retune_interval(&self) -> Duration {
        Duration::from_secs(self.retune_interval_secs)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl PolitenessConfig {
    pub fn crawl_delay(&self) -> Duration {
        Duration::from_millis(self.crawl_delay_ms)
    }

    pub fn min_crawl_delay(&self) -> Duration {
        Duration::from_millis(self.min_crawl_delay_ms)
    }
}

impl ThroughputConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    /// Bandwidth budget in bits per second, `None` when unlimited
    pub fn bandwidth_bits(&self) -> Option<f64> {
        if self.bandwidth_mbps == 0 {
            None
        } else {
            Some(self.bandwidth_mbps as f64 * 1024.0 * 1024.0)
        }
    }
}
