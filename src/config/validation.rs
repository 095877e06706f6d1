use crate::config::types::{FetchConfig, JobConfig, OutputConfig, PolitenessConfig, ThroughputConfig};
use crate::ConfigError;

/// Validates the entire configuration
pub fn validate(config: &FetchConfig) -> Result<(), ConfigError> {
    validate_job_config(&config.fetch)?;
    validate_politeness_config(&config.politeness)?;
    validate_throughput_config(&config.throughput)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Validates job configuration
fn validate_job_config(config: &JobConfig) -> Result<(), ConfigError> {
    if config.job_name.trim().is_empty() {
        return Err(ConfigError::Validation(
            "job_name cannot be empty".to_string(),
        ));
    }

    if config.worker_count < 1 || config.worker_count > 1024 {
        return Err(ConfigError::Validation(format!(
            "worker_count must be between 1 and 1024, got {}",
            config.worker_count
        )));
    }

    if config.pool_threads < 1 {
        return Err(ConfigError::Validation(format!(
            "pool_threads must be >= 1, got {}",
            config.pool_threads
        )));
    }

    if config.check_interval_secs < 1 {
        return Err(ConfigError::Validation(
            "check_interval_secs must be >= 1".to_string(),
        ));
    }

    for (name, value) in [
        ("job_timeout_secs", config.job_timeout_secs),
        ("task_timeout_secs", config.task_timeout_secs),
        ("pending_timeout_secs", config.pending_timeout_secs),
        ("retune_interval_secs", config.retune_interval_secs),
        ("shutdown_timeout_secs", config.shutdown_timeout_secs),
    ] {
        if value == 0 {
            return Err(ConfigError::Validation(format!("{} must be > 0", name)));
        }
    }

    Ok(())
}

/// Validates politeness configuration
fn validate_politeness_config(config: &PolitenessConfig) -> Result<(), ConfigError> {
    if config.min_crawl_delay_ms > config.crawl_delay_ms {
        return Err(ConfigError::Validation(format!(
            "min_crawl_delay_ms ({}) cannot exceed crawl_delay_ms ({})",
            config.min_crawl_delay_ms, config.crawl_delay_ms
        )));
    }

    Ok(())
}

/// Validates throughput configuration
fn validate_throughput_config(config: &ThroughputConfig) -> Result<(), ConfigError> {
    if config.min_page_rate.is_nan() {
        return Err(ConfigError::Validation(
            "min_page_rate must be a number".to_string(),
        ));
    }

    if config.max_low_count < 1 {
        return Err(ConfigError::Validation(format!(
            "max_low_count must be >= 1, got {}",
            config.max_low_count
        )));
    }

    if config.check_interval_secs < 1 {
        return Err(ConfigError::Validation(
            "throughput check_interval_secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}
