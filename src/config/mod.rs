//! Configuration module for Tidepool
//!
//! This module handles loading, parsing, and validating the TOML job file.
//! Every key has a default, so an empty file yields a runnable job.
//!
//! # Example
//!
//! ```no_run
//! use tidepool::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("fetch.toml")).unwrap();
//! println!("Fetching with {} workers", config.fetch.worker_count);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    FetchConfig, HttpConfig, JobConfig, OutputConfig, PolitenessConfig, ThroughputConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
pub use validation::validate;
