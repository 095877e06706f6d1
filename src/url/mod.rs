//! URL handling module for Tidepool
//!
//! This module provides host extraction, a registered-domain approximation,
//! and the representative-URL choice used when following redirects.

mod domain;
mod repr;

// Re-export main functions
pub use domain::{extract_host, is_root, parse_with_host, registered_domain};
pub use repr::{choose_repr, SHORTEST_VALID_URL, SHORTEST_VALID_URL_LENGTH};
