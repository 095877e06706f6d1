//! Integration tests for the fetch engine
//!
//! These tests use wiremock to serve pages and run whole fetch jobs
//! end-to-end against an in-memory page store.

mod job_tests;
mod source_tests;
