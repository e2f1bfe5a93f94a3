//! Common types for netassert: the test-case model, loading, reporting and utilities

#![deny(missing_docs)]

pub mod error;
pub mod kube_utils;
pub mod tap;
pub mod telemetry;
pub mod testcase;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API server endpoint probed before a run
pub const API_SERVER_HEALTH_ENDPOINT: &str = "/healthz";

/// TAP file written when none is configured
pub const DEFAULT_TAP_FILE: &str = "results.tap";
