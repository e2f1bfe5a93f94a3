//! Error types shared by the netassert crates
//!
//! Errors are structured with fields to aid debugging. Each variant carries
//! contextual information like the test name or the file being read.

use std::path::Path;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for test loading, reporting and client setup
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A test case (or the set of test cases) is invalid
    #[error("validation error for {test}: {message}")]
    Validation {
        /// Name of the offending test, or the source file for set-level errors
        test: String,
        /// Description of what's invalid
        message: String,
    },

    /// Reading test documents failed
    #[error("io error for {path}: {message}")]
    Io {
        /// File or directory that could not be read
        path: String,
        /// Description of what failed
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// The result report could not be produced
    #[error("report error: {message}")]
    Report {
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "create_client")
        context: String,
    },
}

impl Error {
    /// Create a validation error without test context
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            test: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
        }
    }

    /// Create a validation error for a named test
    pub fn validation_for(test: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            test: test.into(),
            message: msg.into(),
        }
    }

    /// Create an io error for a path
    pub fn io(path: &Path, err: impl std::fmt::Display) -> Self {
        Self::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create a report error with the given message
    pub fn report(msg: impl Into<String>) -> Self {
        Self::Report {
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Returns true if this error was raised by test-case validation
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Self::serialization(err.to_string())
    }
}
