//! Error types for the netassert engine
//!
//! Every error raised while running a single test ends up as that test's
//! failure reason, so the `Display` output of each variant is written for an
//! operator reading a TAP report.

use std::fmt;
use std::time::Duration;

use netassert_common::testcase::WorkloadKind;
use thiserror::Error;

/// Which step of instance resolution failed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolutionStage {
    /// The workload (or pod) does not exist
    NotFound,
    /// The pod exists but is not running or has no IP yet
    NotReady,
    /// The workload exists but nothing eligible to run a diagnostic was found
    NoCandidates,
    /// The API server returned an unexpected error
    Api,
}

impl fmt::Display for ResolutionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "not found",
            Self::NotReady => "not ready",
            Self::NoCandidates => "no candidates",
            Self::Api => "api error",
        };
        f.write_str(s)
    }
}

/// Failure to turn a workload reference into a running, addressable pod
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("unable to resolve {kind} {namespace}/{name} ({stage}): {message}")]
pub struct ResolutionError {
    /// Step that failed
    pub stage: ResolutionStage,
    /// Kind of the workload being resolved
    pub kind: WorkloadKind,
    /// Workload name
    pub name: String,
    /// Workload namespace
    pub namespace: String,
    /// What went wrong
    pub message: String,
}

impl ResolutionError {
    /// Create a resolution error
    pub fn new(
        stage: ResolutionStage,
        kind: WorkloadKind,
        name: impl Into<String>,
        namespace: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            kind,
            name: name.into(),
            namespace: namespace.into(),
            message: message.into(),
        }
    }
}

/// Main error type for engine operations
#[derive(Debug, Error)]
pub enum Error {
    /// Source or destination could not be resolved
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// The diagnostic container could not be added to the pod
    #[error("failed to inject ephemeral container {container} into pod {namespace}/{pod}: {message}")]
    Injection {
        /// Target pod name
        pod: String,
        /// Target pod namespace
        namespace: String,
        /// Diagnostic container name
        container: String,
        /// Description of what failed
        message: String,
    },

    /// The diagnostic container did not terminate in time
    #[error("container {container} did not reach termination state in {} seconds", .timeout.as_secs())]
    Timeout {
        /// Diagnostic container name
        container: String,
        /// The window that elapsed
        timeout: Duration,
    },

    /// The run was cancelled while waiting on the container
    #[error("wait for container {container} was cancelled")]
    Cancelled {
        /// Diagnostic container name
        container: String,
    },

    /// The diagnostic ran to completion but disagreed with the expectation
    #[error("ephemeral container {container} exit code for test {test} is {actual} instead of {expected}")]
    ExitCodeMismatch {
        /// Diagnostic container name
        container: String,
        /// Test name
        test: String,
        /// Declared exit code
        expected: i32,
        /// Observed exit code
        actual: i32,
    },

    /// Test type or protocol combination the engine cannot run
    #[error("unsupported test {test}: {message}")]
    Unsupported {
        /// Test name
        test: String,
        /// Description of what is unsupported
        message: String,
    },

    /// Test is structurally invalid (missing source, ambiguous destination)
    #[error("invalid test {test}: {message}")]
    InvalidTest {
        /// Test name
        test: String,
        /// Description of what is invalid
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred
        context: String,
    },
}

impl Error {
    /// Create an injection error
    pub fn injection(
        pod: impl Into<String>,
        namespace: impl Into<String>,
        container: impl Into<String>,
        msg: impl fmt::Display,
    ) -> Self {
        Self::Injection {
            pod: pod.into(),
            namespace: namespace.into(),
            container: container.into(),
            message: msg.to_string(),
        }
    }

    /// Create an unsupported-test error
    pub fn unsupported(test: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Unsupported {
            test: test.into(),
            message: msg.into(),
        }
    }

    /// Create an invalid-test error
    pub fn invalid_test(test: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidTest {
            test: test.into(),
            message: msg.into(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// True for the cancellation variant
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// True for the timeout variant
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
