//! Error types for the CLI

use netassert_common::telemetry::TelemetryError;

/// CLI Result type
pub type Result<T> = std::result::Result<T, Error>;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Common(#[from] netassert_common::Error),

    #[error(transparent)]
    Engine(#[from] netassert_engine::Error),

    #[error("logging setup failed: {0}")]
    Telemetry(#[from] TelemetryError),

    #[error("command failed: {message}")]
    CommandFailed { message: String },

    #[error("{failed} of {total} tests failed")]
    TestsFailed { failed: usize, total: usize },
}

impl Error {
    pub fn command_failed(message: impl Into<String>) -> Self {
        Error::CommandFailed {
            message: message.into(),
        }
    }
}
