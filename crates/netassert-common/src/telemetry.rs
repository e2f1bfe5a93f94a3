//! Logging initialization
//!
//! Provides structured logging through `tracing`:
//! - `RUST_LOG` always wins when set
//! - otherwise the configured level applies to netassert, with noisy client
//!   libraries (kube, tower, hyper) held at warn
//! - human readable text for terminals, JSON lines for log collectors

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Levels accepted by [`LogConfig::level`]
pub const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

const FALLBACK_LEVEL: &str = "info";

/// Errors that can occur during logging initialization
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Log format name is not recognised
    #[error("unknown log format {0:?}, expected text or json")]
    UnknownFormat(String),

    /// Failed to initialize tracing subscriber
    #[error("failed to initialize tracing subscriber: {0}")]
    SubscriberInit(String),
}

/// Output encoding for log lines
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human readable text
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

impl FromStr for LogFormat {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "console" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(TelemetryError::UnknownFormat(other.to_string())),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => f.write_str("text"),
            Self::Json => f.write_str("json"),
        }
    }
}

/// Configuration for logging initialization
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum level for netassert's own events (trace, debug, info, warn, error)
    pub level: String,
    /// Output encoding
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: FALLBACK_LEVEL.to_string(),
            format: LogFormat::Text,
        }
    }
}

impl LogConfig {
    /// The configured level, or info when it is not one of [`LOG_LEVELS`]
    pub fn effective_level(&self) -> &str {
        let level = self.level.trim();
        LOG_LEVELS
            .iter()
            .find(|l| l.eq_ignore_ascii_case(level))
            .copied()
            .unwrap_or(FALLBACK_LEVEL)
    }

    /// Filter directives used when `RUST_LOG` is unset
    pub fn default_directives(&self) -> String {
        format!(
            "{},kube=warn,tower=warn,hyper=warn,rustls=warn",
            self.effective_level()
        )
    }

    /// Source locations are only worth their noise when debugging
    fn with_source_location(&self) -> bool {
        matches!(self.effective_level(), "trace" | "debug")
    }
}

/// Initialize the global tracing subscriber
///
/// Fails if a global subscriber has already been installed.
pub fn init_logging(config: &LogConfig) -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_directives()));
    let with_location = config.with_source_location();

    let result = match config.format {
        LogFormat::Json => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(false)
                .with_target(true)
                .with_file(with_location)
                .with_line_number(with_location);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .try_init()
        }
        LogFormat::Text => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(with_location)
                .with_file(with_location)
                .with_line_number(with_location);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .try_init()
        }
    };

    result.map_err(|e: tracing_subscriber::util::TryInitError| {
        TelemetryError::SubscriberInit(e.to_string())
    })
}
