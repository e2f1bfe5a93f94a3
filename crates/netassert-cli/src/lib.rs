//! netassert CLI library

pub mod commands;
pub mod error;

pub use error::{Error, Result};

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use netassert_common::telemetry::{LogConfig, LogFormat};

/// netassert - network security testing for Kubernetes workloads
#[derive(Parser, Debug)]
#[command(name = "netassert")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Flags accepted by every subcommand
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Path to kubeconfig file (defaults to KUBECONFIG, then in-cluster config)
    #[arg(short = 'k', long, global = true)]
    pub kubeconfig: Option<PathBuf>,

    /// Log level: trace, debug, info, warn or error
    #[arg(short = 'l', long, global = true, default_value = "info", env = "NETASSERT_LOG_LEVEL")]
    pub log_level: String,

    /// Log output format: text or json
    #[arg(long, global = true, default_value = "text", env = "NETASSERT_LOG_FORMAT")]
    pub log_format: LogFormat,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run tests against the cluster and write TAP results
    Run(commands::run::RunArgs),
    /// Load and validate test cases without touching the cluster
    Validate(commands::validate::ValidateArgs),
    /// Check that the cluster can run tests
    Ping(commands::ping::PingArgs),
    /// Print version information
    Version,
}

impl Cli {
    /// Logging settings from the global flags
    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            level: self.global.log_level.clone(),
            format: self.global.log_format,
        }
    }

    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Run(args) => commands::run::run(args, &self.global).await,
            Commands::Validate(args) => commands::validate::run(args),
            Commands::Ping(args) => commands::ping::run(args, &self.global).await,
            Commands::Version => {
                commands::version::run();
                Ok(())
            }
        }
    }
}
