//! netassert CLI
//!
//! Runs network connectivity tests against a Kubernetes cluster.

use clap::Parser;

use netassert_cli::{Cli, Result};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    netassert_common::telemetry::init_logging(&cli.log_config())?;
    cli.run().await
}
