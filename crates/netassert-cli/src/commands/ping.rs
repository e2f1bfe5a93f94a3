//! Ping command: preflight checks without running tests

use std::time::Duration;

use clap::Args;
use kube::Client;
use netassert_common::API_SERVER_HEALTH_ENDPOINT;
use netassert_engine::preflight::run_preflight;
use tracing::info;

use super::client;
use crate::{Error, GlobalArgs, Result};

/// Default preflight timeout in seconds
pub const DEFAULT_PING_TIMEOUT_SECS: u64 = 60;

#[derive(Args, Debug)]
pub struct PingArgs {
    /// Seconds to wait for the preflight checks
    #[arg(long, default_value_t = DEFAULT_PING_TIMEOUT_SECS)]
    pub ping_timeout: u64,
}

pub async fn run(args: PingArgs, global: &GlobalArgs) -> Result<()> {
    let client = client(global).await?;
    preflight(&client, Duration::from_secs(args.ping_timeout)).await?;
    println!("Cluster is ready for netassert tests");
    Ok(())
}

/// Check API server health and ephemeral container support within `timeout`
pub async fn preflight(client: &Client, timeout: Duration) -> Result<()> {
    info!(timeout_secs = timeout.as_secs(), "Running preflight checks");
    match tokio::time::timeout(timeout, run_preflight(client, API_SERVER_HEALTH_ENDPOINT)).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(Error::command_failed(format!(
            "preflight checks did not finish within {}s",
            timeout.as_secs()
        ))),
    }
}
