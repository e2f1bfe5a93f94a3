//! Run command

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use netassert_common::tap::{summarize, write_tap};
use netassert_common::testcase::Test;
use netassert_common::DEFAULT_TAP_FILE;
use netassert_engine::cluster::KubeClusterApi;
use netassert_engine::containers::DEFAULT_INTERFACE;
use netassert_engine::diagnostic::KubeDiagnosticOperator;
use netassert_engine::names::DEFAULT_SUFFIX_LENGTH;
use netassert_engine::runner::{
    DEFAULT_SCANNER_IMAGE, DEFAULT_SCANNER_PREFIX, DEFAULT_SNIFFER_IMAGE, DEFAULT_SNIFFER_PREFIX,
};
use netassert_engine::{Engine, EngineConfig};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::ping::{preflight, DEFAULT_PING_TIMEOUT_SECS};
use super::{client, InputArgs};
use crate::{Error, GlobalArgs, Result};

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// File the TAP results are written to
    #[arg(short = 't', long, default_value = DEFAULT_TAP_FILE)]
    pub tap: PathBuf,

    /// Length of the random suffix of diagnostic container names
    #[arg(long, default_value_t = DEFAULT_SUFFIX_LENGTH)]
    pub suffix_length: usize,

    /// Image of the UDP packet sniffer
    #[arg(long, default_value = DEFAULT_SNIFFER_IMAGE)]
    pub sniffer_image: String,

    /// Name prefix of sniffer containers
    #[arg(long, default_value = DEFAULT_SNIFFER_PREFIX)]
    pub sniffer_prefix: String,

    /// Image of the L4 scanner
    #[arg(long, default_value = DEFAULT_SCANNER_IMAGE)]
    pub scanner_image: String,

    /// Name prefix of scanner containers
    #[arg(long, default_value = DEFAULT_SCANNER_PREFIX)]
    pub scanner_prefix: String,

    /// Seconds between launching two tests
    #[arg(long, default_value_t = 1)]
    pub pause_sec: u64,

    /// Interface the sniffer captures on
    #[arg(long, default_value = DEFAULT_INTERFACE)]
    pub interface: String,

    /// Maximum number of tests in flight (unbounded when unset)
    #[arg(long)]
    pub max_concurrency: Option<usize>,

    /// Seconds between sniffer and scanner injection in UDP tests
    #[arg(long, default_value_t = 0)]
    pub sniffer_settle_seconds: u64,

    /// Seconds to wait for the preflight checks
    #[arg(long, default_value_t = DEFAULT_PING_TIMEOUT_SECS)]
    pub ping_timeout: u64,
}

impl RunArgs {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            scanner_image: self.scanner_image.clone(),
            scanner_prefix: self.scanner_prefix.clone(),
            sniffer_image: self.sniffer_image.clone(),
            sniffer_prefix: self.sniffer_prefix.clone(),
            suffix_length: self.suffix_length,
            pause: Duration::from_secs(self.pause_sec),
            interface: self.interface.clone(),
            max_concurrency: self.max_concurrency,
            sniffer_settle: Duration::from_secs(self.sniffer_settle_seconds),
        }
    }
}

pub async fn run(args: RunArgs, global: &GlobalArgs) -> Result<()> {
    // Bad input or flags fail before anything touches the cluster
    let tests = args.input.load()?;
    if tests.is_empty() {
        return Err(Error::command_failed("no tests were found in the input"));
    }
    let config = args.engine_config();
    config.validate()?;

    let client = client(global).await?;
    preflight(&client, Duration::from_secs(args.ping_timeout)).await?;

    let engine = Arc::new(Engine::new(
        Arc::new(KubeClusterApi::new(client.clone())),
        Arc::new(KubeDiagnosticOperator::new(client)),
        config,
    )?);

    let cancel = CancellationToken::new();
    let shutdown = tokio::spawn(cancel_on_shutdown(cancel.clone()));
    let results = engine.run_tests(tests, cancel).await;
    shutdown.abort();

    log_results(&results);
    write_tap_file(&args.tap, &results)?;

    let summary = summarize(&results);
    info!(
        passed = summary.passed,
        failed = summary.failed,
        total = summary.total(),
        "Run finished"
    );
    if summary.all_passed() {
        Ok(())
    } else {
        Err(Error::TestsFailed {
            failed: summary.failed,
            total: summary.total(),
        })
    }
}

fn log_results(tests: &[Test]) {
    for test in tests {
        if test.pass {
            info!(test = %test.name, "Test passed");
        } else {
            error!(test = %test.name, reason = %test.failure_reason, "Test failed");
        }
    }
}

/// Write results as TAP to `path`, replacing any existing file
pub fn write_tap_file(path: &Path, tests: &[Test]) -> Result<()> {
    let file = File::create(path).map_err(|e| netassert_common::Error::io(path, e))?;
    let mut writer = BufWriter::new(file);
    write_tap(tests, &mut writer)?;
    writer
        .flush()
        .map_err(|e| netassert_common::Error::io(path, e))?;
    info!(path = %path.display(), "Wrote TAP results");
    Ok(())
}

/// Cancel `token` on Ctrl+C or SIGTERM
async fn cancel_on_shutdown(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    warn!("Shutdown requested, cancelling tests");
    token.cancel();
}
