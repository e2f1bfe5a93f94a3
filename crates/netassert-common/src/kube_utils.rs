//! Kubernetes client construction using kube-rs
//!
//! The client is built from an explicit kubeconfig path when given, and from
//! the usual inference chain otherwise (`KUBECONFIG`, `~/.kube/config`, then
//! the in-cluster service account).

use std::path::Path;
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::debug;

use crate::Error;

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
///
/// Watches used to await ephemeral containers hold the connection open for
/// the whole test timeout, so this is not a bound on test duration.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

const CREATE_CLIENT_CONTEXT: &str = "create_client";

/// Create a kube client from optional kubeconfig path with default timeouts
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    create_client_with_timeout(kubeconfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT).await
}

/// Create a kube client from optional kubeconfig path with custom timeouts
pub async fn create_client_with_timeout(
    kubeconfig: Option<&Path>,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            debug!(kubeconfig = %path.display(), "Loading kubeconfig from file");
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    CREATE_CLIENT_CONTEXT,
                    format!("failed to read kubeconfig {}: {}", path.display(), e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        CREATE_CLIENT_CONTEXT,
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context(
                CREATE_CLIENT_CONTEXT,
                format!("failed to infer config: {}", e),
            )
        })?,
    };

    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);
    debug!(cluster_url = %config.cluster_url, "Creating kube client");

    Client::try_from(config).map_err(|e| {
        Error::internal_with_context(
            CREATE_CLIENT_CONTEXT,
            format!("failed to create client: {}", e),
        )
    })
}

/// True when the API server answered 404 Not Found
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(e) if e.code == 404)
}
