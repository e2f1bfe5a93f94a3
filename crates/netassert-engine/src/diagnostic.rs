//! Injecting diagnostic containers and waiting for their verdict
//!
//! A diagnostic container is added to a running pod through the
//! `ephemeralcontainers` subresource, then the pod is watched until that
//! container terminates. Its exit code is the verdict.

use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::{EphemeralContainer, Pod};
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::{watcher, WatchStreamExt};
use kube::Client;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use crate::error::Error;

/// Trait abstracting diagnostic container operations
///
/// This trait allows mocking injection and termination in tests while using
/// the real Kubernetes client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DiagnosticOperator: Send + Sync {
    /// Add `container` to `pod` as an ephemeral container
    ///
    /// Returns the pod as updated by the API server and the container's name.
    async fn inject(&self, pod: &Pod, container: EphemeralContainer) -> Result<(Pod, String), Error>;

    /// Wait until `container` in `pod` terminates and return its exit code
    ///
    /// Fails with [`Error::Timeout`] when nothing terminal arrives within
    /// `timeout`, and with [`Error::Cancelled`] when `cancel` fires first.
    async fn await_exit_code(
        &self,
        container: &str,
        pod: &str,
        namespace: &str,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<i32, Error>;
}

// =============================================================================
// Pure helpers
// =============================================================================

/// Strategic merge patch that adds `container` to a pod's ephemeral containers
///
/// The API server merges `ephemeralContainers` by name, so the patch carries
/// only the new container and leaves ones added concurrently in place.
pub fn build_ephemeral_patch(container: &EphemeralContainer) -> Result<Value, serde_json::Error> {
    Ok(json!({
        "spec": {
            "ephemeralContainers": [serde_json::to_value(container)?]
        }
    }))
}

/// Field selector scoping a watch to one running pod
pub fn pod_field_selector(pod: &str, namespace: &str) -> String {
    format!(
        "status.phase=Running,metadata.name={},metadata.namespace={}",
        pod, namespace
    )
}

/// Exit code of `container` if the pod reports it terminated
pub fn terminated_exit_code(pod: &Pod, container: &str) -> Option<i32> {
    let status = pod
        .status
        .as_ref()?
        .ephemeral_container_statuses
        .as_deref()?
        .iter()
        .find(|s| s.name == container)?;
    let state = status.state.as_ref()?;

    if let Some(terminated) = &state.terminated {
        debug!(
            container = %container,
            exit_code = terminated.exit_code,
            reason = terminated.reason.as_deref().unwrap_or_default(),
            "Ephemeral container terminated"
        );
        return Some(terminated.exit_code);
    }
    if state.waiting.is_some() {
        debug!(container = %container, state = "Waiting", "Container state");
    } else if state.running.is_some() {
        debug!(container = %container, state = "Running", "Container state");
    }
    None
}

/// Consume pod updates until `container` terminates
///
/// Priority on each wake-up is cancellation, then pending updates, then the
/// deadline, so an update that is already available is never dropped in
/// favour of a deadline that expired at the same time. The stream is owned
/// and dropped on every return path, which closes the underlying watch.
pub async fn wait_for_termination<S, E>(
    stream: S,
    container: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<i32, Error>
where
    S: Stream<Item = Result<Pod, E>>,
    E: std::fmt::Display,
{
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    tokio::pin!(stream);

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                return Err(Error::Cancelled {
                    container: container.to_string(),
                });
            }

            update = stream.next() => match update {
                Some(Ok(pod)) => {
                    if let Some(code) = terminated_exit_code(&pod, container) {
                        return Ok(code);
                    }
                }
                Some(Err(e)) => {
                    warn!(container = %container, error = %e, "Pod watch error, continuing");
                }
                None => {
                    return Err(Error::internal_with_context(
                        "await_exit_code",
                        format!("pod watch ended before container {} terminated", container),
                    ));
                }
            },

            _ = &mut deadline => {
                return Err(Error::Timeout {
                    container: container.to_string(),
                    timeout,
                });
            }
        }
    }
}

// =============================================================================
// Kubernetes implementation
// =============================================================================

/// Real diagnostic operator backed by a kube client
pub struct KubeDiagnosticOperator {
    client: Client,
}

impl KubeDiagnosticOperator {
    /// Create a new KubeDiagnosticOperator
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DiagnosticOperator for KubeDiagnosticOperator {
    async fn inject(&self, pod: &Pod, container: EphemeralContainer) -> Result<(Pod, String), Error> {
        let name = pod.metadata.name.clone().unwrap_or_default();
        let namespace = pod.metadata.namespace.clone().unwrap_or_default();
        let container_name = container.name.clone();

        let patch = build_ephemeral_patch(&container)
            .map_err(|e| Error::injection(&name, &namespace, &container_name, e))?;
        debug!(patch = %patch, "Generated strategic merge patch for the pod");
        info!(pod = %name, namespace = %namespace, container = %container_name, "Patching pod");

        let api: Api<Pod> = Api::namespaced(self.client.clone(), &namespace);
        let patched = api
            .patch_ephemeral_containers(&name, &PatchParams::default(), &Patch::Strategic(&patch))
            .await
            .map_err(|e| Error::injection(&name, &namespace, &container_name, e))?;

        Ok((patched, container_name))
    }

    async fn await_exit_code(
        &self,
        container: &str,
        pod: &str,
        namespace: &str,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<i32, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let config = watcher::Config::default().fields(&pod_field_selector(pod, namespace));
        let stream = watcher(api, config).default_backoff().applied_objects();

        debug!(
            container = %container,
            pod = %pod,
            namespace = %namespace,
            timeout_secs = timeout.as_secs(),
            "Watching ephemeral container"
        );
        wait_for_termination(stream, container, timeout, &cancel).await
    }
}
