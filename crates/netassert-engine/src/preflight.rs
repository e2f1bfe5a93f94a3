//! Checks run once before any test is launched
//!
//! A run only makes sense if the API server answers and supports the
//! `pods/ephemeralcontainers` subresource.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::APIResourceList;
use kube::Client;
use tracing::{debug, info};

use crate::error::Error;

/// Core API version carrying the ephemeral containers subresource
pub const EPHEMERAL_CONTAINERS_VERSION: &str = "v1";
/// Kind owning the ephemeral containers subresource
pub const EPHEMERAL_CONTAINERS_KIND: &str = "Pod";
/// Name of the ephemeral containers subresource
pub const EPHEMERAL_CONTAINERS_RESOURCE: &str = "pods/ephemeralcontainers";

const PREFLIGHT_CONTEXT: &str = "preflight";

/// GET `path` on the API server and fail unless it answers successfully
pub async fn ping_health_endpoint(client: &Client, path: &str) -> Result<(), Error> {
    let request = http::Request::get(path).body(Vec::new()).map_err(|e| {
        Error::internal_with_context(PREFLIGHT_CONTEXT, format!("invalid health path {}: {}", path, e))
    })?;

    let body = client.request_text(request).await.map_err(|e| {
        Error::internal_with_context(
            PREFLIGHT_CONTEXT,
            format!("unable to HTTP ping {} of the API server: {}", path, e),
        )
    })?;

    debug!(path = %path, response = %body.trim(), "API server health endpoint answered");
    Ok(())
}

/// True when discovery for core `v1` lists the ephemeral containers subresource
pub fn supports_ephemeral_containers(resources: &APIResourceList) -> bool {
    resources
        .resources
        .iter()
        .any(|r| r.name == EPHEMERAL_CONTAINERS_RESOURCE && r.kind == EPHEMERAL_CONTAINERS_KIND)
}

/// Fail unless the cluster supports ephemeral containers
pub async fn check_ephemeral_container_support(client: &Client) -> Result<(), Error> {
    let resources = client
        .list_core_api_resources(EPHEMERAL_CONTAINERS_VERSION)
        .await
        .map_err(|e| {
            Error::internal_with_context(
                PREFLIGHT_CONTEXT,
                format!(
                    "failed to get API resource list for {}: {}",
                    EPHEMERAL_CONTAINERS_VERSION, e
                ),
            )
        })?;

    if !supports_ephemeral_containers(&resources) {
        return Err(Error::internal_with_context(
            PREFLIGHT_CONTEXT,
            format!(
                "unable to find K8s resource={:?}, Group=\"\", Version={:?} Kind={:?}",
                EPHEMERAL_CONTAINERS_RESOURCE, EPHEMERAL_CONTAINERS_VERSION, EPHEMERAL_CONTAINERS_KIND
            ),
        ));
    }

    info!("Cluster supports ephemeral containers");
    Ok(())
}

/// Run both checks, health first
pub async fn run_preflight(client: &Client, health_path: &str) -> Result<(), Error> {
    ping_health_endpoint(client, health_path).await?;
    check_ephemeral_container_support(client).await
}
