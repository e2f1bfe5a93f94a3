//! Read access to the workloads the resolver walks
//!
//! Provides a trait-based abstraction over the handful of reads instance
//! resolution needs, allowing tests to mock the cluster while production
//! code uses real API calls.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use kube::Client;
use netassert_common::kube_utils::is_not_found;
use tracing::trace;

#[cfg(test)]
use mockall::automock;

/// Field selector restricting pod listings to running pods
pub const RUNNING_PHASE_SELECTOR: &str = "status.phase=Running";

/// Trait abstracting cluster reads used during instance resolution
///
/// `get_*` methods return `Ok(None)` when the object does not exist so the
/// caller can tell "not found" from an API failure.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Get a pod by name
    async fn get_pod(&self, name: &str, namespace: &str) -> Result<Option<Pod>, kube::Error>;

    /// Get a deployment by name
    async fn get_deployment(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<Deployment>, kube::Error>;

    /// Get a stateful set by name
    async fn get_stateful_set(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<StatefulSet>, kube::Error>;

    /// Get a daemon set by name
    async fn get_daemon_set(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<DaemonSet>, kube::Error>;

    /// List every replica set in a namespace, in the order the API server returns them
    async fn list_replica_sets(&self, namespace: &str) -> Result<Vec<ReplicaSet>, kube::Error>;

    /// List running pods matching a label selector
    async fn list_running_pods(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Pod>, kube::Error>;
}

/// Real cluster implementation backed by a kube client
pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    /// Create a new KubeClusterApi
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Map a 404 on GET to `None`
fn found<T>(result: Result<T, kube::Error>) -> Result<Option<T>, kube::Error> {
    match result {
        Ok(obj) => Ok(Some(obj)),
        Err(e) if is_not_found(&e) => Ok(None),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn get_pod(&self, name: &str, namespace: &str) -> Result<Option<Pod>, kube::Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        found(api.get(name).await)
    }

    async fn get_deployment(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<Deployment>, kube::Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        found(api.get(name).await)
    }

    async fn get_stateful_set(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<StatefulSet>, kube::Error> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        found(api.get(name).await)
    }

    async fn get_daemon_set(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<DaemonSet>, kube::Error> {
        let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), namespace);
        found(api.get(name).await)
    }

    async fn list_replica_sets(&self, namespace: &str) -> Result<Vec<ReplicaSet>, kube::Error> {
        let api: Api<ReplicaSet> = Api::namespaced(self.client.clone(), namespace);
        let list = api.list(&ListParams::default()).await?;
        trace!(namespace = %namespace, count = list.items.len(), "Listed replica sets");
        Ok(list.items)
    }

    async fn list_running_pods(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Pod>, kube::Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default()
            .labels(label_selector)
            .fields(RUNNING_PHASE_SELECTOR);
        let list = api.list(&params).await?;
        trace!(
            namespace = %namespace,
            selector = %label_selector,
            count = list.items.len(),
            "Listed running pods"
        );
        Ok(list.items)
    }
}
