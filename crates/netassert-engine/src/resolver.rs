//! Instance resolution: workload reference to one running pod
//!
//! Controllers are walked down to the pods they own:
//! - Pod: fetched directly, must be Running with an IP
//! - DaemonSet: rejected early when nothing is available, then its pods
//! - StatefulSet: rejected early when scaled to zero, then its pods
//! - Deployment: first owned ReplicaSet with at least one desired replica,
//!   then that ReplicaSet's pods
//!
//! A candidate pod must be controlled by the workload (owner reference with
//! `controller: true` and the workload's UID), in the Running phase and carry
//! an IP. One candidate is picked uniformly at random.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use netassert_common::testcase::{WorkloadKind, WorkloadReference};
use tracing::{debug, info, trace};

use crate::cluster::ClusterApi;
use crate::error::{ResolutionError, ResolutionStage};
use crate::names::SharedRng;

const RUNNING_PHASE: &str = "Running";

/// A concrete pod chosen to host a diagnostic container
#[derive(Clone, Debug)]
pub struct ResolvedInstance {
    /// Pod name
    pub name: String,
    /// Pod namespace
    pub namespace: String,
    /// Pod IP
    pub ip: String,
    /// The pod as read from the API server
    pub pod: Pod,
}

impl ResolvedInstance {
    fn from_pod(pod: Pod) -> Self {
        Self {
            name: pod.metadata.name.clone().unwrap_or_default(),
            namespace: pod.metadata.namespace.clone().unwrap_or_default(),
            ip: pod_ip(&pod).unwrap_or_default().to_string(),
            pod,
        }
    }
}

// =============================================================================
// Candidate filtering
// =============================================================================

/// True when `meta` has a controller owner reference pointing at `owner_uid`
pub fn is_controlled_by(meta: &ObjectMeta, owner_uid: &str) -> bool {
    meta.owner_references
        .as_deref()
        .unwrap_or_default()
        .iter()
        .any(|owner| owner.controller == Some(true) && owner.uid == owner_uid)
}

fn pod_phase(pod: &Pod) -> Option<&str> {
    pod.status.as_ref().and_then(|s| s.phase.as_deref())
}

fn pod_ip(pod: &Pod) -> Option<&str> {
    pod.status
        .as_ref()
        .and_then(|s| s.pod_ip.as_deref())
        .filter(|ip| !ip.is_empty())
}

/// True when `pod` is owned by `owner_uid`, Running and addressable
pub fn is_candidate(pod: &Pod, owner_uid: &str) -> bool {
    is_controlled_by(&pod.metadata, owner_uid)
        && pod_phase(pod) == Some(RUNNING_PHASE)
        && pod_ip(pod).is_some()
}

/// Render `matchLabels` as a `k=v,k=v` label selector
///
/// `matchExpressions` are not rendered; ownership filtering afterwards keeps
/// the result correct even when the selector is broader than the controller's.
pub fn format_label_selector(selector: Option<&LabelSelector>) -> String {
    let empty = BTreeMap::new();
    selector
        .and_then(|s| s.match_labels.as_ref())
        .unwrap_or(&empty)
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

// =============================================================================
// Resolver
// =============================================================================

/// Resolves workload references against the cluster
#[derive(Clone)]
pub struct InstanceResolver {
    cluster: Arc<dyn ClusterApi>,
    rng: SharedRng,
}

impl InstanceResolver {
    /// Create a resolver drawing from `rng` for replica selection
    pub fn new(cluster: Arc<dyn ClusterApi>, rng: SharedRng) -> Self {
        Self { cluster, rng }
    }

    /// Resolve `reference` to one running, addressable pod
    pub async fn resolve(
        &self,
        reference: &WorkloadReference,
    ) -> Result<ResolvedInstance, ResolutionError> {
        let ctx = Ctx(reference);
        debug!(workload = %reference, "Resolving workload");

        let pod = match reference.kind {
            WorkloadKind::Pod => self.resolve_pod(&ctx).await?,
            WorkloadKind::DaemonSet => self.resolve_daemon_set(&ctx).await?,
            WorkloadKind::StatefulSet => self.resolve_stateful_set(&ctx).await?,
            WorkloadKind::Deployment => self.resolve_deployment(&ctx).await?,
        };

        let instance = ResolvedInstance::from_pod(pod);
        info!(
            workload = %reference,
            pod = %instance.name,
            namespace = %instance.namespace,
            ip = %instance.ip,
            "Found running pod"
        );
        Ok(instance)
    }

    async fn resolve_pod(&self, ctx: &Ctx<'_>) -> Result<Pod, ResolutionError> {
        let r = ctx.0;
        let pod = self
            .cluster
            .get_pod(&r.name, &r.namespace)
            .await
            .map_err(|e| ctx.api(e))?
            .ok_or_else(|| ctx.err(ResolutionStage::NotFound, "pod not found"))?;

        let phase = pod_phase(&pod).unwrap_or("Unknown");
        if phase != RUNNING_PHASE {
            return Err(ctx.err(
                ResolutionStage::NotReady,
                format!("pod is not in running state: {}", phase),
            ));
        }
        if pod_ip(&pod).is_none() {
            return Err(ctx.err(
                ResolutionStage::NotReady,
                "pod does not have an IP address",
            ));
        }
        Ok(pod)
    }

    async fn resolve_daemon_set(&self, ctx: &Ctx<'_>) -> Result<Pod, ResolutionError> {
        let r = ctx.0;
        let ds = self
            .cluster
            .get_daemon_set(&r.name, &r.namespace)
            .await
            .map_err(|e| ctx.api(e))?
            .ok_or_else(|| ctx.err(ResolutionStage::NotFound, "daemonset not found"))?;

        let available = ds
            .status
            .as_ref()
            .and_then(|s| s.number_available)
            .unwrap_or(0);
        if available == 0 {
            return Err(ctx.err(
                ResolutionStage::NoCandidates,
                "zero pods are available in the daemonset",
            ));
        }

        let selector = format_label_selector(ds.spec.as_ref().map(|s| &s.selector));
        self.pick_owned_pod(ctx, &ds.metadata, &selector).await
    }

    async fn resolve_stateful_set(&self, ctx: &Ctx<'_>) -> Result<Pod, ResolutionError> {
        let r = ctx.0;
        let sts = self
            .cluster
            .get_stateful_set(&r.name, &r.namespace)
            .await
            .map_err(|e| ctx.api(e))?
            .ok_or_else(|| ctx.err(ResolutionStage::NotFound, "statefulset not found"))?;

        // The API server defaults an omitted replica count to 1
        let replicas = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        if replicas == 0 {
            return Err(ctx.err(
                ResolutionStage::NoCandidates,
                "zero replicas were found in the statefulset",
            ));
        }

        let selector = format_label_selector(sts.spec.as_ref().map(|s| &s.selector));
        self.pick_owned_pod(ctx, &sts.metadata, &selector).await
    }

    async fn resolve_deployment(&self, ctx: &Ctx<'_>) -> Result<Pod, ResolutionError> {
        let r = ctx.0;
        let deploy = self
            .cluster
            .get_deployment(&r.name, &r.namespace)
            .await
            .map_err(|e| ctx.api(e))?
            .ok_or_else(|| ctx.err(ResolutionStage::NotFound, "deployment not found"))?;
        let deploy_uid = deploy.metadata.uid.as_deref().unwrap_or_default();

        let replica_sets = self
            .cluster
            .list_replica_sets(&r.namespace)
            .await
            .map_err(|e| ctx.api(e))?;

        // First owned, non-empty ReplicaSet in listing order. During a rollout
        // this may be the outgoing revision.
        let rs = replica_sets
            .into_iter()
            .filter(|rs| is_controlled_by(&rs.metadata, deploy_uid))
            .find(|rs| {
                let replicas = rs.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
                if replicas < 1 {
                    debug!(
                        replica_set = rs.metadata.name.as_deref().unwrap_or_default(),
                        deployment = %r.name,
                        "Skipping replica set scaled to zero"
                    );
                }
                replicas >= 1
            })
            .ok_or_else(|| {
                ctx.err(
                    ResolutionStage::NoCandidates,
                    "could not find a replica set with replica count >=1 owned by the deployment",
                )
            })?;

        let selector = format_label_selector(rs.spec.as_ref().map(|s| &s.selector));
        self.pick_owned_pod(ctx, &rs.metadata, &selector).await
    }

    async fn pick_owned_pod(
        &self,
        ctx: &Ctx<'_>,
        owner: &ObjectMeta,
        selector: &str,
    ) -> Result<Pod, ResolutionError> {
        let owner_uid = owner.uid.as_deref().unwrap_or_default();
        let pods = self
            .cluster
            .list_running_pods(&ctx.0.namespace, selector)
            .await
            .map_err(|e| ctx.api(e))?;

        let mut candidates: Vec<Pod> = pods
            .into_iter()
            .filter(|pod| is_candidate(pod, owner_uid))
            .collect();

        if candidates.is_empty() {
            return Err(ctx.err(
                ResolutionStage::NoCandidates,
                format!(
                    "unable to find a running pod with an IP owned by {}",
                    owner.name.as_deref().unwrap_or(&ctx.0.name)
                ),
            ));
        }

        let index = self.rng.pick_index(candidates.len());
        trace!(candidates = candidates.len(), index, "Picked candidate pod");
        Ok(candidates.swap_remove(index))
    }
}

/// Error-building context for one resolution
struct Ctx<'a>(&'a WorkloadReference);

impl Ctx<'_> {
    fn err(&self, stage: ResolutionStage, message: impl Into<String>) -> ResolutionError {
        ResolutionError::new(stage, self.0.kind, &self.0.name, &self.0.namespace, message)
    }

    fn api(&self, e: kube::Error) -> ResolutionError {
        self.err(ResolutionStage::Api, e.to_string())
    }
}
