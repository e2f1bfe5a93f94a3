//! NetAssert test-case model
//!
//! A [`Test`] is one connectivity assertion: "can the source workload reach the
//! destination on this port/protocol, and does the diagnostic exit code match
//! what we expect?". Tests are read from YAML documents (see [`load`]),
//! defaulted, validated (see [`validate`]) and then handed to the engine, which
//! is the only writer of the outcome fields.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod load;
pub mod validate;

pub use load::{load_from_dir, load_from_file, load_from_reader, load_from_str};
pub use validate::{validate_test, validate_tests};

/// Timeout applied when a test omits `timeoutSeconds`
pub const DEFAULT_TIMEOUT_SECONDS: u32 = 15;

/// Attempt count applied when a test omits `attempts`
pub const DEFAULT_ATTEMPTS: u32 = 3;

/// Layer-4 protocol exercised by a test
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Connection-oriented; judged by the scanner's exit code alone
    #[default]
    Tcp,
    /// Connectionless; judged by a sniffer co-located with the destination
    Udp,
}

impl Protocol {
    /// Wire value passed to the diagnostic images
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of test. Only Kubernetes tests exist today.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TestType {
    /// Source and (optionally) destination are Kubernetes workloads
    #[serde(rename = "k8s")]
    K8s,
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestType::K8s => f.write_str("k8s"),
        }
    }
}

/// Workload kinds that can be resolved to a running pod
///
/// Kinds are matched case-insensitively when read from a document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadKind {
    /// apps/v1 Deployment, resolved through its ReplicaSets
    Deployment,
    /// apps/v1 StatefulSet
    StatefulSet,
    /// apps/v1 DaemonSet
    DaemonSet,
    /// core/v1 Pod
    Pod,
}

impl WorkloadKind {
    /// Lower-case kind as written in test documents
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadKind::Deployment => "deployment",
            WorkloadKind::StatefulSet => "statefulset",
            WorkloadKind::DaemonSet => "daemonset",
            WorkloadKind::Pod => "pod",
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkloadKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "deployment" => Ok(WorkloadKind::Deployment),
            "statefulset" => Ok(WorkloadKind::StatefulSet),
            "daemonset" => Ok(WorkloadKind::DaemonSet),
            "pod" => Ok(WorkloadKind::Pod),
            _ => Err(format!(
                "unsupported k8sResource kind {:?}, expected one of deployment, statefulset, daemonset, pod",
                s
            )),
        }
    }
}

impl<'de> Deserialize<'de> for WorkloadKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A named workload in a namespace, used as test source or destination
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkloadReference {
    /// Workload kind
    pub kind: WorkloadKind,
    /// Workload name
    #[serde(default)]
    pub name: String,
    /// Workload namespace
    #[serde(default)]
    pub namespace: String,
}

impl WorkloadReference {
    /// Create a new reference
    pub fn new(kind: WorkloadKind, name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl fmt::Display for WorkloadReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// Test source. Only workloads can act as a source.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    /// The workload the scanner is injected into
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k8s_resource: Option<WorkloadReference>,
}

/// A host outside the cluster (or any literal address) used as destination
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    /// Hostname or IP address
    #[serde(default)]
    pub name: String,
}

/// Test destination: exactly one of a workload or a host
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    /// Destination workload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k8s_resource: Option<WorkloadReference>,
    /// Destination host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<Host>,
}

/// Borrowed view of where a test sends its traffic
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target<'a> {
    /// Resolve this workload and target its pod IP
    Workload(&'a WorkloadReference),
    /// Target this literal host
    Host(&'a str),
    /// Both a workload and a host were given
    Ambiguous,
    /// No destination was given
    Missing,
}

/// One connectivity assertion plus its outcome
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Test {
    /// Unique name within a run
    #[serde(default)]
    pub name: String,
    /// Test type
    #[serde(rename = "type")]
    pub test_type: TestType,
    /// Protocol; defaults to tcp
    #[serde(default)]
    pub protocol: Protocol,
    /// Destination port (1-65535)
    #[serde(default)]
    pub target_port: u32,
    /// Seconds to wait for the diagnostic verdict; defaults to 15
    #[serde(default)]
    pub timeout_seconds: u32,
    /// Attempts the diagnostic image makes; defaults to 3
    #[serde(default)]
    pub attempts: u32,
    /// Expected exit code of the deciding diagnostic container
    #[serde(default)]
    pub exit_code: i32,
    /// Test source
    #[serde(default)]
    pub src: Option<Source>,
    /// Test destination
    #[serde(default)]
    pub dst: Option<Destination>,
    /// Outcome: set by the engine only
    #[serde(default)]
    pub pass: bool,
    /// Outcome: set by the engine only, empty when `pass` is true
    #[serde(default)]
    pub failure_reason: String,
}

impl Test {
    /// Fill in omitted (zero) fields with their defaults
    pub fn apply_defaults(&mut self) {
        if self.timeout_seconds == 0 {
            self.timeout_seconds = DEFAULT_TIMEOUT_SECONDS;
        }
        if self.attempts == 0 {
            self.attempts = DEFAULT_ATTEMPTS;
        }
    }

    /// Clear the outcome fields
    pub fn reset_outcome(&mut self) {
        self.pass = false;
        self.failure_reason.clear();
    }

    /// Record a successful run
    pub fn mark_passed(&mut self) {
        self.pass = true;
        self.failure_reason.clear();
    }

    /// Record a failed run. An empty reason is replaced so the failure stays visible.
    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        self.pass = false;
        self.failure_reason = if reason.is_empty() {
            "test failed without a reason".to_string()
        } else {
            reason
        };
    }

    /// True once the engine has recorded either outcome
    pub fn is_settled(&self) -> bool {
        self.pass || !self.failure_reason.is_empty()
    }

    /// Verdict timeout as a duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.timeout_seconds))
    }

    /// Source workload, if one is set
    pub fn source(&self) -> Option<&WorkloadReference> {
        self.src.as_ref().and_then(|s| s.k8s_resource.as_ref())
    }

    /// Where this test sends traffic
    pub fn target(&self) -> Target<'_> {
        let Some(dst) = self.dst.as_ref() else {
            return Target::Missing;
        };
        match (dst.k8s_resource.as_ref(), dst.host.as_ref()) {
            (Some(_), Some(_)) => Target::Ambiguous,
            (Some(workload), None) => Target::Workload(workload),
            (None, Some(host)) => Target::Host(&host.name),
            (None, None) => Target::Missing,
        }
    }
}
