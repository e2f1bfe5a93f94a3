//! Ephemeral diagnostic container specs
//!
//! The scanner and sniffer images read their parameters from environment
//! variables; names and order below are the contract those images implement.

use k8s_openapi::api::core::v1::{Capabilities, EnvVar, EphemeralContainer, SecurityContext};

/// Packet capture snap length handed to the sniffer
pub const DEFAULT_SNAP_LEN: u32 = 1024;

/// Interface the sniffer captures on when none is configured
pub const DEFAULT_INTERFACE: &str = "eth0";

/// Capability the sniffer needs to open a raw socket
pub const NET_RAW_CAPABILITY: &str = "NET_RAW";

/// Parameters for a scanner (traffic generator) container
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScannerParams {
    /// Container name
    pub name: String,
    /// Container image
    pub image: String,
    /// Host or IP to connect to
    pub target_host: String,
    /// Port to connect to
    pub target_port: u32,
    /// `tcp` or `udp`
    pub protocol: String,
    /// Payload sent to the target; doubles as the correlation token
    pub message: String,
    /// Number of connection/send attempts
    pub attempts: u32,
}

/// Parameters for a sniffer (packet observer) container
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnifferParams {
    /// Container name
    pub name: String,
    /// Container image
    pub image: String,
    /// Capture window in seconds
    pub timeout_seconds: u32,
    /// Capture interface
    pub interface: String,
    /// Bytes captured per packet
    pub snap_len: u32,
    /// Payload to look for; the paired scanner's message
    pub search_string: String,
    /// `tcp` or `udp`
    pub protocol: String,
    /// Matches required before exiting 0
    pub matches: u32,
}

fn env(name: &str, value: impl ToString) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        value_from: None,
    }
}

fn diagnostic_container(
    name: String,
    image: String,
    env: Vec<EnvVar>,
    security_context: SecurityContext,
) -> EphemeralContainer {
    EphemeralContainer {
        name,
        image: Some(image),
        env: Some(env),
        stdin: Some(false),
        stdin_once: Some(false),
        tty: Some(false),
        security_context: Some(security_context),
        // Unset: share the pod's network namespace rather than one container's
        target_container_name: None,
        ..Default::default()
    }
}

/// Build the scanner container spec
pub fn build_scanner_container(params: ScannerParams) -> EphemeralContainer {
    let env = vec![
        env("TARGET_HOST", &params.target_host),
        env("TARGET_PORT", params.target_port),
        env("PROTOCOL", &params.protocol),
        env("MESSAGE", &params.message),
        env("ATTEMPTS", params.attempts),
    ];
    let security = SecurityContext {
        run_as_non_root: Some(true),
        allow_privilege_escalation: Some(false),
        ..Default::default()
    };
    diagnostic_container(params.name, params.image, env, security)
}

/// Build the sniffer container spec
pub fn build_sniffer_container(params: SnifferParams) -> EphemeralContainer {
    let env = vec![
        env("TIMEOUT_SECONDS", params.timeout_seconds),
        env("IFACE", &params.interface),
        env("SNAPLEN", params.snap_len),
        env("SEARCH_STRING", &params.search_string),
        env("PROTOCOL", &params.protocol),
        env("MATCHES", params.matches),
    ];
    let security = SecurityContext {
        capabilities: Some(Capabilities {
            add: Some(vec![NET_RAW_CAPABILITY.to_string()]),
            drop: None,
        }),
        run_as_non_root: Some(true),
        allow_privilege_escalation: Some(false),
        ..Default::default()
    };
    diagnostic_container(params.name, params.image, env, security)
}
