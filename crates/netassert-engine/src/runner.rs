//! Test orchestration
//!
//! [`Engine::run_test`] drives one test through its protocol's flow:
//!
//! - TCP: resolve source and target, inject a scanner into the source, and
//!   compare its exit code with the expected one.
//! - UDP: resolve both ends, inject a sniffer into the destination *then* a
//!   scanner into the source. The sniffer's exit code is compared with the
//!   expected one; the scanner must exit 0 regardless.
//!
//! [`Engine::run_tests`] runs a batch concurrently, one task per test. Each
//! task owns its test and hands it back when done, so outcomes are written
//! without shared state.

use std::sync::Arc;
use std::time::Duration;

use netassert_common::testcase::{Protocol, Target, Test, TestType, WorkloadReference};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::cluster::ClusterApi;
use crate::containers::{
    build_scanner_container, build_sniffer_container, ScannerParams, SnifferParams,
    DEFAULT_INTERFACE, DEFAULT_SNAP_LEN,
};
use crate::diagnostic::DiagnosticOperator;
use crate::error::Error;
use crate::names::{correlation_token, SharedRng, DEFAULT_SUFFIX_LENGTH};
use crate::resolver::{InstanceResolver, ResolvedInstance};

/// Default scanner image
pub const DEFAULT_SCANNER_IMAGE: &str = "docker.io/controlplane/netassertv2-l4-client:latest";
/// Default scanner container-name prefix
pub const DEFAULT_SCANNER_PREFIX: &str = "netassertv2-client";
/// Default sniffer image
pub const DEFAULT_SNIFFER_IMAGE: &str = "docker.io/controlplane/netassertv2-packet-sniffer:latest";
/// Default sniffer container-name prefix
pub const DEFAULT_SNIFFER_PREFIX: &str = "netassertv2-sniffer";
/// Default delay between launching two tests
pub const DEFAULT_PAUSE: Duration = Duration::from_secs(1);

/// Extra capture time granted to the sniffer so it is up before traffic arrives
pub const SNIFFER_GRACE_SECONDS: u32 = 5;
/// Extra wait for the UDP scanner, whose verdict is only a sanity check
pub const UDP_SCANNER_EXTRA_WAIT: Duration = Duration::from_secs(10);
/// UDP scanners send this many times the test's attempts
pub const UDP_SCANNER_ATTEMPT_MULTIPLIER: u32 = 3;

/// Failure reason for tests never launched because the run was cancelled
pub const NOT_RUN_CANCELLED: &str = "not run: cancelled";

const ENGINE_CONFIG_CONTEXT: &str = "engine_config";

// =============================================================================
// Configuration
// =============================================================================

/// Engine settings shared by every test in a run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Scanner image
    pub scanner_image: String,
    /// Scanner container-name prefix
    pub scanner_prefix: String,
    /// Sniffer image
    pub sniffer_image: String,
    /// Sniffer container-name prefix
    pub sniffer_prefix: String,
    /// Length of the random container-name suffix
    pub suffix_length: usize,
    /// Delay between launching two tests
    pub pause: Duration,
    /// Sniffer capture interface
    pub interface: String,
    /// Maximum tests in flight; `None` is unbounded
    pub max_concurrency: Option<usize>,
    /// Delay between sniffer and scanner injection in UDP tests
    ///
    /// Injection returning does not mean the sniffer is already capturing.
    /// Zero keeps injection back to back.
    pub sniffer_settle: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scanner_image: DEFAULT_SCANNER_IMAGE.to_string(),
            scanner_prefix: DEFAULT_SCANNER_PREFIX.to_string(),
            sniffer_image: DEFAULT_SNIFFER_IMAGE.to_string(),
            sniffer_prefix: DEFAULT_SNIFFER_PREFIX.to_string(),
            suffix_length: DEFAULT_SUFFIX_LENGTH,
            pause: DEFAULT_PAUSE,
            interface: DEFAULT_INTERFACE.to_string(),
            max_concurrency: None,
            sniffer_settle: Duration::ZERO,
        }
    }
}

impl EngineConfig {
    /// Reject settings no test could run with
    pub fn validate(&self) -> Result<(), Error> {
        let required = [
            ("scanner image", &self.scanner_image),
            ("scanner prefix", &self.scanner_prefix),
            ("sniffer image", &self.sniffer_image),
            ("sniffer prefix", &self.sniffer_prefix),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(Error::internal_with_context(
                    ENGINE_CONFIG_CONTEXT,
                    format!("{} cannot be empty", field),
                ));
            }
        }
        if self.max_concurrency == Some(0) {
            return Err(Error::internal_with_context(
                ENGINE_CONFIG_CONTEXT,
                "max concurrency must be at least 1",
            ));
        }
        Ok(())
    }

    fn capture_interface(&self) -> &str {
        if self.interface.is_empty() {
            DEFAULT_INTERFACE
        } else {
            &self.interface
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Runs netassert tests against a cluster
pub struct Engine {
    resolver: InstanceResolver,
    operator: Arc<dyn DiagnosticOperator>,
    config: EngineConfig,
    rng: SharedRng,
}

enum Slot {
    Launched { fallback: Test, handle: JoinHandle<Test> },
    NotRun(Test),
}

impl Engine {
    /// Create an engine with an entropy-seeded random source
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        operator: Arc<dyn DiagnosticOperator>,
        config: EngineConfig,
    ) -> Result<Self, Error> {
        Self::with_rng(cluster, operator, config, SharedRng::from_entropy())
    }

    /// Create an engine drawing replica picks and name suffixes from `rng`
    pub fn with_rng(
        cluster: Arc<dyn ClusterApi>,
        operator: Arc<dyn DiagnosticOperator>,
        config: EngineConfig,
        rng: SharedRng,
    ) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            resolver: InstanceResolver::new(cluster, rng.clone()),
            operator,
            config,
            rng,
        })
    }

    /// Engine settings
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run every test concurrently and return them, in input order, with outcomes set
    ///
    /// Launches are spaced by the configured pause. Once `cancel` fires no
    /// further test is launched; those tests come back failed with
    /// [`NOT_RUN_CANCELLED`]. Tests already running see the cancellation in
    /// their waits.
    pub async fn run_tests(self: &Arc<Self>, tests: Vec<Test>, cancel: CancellationToken) -> Vec<Test> {
        let total = tests.len();
        let semaphore = self.config.max_concurrency.map(|n| Arc::new(Semaphore::new(n)));
        let mut slots = Vec::with_capacity(total);

        info!(total, pause_ms = self.config.pause.as_millis() as u64, "Running tests");

        for (index, mut test) in tests.into_iter().enumerate() {
            if index > 0 && !self.pace(&cancel).await {
                debug!(test = %test.name, "Skipping launch, run cancelled");
            }
            if cancel.is_cancelled() {
                test.mark_failed(NOT_RUN_CANCELLED);
                slots.push(Slot::NotRun(test));
                continue;
            }

            let fallback = test.clone();
            let span = info_span!("test", name = %test.name);
            let engine = Arc::clone(self);
            let cancel = cancel.clone();
            let semaphore = semaphore.clone();

            let handle = tokio::spawn(
                async move {
                    let _permit = match semaphore {
                        Some(semaphore) => tokio::select! {
                            permit = semaphore.acquire_owned() => permit.ok(),
                            _ = cancel.cancelled() => {
                                test.mark_failed(NOT_RUN_CANCELLED);
                                return test;
                            }
                        },
                        None => None,
                    };

                    match engine.run_test(&mut test, &cancel).await {
                        Ok(()) => info!("Test passed"),
                        Err(e) => {
                            error!(error = %e, "Test execution failed");
                            test.mark_failed(e.to_string());
                        }
                    }
                    test
                }
                .instrument(span),
            );
            slots.push(Slot::Launched { fallback, handle });
        }

        let mut finished = Vec::with_capacity(total);
        for slot in slots {
            match slot {
                Slot::NotRun(test) => finished.push(test),
                Slot::Launched { fallback, handle } => match handle.await {
                    Ok(test) => finished.push(test),
                    Err(e) => {
                        let mut test = fallback;
                        warn!(test = %test.name, error = %e, "Test task did not complete");
                        test.mark_failed(format!("test task aborted: {}", e));
                        finished.push(test);
                    }
                },
            }
        }
        finished
    }

    /// Wait the configured pause. Returns false if cancelled first.
    async fn pace(&self, cancel: &CancellationToken) -> bool {
        if self.config.pause.is_zero() {
            return !cancel.is_cancelled();
        }
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(self.config.pause) => true,
        }
    }

    /// Run a single test and record a pass on success
    ///
    /// On error the outcome is left untouched; the caller records the failure.
    pub async fn run_test(&self, test: &mut Test, cancel: &CancellationToken) -> Result<(), Error> {
        match test.test_type {
            TestType::K8s => {}
        }

        match test.protocol {
            Protocol::Tcp => self.run_tcp_test(test, cancel).await?,
            Protocol::Udp => self.run_udp_test(test, cancel).await?,
        }

        test.mark_passed();
        Ok(())
    }

    fn source_of<'t>(&self, test: &'t Test) -> Result<&'t WorkloadReference, Error> {
        test.source().ok_or_else(|| {
            Error::invalid_test(
                &test.name,
                "k8sResource field in src is currently the only source allowed",
            )
        })
    }

    async fn run_tcp_test(&self, test: &Test, cancel: &CancellationToken) -> Result<(), Error> {
        // A workload target is resolved to its pod IP, a host is used verbatim
        let (workload, host) = match test.target() {
            Target::Workload(workload) => (Some(workload), ""),
            Target::Host(host) => (None, host),
            Target::Ambiguous => {
                return Err(Error::invalid_test(
                    &test.name,
                    "both dst.host and dst.k8sResource cannot be set at the same time",
                ))
            }
            Target::Missing => {
                return Err(Error::invalid_test(
                    &test.name,
                    "dst must contain either k8sResource or host",
                ))
            }
        };
        let source = self.source_of(test)?;

        info!(protocol = "tcp", port = test.target_port, "Running TCP test");

        let src = self.resolver.resolve(source).await?;
        let target_host = match workload {
            Some(workload) => self.resolver.resolve(workload).await?.ip,
            None => host.to_string(),
        };

        let scanner = build_scanner_container(ScannerParams {
            name: self
                .rng
                .container_name(&self.config.scanner_prefix, self.config.suffix_length),
            image: self.config.scanner_image.clone(),
            target_host,
            target_port: test.target_port,
            protocol: test.protocol.to_string(),
            message: correlation_token(),
            attempts: test.attempts,
        });

        let (_, container) = self.operator.inject(&src.pod, scanner).await?;
        let exit_code = self
            .await_exit_code(&container, &src, test.timeout(), cancel)
            .await?;
        expect_exit_code(&container, test, test.exit_code, exit_code)
    }

    async fn run_udp_test(&self, test: &Test, cancel: &CancellationToken) -> Result<(), Error> {
        let destination = match test.target() {
            Target::Workload(workload) => workload,
            Target::Host(_) | Target::Ambiguous => {
                return Err(Error::unsupported(
                    &test.name,
                    "dst should not contain host object when protocol is udp",
                ))
            }
            Target::Missing => {
                return Err(Error::invalid_test(
                    &test.name,
                    "dst should contain non-nil k8sResource object",
                ))
            }
        };
        let source = self.source_of(test)?;

        info!(protocol = "udp", port = test.target_port, "Running UDP test");

        let src = self.resolver.resolve(source).await?;
        let dst = self.resolver.resolve(destination).await?;
        let token = correlation_token();

        let sniffer = build_sniffer_container(SnifferParams {
            name: self
                .rng
                .container_name(&self.config.sniffer_prefix, self.config.suffix_length),
            image: self.config.sniffer_image.clone(),
            timeout_seconds: test.timeout_seconds.saturating_add(SNIFFER_GRACE_SECONDS),
            interface: self.config.capture_interface().to_string(),
            snap_len: DEFAULT_SNAP_LEN,
            search_string: token.clone(),
            protocol: test.protocol.to_string(),
            matches: test.attempts,
        });
        let scanner = build_scanner_container(ScannerParams {
            name: self
                .rng
                .container_name(&self.config.scanner_prefix, self.config.suffix_length),
            image: self.config.scanner_image.clone(),
            target_host: dst.ip.clone(),
            target_port: test.target_port,
            protocol: test.protocol.to_string(),
            message: token,
            attempts: test.attempts.saturating_mul(UDP_SCANNER_ATTEMPT_MULTIPLIER),
        });

        // Capture must be set up before any traffic is sent
        let (_, sniffer_container) = self.operator.inject(&dst.pod, sniffer).await?;
        if !self.config.sniffer_settle.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(Error::Cancelled { container: sniffer_container });
                }
                _ = tokio::time::sleep(self.config.sniffer_settle) => {}
            }
        }
        let (_, scanner_container) = self.operator.inject(&src.pod, scanner).await?;

        let sniffer_code = self
            .await_exit_code(&sniffer_container, &dst, test.timeout(), cancel)
            .await?;
        expect_exit_code(&sniffer_container, test, test.exit_code, sniffer_code)?;

        let scanner_code = self
            .await_exit_code(
                &scanner_container,
                &src,
                test.timeout() + UDP_SCANNER_EXTRA_WAIT,
                cancel,
            )
            .await?;
        // A connectionless send either happened or the scanner itself broke
        expect_exit_code(&scanner_container, test, 0, scanner_code)
    }

    async fn await_exit_code(
        &self,
        container: &str,
        instance: &ResolvedInstance,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<i32, Error> {
        let exit_code = self
            .operator
            .await_exit_code(
                container,
                &instance.name,
                &instance.namespace,
                timeout,
                cancel.clone(),
            )
            .await?;
        info!(container = %container, exit_code, "Got exit code from ephemeral container");
        Ok(exit_code)
    }
}

fn expect_exit_code(container: &str, test: &Test, expected: i32, actual: i32) -> Result<(), Error> {
    if expected == actual {
        return Ok(());
    }
    Err(Error::ExitCodeMismatch {
        container: container.to_string(),
        test: test.name.clone(),
        expected,
        actual,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::cluster::MockClusterApi;
    use crate::diagnostic::MockDiagnosticOperator;
    use crate::resolver::fixtures::pod;
    use async_trait::async_trait;
    use k8s_openapi::api::core::v1::{EphemeralContainer, Pod};
    use netassert_common::testcase::{
        Destination, Host, Source, WorkloadKind, DEFAULT_ATTEMPTS, DEFAULT_TIMEOUT_SECONDS,
    };
    use parking_lot::Mutex;

    const CLIENT_IP: &str = "10.0.0.5";
    const SERVER_IP: &str = "10.0.0.9";

    fn config() -> EngineConfig {
        EngineConfig {
            pause: Duration::ZERO,
            ..Default::default()
        }
    }

    fn test_case(name: &str, protocol: Protocol, exit_code: i32) -> Test {
        Test {
            name: name.to_string(),
            test_type: TestType::K8s,
            protocol,
            target_port: 80,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            attempts: DEFAULT_ATTEMPTS,
            exit_code,
            src: Some(Source {
                k8s_resource: Some(WorkloadReference::new(WorkloadKind::Pod, "client", "default")),
            }),
            dst: Some(Destination {
                k8s_resource: Some(WorkloadReference::new(WorkloadKind::Pod, "server", "default")),
                host: None,
            }),
            pass: false,
            failure_reason: String::new(),
        }
    }

    /// Cluster where `client` and `server` pods are running with fixed IPs
    fn cluster() -> MockClusterApi {
        let mut cluster = MockClusterApi::new();
        cluster.expect_get_pod().returning(|name, _| {
            let ip = match name {
                "client" => CLIENT_IP,
                "server" => SERVER_IP,
                _ => return Ok(None),
            };
            Ok(Some(pod(name, None, "Running", ip)))
        });
        cluster
    }

    type Injections = Arc<Mutex<Vec<(String, EphemeralContainer)>>>;

    /// Operator that records injections and answers exit codes by container prefix
    fn operator(scanner_code: i32, sniffer_code: i32) -> (MockDiagnosticOperator, Injections) {
        let injections: Injections = Arc::default();
        let recorded = injections.clone();

        let mut operator = MockDiagnosticOperator::new();
        operator.expect_inject().returning(move |pod: &Pod, container| {
            let pod_name = pod.metadata.name.clone().unwrap_or_default();
            let name = container.name.clone();
            recorded.lock().push((pod_name, container));
            Ok((pod.clone(), name))
        });
        operator
            .expect_await_exit_code()
            .returning(move |container, _, _, _, _| {
                if container.starts_with(DEFAULT_SNIFFER_PREFIX) {
                    Ok(sniffer_code)
                } else {
                    Ok(scanner_code)
                }
            });
        (operator, injections)
    }

    fn engine(cluster: MockClusterApi, operator: MockDiagnosticOperator) -> Arc<Engine> {
        Arc::new(
            Engine::with_rng(Arc::new(cluster), Arc::new(operator), config(), SharedRng::seeded(5))
                .expect("config should be valid"),
        )
    }

    fn env_of(container: &EphemeralContainer) -> HashMap<String, String> {
        container
            .env
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|e| (e.name.clone(), e.value.clone().unwrap_or_default()))
            .collect()
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    #[test]
    fn test_default_config_matches_cli_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.scanner_image, DEFAULT_SCANNER_IMAGE);
        assert_eq!(config.sniffer_prefix, "netassertv2-sniffer");
        assert_eq!(config.suffix_length, 9);
        assert_eq!(config.pause, Duration::from_secs(1));
        assert_eq!(config.interface, "eth0");
        assert_eq!(config.max_concurrency, None);
        assert!(config.sniffer_settle.is_zero());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_empty_images_and_zero_cap() {
        let mut config = EngineConfig::default();
        config.scanner_image = " ".to_string();
        assert!(config.validate().unwrap_err().to_string().contains("scanner image"));

        let mut config = EngineConfig::default();
        config.sniffer_prefix.clear();
        assert!(config.validate().is_err());

        let config = EngineConfig {
            max_concurrency: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    // =========================================================================
    // TCP
    // =========================================================================

    mod tcp {
        use super::*;

        /// Story: scanner reaches the server and exits 0 as expected
        #[tokio::test]
        async fn test_scanner_exit_matches_expectation() {
            let (operator, injections) = operator(0, 0);
            let engine = engine(cluster(), operator);

            let mut test = test_case("pod2pod", Protocol::Tcp, 0);
            engine
                .run_test(&mut test, &CancellationToken::new())
                .await
                .expect("test should pass");
            assert!(test.pass);
            assert!(test.failure_reason.is_empty());

            let injections = injections.lock();
            assert_eq!(injections.len(), 1);
            let (pod, container) = &injections[0];
            assert_eq!(pod, "client");
            assert!(container.name.starts_with("netassertv2-client-"));
            let env = env_of(container);
            assert_eq!(env["TARGET_HOST"], SERVER_IP);
            assert_eq!(env["TARGET_PORT"], "80");
            assert_eq!(env["PROTOCOL"], "tcp");
            assert_eq!(env["ATTEMPTS"], "3");
        }

        /// Story: the connection is blocked although it was expected to work
        #[tokio::test]
        async fn test_exit_code_mismatch_fails_with_both_codes() {
            let (operator, _) = operator(1, 0);
            let engine = engine(cluster(), operator);

            let results = engine
                .run_tests(vec![test_case("pod2pod", Protocol::Tcp, 0)], CancellationToken::new())
                .await;
            let test = &results[0];
            assert!(!test.pass);
            assert!(test.failure_reason.contains("is 1 instead of 0"));
            assert!(test.failure_reason.contains("pod2pod"));
        }

        #[tokio::test]
        async fn test_host_target_used_verbatim() {
            let (operator, injections) = operator(0, 0);
            let engine = engine(cluster(), operator);

            let mut test = test_case("to-host", Protocol::Tcp, 0);
            test.dst = Some(Destination {
                k8s_resource: None,
                host: Some(Host {
                    name: "control-plane.io".to_string(),
                }),
            });
            engine
                .run_test(&mut test, &CancellationToken::new())
                .await
                .expect("test should pass");

            let env = env_of(&injections.lock()[0].1);
            assert_eq!(env["TARGET_HOST"], "control-plane.io");
        }

        #[tokio::test]
        async fn test_ambiguous_destination_rejected_before_cluster_calls() {
            let mut cluster = MockClusterApi::new();
            cluster.expect_get_pod().never();
            let mut operator = MockDiagnosticOperator::new();
            operator.expect_inject().never();
            let engine = engine(cluster, operator);

            let mut test = test_case("both", Protocol::Tcp, 0);
            test.dst.as_mut().unwrap().host = Some(Host {
                name: "1.1.1.1".to_string(),
            });
            let err = engine
                .run_test(&mut test, &CancellationToken::new())
                .await
                .unwrap_err();
            assert!(matches!(err, Error::InvalidTest { .. }));
            assert!(!test.pass);
        }

        #[tokio::test]
        async fn test_timeout_is_a_failure() {
            let mut operator = MockDiagnosticOperator::new();
            operator
                .expect_inject()
                .returning(|pod, c| Ok((pod.clone(), c.name)));
            operator
                .expect_await_exit_code()
                .returning(|container, _, _, timeout, _| {
                    Err(Error::Timeout {
                        container: container.to_string(),
                        timeout,
                    })
                });
            let engine = engine(cluster(), operator);

            let results = engine
                .run_tests(vec![test_case("slow", Protocol::Tcp, 0)], CancellationToken::new())
                .await;
            assert!(!results[0].pass);
            assert!(results[0].failure_reason.contains("did not reach termination state"));
        }

        #[tokio::test]
        async fn test_unresolvable_source_is_reported() {
            let (operator, injections) = operator(0, 0);
            let engine = engine(cluster(), operator);

            let mut test = test_case("ghost", Protocol::Tcp, 0);
            test.src = Some(Source {
                k8s_resource: Some(WorkloadReference::new(WorkloadKind::Pod, "ghost", "default")),
            });
            let results = engine.run_tests(vec![test], CancellationToken::new()).await;
            assert!(!results[0].pass);
            assert!(results[0].failure_reason.contains("default/ghost"));
            assert!(injections.lock().is_empty());
        }
    }

    // =========================================================================
    // UDP
    // =========================================================================

    mod udp {
        use super::*;

        /// Story: the sniffer sees the packets and the scanner sent them
        #[tokio::test]
        async fn test_sniffer_match_and_clean_scanner_passes() {
            let (operator, injections) = operator(0, 0);
            let engine = engine(cluster(), operator);

            let mut test = test_case("udp", Protocol::Udp, 0);
            engine
                .run_test(&mut test, &CancellationToken::new())
                .await
                .expect("test should pass");
            assert!(test.pass);

            let injections = injections.lock();
            assert_eq!(injections.len(), 2);

            // Sniffer into the destination first, then scanner into the source
            let (sniffer_pod, sniffer) = &injections[0];
            let (scanner_pod, scanner) = &injections[1];
            assert_eq!(sniffer_pod, "server");
            assert!(sniffer.name.starts_with("netassertv2-sniffer-"));
            assert_eq!(scanner_pod, "client");
            assert!(scanner.name.starts_with("netassertv2-client-"));

            let sniffer_env = env_of(sniffer);
            let scanner_env = env_of(scanner);
            assert_eq!(sniffer_env["TIMEOUT_SECONDS"], "20");
            assert_eq!(sniffer_env["MATCHES"], "3");
            assert_eq!(sniffer_env["SNAPLEN"], "1024");
            assert_eq!(sniffer_env["IFACE"], "eth0");
            assert_eq!(scanner_env["ATTEMPTS"], "9");
            assert_eq!(scanner_env["TARGET_HOST"], SERVER_IP);
            assert_eq!(scanner_env["PROTOCOL"], "udp");
            assert_eq!(sniffer_env["SEARCH_STRING"], scanner_env["MESSAGE"]);
        }

        /// Story: packets arrived but the scanner reported a broken send
        #[tokio::test]
        async fn test_scanner_failure_overrides_sniffer_match() {
            let (operator, _) = operator(2, 0);
            let engine = engine(cluster(), operator);

            let results = engine
                .run_tests(vec![test_case("udp", Protocol::Udp, 0)], CancellationToken::new())
                .await;
            let test = &results[0];
            assert!(!test.pass);
            assert!(test.failure_reason.contains("netassertv2-client-"));
            assert!(test.failure_reason.contains("is 2 instead of 0"));
        }

        /// Story: a deny test where the sniffer correctly saw nothing
        #[tokio::test]
        async fn test_sniffer_code_decides_expected_deny() {
            let (operator, _) = operator(0, 1);
            let engine = engine(cluster(), operator);

            let mut test = test_case("udp-deny", Protocol::Udp, 1);
            engine
                .run_test(&mut test, &CancellationToken::new())
                .await
                .expect("deny should pass");
            assert!(test.pass);
        }

        #[tokio::test]
        async fn test_sniffer_mismatch_fails() {
            let (operator, _) = operator(0, 1);
            let engine = engine(cluster(), operator);

            let mut test = test_case("udp", Protocol::Udp, 0);
            let err = engine
                .run_test(&mut test, &CancellationToken::new())
                .await
                .unwrap_err();
            match err {
                Error::ExitCodeMismatch {
                    container,
                    expected,
                    actual,
                    ..
                } => {
                    assert!(container.starts_with("netassertv2-sniffer-"));
                    assert_eq!(expected, 0);
                    assert_eq!(actual, 1);
                }
                other => panic!("unexpected error {:?}", other),
            }
        }

        #[tokio::test]
        async fn test_wait_windows() {
            let windows: Arc<Mutex<Vec<(String, Duration)>>> = Arc::default();
            let recorded = windows.clone();

            let mut operator = MockDiagnosticOperator::new();
            operator
                .expect_inject()
                .returning(|pod, c| Ok((pod.clone(), c.name)));
            operator
                .expect_await_exit_code()
                .returning(move |container, _, _, timeout, _| {
                    recorded.lock().push((container.to_string(), timeout));
                    Ok(0)
                });
            let engine = engine(cluster(), operator);

            let mut test = test_case("udp", Protocol::Udp, 0);
            engine
                .run_test(&mut test, &CancellationToken::new())
                .await
                .expect("test should pass");

            let windows = windows.lock();
            assert_eq!(windows.len(), 2);
            assert!(windows[0].0.starts_with("netassertv2-sniffer-"));
            assert_eq!(windows[0].1, Duration::from_secs(15));
            assert!(windows[1].0.starts_with("netassertv2-client-"));
            assert_eq!(windows[1].1, Duration::from_secs(25));
        }

        #[tokio::test]
        async fn test_host_destination_unsupported() {
            let mut operator = MockDiagnosticOperator::new();
            operator.expect_inject().never();
            let engine = engine(cluster(), operator);

            let mut test = test_case("udp-host", Protocol::Udp, 0);
            test.dst = Some(Destination {
                k8s_resource: None,
                host: Some(Host {
                    name: "8.8.8.8".to_string(),
                }),
            });
            let err = engine
                .run_test(&mut test, &CancellationToken::new())
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Unsupported { .. }));
        }
    }

    // =========================================================================
    // Batch runs
    // =========================================================================

    mod batch {
        use super::*;

        /// Story: a large suite finishes with every outcome recorded, in order
        #[tokio::test]
        async fn test_every_test_settled_in_input_order() {
            let (operator, _) = operator(0, 0);
            let engine = engine(cluster(), operator);

            let mut tests: Vec<Test> = (0..20)
                .map(|i| test_case(&format!("t{}", i), Protocol::Tcp, 0))
                .collect();
            // Mix in failures that must not affect siblings
            tests[3].exit_code = 1;
            tests[7].src = Some(Source {
                k8s_resource: Some(WorkloadReference::new(WorkloadKind::Pod, "ghost", "default")),
            });

            let results = engine.run_tests(tests, CancellationToken::new()).await;
            assert_eq!(results.len(), 20);
            for (i, test) in results.iter().enumerate() {
                assert_eq!(test.name, format!("t{}", i));
                assert!(test.is_settled());
                if i == 3 || i == 7 {
                    assert!(!test.pass);
                    assert!(!test.failure_reason.is_empty());
                } else {
                    assert!(test.pass, "{} should pass: {}", test.name, test.failure_reason);
                }
            }
        }

        #[tokio::test]
        async fn test_empty_batch() {
            let (operator, _) = operator(0, 0);
            let engine = engine(cluster(), operator);
            assert!(engine.run_tests(vec![], CancellationToken::new()).await.is_empty());
        }

        /// Story: the operator interrupted the run before it started
        #[tokio::test]
        async fn test_pre_cancelled_run_launches_nothing() {
            let mut operator = MockDiagnosticOperator::new();
            operator.expect_inject().never();
            let engine = engine(cluster(), operator);

            let cancel = CancellationToken::new();
            cancel.cancel();
            let tests = vec![
                test_case("a", Protocol::Tcp, 0),
                test_case("b", Protocol::Udp, 0),
            ];
            let results = engine.run_tests(tests, cancel).await;
            assert_eq!(results.len(), 2);
            for test in &results {
                assert!(!test.pass);
                assert_eq!(test.failure_reason, NOT_RUN_CANCELLED);
            }
        }

        /// Story: the operator pressed interrupt while launches were being paced
        #[tokio::test(start_paused = true)]
        async fn test_cancel_during_pacing_stops_further_launches() {
            let (operator, injections) = operator(0, 0);
            let engine = Arc::new(
                Engine::with_rng(
                    Arc::new(cluster()),
                    Arc::new(operator),
                    EngineConfig {
                        pause: Duration::from_secs(10),
                        ..Default::default()
                    },
                    SharedRng::seeded(5),
                )
                .unwrap(),
            );

            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                trigger.cancel();
            });

            let tests = vec![
                test_case("first", Protocol::Tcp, 0),
                test_case("second", Protocol::Tcp, 0),
                test_case("third", Protocol::Tcp, 0),
            ];
            let results = engine.run_tests(tests, cancel).await;

            assert!(results[0].pass);
            assert_eq!(results[1].failure_reason, NOT_RUN_CANCELLED);
            assert_eq!(results[2].failure_reason, NOT_RUN_CANCELLED);
            assert_eq!(injections.lock().len(), 1);
        }

        #[tokio::test(start_paused = true)]
        async fn test_pacing_spaces_launches() {
            let (operator, _) = operator(0, 0);
            let engine = Arc::new(
                Engine::with_rng(
                    Arc::new(cluster()),
                    Arc::new(operator),
                    EngineConfig {
                        pause: Duration::from_secs(1),
                        ..Default::default()
                    },
                    SharedRng::seeded(5),
                )
                .unwrap(),
            );

            let start = tokio::time::Instant::now();
            let tests = (0..3)
                .map(|i| test_case(&format!("t{}", i), Protocol::Tcp, 0))
                .collect();
            let results = engine.run_tests(tests, CancellationToken::new()).await;

            assert!(results.iter().all(|t| t.pass));
            let elapsed = start.elapsed();
            assert!(elapsed >= Duration::from_secs(2));
            assert!(elapsed < Duration::from_secs(3));
        }

        /// Operator whose waits panic, standing in for a bug inside a task
        struct PanickingOperator;

        #[async_trait]
        impl DiagnosticOperator for PanickingOperator {
            async fn inject(
                &self,
                pod: &Pod,
                container: EphemeralContainer,
            ) -> Result<(Pod, String), Error> {
                Ok((pod.clone(), container.name))
            }

            async fn await_exit_code(
                &self,
                _container: &str,
                _pod: &str,
                _namespace: &str,
                _timeout: Duration,
                _cancel: CancellationToken,
            ) -> Result<i32, Error> {
                panic!("watch exploded")
            }
        }

        /// Story: a bug in one test's task does not take the run down
        #[tokio::test]
        async fn test_panicking_task_becomes_failure() {
            let engine = Arc::new(
                Engine::with_rng(
                    Arc::new(cluster()),
                    Arc::new(PanickingOperator),
                    config(),
                    SharedRng::seeded(5),
                )
                .unwrap(),
            );

            let tests = vec![
                test_case("boom", Protocol::Tcp, 0),
                test_case("boom-too", Protocol::Tcp, 0),
            ];
            let results = engine.run_tests(tests, CancellationToken::new()).await;
            assert_eq!(results[0].name, "boom");
            assert!(!results[0].pass);
            assert!(results[0].failure_reason.starts_with("test task aborted"));
            assert!(results[1].is_settled());
        }

        /// Operator whose waits take a second, tracking how many overlap
        #[derive(Default)]
        struct SlowOperator {
            in_flight: AtomicUsize,
            peak: AtomicUsize,
        }

        #[async_trait]
        impl DiagnosticOperator for SlowOperator {
            async fn inject(
                &self,
                pod: &Pod,
                container: EphemeralContainer,
            ) -> Result<(Pod, String), Error> {
                Ok((pod.clone(), container.name))
            }

            async fn await_exit_code(
                &self,
                _container: &str,
                _pod: &str,
                _namespace: &str,
                _timeout: Duration,
                _cancel: CancellationToken,
            ) -> Result<i32, Error> {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(1)).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(0)
            }
        }

        #[tokio::test(start_paused = true)]
        async fn test_concurrency_cap_is_respected() {
            let operator = Arc::new(SlowOperator::default());
            let engine = Arc::new(
                Engine::with_rng(
                    Arc::new(cluster()),
                    operator.clone(),
                    EngineConfig {
                        pause: Duration::ZERO,
                        max_concurrency: Some(2),
                        ..Default::default()
                    },
                    SharedRng::seeded(5),
                )
                .unwrap(),
            );

            let tests = (0..6)
                .map(|i| test_case(&format!("t{}", i), Protocol::Tcp, 0))
                .collect();
            let results = engine.run_tests(tests, CancellationToken::new()).await;

            assert!(results.iter().all(|t| t.pass));
            assert_eq!(operator.peak.load(Ordering::SeqCst), 2);
        }

        #[tokio::test(start_paused = true)]
        async fn test_unbounded_by_default() {
            let operator = Arc::new(SlowOperator::default());
            let engine = Arc::new(
                Engine::with_rng(Arc::new(cluster()), operator.clone(), config(), SharedRng::seeded(5))
                    .unwrap(),
            );

            let tests = (0..6)
                .map(|i| test_case(&format!("t{}", i), Protocol::Tcp, 0))
                .collect();
            engine.run_tests(tests, CancellationToken::new()).await;
            assert_eq!(operator.peak.load(Ordering::SeqCst), 6);
        }
    }
}
