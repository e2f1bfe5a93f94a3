//! netassert engine: resolves workloads to pods and drives diagnostic containers
//!
//! The [`Engine`] runs each test by injecting ephemeral containers into
//! running pods and turning their exit codes into pass/fail outcomes.
//! Cluster access goes through the [`cluster::ClusterApi`] and
//! [`diagnostic::DiagnosticOperator`] traits so the orchestration can be
//! tested without a cluster.

#![deny(missing_docs)]

pub mod cluster;
pub mod containers;
pub mod diagnostic;
pub mod error;
pub mod names;
pub mod preflight;
pub mod resolver;
pub mod runner;

pub use error::{Error, ResolutionError, ResolutionStage};
pub use runner::{Engine, EngineConfig};
