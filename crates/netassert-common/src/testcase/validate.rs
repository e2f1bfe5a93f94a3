//! Semantic validation of test cases
//!
//! Schema errors (unknown protocol, wrong types) are rejected by serde while
//! decoding. Everything else is checked here, collecting every problem of a
//! single test into one error so a document can be fixed in one pass.

use std::collections::HashSet;

use super::{Destination, Protocol, Source, Test, WorkloadReference};
use crate::{Error, Result};

fn check_workload(workload: &WorkloadReference, problems: &mut Vec<String>) {
    if workload.name.is_empty() {
        problems.push("k8sResource name is missing".to_string());
    }
    if workload.namespace.is_empty() {
        problems.push("k8sResource namespace is missing".to_string());
    }
}

fn check_source(src: Option<&Source>, problems: &mut Vec<String>) {
    match src {
        None => problems.push("src block must be present".to_string()),
        Some(Source { k8s_resource: None }) => problems
            .push("k8sResource field in src is currently the only source allowed".to_string()),
        Some(Source {
            k8s_resource: Some(workload),
        }) => check_workload(workload, problems),
    }
}

fn check_destination(dst: Option<&Destination>, protocol: Protocol, problems: &mut Vec<String>) {
    let Some(dst) = dst else {
        problems.push("dst block must be present".to_string());
        return;
    };

    match (&dst.k8s_resource, &dst.host) {
        (Some(_), Some(_)) => {
            problems.push("dst field only supports k8sResource or host but not both".to_string())
        }
        (None, None) => problems.push("dst must contain either k8sResource or host".to_string()),
        (Some(workload), None) => check_workload(workload, problems),
        (None, Some(host)) => {
            if host.name.is_empty() {
                problems.push("host field is set to empty string".to_string());
            }
        }
    }

    if protocol == Protocol::Udp && dst.host.is_some() {
        problems.push("with udp tests the destination must be a k8sResource".to_string());
    }
}

/// Validate a single, already defaulted, test case
pub fn validate_test(test: &Test) -> Result<()> {
    let mut problems = Vec::new();

    if test.name.is_empty() {
        problems.push("name field is missing".to_string());
    }
    if !(1..=65535).contains(&test.target_port) {
        problems.push(format!("targetPort out of range: {}", test.target_port));
    }
    if test.attempts < 1 {
        problems.push("attempts must be > 0".to_string());
    }
    if test.timeout_seconds < 1 {
        problems.push("timeoutSeconds must be > 0".to_string());
    }

    check_source(test.src.as_ref(), &mut problems);
    check_destination(test.dst.as_ref(), test.protocol, &mut problems);

    if problems.is_empty() {
        Ok(())
    } else {
        let name = if test.name.is_empty() {
            "<unnamed>"
        } else {
            test.name.as_str()
        };
        Err(Error::validation_for(name, problems.join("; ")))
    }
}

/// Validate a whole set of tests: every test individually, then name uniqueness
pub fn validate_tests(tests: &[Test]) -> Result<()> {
    let mut names = HashSet::with_capacity(tests.len());

    for test in tests {
        validate_test(test)?;

        if !names.insert(test.name.as_str()) {
            return Err(Error::validation_for(
                &test.name,
                format!("duplicate test name found {:?}", test.name),
            ));
        }
    }

    Ok(())
}
