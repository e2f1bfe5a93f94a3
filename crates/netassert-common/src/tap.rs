//! TAP (Test Anything Protocol) report for a finished run
//!
//! Output follows TAP version 14: a version line, a plan, then one
//! `ok`/`not ok` line per test. Failures carry a YAML diagnostic block with
//! the failure reason.

use std::io::Write;

use crate::testcase::Test;
use crate::{Error, Result};

const TAP_VERSION_LINE: &str = "TAP version 14";

/// Pass/fail counts for a finished run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    /// Tests that passed
    pub passed: usize,
    /// Tests that failed
    pub failed: usize,
}

impl Summary {
    /// Total number of tests
    pub fn total(&self) -> usize {
        self.passed + self.failed
    }

    /// True when no test failed
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

/// Count passed and failed tests
pub fn summarize(tests: &[Test]) -> Summary {
    tests.iter().fold(Summary::default(), |mut acc, test| {
        if test.pass {
            acc.passed += 1;
        } else {
            acc.failed += 1;
        }
        acc
    })
}

/// Render the failure reason as a YAML scalar indented for the diagnostic block
fn yaml_reason(reason: &str) -> Result<String> {
    let escaped = serde_yaml::to_string(reason)
        .map_err(|e| Error::report(format!("failed to encode failure reason: {}", e)))?;
    Ok(escaped.trim_end_matches('\n').replace('\n', "\n  "))
}

/// Write the TAP report for `tests` to `w`
pub fn write_tap<W: Write>(tests: &[Test], w: &mut W) -> Result<()> {
    if tests.is_empty() {
        return Err(Error::report("no tests were found"));
    }

    let io_err = |e: std::io::Error| Error::report(format!("failed to write TAP output: {}", e));

    writeln!(w, "{}", TAP_VERSION_LINE).map_err(io_err)?;
    writeln!(w, "1..{}", tests.len()).map_err(io_err)?;

    for (index, test) in tests.iter().enumerate() {
        let number = index + 1;
        if test.pass {
            writeln!(w, "ok {} - {}", number, test.name).map_err(io_err)?;
        } else {
            writeln!(w, "not ok {} - {}", number, test.name).map_err(io_err)?;
            writeln!(w, "  ---").map_err(io_err)?;
            writeln!(w, "  reason: {}", yaml_reason(&test.failure_reason)?).map_err(io_err)?;
            writeln!(w, "  ...").map_err(io_err)?;
        }
    }

    Ok(())
}
