// src/test_runner.rs

//! Test Runner: the smoke test run against an installed formula
//!
//! Test steps run in the environment's `testpath` with the same executor
//! as build steps. Each `run` step must exit with its expected status
//! (0 unless stated), then every assertion attached to it is checked
//! against the captured stdout or stderr. The first unmet expectation ends
//! the test with `Fail(reason)`.

use crate::error::{CapturedOutput, Error, Result};
use crate::executor::{describe, Executor};
use crate::formula::{AssertionSpec, StepSpec, Stream};
use regex::Regex;
use std::path::Path;
use tracing::{info, warn};

/// Result of a test procedure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestOutcome {
    Pass,
    Fail(String),
}

impl TestOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

/// Outcome plus the output of the step that decided it
#[derive(Debug, Clone)]
pub struct TestReport {
    pub outcome: TestOutcome,
    /// Output of the failing step, if any
    pub output: Option<CapturedOutput>,
    pub steps_run: usize,
}

impl TestReport {
    /// Convert a failing report into [`Error::TestFailed`]
    pub fn into_result(self, formula: &str) -> Result<()> {
        match self.outcome {
            TestOutcome::Pass => Ok(()),
            TestOutcome::Fail(reason) => Err(Error::TestFailed {
                formula: formula.to_string(),
                reason,
                output: self.output,
            }),
        }
    }
}

/// Run `steps` as a test procedure
///
/// Only cancellation is returned as `Err`; every other problem is a
/// `Fail` in the report.
pub fn run_tests(executor: &mut Executor<'_>, steps: &[StepSpec]) -> Result<TestReport> {
    let formula = executor.environment().formula().to_string();
    let testpath = executor.environment().testpath().to_path_buf();

    for (i, step) in steps.iter().enumerate() {
        let index = i + 1;
        executor.check_cancelled(|| format!("{} test step {}", formula, index))?;
        info!("{}: test step {}: {}", formula, index, describe(step));

        let output = match executor.execute(step, &testpath) {
            Ok(output) => output,
            Err(e) => {
                return Ok(fail(index, format!("step {}: {}", index, e), None));
            }
        };

        let expected = step.status.unwrap_or(0);
        if output.exit_code != Some(expected) {
            let actual = output
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "terminated".to_string());
            let reason = format!(
                "step {} ({}): expected exit status {}, got {}",
                index,
                describe(step),
                expected,
                actual
            );
            return Ok(fail(index, reason, Some(output)));
        }

        for assertion in &step.assert {
            if let Some(problem) = check_assertion(executor, assertion, &output, &testpath)? {
                let reason = format!("step {} ({}): {}", index, describe(step), problem);
                return Ok(fail(index, reason, Some(output)));
            }
        }
    }

    info!("{}: test passed ({} steps)", formula, steps.len());
    Ok(TestReport {
        outcome: TestOutcome::Pass,
        output: None,
        steps_run: steps.len(),
    })
}

fn fail(steps_run: usize, reason: String, output: Option<CapturedOutput>) -> TestReport {
    warn!("Test failed: {}", reason);
    TestReport {
        outcome: TestOutcome::Fail(reason),
        output,
        steps_run,
    }
}

/// Check one assertion, returning a description of the mismatch
///
/// Placeholders in expected values are substituted first. A substitution
/// or regex error counts as a mismatch rather than an engine error.
pub fn check_assertion(
    executor: &Executor<'_>,
    assertion: &AssertionSpec,
    output: &CapturedOutput,
    testpath: &Path,
) -> Result<Option<String>> {
    let env = executor.environment();
    let expand = |s: &str| env.substitute(s).map_err(|e| e.to_string());
    let (label, actual) = match assertion.stream {
        Stream::Stdout => ("stdout", output.stdout.as_str()),
        Stream::Stderr => ("stderr", output.stderr.as_str()),
    };

    let problem = if let Some(expected) = &assertion.equals {
        match expand(expected) {
            Ok(expected) if actual == expected => None,
            Ok(expected) => Some(format!("{} expected {:?}, got {:?}", label, expected, actual)),
            Err(e) => Some(e),
        }
    } else if let Some(needle) = &assertion.contains {
        match expand(needle) {
            Ok(needle) if actual.contains(&needle) => None,
            Ok(needle) => Some(format!("{} does not contain {:?}: {:?}", label, needle, actual)),
            Err(e) => Some(e),
        }
    } else if let Some(needle) = &assertion.not_contains {
        match expand(needle) {
            Ok(needle) if !actual.contains(&needle) => None,
            Ok(needle) => Some(format!("{} unexpectedly contains {:?}", label, needle)),
            Err(e) => Some(e),
        }
    } else if let Some(pattern) = &assertion.matches {
        match Regex::new(pattern) {
            Ok(re) if re.is_match(actual) => None,
            Ok(_) => Some(format!("{} does not match /{}/: {:?}", label, pattern, actual)),
            Err(e) => Some(format!("invalid pattern /{}/: {}", pattern, e)),
        }
    } else if let Some(pattern) = &assertion.not_matches {
        match Regex::new(pattern) {
            Ok(re) if !re.is_match(actual) => None,
            Ok(_) => Some(format!("{} unexpectedly matches /{}/", label, pattern)),
            Err(e) => Some(format!("invalid pattern /{}/: {}", pattern, e)),
        }
    } else if let Some(path) = &assertion.path_exists {
        match expand(path) {
            Ok(path) if testpath.join(&path).exists() => None,
            Ok(path) => Some(format!("{} does not exist", path)),
            Err(e) => Some(e),
        }
    } else {
        Some("assertion has no check".to_string())
    };
    Ok(problem)
}
