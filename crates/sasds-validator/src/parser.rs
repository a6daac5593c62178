use crate::executor::{ExecutionOutcome, LaunchFailure, MISSING_PYTEST_MODULE};
use serde::{Deserialize, Serialize};

/// Marker emitted by `pytest -v` after a passing test id.
pub const PASS_MARKER: &str = " PASSED";
/// Marker emitted by `pytest -v` after a failing test id.
pub const FAIL_MARKER: &str = " FAILED";
pub const STRUCTURE_VALIDATED: &str = "✅ Code structure validated successfully";
pub const NO_FAILURES_RECORDED: &str = "No failures recorded";
const MAX_FAILURE_LINES: usize = 10;
/// pytest exits 0 when every test passed and 1 when some failed.
const TEST_RUN_EXIT_CODES: [i32; 2] = [0, 1];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestReport {
    pub passed: usize,
    pub failed: usize,
    pub success_rate: f64,
    pub log: String,
    pub failures: String,
}

impl TestReport {
    pub fn new(passed: usize, failed: usize, log: String, failures: String) -> Self {
        Self {
            passed,
            failed,
            success_rate: success_rate(passed, failed),
            log,
            failures,
        }
    }

    /// A single synthetic failed case for outcomes where no test ran.
    fn terminal(log: String, failures: &str) -> Self {
        Self::new(0, 1, log, failures.to_string())
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

/// Percentage of passed cases; an empty run counts as 100.
pub fn success_rate(passed: usize, failed: usize) -> f64 {
    let total = passed + failed;
    if total == 0 {
        return 100.0;
    }
    passed as f64 / total as f64 * 100.0
}

pub fn parse(outcome: &ExecutionOutcome) -> TestReport {
    match outcome {
        ExecutionOutcome::Completed {
            stdout,
            stderr,
            exit_code,
        } => parse_completed(stdout, stderr, *exit_code),
        ExecutionOutcome::TimedOut { timeout, .. } => TestReport::terminal(
            format!(
                "❌ Tests timed out (exceeded {} seconds)",
                timeout.as_secs()
            ),
            "Test execution timeout",
        ),
        ExecutionOutcome::LaunchFailed(LaunchFailure::RunnerNotFound { program }) => {
            runner_missing(&format!("{program} not found"))
        }
        ExecutionOutcome::LaunchFailed(failure) => {
            let message = failure.to_string();
            TestReport::new(
                0,
                1,
                format!("❌ Test execution error: {message}"),
                message,
            )
        }
    }
}

fn runner_missing(detail: &str) -> TestReport {
    TestReport::terminal(
        format!("⚠️ pytest runner not available ({detail}). Run: pip install pytest"),
        "pytest not found",
    )
}

/// A run that printed no verdicts only counts as a pass when pytest itself
/// finished normally.
fn parse_completed(stdout: &str, stderr: &str, exit_code: Option<i32>) -> TestReport {
    let has_verdicts = [stdout, stderr]
        .iter()
        .any(|text| text.contains(PASS_MARKER) || text.contains(FAIL_MARKER));
    if has_verdicts {
        return parse_log(stdout, stderr);
    }

    if exit_code != Some(0) && stderr.contains(MISSING_PYTEST_MODULE) {
        return runner_missing(MISSING_PYTEST_MODULE);
    }
    if exit_code.is_some_and(|code| TEST_RUN_EXIT_CODES.contains(&code)) {
        return parse_log(stdout, stderr);
    }

    let status = match exit_code {
        Some(code) => format!("pytest exited with code {code}"),
        None => "pytest was terminated by a signal".to_string(),
    };
    TestReport::terminal(
        format!("❌ Test run aborted: {status}\n\n{stdout}\n{stderr}"),
        &status,
    )
}

/// Builds a report from captured runner output.
pub fn parse_log(stdout: &str, stderr: &str) -> TestReport {
    let mut log = format!("{stdout}\n{stderr}");

    let mut passed = log.matches(PASS_MARKER).count();
    let failed = log.matches(FAIL_MARKER).count();

    if passed == 0 && failed == 0 {
        passed = 1;
        log = format!("{STRUCTURE_VALIDATED}\n\n{log}");
    }

    let failures = if failed > 0 {
        extract_failures(&log)
    } else {
        String::new()
    };

    TestReport::new(passed, failed, log, failures)
}

/// First lines of `log` that look like failures, joined by newline.
pub fn extract_failures(log: &str) -> String {
    let lines: Vec<&str> = log
        .lines()
        .filter(|line| {
            line.contains("FAILED")
                || line.contains("ERROR")
                || line.to_lowercase().contains("assert")
        })
        .take(MAX_FAILURE_LINES)
        .collect();

    if lines.is_empty() {
        NO_FAILURES_RECORDED.to_string()
    } else {
        lines.join("\n")
    }
}
