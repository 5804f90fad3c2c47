//! Run verdicts: comparing captured output against module test cases.
//!
//! Pure comparison logic, deliberately ignorant of how the code was
//! executed. The orchestrator feeds it execution outcomes; it decides
//! pass/fail and shapes the student-facing failure detail.

use serde::{Deserialize, Serialize};

use crate::module::TestCase;
use crate::sandbox::protocol::{ExecOutcome, LogLine};

/// Normalize output for comparison: trims leading/trailing whitespace,
/// which also absorbs trailing-newline and \r\n differences. Internal
/// whitespace and case are preserved.
pub fn normalize_output(output: &str) -> &str {
    output.trim()
}

/// Whether an outcome's stdout matches a test case's expected output.
pub fn output_matches(test: &TestCase, outcome: &ExecOutcome) -> bool {
    normalize_output(&outcome.stdout()) == normalize_output(&test.expected_output)
}

/// Why a run ended the way it did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunReason {
    /// Everything passed.
    Passed,
    /// A required snippet is missing; execution never happened.
    MissingSnippet(String),
    /// Output did not match a test case.
    TestMismatch,
    /// The submission threw.
    RuntimeError,
    /// The submission exceeded its time budget.
    TimedOut,
}

/// Detail for the first failing test of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedTest {
    /// Zero-based position in the module's test list.
    pub index: usize,
    /// Whether the test is visible to the student.
    pub public: bool,
    /// The stdin the test fed to the submission.
    pub input: String,
    /// Expected output; `None` when redacted for a hidden test.
    pub expected: Option<String>,
    /// What the submission actually printed.
    pub actual: String,
}

impl FailedTest {
    /// Build the failure detail for one test, redacting the expected
    /// value for hidden tests when requested.
    pub fn new(index: usize, test: &TestCase, outcome: &ExecOutcome, redact_hidden: bool) -> Self {
        let expected = if test.public || !redact_hidden {
            Some(normalize_output(&test.expected_output).to_string())
        } else {
            None
        };
        Self {
            index,
            public: test.public,
            input: test.input.clone(),
            expected,
            actual: normalize_output(&outcome.stdout()).to_string(),
        }
    }
}

/// The aggregated result of one run attempt against a module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunVerdict {
    /// All criteria met: required snippets present, every test passed.
    pub success: bool,
    /// Reason code distinguishing the failure modes.
    pub reason: RunReason,
    /// The first failing test, when the reason is a mismatch, error, or
    /// timeout during a specific test.
    pub failed_test: Option<FailedTest>,
    /// Captured output of the last executed run.
    pub logs: Vec<LogLine>,
    /// Mirrors the reason for quick UI branching.
    pub timed_out: bool,
    /// Short student-facing error text for runtime errors.
    pub error: Option<String>,
}

impl RunVerdict {
    /// A fully passing run.
    pub fn passed(logs: Vec<LogLine>) -> Self {
        Self {
            success: true,
            reason: RunReason::Passed,
            failed_test: None,
            logs,
            timed_out: false,
            error: None,
        }
    }

    /// A static-check failure; execution was never attempted.
    pub fn missing_snippet(snippet: impl Into<String>) -> Self {
        Self {
            success: false,
            reason: RunReason::MissingSnippet(snippet.into()),
            failed_test: None,
            logs: Vec::new(),
            timed_out: false,
            error: None,
        }
    }

    /// A wrong-output failure on one test.
    pub fn mismatch(failed: FailedTest, logs: Vec<LogLine>) -> Self {
        Self {
            success: false,
            reason: RunReason::TestMismatch,
            failed_test: Some(failed),
            logs,
            timed_out: false,
            error: None,
        }
    }

    /// A run that threw or timed out, optionally attributed to a test.
    pub fn from_failed_outcome(outcome: &ExecOutcome, failed: Option<FailedTest>) -> Self {
        let reason = if outcome.timed_out {
            RunReason::TimedOut
        } else {
            RunReason::RuntimeError
        };
        Self {
            success: false,
            timed_out: outcome.timed_out,
            reason,
            failed_test: failed,
            logs: outcome.logs.clone(),
            error: outcome.error.clone(),
        }
    }

    /// One-line student-facing summary for the output pane.
    pub fn message(&self) -> String {
        match &self.reason {
            RunReason::Passed => "All tests passed.".to_string(),
            RunReason::MissingSnippet(snippet) => {
                format!("Your code must contain `{}`.", snippet)
            }
            RunReason::TimedOut => "Your code took too long to run.".to_string(),
            RunReason::RuntimeError => self
                .error
                .clone()
                .unwrap_or_else(|| "Your code raised an error.".to_string()),
            RunReason::TestMismatch => match &self.failed_test {
                Some(failed) => match &failed.expected {
                    Some(expected) => format!(
                        "Test {} failed: expected `{}`, got `{}`.",
                        failed.index + 1,
                        expected,
                        failed.actual
                    ),
                    None => format!("Hidden test {} failed.", failed.index + 1),
                },
                None => "Output did not match the expected result.".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn outcome_with_stdout(stdout: &str) -> ExecOutcome {
        ExecOutcome::ok(
            stdout.lines().map(LogLine::log).collect(),
            Duration::from_millis(5),
        )
    }

    #[test]
    fn test_normalize_output() {
        assert_eq!(normalize_output("hello"), "hello");
        assert_eq!(normalize_output("  hello  "), "hello");
        assert_eq!(normalize_output("hello\n"), "hello");
        assert_eq!(normalize_output(""), "");
        assert_eq!(normalize_output("   "), "");
    }

    #[test]
    fn test_output_matches_with_trailing_whitespace() {
        let test = TestCase::public("", "hello");
        assert!(output_matches(&test, &outcome_with_stdout("hello\n")));
        assert!(output_matches(&test, &outcome_with_stdout("  hello  ")));
        assert!(!output_matches(&test, &outcome_with_stdout("Hello")));
    }

    #[test]
    fn test_output_matches_multiline() {
        let test = TestCase::public("", "line1\nline2");
        assert!(output_matches(&test, &outcome_with_stdout("line1\nline2\n")));
        assert!(!output_matches(&test, &outcome_with_stdout("line1\n\nline2")));
    }

    #[test]
    fn test_failed_test_redacts_hidden_expected() {
        let hidden = TestCase::hidden("5", "120");
        let outcome = outcome_with_stdout("100");

        let redacted = FailedTest::new(1, &hidden, &outcome, true);
        assert_eq!(redacted.expected, None);
        assert_eq!(redacted.actual, "100");

        let unredacted = FailedTest::new(1, &hidden, &outcome, false);
        assert_eq!(unredacted.expected.as_deref(), Some("120"));
    }

    #[test]
    fn test_failed_test_never_redacts_public() {
        let public = TestCase::public("5", "120");
        let outcome = outcome_with_stdout("100");

        let detail = FailedTest::new(0, &public, &outcome, true);
        assert_eq!(detail.expected.as_deref(), Some("120"));
    }

    #[test]
    fn test_verdict_messages() {
        let verdict = RunVerdict::missing_snippet("for ");
        assert!(!verdict.success);
        assert_eq!(verdict.message(), "Your code must contain `for `.");

        let hidden = TestCase::hidden("", "secret");
        let failed = FailedTest::new(2, &hidden, &outcome_with_stdout("nope"), true);
        let verdict = RunVerdict::mismatch(failed, Vec::new());
        assert_eq!(verdict.message(), "Hidden test 3 failed.");
        assert!(!verdict.message().contains("secret"));

        let public = TestCase::public("", "6");
        let failed = FailedTest::new(0, &public, &outcome_with_stdout("5"), true);
        let verdict = RunVerdict::mismatch(failed, Vec::new());
        assert_eq!(verdict.message(), "Test 1 failed: expected `6`, got `5`.");
    }

    #[test]
    fn test_from_failed_outcome_distinguishes_timeout() {
        let timed = ExecOutcome::timed_out(vec![LogLine::log("partial")], Duration::from_secs(5));
        let verdict = RunVerdict::from_failed_outcome(&timed, None);
        assert_eq!(verdict.reason, RunReason::TimedOut);
        assert!(verdict.timed_out);
        assert_eq!(verdict.message(), "Your code took too long to run.");

        let threw = ExecOutcome::failed("NameError: name 'x' is not defined", vec![], Duration::ZERO);
        let verdict = RunVerdict::from_failed_outcome(&threw, None);
        assert_eq!(verdict.reason, RunReason::RuntimeError);
        assert_eq!(verdict.message(), "NameError: name 'x' is not defined");
    }
}
