//! Wire types for the worker message protocol.
//!
//! The bridge and the worker communicate exclusively through these
//! messages; there is no shared state between them. Every request carries
//! a correlation id, and the worker tags its reply with the same id so
//! concurrent in-flight requests can be demultiplexed on the host side.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::module::Language;

/// A single execution request, created per run and discarded afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecRequest {
    /// Correlation identifier, unique per in-flight call.
    pub id: Uuid,
    /// Language the code should be interpreted as.
    pub language: Language,
    /// The student's code buffer at run time.
    pub code: String,
    /// Optional stdin fed to the run (the test case input).
    #[serde(default)]
    pub stdin: Option<String>,
    /// Execution time budget for this run.
    pub timeout: Duration,
}

impl ExecRequest {
    /// Build a request with a fresh correlation id.
    pub fn new(language: Language, code: impl Into<String>, timeout: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            language,
            code: code.into(),
            stdin: None,
            timeout,
        }
    }

    /// Attach stdin input to the request.
    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }
}

/// Which stream a captured output line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    /// Ordinary output (stdout / console.log).
    Log,
    /// Error output (stderr / console.error).
    Error,
}

/// One captured output line, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub kind: LogKind,
    pub message: String,
}

impl LogLine {
    pub fn log(message: impl Into<String>) -> Self {
        Self {
            kind: LogKind::Log,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: LogKind::Error,
            message: message.into(),
        }
    }
}

/// Result of a single execution, produced by the worker or the remote
/// compile backend.
///
/// Student-code failures (exceptions, timeouts) are encoded here rather
/// than as host errors, so callers get a uniform success/failure contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecOutcome {
    /// Did execution complete without an unhandled error or timeout.
    pub success: bool,
    /// Captured output lines, bounded by the configured line cap.
    pub logs: Vec<LogLine>,
    /// Short error description when the run threw.
    pub error: Option<String>,
    /// Distinguishes "exceeded the budget" from "threw".
    pub timed_out: bool,
    /// Wall-clock execution time.
    pub duration: Duration,
}

impl ExecOutcome {
    /// A clean completion.
    pub fn ok(logs: Vec<LogLine>, duration: Duration) -> Self {
        Self {
            success: true,
            logs,
            error: None,
            timed_out: false,
            duration,
        }
    }

    /// A run that threw, with whatever logs were captured first.
    pub fn failed(error: impl Into<String>, logs: Vec<LogLine>, duration: Duration) -> Self {
        Self {
            success: false,
            logs,
            error: Some(error.into()),
            timed_out: false,
            duration,
        }
    }

    /// A run that exceeded its time budget.
    pub fn timed_out(logs: Vec<LogLine>, duration: Duration) -> Self {
        Self {
            success: false,
            logs,
            error: None,
            timed_out: true,
            duration,
        }
    }

    /// Concatenated stdout-stream lines, for output comparison.
    pub fn stdout(&self) -> String {
        let mut out = String::new();
        for line in self.logs.iter().filter(|l| l.kind == LogKind::Log) {
            out.push_str(&line.message);
            out.push('\n');
        }
        out
    }
}

/// Messages the worker sends back to the bridge.
#[derive(Debug)]
pub enum WorkerMessage {
    /// One-time startup signal; no work is dispatched before it.
    Ready,
    /// Exactly one per dispatched request, tagged with its id.
    Result { id: Uuid, outcome: ExecOutcome },
    /// A worker-level fault (not an execution failure); the bridge
    /// surfaces this as a retryable "engine unavailable" state.
    Fault { message: String },
}
