//! Error types for the practice-mode execution core.
//!
//! Student-code failures (exceptions, timeouts, wrong output) are never
//! errors at this level — they are reported as values in
//! [`ExecOutcome`](crate::sandbox::protocol::ExecOutcome) and
//! [`RunVerdict`](crate::verdict::RunVerdict). `SandboxError` covers
//! host-side infrastructure failures only.

use thiserror::Error;

use crate::module::Language;

/// Errors that can occur on the host side of the execution pipeline.
#[derive(Error, Debug)]
pub enum SandboxError {
    /// The execution exceeded the configured timeout.
    #[error("execution timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The execution exceeded memory limits.
    #[error("memory limit exceeded: {0}")]
    MemoryLimitExceeded(String),

    /// Failed to initialize the Wasm runtime.
    #[error("failed to initialize runtime: {0}")]
    RuntimeInit(#[source] anyhow::Error),

    /// Failed to load or instantiate an interpreter module.
    #[error("failed to load interpreter: {0}")]
    ModuleLoad(#[source] anyhow::Error),

    /// The code execution failed at the engine level.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// The worker is down or never responded; a retryable fault state.
    #[error("execution worker unavailable: {0}")]
    WorkerUnavailable(String),

    /// The remote compile backend could not be reached or returned garbage.
    #[error("remote backend error: {0}")]
    Backend(String),

    /// No execution backend is wired for this language.
    #[error("no execution backend for language: {0:?}")]
    UnsupportedLanguage(Language),

    /// I/O error during setup or execution.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// An interpreter wasm file was not found.
    #[error("interpreter wasm not found at: {0}")]
    InterpreterNotFound(String),
}

impl SandboxError {
    /// Check if this error represents a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, SandboxError::Timeout(_))
    }

    /// Check if this error represents a memory limit exceeded.
    pub fn is_memory_limit(&self) -> bool {
        matches!(self, SandboxError::MemoryLimitExceeded(_))
    }

    /// Check if this is a retryable worker fault rather than a run failure.
    pub fn is_worker_fault(&self) -> bool {
        matches!(self, SandboxError::WorkerUnavailable(_))
    }
}

/// Result type alias for sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;

/// A guest-level exception extracted from interpreter stderr.
///
/// Used to give the student a short "NameError: name 'x' is not defined"
/// style message instead of a raw stderr dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionInfo {
    /// The exception type (e.g. "ValueError", "TypeError", "Error").
    pub exception_type: String,
    /// The exception message.
    pub message: String,
    /// The full traceback, if one was printed.
    pub traceback: Option<String>,
}

impl ExceptionInfo {
    /// Render as a one-line student-facing message.
    pub fn summary(&self) -> String {
        if self.message.is_empty() {
            self.exception_type.clone()
        } else {
            format!("{}: {}", self.exception_type, self.message)
        }
    }
}

/// Parse a guest exception from interpreter stderr output.
///
/// Handles Python-style tracebacks ("Traceback (most recent call last):"
/// followed by "SomeError: message") and bare "SomeError: message" lines,
/// which also covers JavaScript-style "TypeError: x is not a function".
pub fn parse_guest_exception(stderr: &str) -> Option<ExceptionInfo> {
    if stderr.trim().is_empty() {
        return None;
    }

    let lines: Vec<&str> = stderr.lines().collect();

    let mut exception_line = None;
    let mut traceback_start = None;

    for (i, line) in lines.iter().enumerate() {
        if line.starts_with("Traceback (most recent call last):") {
            traceback_start = Some(i);
        }
        if !line.starts_with(' ')
            && !line.is_empty()
            && !line.starts_with("Traceback")
            && looks_like_exception(line)
        {
            exception_line = Some((i, *line));
        }
    }

    let (line_idx, exception_str) = exception_line?;

    let (exception_type, message) = if let Some(colon_pos) = exception_str.find(':') {
        let exc_type = exception_str[..colon_pos].trim().to_string();
        let msg = exception_str[colon_pos + 1..].trim().to_string();
        (exc_type, msg)
    } else {
        (exception_str.trim().to_string(), String::new())
    };

    let traceback = traceback_start.map(|start| lines[start..=line_idx].join("\n"));

    Some(ExceptionInfo {
        exception_type,
        message,
        traceback,
    })
}

/// Check if a line looks like an exception header.
fn looks_like_exception(line: &str) -> bool {
    let exception_suffixes = ["Error", "Exception", "Warning"];
    let standalone_exceptions = [
        "KeyboardInterrupt",
        "SystemExit",
        "StopIteration",
        "GeneratorExit",
    ];

    let first_char = line.chars().next();
    if !first_char.map(|c| c.is_ascii_uppercase()).unwrap_or(false) {
        return false;
    }

    let boundary_ok = |line: &str, after_idx: usize| {
        after_idx >= line.len()
            || line.as_bytes()[after_idx] == b':'
            || line.as_bytes()[after_idx] == b' '
            || line.as_bytes()[after_idx] == b'\n'
    };

    for suffix in exception_suffixes.iter() {
        if let Some(idx) = line.find(suffix) {
            if boundary_ok(line, idx + suffix.len()) {
                return true;
            }
        }
    }

    for exc in standalone_exceptions.iter() {
        if line.starts_with(exc) && boundary_ok(line, exc.len()) {
            return true;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_exception() {
        let stderr = "ValueError: invalid literal for int() with base 10: 'abc'";
        let info = parse_guest_exception(stderr).unwrap();

        assert_eq!(info.exception_type, "ValueError");
        assert_eq!(
            info.message,
            "invalid literal for int() with base 10: 'abc'"
        );
        assert!(info.traceback.is_none());
        assert_eq!(
            info.summary(),
            "ValueError: invalid literal for int() with base 10: 'abc'"
        );
    }

    #[test]
    fn test_parse_exception_with_traceback() {
        let stderr = r#"Traceback (most recent call last):
  File "<string>", line 1, in <module>
NameError: name 'x' is not defined"#;

        let info = parse_guest_exception(stderr).unwrap();

        assert_eq!(info.exception_type, "NameError");
        assert_eq!(info.message, "name 'x' is not defined");
        assert!(info.traceback.unwrap().contains("Traceback"));
    }

    #[test]
    fn test_parse_javascript_style_error() {
        let stderr = "TypeError: x.map is not a function";
        let info = parse_guest_exception(stderr).unwrap();

        assert_eq!(info.exception_type, "TypeError");
        assert_eq!(info.message, "x.map is not a function");
    }

    #[test]
    fn test_parse_exception_no_message() {
        let info = parse_guest_exception("StopIteration").unwrap();
        assert_eq!(info.exception_type, "StopIteration");
        assert!(info.message.is_empty());
        assert_eq!(info.summary(), "StopIteration");
    }

    #[test]
    fn test_parse_empty_stderr() {
        assert!(parse_guest_exception("").is_none());
        assert!(parse_guest_exception("   ").is_none());
    }

    #[test]
    fn test_error_helpers() {
        let timeout = SandboxError::Timeout(std::time::Duration::from_secs(5));
        assert!(timeout.is_timeout());
        assert!(!timeout.is_memory_limit());
        assert!(!timeout.is_worker_fault());

        let fault = SandboxError::WorkerUnavailable("no response".to_string());
        assert!(fault.is_worker_fault());
    }
}
