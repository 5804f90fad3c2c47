//! I/O capture for sandboxed stdin/stdout/stderr.
//!
//! Both output streams are capped at write time: a submission that prints
//! in a tight loop hits the byte cap long before it can exhaust host
//! memory waiting for the timeout. On top of the byte cap, captured
//! output is folded into a line-capped log for the UI.

use wasmtime_wasi::pipe::{MemoryInputPipe, MemoryOutputPipe};

use crate::sandbox::protocol::{LogKind, LogLine};

/// Default per-stream capture cap in bytes.
pub const DEFAULT_CAPTURE_BYTES: usize = 256 * 1024;

/// I/O capture for one sandbox execution.
///
/// Clones share the underlying pipes, so the worker can hand a clone to
/// the blocking execution task and still read partial output after a
/// timeout cut the run short.
#[derive(Clone)]
pub struct SandboxIo {
    stdin: MemoryInputPipe,
    stdout: MemoryOutputPipe,
    stderr: MemoryOutputPipe,
    capture_bytes: usize,
}

impl SandboxIo {
    /// Create a new I/O capture with optional stdin input.
    pub fn new(input: Option<&str>) -> Self {
        Self::with_capacity(input, DEFAULT_CAPTURE_BYTES)
    }

    /// Create a capture with an explicit per-stream byte cap.
    pub fn with_capacity(input: Option<&str>, capture_bytes: usize) -> Self {
        Self {
            stdin: MemoryInputPipe::new(input.unwrap_or("").as_bytes().to_vec()),
            stdout: MemoryOutputPipe::new(capture_bytes),
            stderr: MemoryOutputPipe::new(capture_bytes),
            capture_bytes,
        }
    }

    /// The stdin pipe for WASI wiring.
    pub fn stdin_pipe(&self) -> MemoryInputPipe {
        self.stdin.clone()
    }

    /// The stdout pipe for WASI wiring.
    pub fn stdout_pipe(&self) -> MemoryOutputPipe {
        self.stdout.clone()
    }

    /// The stderr pipe for WASI wiring.
    pub fn stderr_pipe(&self) -> MemoryOutputPipe {
        self.stderr.clone()
    }

    /// Get the captured stdout as a string.
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout.contents()).to_string()
    }

    /// Get the captured stderr as a string.
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr.contents()).to_string()
    }

    /// Whether either stream filled its byte cap.
    pub fn byte_truncated(&self) -> bool {
        self.stdout.contents().len() >= self.capture_bytes
            || self.stderr.contents().len() >= self.capture_bytes
    }

    /// Convert the captured streams into an ordered, line-capped log.
    pub fn into_logs(&self, max_lines: usize) -> Vec<LogLine> {
        let logs = split_into_logs(&self.stdout_str(), &self.stderr_str());
        bound_logs(logs, max_lines, self.byte_truncated())
    }
}

impl Default for SandboxIo {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Interleave captured streams into log lines: stdout lines first, then
/// stderr lines. WASI gives us two separate buffers, so true arrival
/// order across streams is not recoverable.
pub fn split_into_logs(stdout: &str, stderr: &str) -> Vec<LogLine> {
    stdout
        .lines()
        .map(LogLine::log)
        .chain(stderr.lines().map(LogLine::error))
        .collect()
}

/// Truncate a log to `max_lines`, appending one marker line when
/// anything was dropped.
pub fn bound_logs(mut logs: Vec<LogLine>, max_lines: usize, byte_truncated: bool) -> Vec<LogLine> {
    let dropped = logs.len().saturating_sub(max_lines);
    if dropped > 0 {
        logs.truncate(max_lines);
        logs.push(LogLine {
            kind: LogKind::Error,
            message: format!("[output truncated: {} more lines]", dropped),
        });
    } else if byte_truncated {
        logs.push(LogLine {
            kind: LogKind::Error,
            message: "[output truncated]".to_string(),
        });
    }
    logs
}
