//! Sandbox configuration with builder pattern.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::module::Language;

/// Minimum backup buffer the bridge will honor. The host-side timer must
/// fire strictly after the worker's own deadline had a chance to.
pub const MIN_BACKUP_BUFFER: Duration = Duration::from_secs(1);

/// Configuration for the execution sandbox and its host-side bridge.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Maximum execution time per run before the worker aborts it.
    pub timeout: Duration,
    /// Extra budget the bridge grants on top of `timeout` before it
    /// declares the worker unresponsive. Clamped to [`MIN_BACKUP_BUFFER`].
    pub backup_buffer: Duration,
    /// Maximum guest memory in bytes.
    pub max_memory: u64,
    /// Maximum fuel (instruction count limit).
    pub max_fuel: Option<u64>,
    /// Paths to the interpreter wasm modules, per language.
    pub interpreter_paths: HashMap<Language, PathBuf>,
    /// Epoch interruption interval for cooperative timeout.
    pub epoch_tick_interval: Duration,
    /// Cap on captured output lines per run, to bound memory under
    /// runaway print loops.
    pub max_log_lines: usize,
    /// When a hidden test fails, omit its expected value from the
    /// verdict so it cannot be scraped from the failure message.
    pub redact_hidden_expected: bool,
    /// Base URL of the remote compile-and-run service for native
    /// languages. `None` disables that backend.
    pub remote_compile_url: Option<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        let mut interpreter_paths = HashMap::new();
        interpreter_paths.insert(Language::Python, PathBuf::from("assets/rustpython.wasm"));
        interpreter_paths.insert(Language::JavaScript, PathBuf::from("assets/quickjs.wasm"));

        Self {
            timeout: Duration::from_millis(5000),
            backup_buffer: Duration::from_millis(1000),
            max_memory: 64 * 1024 * 1024, // 64MB
            max_fuel: None,
            interpreter_paths,
            epoch_tick_interval: Duration::from_millis(10),
            max_log_lines: 1000,
            redact_hidden_expected: true,
            remote_compile_url: None,
        }
    }
}

impl SandboxConfig {
    /// Create a new builder for SandboxConfig.
    pub fn builder() -> SandboxConfigBuilder {
        SandboxConfigBuilder::default()
    }

    /// The backup buffer with the minimum clamp applied.
    pub fn effective_backup_buffer(&self) -> Duration {
        self.backup_buffer.max(MIN_BACKUP_BUFFER)
    }

    /// Total time the bridge waits before giving up on the worker.
    pub fn backup_deadline(&self, timeout: Duration) -> Duration {
        timeout + self.effective_backup_buffer()
    }
}

/// Builder for creating SandboxConfig instances.
#[derive(Debug, Clone, Default)]
pub struct SandboxConfigBuilder {
    timeout: Option<Duration>,
    backup_buffer: Option<Duration>,
    max_memory: Option<u64>,
    max_fuel: Option<u64>,
    interpreter_paths: HashMap<Language, PathBuf>,
    epoch_tick_interval: Option<Duration>,
    max_log_lines: Option<usize>,
    redact_hidden_expected: Option<bool>,
    remote_compile_url: Option<String>,
}

impl SandboxConfigBuilder {
    /// Set the per-run execution timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the bridge's backup buffer on top of the timeout.
    pub fn backup_buffer(mut self, buffer: Duration) -> Self {
        self.backup_buffer = Some(buffer);
        self
    }

    /// Set the maximum memory limit in bytes.
    pub fn max_memory(mut self, bytes: u64) -> Self {
        self.max_memory = Some(bytes);
        self
    }

    /// Set the maximum fuel (instruction count).
    pub fn max_fuel(mut self, fuel: u64) -> Self {
        self.max_fuel = Some(fuel);
        self
    }

    /// Set the interpreter wasm path for a language.
    pub fn interpreter_path(mut self, language: Language, path: impl Into<PathBuf>) -> Self {
        self.interpreter_paths.insert(language, path.into());
        self
    }

    /// Set the epoch tick interval for timeout checking.
    pub fn epoch_tick_interval(mut self, interval: Duration) -> Self {
        self.epoch_tick_interval = Some(interval);
        self
    }

    /// Set the captured-output line cap per run.
    pub fn max_log_lines(mut self, lines: usize) -> Self {
        self.max_log_lines = Some(lines);
        self
    }

    /// Control whether hidden-test expected values are redacted from
    /// failure verdicts.
    pub fn redact_hidden_expected(mut self, redact: bool) -> Self {
        self.redact_hidden_expected = Some(redact);
        self
    }

    /// Set the remote compile service base URL.
    pub fn remote_compile_url(mut self, url: impl Into<String>) -> Self {
        self.remote_compile_url = Some(url.into());
        self
    }

    /// Build the SandboxConfig.
    pub fn build(self) -> SandboxConfig {
        let mut config = SandboxConfig::default();
        if let Some(timeout) = self.timeout {
            config.timeout = timeout;
        }
        if let Some(buffer) = self.backup_buffer {
            config.backup_buffer = buffer;
        }
        if let Some(bytes) = self.max_memory {
            config.max_memory = bytes;
        }
        config.max_fuel = self.max_fuel.or(config.max_fuel);
        for (language, path) in self.interpreter_paths {
            config.interpreter_paths.insert(language, path);
        }
        if let Some(interval) = self.epoch_tick_interval {
            config.epoch_tick_interval = interval;
        }
        if let Some(lines) = self.max_log_lines {
            config.max_log_lines = lines;
        }
        if let Some(redact) = self.redact_hidden_expected {
            config.redact_hidden_expected = redact;
        }
        config.remote_compile_url = self.remote_compile_url.or(config.remote_compile_url);
        config
    }
}
