//! Execution backends.
//!
//! A backend knows HOW to run code; it never judges correctness. The
//! orchestrator treats the in-process wasm sandbox and the remote
//! compile-and-run service uniformly through [`ExecutionBackend`], which
//! is also the seam tests use to substitute a scripted fake.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SandboxError};
use crate::module::Language;
use crate::sandbox::bridge::WorkerBridge;
use crate::sandbox::io::{bound_logs, split_into_logs};
use crate::sandbox::protocol::ExecOutcome;

/// An asynchronous code execution backend with the sandbox's
/// success/failure contract: student-code failures are outcomes, `Err`
/// means the backend itself is unusable.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    async fn run(
        &self,
        language: Language,
        code: &str,
        stdin: Option<&str>,
        timeout: Duration,
    ) -> Result<ExecOutcome>;
}

/// The wasm sandbox worker, behind its bridge.
pub struct SandboxBackend {
    bridge: Arc<WorkerBridge>,
}

impl SandboxBackend {
    pub fn new(bridge: Arc<WorkerBridge>) -> Self {
        Self { bridge }
    }

    /// The underlying bridge, for fault inspection and manual restart.
    pub fn bridge(&self) -> &Arc<WorkerBridge> {
        &self.bridge
    }
}

#[async_trait]
impl ExecutionBackend for SandboxBackend {
    async fn run(
        &self,
        language: Language,
        code: &str,
        stdin: Option<&str>,
        timeout: Duration,
    ) -> Result<ExecOutcome> {
        self.bridge.execute(language, code, stdin, Some(timeout)).await
    }
}

/// Wire request for the remote compile-and-run service.
#[derive(Debug, Serialize)]
struct RemoteRunRequest<'a> {
    language: Language,
    code: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    stdin: Option<&'a str>,
    timeout_ms: u64,
}

/// Wire response from the remote compile-and-run service.
#[derive(Debug, Deserialize)]
struct RemoteRunResponse {
    success: bool,
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    timed_out: bool,
    #[serde(default)]
    duration_ms: u64,
}

/// Client for the external compile-and-run collaborator used for
/// natively-compiled languages (C). Same request/response shape as the
/// worker protocol, so the orchestrator treats both paths uniformly.
pub struct RemoteCompileClient {
    http: reqwest::Client,
    base_url: String,
    max_log_lines: usize,
}

impl RemoteCompileClient {
    /// Build a client for the service at `base_url`.
    pub fn new(base_url: impl Into<String>, max_log_lines: usize) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| SandboxError::Backend(format!("failed to build http client: {}", e)))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            max_log_lines,
        })
    }

    fn outcome_from_response(&self, response: RemoteRunResponse) -> ExecOutcome {
        let logs = bound_logs(
            split_into_logs(&response.stdout, &response.stderr),
            self.max_log_lines,
            false,
        );
        let duration = Duration::from_millis(response.duration_ms);

        if response.timed_out {
            ExecOutcome::timed_out(logs, duration)
        } else if response.success {
            ExecOutcome::ok(logs, duration)
        } else {
            let error = response
                .error
                .unwrap_or_else(|| "compilation or execution failed".to_string());
            ExecOutcome::failed(error, logs, duration)
        }
    }
}

#[async_trait]
impl ExecutionBackend for RemoteCompileClient {
    async fn run(
        &self,
        language: Language,
        code: &str,
        stdin: Option<&str>,
        timeout: Duration,
    ) -> Result<ExecOutcome> {
        let request = RemoteRunRequest {
            language,
            code,
            stdin,
            timeout_ms: timeout.as_millis() as u64,
        };

        debug!(%language, url = %self.base_url, "dispatching to remote compile service");

        // Give the service the run budget plus slack for compilation
        // and transport; past that it counts as unreachable.
        let response = self
            .http
            .post(format!("{}/run", self.base_url))
            .json(&request)
            .timeout(timeout + Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| SandboxError::Backend(format!("remote compile request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(SandboxError::Backend(format!(
                "remote compile service returned {}",
                response.status()
            )));
        }

        let body: RemoteRunResponse = response
            .json()
            .await
            .map_err(|e| SandboxError::Backend(format!("malformed remote response: {}", e)))?;

        Ok(self.outcome_from_response(body))
    }
}
