//! # CodeQuarry Sandbox
//!
//! The execution core of an interactive coding practice platform:
//! student submissions run inside a WebAssembly interpreter with strict
//! isolation, and the results are graded against a module's test cases.
//!
//! Interpreters (RustPython for Python, QuickJS for JavaScript) are
//! compiled once and cached; each run gets a fresh store, so nothing a
//! submission defines survives into the next run. Security boundaries:
//!
//! - **Memory limits**: allocation is capped per run
//! - **Timeout protection**: epoch-based interruption stops tight loops
//! - **Filesystem isolation**: no preopened directories
//! - **Network isolation**: no sockets (WASI Preview 1)
//! - **Process isolation**: no subprocesses
//!
//! Compiled languages are delegated to a remote compile service rather
//! than run in-browser.
//!
//! ## Example
//!
//! ```rust,ignore
//! use codequarry_sandbox::prelude::*;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = SandboxConfig::builder()
//!         .timeout(Duration::from_secs(5))
//!         .max_memory(32 * 1024 * 1024)
//!         .build();
//!
//!     let orchestrator = Orchestrator::new(config)?;
//!     let verdict = orchestrator.run(&module, "print(1 + 1)").await?;
//!     assert!(verdict.success);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod module;
pub mod orchestrator;
pub mod prelude;
pub mod sandbox;
pub mod session;
pub mod verdict;

// Re-export main types at crate root for convenience
pub use backend::{ExecutionBackend, RemoteCompileClient, SandboxBackend};
pub use error::{Result, SandboxError};
pub use module::{Language, ModuleDescriptor, TestCase};
pub use orchestrator::Orchestrator;
pub use sandbox::bridge::WorkerBridge;
pub use sandbox::config::{SandboxConfig, SandboxConfigBuilder};
pub use sandbox::protocol::{ExecOutcome, ExecRequest, LogKind, LogLine};
pub use session::{CompletionSink, Navigator, Phase, PracticeSession, RunTicket, SessionError};
pub use verdict::{FailedTest, RunReason, RunVerdict};
