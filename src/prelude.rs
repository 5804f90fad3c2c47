//! Prelude module for convenient imports.

pub use crate::error::{Result, SandboxError};
pub use crate::module::{Language, ModuleDescriptor, TestCase};
pub use crate::orchestrator::Orchestrator;
pub use crate::sandbox::{
    bridge::WorkerBridge,
    config::SandboxConfig,
    protocol::{ExecOutcome, LogKind, LogLine},
};
pub use crate::session::{Phase, PracticeSession};
pub use crate::verdict::{FailedTest, RunReason, RunVerdict};
