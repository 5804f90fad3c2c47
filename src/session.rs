//! Practice-mode session state machine.
//!
//! A [`PracticeSession`] tracks one student working one module: the
//! editor buffer, the run lifecycle, and what happens after a pass.
//! Runs are asynchronous, so the session hands out a [`RunTicket`] at
//! start and checks it at finish; a reset or abandon in between bumps
//! the session generation and the stale result is discarded instead of
//! clobbering the new state.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::error::SandboxError;
use crate::module::ModuleDescriptor;
use crate::orchestrator::Orchestrator;
use crate::sandbox::io::bound_logs;
use crate::sandbox::protocol::LogLine;
use crate::verdict::RunVerdict;

/// Where the session is in the edit/run/advance cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// The student is editing; no run in flight.
    Editing,
    /// A run has been started and its verdict has not arrived.
    Running,
    /// The last run passed every test.
    Success,
    /// The last run failed.
    Failed,
    /// The pass has been acknowledged and the student moved on.
    Advanced,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a run is already in flight")]
    RunInFlight,
    #[error("cannot reset while a run is in flight")]
    ResetWhileRunning,
    #[error("the last run did not succeed")]
    NotSuccessful,
    #[error(transparent)]
    Execution(#[from] SandboxError),
}

/// Proof that a run was started against the current session state.
/// [`PracticeSession::finish_run`] ignores tickets from a generation
/// that a reset or abandon has since invalidated.
#[derive(Debug, Clone, Copy)]
pub struct RunTicket {
    generation: u64,
}

/// Records a completed module. Implementations talk to whatever
/// progress store the host uses.
#[async_trait]
pub trait CompletionSink: Send + Sync {
    async fn mark_module_complete(&self, module_id: &str, code: &str) -> crate::error::Result<()>;
}

/// Moves the student to the next module after a pass.
pub trait Navigator: Send {
    fn advance_to_next_module(&mut self);
}

pub struct PracticeSession {
    module: ModuleDescriptor,
    code: String,
    phase: Phase,
    generation: u64,
    verdict: Option<RunVerdict>,
    max_log_lines: usize,
}

impl PracticeSession {
    /// Start a session, restoring previously saved code if any.
    pub fn new(module: ModuleDescriptor, saved_code: Option<String>) -> Self {
        let code = saved_code.unwrap_or_else(|| module.initial_code.clone());
        Self {
            module,
            code,
            phase: Phase::Editing,
            generation: 0,
            verdict: None,
            max_log_lines: crate::sandbox::config::SandboxConfig::default().max_log_lines,
        }
    }

    pub fn with_max_log_lines(mut self, max_log_lines: usize) -> Self {
        self.max_log_lines = max_log_lines;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn module(&self) -> &ModuleDescriptor {
        &self.module
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    /// Update the editor buffer. Editing after a verdict drops the
    /// session back to the editing phase.
    pub fn set_code(&mut self, code: impl Into<String>) {
        self.code = code.into();
        if matches!(self.phase, Phase::Success | Phase::Failed) {
            self.phase = Phase::Editing;
        }
    }

    /// Which step requirements the current buffer satisfies, in order.
    pub fn step_progress(&self) -> Vec<bool> {
        self.module.step_progress(&self.code)
    }

    /// The verdict of the most recent finished run, if any.
    pub fn verdict(&self) -> Option<&RunVerdict> {
        self.verdict.as_ref()
    }

    /// Output pane contents for the most recent run.
    pub fn output(&self) -> &[LogLine] {
        self.verdict.as_ref().map(|v| v.logs.as_slice()).unwrap_or(&[])
    }

    /// Mark a run as started. Fails if one is already in flight.
    pub fn begin_run(&mut self) -> Result<RunTicket, SessionError> {
        if self.phase == Phase::Running {
            return Err(SessionError::RunInFlight);
        }
        self.generation += 1;
        self.phase = Phase::Running;
        self.verdict = None;
        debug!(module = %self.module.id, generation = self.generation, "run started");
        Ok(RunTicket {
            generation: self.generation,
        })
    }

    /// Deliver a verdict for a previously started run. A verdict whose
    /// ticket predates a reset or abandon is logged and discarded.
    pub fn finish_run(&mut self, ticket: RunTicket, verdict: RunVerdict) {
        if ticket.generation != self.generation {
            warn!(
                module = %self.module.id,
                ticket = ticket.generation,
                current = self.generation,
                "discarding stale run verdict"
            );
            return;
        }
        self.phase = if verdict.success {
            Phase::Success
        } else {
            Phase::Failed
        };
        let mut verdict = verdict;
        if !verdict.success {
            // The output pane ends with the failure summary.
            let summary = verdict.message();
            verdict.logs.push(LogLine::error(summary));
        }
        verdict.logs = bound_logs(verdict.logs, self.max_log_lines, false);
        self.verdict = Some(verdict);
    }

    /// Run the current buffer through the orchestrator and record the
    /// verdict. An infrastructure error puts the session back in the
    /// editing phase.
    pub async fn run(&mut self, orchestrator: &Orchestrator) -> Result<RunVerdict, SessionError> {
        let ticket = self.begin_run()?;
        match orchestrator.run(&self.module, &self.code).await {
            Ok(verdict) => {
                self.finish_run(ticket, verdict.clone());
                Ok(verdict)
            }
            Err(e) => {
                self.phase = Phase::Editing;
                Err(e.into())
            }
        }
    }

    /// Restore the module's starting code. Rejected while a run is in
    /// flight; a no-op beyond that if already pristine.
    pub fn reset(&mut self) -> Result<(), SessionError> {
        if self.phase == Phase::Running {
            return Err(SessionError::ResetWhileRunning);
        }
        self.generation += 1;
        self.code = self.module.initial_code.clone();
        self.verdict = None;
        self.phase = Phase::Editing;
        Ok(())
    }

    /// Walk away from an in-flight run. The late verdict, when it
    /// arrives, is discarded; the editor buffer is kept.
    pub fn abandon(&mut self) {
        if self.phase == Phase::Running {
            self.generation += 1;
            self.phase = Phase::Editing;
        }
    }

    /// Record the pass and move to the next module. Completion is
    /// persisted in the background; a store failure is logged and does
    /// not block navigation.
    pub fn acknowledge_success(
        &mut self,
        completion: Arc<dyn CompletionSink>,
        navigator: &mut dyn Navigator,
    ) -> Result<(), SessionError> {
        if self.phase != Phase::Success {
            return Err(SessionError::NotSuccessful);
        }
        let module_id = self.module.id.clone();
        let code = self.code.clone();
        tokio::spawn(async move {
            if let Err(e) = completion.mark_module_complete(&module_id, &code).await {
                error!(module = %module_id, error = %e, "failed to record module completion");
            }
        });
        navigator.advance_to_next_module();
        self.phase = Phase::Advanced;
        Ok(())
    }
}
