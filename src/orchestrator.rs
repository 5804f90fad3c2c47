//! Execution orchestration: one submission in, one verdict out.
//!
//! Routes a run to the right backend for the module's language, after a
//! cheap static check, and folds the per-test outcomes into a single
//! [`RunVerdict`]. Student-code failures never surface as errors here;
//! `Err` means the infrastructure itself failed.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::backend::{ExecutionBackend, RemoteCompileClient, SandboxBackend};
use crate::error::{Result, SandboxError};
use crate::module::{Language, ModuleDescriptor};
use crate::sandbox::bridge::WorkerBridge;
use crate::sandbox::config::SandboxConfig;
use crate::verdict::{normalize_output, output_matches, FailedTest, RunVerdict};

/// Decides how to run a submission and what the verdict is.
pub struct Orchestrator {
    config: SandboxConfig,
    backends: HashMap<Language, Arc<dyn ExecutionBackend>>,
}

impl Orchestrator {
    /// Wire up the default backends: the wasm sandbox worker for
    /// browser-class languages, the remote compile service for C when a
    /// URL is configured.
    pub fn new(config: SandboxConfig) -> Result<Self> {
        let bridge = Arc::new(WorkerBridge::start(config.clone()));
        let sandbox: Arc<dyn ExecutionBackend> = Arc::new(SandboxBackend::new(bridge));

        let mut backends: HashMap<Language, Arc<dyn ExecutionBackend>> = HashMap::new();
        backends.insert(Language::Python, Arc::clone(&sandbox));
        backends.insert(Language::JavaScript, sandbox);

        if let Some(url) = &config.remote_compile_url {
            let remote = RemoteCompileClient::new(url.clone(), config.max_log_lines)?;
            backends.insert(Language::C, Arc::new(remote));
        }

        Ok(Self { config, backends })
    }

    /// Build an orchestrator over explicit backends. Used by tests and
    /// by hosts that manage the bridge themselves.
    pub fn with_backends(
        config: SandboxConfig,
        backends: HashMap<Language, Arc<dyn ExecutionBackend>>,
    ) -> Self {
        Self { config, backends }
    }

    /// Replace the backend for one language.
    pub fn set_backend(&mut self, language: Language, backend: Arc<dyn ExecutionBackend>) {
        self.backends.insert(language, backend);
    }

    /// Run a submission against a module and produce the verdict.
    pub async fn run(&self, module: &ModuleDescriptor, code: &str) -> Result<RunVerdict> {
        // Static pre-filter: a missing required snippet fails without
        // paying for an execution round-trip.
        if let Some(snippet) = module.missing_snippet(code) {
            debug!(module = %module.id, snippet, "required snippet missing, skipping execution");
            return Ok(RunVerdict::missing_snippet(snippet));
        }

        let backend = self
            .backends
            .get(&module.language)
            .ok_or(SandboxError::UnsupportedLanguage(module.language))?;

        let verdict = if module.tests.is_empty() {
            self.run_legacy(module, code, backend.as_ref()).await?
        } else {
            self.run_tests(module, code, backend.as_ref()).await?
        };

        info!(
            module = %module.id,
            success = verdict.success,
            reason = ?verdict.reason,
            "run complete"
        );
        Ok(verdict)
    }

    /// Legacy path for modules without test cases: one execution,
    /// optionally compared against a single expected output.
    async fn run_legacy(
        &self,
        module: &ModuleDescriptor,
        code: &str,
        backend: &dyn ExecutionBackend,
    ) -> Result<RunVerdict> {
        let outcome = backend
            .run(module.language, code, None, self.config.timeout)
            .await?;

        if !outcome.success {
            return Ok(RunVerdict::from_failed_outcome(&outcome, None));
        }

        if let Some(expected) = &module.expected_output {
            let actual = outcome.stdout();
            if normalize_output(&actual) != normalize_output(expected) {
                let failed = FailedTest {
                    index: 0,
                    public: true,
                    input: String::new(),
                    expected: Some(normalize_output(expected).to_string()),
                    actual: normalize_output(&actual).to_string(),
                };
                return Ok(RunVerdict::mismatch(failed, outcome.logs));
            }
        }

        Ok(RunVerdict::passed(outcome.logs))
    }

    /// Run every test case in order, stopping at the first failure.
    /// All tests, public and hidden, must pass for overall success.
    async fn run_tests(
        &self,
        module: &ModuleDescriptor,
        code: &str,
        backend: &dyn ExecutionBackend,
    ) -> Result<RunVerdict> {
        let redact = self.config.redact_hidden_expected;
        let mut display_logs = Vec::new();

        for (index, test) in module.tests.iter().enumerate() {
            let outcome = backend
                .run(module.language, code, Some(&test.input), self.config.timeout)
                .await?;

            if !outcome.success {
                let failed = FailedTest::new(index, test, &outcome, redact);
                return Ok(RunVerdict::from_failed_outcome(&outcome, Some(failed)));
            }

            if !output_matches(test, &outcome) {
                debug!(module = %module.id, test = index, "output mismatch");
                let failed = FailedTest::new(index, test, &outcome, redact);
                return Ok(RunVerdict::mismatch(failed, outcome.logs));
            }

            // The output pane shows the first test's output on success.
            if index == 0 {
                display_logs = outcome.logs;
            }
        }

        Ok(RunVerdict::passed(display_logs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::TestCase;
    use crate::sandbox::protocol::{ExecOutcome, LogLine};
    use crate::verdict::RunReason;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Backend that maps stdin to scripted stdout and counts calls.
    struct ScriptedBackend {
        respond: Box<dyn Fn(Option<&str>) -> ExecOutcome + Send + Sync>,
        calls: AtomicUsize,
    }

    impl ScriptedBackend {
        fn new(respond: impl Fn(Option<&str>) -> ExecOutcome + Send + Sync + 'static) -> Self {
            Self {
                respond: Box::new(respond),
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ExecutionBackend for ScriptedBackend {
        async fn run(
            &self,
            _language: Language,
            _code: &str,
            stdin: Option<&str>,
            _timeout: Duration,
        ) -> crate::error::Result<ExecOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok((self.respond)(stdin))
        }
    }

    fn echo_outcome(text: &str) -> ExecOutcome {
        ExecOutcome::ok(vec![LogLine::log(text)], Duration::from_millis(1))
    }

    fn module(tests: Vec<TestCase>, required: Vec<&str>) -> ModuleDescriptor {
        ModuleDescriptor {
            id: "m1".to_string(),
            language: Language::Python,
            initial_code: String::new(),
            solution: String::new(),
            tests,
            required_code: required.into_iter().map(String::from).collect(),
            step_requirements: Vec::new(),
            expected_output: None,
        }
    }

    fn orchestrator_with(backend: Arc<ScriptedBackend>) -> Orchestrator {
        let mut backends: HashMap<Language, Arc<dyn ExecutionBackend>> = HashMap::new();
        backends.insert(Language::Python, backend);
        Orchestrator::with_backends(SandboxConfig::default(), backends)
    }

    #[tokio::test]
    async fn test_missing_snippet_short_circuits_execution() {
        let backend = Arc::new(ScriptedBackend::new(|_| echo_outcome("6")));
        let orchestrator = orchestrator_with(Arc::clone(&backend));
        let module = module(vec![TestCase::public("", "6")], vec!["for "]);

        let verdict = orchestrator.run(&module, "print(6)").await.unwrap();

        assert!(!verdict.success);
        assert_eq!(verdict.reason, RunReason::MissingSnippet("for ".to_string()));
        // The backend was never invoked.
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_all_tests_pass() {
        let backend = Arc::new(ScriptedBackend::new(|stdin| {
            let n: i64 = stdin.unwrap_or("0").parse().unwrap();
            echo_outcome(&(n * 2).to_string())
        }));
        let orchestrator = orchestrator_with(Arc::clone(&backend));
        let module = module(
            vec![TestCase::public("2", "4"), TestCase::hidden("10", "20")],
            vec![],
        );

        let verdict = orchestrator.run(&module, "print(int(input())*2)").await.unwrap();

        assert!(verdict.success);
        assert_eq!(verdict.reason, RunReason::Passed);
        assert_eq!(backend.call_count(), 2);
        // Display logs come from the first test.
        assert_eq!(verdict.logs, vec![LogLine::log("4")]);
    }

    #[tokio::test]
    async fn test_failing_hidden_test_fails_module() {
        let backend = Arc::new(ScriptedBackend::new(|stdin| match stdin {
            Some("2") => echo_outcome("4"),
            _ => echo_outcome("wrong"),
        }));
        let orchestrator = orchestrator_with(backend);
        let module = module(
            vec![TestCase::public("2", "4"), TestCase::hidden("10", "20")],
            vec![],
        );

        let verdict = orchestrator.run(&module, "code").await.unwrap();

        assert!(!verdict.success);
        assert_eq!(verdict.reason, RunReason::TestMismatch);
        let failed = verdict.failed_test.unwrap();
        assert_eq!(failed.index, 1);
        assert!(!failed.public);
        // Hidden expected value is redacted by default.
        assert_eq!(failed.expected, None);
        assert_eq!(failed.actual, "wrong");
    }

    #[tokio::test]
    async fn test_runtime_error_stops_at_failing_test() {
        let backend = Arc::new(ScriptedBackend::new(|stdin| match stdin {
            Some("1") => echo_outcome("ok"),
            _ => ExecOutcome::failed("ZeroDivisionError: division by zero", vec![], Duration::ZERO),
        }));
        let orchestrator = orchestrator_with(Arc::clone(&backend));
        let module = module(
            vec![
                TestCase::public("1", "ok"),
                TestCase::public("0", "ok"),
                TestCase::public("2", "ok"),
            ],
            vec![],
        );

        let verdict = orchestrator.run(&module, "code").await.unwrap();

        assert!(!verdict.success);
        assert_eq!(verdict.reason, RunReason::RuntimeError);
        assert_eq!(verdict.failed_test.unwrap().index, 1);
        // Third test never ran.
        assert_eq!(backend.call_count(), 2);
    }

    #[tokio::test]
    async fn test_legacy_expected_output_path() {
        let backend = Arc::new(ScriptedBackend::new(|_| echo_outcome("hello")));
        let orchestrator = orchestrator_with(Arc::clone(&backend));
        let mut module = module(vec![], vec![]);
        module.expected_output = Some("hello\n".to_string());

        let verdict = orchestrator.run(&module, "print('hello')").await.unwrap();
        assert!(verdict.success);
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_legacy_expected_output_mismatch() {
        let backend = Arc::new(ScriptedBackend::new(|_| echo_outcome("goodbye")));
        let orchestrator = orchestrator_with(backend);
        let mut module = module(vec![], vec![]);
        module.expected_output = Some("hello\n".to_string());

        let verdict = orchestrator.run(&module, "print('goodbye')").await.unwrap();

        assert!(!verdict.success);
        assert_eq!(verdict.reason, RunReason::TestMismatch);
        let failed = verdict.failed_test.unwrap();
        assert_eq!(failed.index, 0);
        assert!(failed.public);
        assert_eq!(failed.expected.as_deref(), Some("hello"));
        assert_eq!(failed.actual, "goodbye");
    }

    #[tokio::test]
    async fn test_unsupported_language_is_an_error() {
        let orchestrator =
            Orchestrator::with_backends(SandboxConfig::default(), HashMap::new());
        let module = module(vec![TestCase::public("", "1")], vec![]);

        let err = orchestrator.run(&module, "print(1)").await.unwrap_err();
        assert!(matches!(err, SandboxError::UnsupportedLanguage(_)));
    }
}
