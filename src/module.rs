//! Module descriptor types supplied by the content layer.
//!
//! A practice module arrives from the course backend as JSON and is
//! immutable for the duration of a session. The core reads it; it never
//! writes it back.

use serde::{Deserialize, Serialize};

/// Languages a practice module can target.
///
/// `Python` and `JavaScript` run in the in-process wasm sandbox;
/// `C` is routed to the remote compile-and-run service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    C,
}

impl Language {
    /// Whether this language executes inside the wasm sandbox worker.
    pub fn is_sandboxed(&self) -> bool {
        matches!(self, Language::Python | Language::JavaScript)
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Language::Python => write!(f, "python"),
            Language::JavaScript => write!(f, "javascript"),
            Language::C => write!(f, "c"),
        }
    }
}

/// A single test case for a practice module.
///
/// Public tests are displayed to the student; hidden tests gate
/// completion without being shown up front.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    /// Stdin fed to the submission for this case.
    #[serde(default)]
    pub input: String,
    /// Expected stdout, compared after trimming incidental whitespace.
    pub expected_output: String,
    /// Whether the test is visible to the student.
    #[serde(default = "default_public")]
    pub public: bool,
}

fn default_public() -> bool {
    true
}

impl TestCase {
    /// A visible test case.
    pub fn public(input: impl Into<String>, expected_output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            expected_output: expected_output.into(),
            public: true,
        }
    }

    /// A hidden test case.
    pub fn hidden(input: impl Into<String>, expected_output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            expected_output: expected_output.into(),
            public: false,
        }
    }
}

/// One unit of practice content, owned by the external content layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    /// Stable module identifier, opaque to the core.
    pub id: String,
    /// Target language for submissions.
    pub language: Language,
    /// The starter code the editor is seeded with.
    #[serde(default)]
    pub initial_code: String,
    /// Reference solution; never executed by the core.
    #[serde(default)]
    pub solution: String,
    /// Ordered test cases; empty means the legacy single-output path.
    #[serde(default)]
    pub tests: Vec<TestCase>,
    /// Substrings that must literally appear in the submission.
    #[serde(default)]
    pub required_code: Vec<String>,
    /// Per-instructional-step required substrings, for progressive
    /// step completion markers.
    #[serde(default)]
    pub step_requirements: Vec<Vec<String>>,
    /// Legacy single-string comparison target, used only when `tests`
    /// is empty.
    #[serde(default)]
    pub expected_output: Option<String>,
}

impl ModuleDescriptor {
    /// Find the first required snippet missing from `code`, if any.
    pub fn missing_snippet(&self, code: &str) -> Option<&str> {
        self.required_code
            .iter()
            .find(|snippet| !code.contains(snippet.as_str()))
            .map(|s| s.as_str())
    }

    /// Mark each instructional step complete when all of its required
    /// substrings appear in the submission.
    pub fn step_progress(&self, code: &str) -> Vec<bool> {
        self.step_requirements
            .iter()
            .map(|reqs| reqs.iter().all(|snippet| code.contains(snippet.as_str())))
            .collect()
    }

    /// Whether this module has any hidden tests.
    pub fn has_hidden_tests(&self) -> bool {
        self.tests.iter().any(|t| !t.public)
    }
}
