use crate::d_diag::Diagnostic;
use std::fmt;

/// Terminal state of one test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestOutcome {
    Pass,
    /// The test does not apply on this platform.
    Skipped(String),
    /// The test failed; the string is the succinct cause.
    Fail(String),
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestOutcome::Pass => write!(f, "PASS"),
            TestOutcome::Skipped(cause) => write!(f, "UNTESTED: {cause}"),
            TestOutcome::Fail(cause) => write!(f, "FAIL: {cause}"),
        }
    }
}

/// The result surface handed to the reporting collaborator: the outcome
/// plus ordered annotations (command lines, captured output, exit codes,
/// rendered missing/spurious diagnostics).
#[derive(Debug, Clone)]
pub struct TestReport {
    pub outcome: TestOutcome,
    pub annotations: Vec<(String, String)>,
}

impl TestReport {
    pub fn new() -> Self {
        TestReport {
            outcome: TestOutcome::Pass,
            annotations: Vec::new(),
        }
    }

    pub fn annotate(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.annotations.push((key.into(), value.into()));
    }

    /// Records a failure cause. The first cause wins; later problems are
    /// still visible through the annotations.
    pub fn fail(&mut self, cause: impl Into<String>) {
        if self.outcome == TestOutcome::Pass {
            self.outcome = TestOutcome::Fail(cause.into());
        }
    }

    pub fn skip(&mut self, cause: impl Into<String>) {
        self.outcome = TestOutcome::Skipped(cause.into());
    }

    pub fn passed(&self) -> bool {
        self.outcome == TestOutcome::Pass
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl Default for TestReport {
    fn default() -> Self {
        Self::new()
    }
}

/// Renders diagnostics one per line, for the missing/spurious annotations.
pub fn render_diagnostics(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(Diagnostic::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}
