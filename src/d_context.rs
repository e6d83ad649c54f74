use crate::prelude::*;

/// Compiler options used when neither the test nor the caller supplies any.
pub const DEFAULT_TEST_OPTIONS: &[&str] = &["-ansi", "-pedantic-errors", "-Wno-long-long"];

/// Run-time parameters for one test invocation, supplied by the caller
/// (test database, CLI, or scheduler). The engine never mutates it, so one
/// context can drive many tests.
#[derive(Debug, Clone)]
pub struct TestContext {
    /// Registry name of the compiler kind under test.
    pub compiler: String,
    /// Explicit path to the compiler; resolved through `PATH` when absent.
    pub compiler_path: Option<PathBuf>,
    /// Options passed on every invocation, before the per-test options.
    pub baseline_options: Vec<String>,
    /// Per-test option override; in-source option markers still win.
    pub options_override: Option<Vec<String>>,
    /// Wall-clock budget per child process, in seconds. 0 = unbounded.
    pub timeout: u64,
    /// Platform triple of the machine running the harness.
    pub host: String,
    /// Platform triple the compiler targets.
    pub target: String,
    /// Directories prepended to the library search path for the RUN step.
    pub library_dirs: Vec<String>,
    /// Directory in which the compiler runs and artifacts are generated.
    /// Callers must hand each concurrent test its own directory.
    pub work_dir: PathBuf,
}

impl TestContext {
    pub fn new(compiler: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        TestContext {
            compiler: compiler.into(),
            compiler_path: None,
            baseline_options: Vec::new(),
            options_override: None,
            timeout: 300,
            host: String::new(),
            target: String::new(),
            library_dirs: Vec::new(),
            work_dir: work_dir.into(),
        }
    }

    /// Whether this context's target platform matches `pattern`. The
    /// special pattern `native` matches when host and target agree;
    /// anything else is a glob over the target triple.
    pub fn target_matches(&self, pattern: &str) -> bool {
        if pattern == "native" {
            return self.host == self.target;
        }
        glob::Pattern::new(pattern)
            .map(|p| p.matches(&self.target))
            .unwrap_or(false)
    }

    /// Whether a test restricted to `patterns` should run here at all.
    /// An empty pattern list means the test is unrestricted, and an
    /// unconfigured target cannot restrict anything.
    pub fn platform_supported(&self, patterns: &[String]) -> bool {
        patterns.is_empty()
            || self.target.is_empty()
            || patterns.iter().any(|p| self.target_matches(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(host: &str, target: &str) -> TestContext {
        let mut cx = TestContext::new("g++", ".");
        cx.host = host.into();
        cx.target = target.into();
        cx
    }

    #[test]
    fn native_matches_only_when_host_equals_target() {
        assert!(context("x86_64-pc-linux-gnu", "x86_64-pc-linux-gnu").target_matches("native"));
        assert!(!context("x86_64-pc-linux-gnu", "arm-none-eabi").target_matches("native"));
    }

    #[test]
    fn glob_patterns_match_the_target_triple() {
        let cx = context("x86_64-pc-linux-gnu", "i686-pc-linux-gnu");
        assert!(cx.target_matches("i?86-*-*"));
        assert!(cx.target_matches("*-linux-*"));
        assert!(!cx.target_matches("sparc-*-*"));
    }

    #[test]
    fn empty_restriction_list_means_unrestricted() {
        let cx = context("a", "b");
        assert!(cx.platform_supported(&[]));
        assert!(!cx.platform_supported(&["sparc-*-*".to_string()]));
    }

    #[test]
    fn unconfigured_target_is_never_restricted() {
        let cx = context("", "");
        assert!(cx.platform_supported(&["sparc-*-*".to_string()]));
    }
}
