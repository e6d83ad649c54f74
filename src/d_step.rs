use crate::d_compiler::{lookup_compiler, Compiler, StepMode};
use crate::d_context::{TestContext, DEFAULT_TEST_OPTIONS};
use crate::d_diag::Diagnostic;
use crate::d_match::{reconcile, MatchPolicy, MatchVerdict};
use crate::d_process::{run_captured, ExitKind};
use crate::d_report::{render_diagnostics, TestReport};
use crate::d_scan::{detect_dialect, scanner_for, Dialect, ScanOutcome, TestMode};
use crate::prelude::*;
use anyhow::{Context as _, Result};
use std::collections::HashMap;

/// One compiler invocation within a test: what to compile or link, with
/// which options, and which diagnostics that invocation is expected to emit.
#[derive(Debug, Clone)]
pub struct CompilationStep {
    pub mode: StepMode,
    pub files: Vec<PathBuf>,
    pub options: Vec<String>,
    pub output: Option<String>,
    pub expected: Vec<Diagnostic>,
}

/// A single source-file test: scan once at construction, then drive the
/// compile / link / run sequence the annotations ask for.
#[derive(Debug, Clone)]
pub struct CompilerTestCase {
    pub source_path: PathBuf,
    pub dialect: Dialect,
    pub scan: ScanOutcome,
}

impl CompilerTestCase {
    /// Reads and scans `path`. When `dialect` is `None` it is sniffed from
    /// the file contents. Scanning happens here, eagerly, so a malformed
    /// annotation surfaces before any compiler runs.
    pub fn from_file(path: &Path, dialect: Option<Dialect>) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read test source {}", path.display()))?;
        let dialect = dialect.unwrap_or_else(|| detect_dialect(&text));
        let source_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        let scan = scanner_for(dialect)
            .scan(&source_name, &text)
            .with_context(|| format!("failed to scan {}", path.display()))?;
        info!(
            "{}: {} expected diagnostic(s), mode {:?}",
            path.display(),
            scan.expected.len(),
            scan.mode
        );
        Ok(CompilerTestCase {
            source_path: path.to_path_buf(),
            dialect,
            scan,
        })
    }

    /// Runs the test under `cx` and produces its report. Generated object
    /// files and executables are removed before this returns, on every path.
    pub fn run(&self, cx: &TestContext) -> Result<TestReport> {
        let mut report = TestReport::new();

        if !cx.platform_supported(&self.scan.skip_targets) {
            report.skip(format!(
                "Test does not apply to target {}.",
                if cx.target.is_empty() { "(unknown)" } else { &cx.target }
            ));
            return Ok(report);
        }

        let compiler = lookup_compiler(
            &cx.compiler,
            cx.compiler_path.clone(),
            cx.baseline_options.clone(),
        )?;

        // In-source options beat the caller's override, which beats the
        // built-in defaults.
        let options: Vec<String> = self
            .scan
            .options
            .clone()
            .or_else(|| cx.options_override.clone())
            .unwrap_or_else(|| DEFAULT_TEST_OPTIONS.iter().map(|s| s.to_string()).collect());

        let files = self.source_files();
        let expected = self.expected_for(cx);
        let steps = build_steps(compiler.as_ref(), self.scan.mode, &files, &options, &expected);
        let _guard = ArtifactGuard::for_test(compiler.as_ref(), self.scan.mode, &files, &cx.work_dir);

        let mut errors_occurred = false;
        for (index, step) in steps.iter().enumerate() {
            let step_number = index + 1;
            let desc = match step.mode {
                StepMode::Compile => "Compilation",
                StepMode::Link => "Link",
            };
            let command =
                compiler.command(step.mode, &step.files, &step.options, step.output.as_deref());
            report.annotate(format!("step_{step_number}_command"), command.join(" "));

            let result = run_captured(&command, &cx.work_dir, cx.timeout, &HashMap::new())?;
            report.annotate(format!("step_{step_number}_output"), result.output.clone());

            let emitted = compiler.syntax().classify(&result.output);
            let verdict = reconcile(&emitted, &step.expected, &MatchPolicy::default());
            let outcome = match verdict {
                MatchVerdict::CompilerCrash => {
                    report.fail("The compiler issued an internal error.");
                    return Ok(report);
                }
                MatchVerdict::Checked(outcome) => outcome,
            };
            errors_occurred |= outcome.errors_occurred;

            // The link half of a two-step test carries no expectations of
            // its own; any diagnostic there is trouble.
            let is_link_substep = self.scan.mode == TestMode::CompileAndLink && step.mode == StepMode::Link;
            if is_link_substep && !outcome.spurious.is_empty() {
                report.annotate(
                    format!("step_{step_number}_spurious"),
                    render_diagnostics(&outcome.spurious),
                );
                report.fail("Spurious diagnostics during link.");
            } else if !outcome.is_clean() {
                if !outcome.missing.is_empty() {
                    report.annotate(
                        format!("step_{step_number}_missing"),
                        render_diagnostics(&outcome.missing),
                    );
                }
                if !outcome.spurious.is_empty() {
                    report.annotate(
                        format!("step_{step_number}_spurious"),
                        render_diagnostics(&outcome.spurious),
                    );
                }
                report.fail(match (!outcome.missing.is_empty(), !outcome.spurious.is_empty()) {
                    (true, true) => "Missing and spurious diagnostics.",
                    (true, false) => "Missing diagnostics.",
                    (false, true) => "Spurious diagnostics.",
                    (false, false) => unreachable!(),
                });
            }

            match result.status {
                ExitKind::Exited(0) => {}
                // An expected-diagnostics test is allowed to fail its
                // compile; the diagnostics themselves are the verdict.
                ExitKind::Exited(_) if !step.expected.is_empty() => {}
                ExitKind::Exited(code) => {
                    report.fail(format!("{desc} failed with exit code {code}."));
                    return Ok(report);
                }
                ExitKind::Signaled(signal) => {
                    report.fail(format!("{desc} received fatal signal {signal}."));
                    return Ok(report);
                }
                ExitKind::TimedOut => {
                    report.fail(format!("{desc} timed out."));
                    return Ok(report);
                }
                ExitKind::SpawnFailed(ref e) => {
                    report.fail(format!("{desc} failed to start: {e}."));
                    return Ok(report);
                }
            }
        }

        if self.scan.mode == TestMode::Run && report.passed() && !errors_occurred {
            self.run_executable(cx, compiler.as_ref(), &files, &mut report)?;
        }

        Ok(report)
    }

    /// The expectations that apply on this context's target. A diagnostic
    /// whose selector names other targets is not demanded here.
    fn expected_for(&self, cx: &TestContext) -> Vec<Diagnostic> {
        self.scan
            .expected
            .iter()
            .filter(|e| cx.platform_supported(&e.targets))
            .map(|e| e.diagnostic.clone())
            .collect()
    }

    /// The main source plus any extra sources it names, made absolute so
    /// the compiler can run in the work directory.
    fn source_files(&self) -> Vec<PathBuf> {
        let mut files = vec![absolutize(&self.source_path)];
        let parent = self
            .source_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        for extra in &self.scan.extra_sources {
            files.push(absolutize(&parent.join(extra)));
        }
        files
    }

    fn run_executable(
        &self,
        cx: &TestContext,
        compiler: &dyn Compiler,
        files: &[PathBuf],
        report: &mut TestReport,
    ) -> Result<()> {
        let executable = compiler.executable_name(files);
        let command = vec![format!("./{executable}")];
        report.annotate("run_command", command.join(" "));

        let result = run_captured(&command, &cx.work_dir, cx.timeout, &library_env(cx))?;
        report.annotate("run_output", result.output.clone());

        match result.status {
            ExitKind::Exited(0) => {}
            ExitKind::Exited(code) => {
                report.fail(format!("Executable failed with exit code {code}."));
            }
            ExitKind::Signaled(signal) => {
                report.fail(format!("Executable received fatal signal {signal}."));
            }
            ExitKind::TimedOut => {
                report.fail("Executable timed out.");
            }
            ExitKind::SpawnFailed(ref e) => {
                report.fail(format!("Executable failed to start: {e}."));
            }
        }
        Ok(())
    }
}

/// Expands the test mode into its compilation steps. A two-step test
/// compiles the sources to objects first and then links the objects; its
/// expectations attach to the compile half only.
fn build_steps(
    compiler: &dyn Compiler,
    mode: TestMode,
    files: &[PathBuf],
    options: &[String],
    expected: &[Diagnostic],
) -> Vec<CompilationStep> {
    match mode {
        TestMode::Compile => vec![CompilationStep {
            mode: StepMode::Compile,
            files: files.to_vec(),
            options: options.to_vec(),
            output: None,
            expected: expected.to_vec(),
        }],
        TestMode::Link | TestMode::Run => vec![CompilationStep {
            mode: StepMode::Link,
            files: files.to_vec(),
            options: options.to_vec(),
            output: Some(compiler.executable_name(files)),
            expected: expected.to_vec(),
        }],
        TestMode::CompileAndLink => {
            let objects: Vec<PathBuf> =
                compiler.object_names(files).into_iter().map(PathBuf::from).collect();
            vec![
                CompilationStep {
                    mode: StepMode::Compile,
                    files: files.to_vec(),
                    options: options.to_vec(),
                    output: None,
                    expected: expected.to_vec(),
                },
                CompilationStep {
                    mode: StepMode::Link,
                    files: objects,
                    options: options.to_vec(),
                    output: Some(compiler.executable_name(files)),
                    expected: Vec::new(),
                },
            ]
        }
    }
}

/// The library-path overlay for executing a test binary. Several spellings
/// of the search-path variable exist; all get the same prefix.
fn library_env(cx: &TestContext) -> HashMap<String, String> {
    let mut overlay = HashMap::new();
    if cx.library_dirs.is_empty() {
        return overlay;
    }
    let prefix = cx.library_dirs.join(":");
    for var in ["LD_LIBRARY_PATH", "LD_LIBRARYN32_PATH", "LD_LIBRARYN64_PATH"] {
        let value = match env::var(var) {
            Ok(existing) if !existing.is_empty() => format!("{prefix}:{existing}"),
            _ => prefix.clone(),
        };
        overlay.insert(var.to_string(), value);
    }
    overlay
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir()
            .map(|dir| dir.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

/// Removes generated artifacts when dropped, so every exit path out of
/// `run` leaves the work directory clean.
struct ArtifactGuard {
    paths: Vec<PathBuf>,
}

impl ArtifactGuard {
    fn for_test(
        compiler: &dyn Compiler,
        mode: TestMode,
        files: &[PathBuf],
        work_dir: &Path,
    ) -> Self {
        let mut paths = Vec::new();
        if mode == TestMode::Compile || mode == TestMode::CompileAndLink {
            for object in compiler.object_names(files) {
                paths.push(work_dir.join(object));
            }
        }
        if mode != TestMode::Compile {
            paths.push(work_dir.join(compiler.executable_name(files)));
        }
        ArtifactGuard { paths }
    }
}

impl Drop for ArtifactGuard {
    fn drop(&mut self) {
        for path in &self.paths {
            if path.exists() {
                if let Err(e) = fs::remove_file(path) {
                    warn!("failed to remove artifact {}: {e}", path.display());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::d_compiler::lookup_compiler;
    use crate::d_diag::{Severity, SourcePosition};

    fn gcc() -> Box<dyn Compiler> {
        lookup_compiler("g++", Some(PathBuf::from("/usr/bin/g++")), vec![]).unwrap()
    }

    fn one_error() -> Vec<Diagnostic> {
        vec![Diagnostic::new(
            Some(SourcePosition::new("t.C", 3, 0)),
            Some(Severity::Error),
            None,
        )]
    }

    #[test]
    fn compile_mode_is_one_step_without_output() {
        let steps = build_steps(
            gcc().as_ref(),
            TestMode::Compile,
            &[PathBuf::from("/work/t.C")],
            &[],
            &one_error(),
        );
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].mode, StepMode::Compile);
        assert_eq!(steps[0].output, None);
        assert_eq!(steps[0].expected.len(), 1);
    }

    #[test]
    fn run_mode_links_into_a_named_executable() {
        let steps = build_steps(
            gcc().as_ref(),
            TestMode::Run,
            &[PathBuf::from("/work/t.C")],
            &[],
            &[],
        );
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].mode, StepMode::Link);
        assert_eq!(steps[0].output.as_deref(), Some("t.exe"));
    }

    #[test]
    fn two_step_mode_links_the_objects_with_no_expectations() {
        let steps = build_steps(
            gcc().as_ref(),
            TestMode::CompileAndLink,
            &[PathBuf::from("/work/t.C"), PathBuf::from("/work/helper.C")],
            &[],
            &one_error(),
        );
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].mode, StepMode::Compile);
        assert_eq!(steps[0].expected.len(), 1);
        assert_eq!(steps[1].mode, StepMode::Link);
        assert_eq!(
            steps[1].files,
            vec![PathBuf::from("t.o"), PathBuf::from("helper.o")]
        );
        assert!(steps[1].expected.is_empty());
    }

    #[test]
    fn artifact_guard_covers_objects_and_executable() {
        let files = [PathBuf::from("/work/t.C")];
        let compile_only =
            ArtifactGuard::for_test(gcc().as_ref(), TestMode::Compile, &files, Path::new("/b"));
        assert_eq!(compile_only.paths, vec![PathBuf::from("/b/t.o")]);

        let two_step = ArtifactGuard::for_test(
            gcc().as_ref(),
            TestMode::CompileAndLink,
            &files,
            Path::new("/b"),
        );
        assert_eq!(
            two_step.paths,
            vec![PathBuf::from("/b/t.o"), PathBuf::from("/b/t.exe")]
        );

        let link_only =
            ArtifactGuard::for_test(gcc().as_ref(), TestMode::Link, &files, Path::new("/b"));
        assert_eq!(link_only.paths, vec![PathBuf::from("/b/t.exe")]);
    }
}
