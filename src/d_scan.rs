use crate::d_diag::{Diagnostic, Severity, SourcePosition};
use anyhow::{bail, Result};
use once_cell::sync::Lazy;
use regex::Regex;

/// What a test asks the harness to do with its source files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestMode {
    /// Compile only, do not link.
    Compile,
    /// Compile and link in a single step.
    Link,
    /// Compile to objects first, then link the objects in a second step.
    CompileAndLink,
    /// Link, then execute the produced binary.
    Run,
}

/// The two in-source annotation grammars.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Legacy,
    Bracket,
}

/// One expected diagnostic, possibly restricted to certain targets by a
/// `{ target ... }` selector. Empty `targets` = expected everywhere.
#[derive(Debug, Clone)]
pub struct ExpectedDiagnostic {
    pub diagnostic: Diagnostic,
    pub targets: Vec<String>,
}

/// Everything a scanner extracts from one source file.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub expected: Vec<ExpectedDiagnostic>,
    pub mode: TestMode,
    /// Per-test compiler options; `None` means "use the defaults".
    pub options: Option<Vec<String>>,
    /// Target-triple patterns the test is restricted to; empty = run anywhere.
    pub skip_targets: Vec<String>,
    /// Extra input files named by the test, relative to the source file.
    pub extra_sources: Vec<String>,
}

/// Extracts expected diagnostics, the test mode, and implied compiler
/// options from a source file's text.
pub trait AnnotationScanner {
    fn scan(&self, source_name: &str, text: &str) -> Result<ScanOutcome>;
}

/// Picks the dialect for a source file: bracket markers win if any are
/// present, otherwise the legacy grammar applies.
pub fn detect_dialect(text: &str) -> Dialect {
    static DG_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\s*dg-[-a-z]+").unwrap());
    if DG_MARKER.is_match(text) {
        Dialect::Bracket
    } else {
        Dialect::Legacy
    }
}

/// Returns the scanner for a dialect.
pub fn scanner_for(dialect: Dialect) -> &'static dyn AnnotationScanner {
    match dialect {
        Dialect::Legacy => &LegacyScanner,
        Dialect::Bracket => &BracketScanner,
    }
}

/// The legacy grammar: `WARNING - ` / `ERROR - ` anywhere in a line marks an
/// expected diagnostic on that line (or on the line named by a `LINE <n>`
/// marker); whole-file phrases select the mode and options.
pub struct LegacyScanner;

static LINE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"LINE (?P<line>[0-9]+)").unwrap());
static OPTIONS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Special.*Options:(?P<options>.*)").unwrap());
static SKIP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)Skip if not target:\s*(?P<platforms>.*?)\s*$").unwrap());
static SOURCES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)Additional sources:\s*(?P<files>.*?)\s*$").unwrap());

impl AnnotationScanner for LegacyScanner {
    fn scan(&self, source_name: &str, text: &str) -> Result<ScanOutcome> {
        let mut expected = Vec::new();
        for (index, line) in text.lines().enumerate() {
            let line_number = (index + 1) as u32;
            for (severity, marker) in [
                (Severity::Warning, "WARNING - "),
                (Severity::Error, "ERROR - "),
            ] {
                if !line.contains(marker) {
                    continue;
                }
                let expected_line = LINE_RE
                    .captures(line)
                    .and_then(|caps| caps["line"].parse().ok())
                    .unwrap_or(line_number);
                expected.push(ExpectedDiagnostic {
                    diagnostic: Diagnostic::new(
                        Some(SourcePosition::new(source_name, expected_line, 0)),
                        Some(severity),
                        None,
                    ),
                    targets: Vec::new(),
                });
            }
        }

        let mode = if text.contains("Build don't link:") {
            TestMode::Compile
        } else if text.contains("Build don't run:") {
            TestMode::Link
        } else if text.contains("Build then link:") {
            TestMode::CompileAndLink
        } else if !expected.is_empty() {
            // A test that expects diagnostics is never run.
            TestMode::Link
        } else {
            TestMode::Run
        };

        let options = OPTIONS_RE.captures(text).map(|caps| {
            caps["options"]
                .split_whitespace()
                .map(str::to_string)
                .collect()
        });
        let skip_targets = SKIP_RE
            .captures(text)
            .map(|caps| {
                caps["platforms"]
                    .split_whitespace()
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let extra_sources = SOURCES_RE
            .captures(text)
            .map(|caps| caps["files"].split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        Ok(ScanOutcome {
            expected,
            mode,
            options,
            skip_targets,
            extra_sources,
        })
    }
}

/// The bracket grammar: `{ dg-warning "..." }` / `{ dg-error "..." }` mark
/// expected diagnostics, `{ dg-do <mode> }` is mandatory, and
/// `{ dg-options "..." }` overrides the default options. A `{ target ... }`
/// selector restricts a diagnostic (or, on `dg-do`, the whole test) to the
/// listed target patterns.
pub struct BracketScanner;

static DG_DIAG_RE: Lazy<Regex> = Lazy::new(|| {
    // Matches through the last closing brace on the line, so selector
    // sub-groups like `{ target *-*-* }` stay inside `rest`.
    Regex::new(r#"\{\s*dg-(?P<kind>warning|error)\s+"(?P<msg>[^"]*)"(?P<rest>.*)\}[^}]*$"#).unwrap()
});
static DG_DO_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\s*dg-do\s+(?P<mode>[a-z]+)(?P<rest>.*)").unwrap());
static DG_OPTIONS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\{\s*dg-options\s+"(?P<options>[^"]*)""#).unwrap());
static DG_TRAILING_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?P<line>[0-9]+|\.)\s*$").unwrap());
static DG_TARGET_SELECTOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\s*target\s+(?P<targets>[^{}]*)\}").unwrap());

/// Target-triple patterns of a `{ target ... }` selector, if one is present.
fn selector_targets(text: &str) -> Vec<String> {
    DG_TARGET_SELECTOR_RE
        .captures(text)
        .map(|caps| {
            caps["targets"]
                .split_whitespace()
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

impl AnnotationScanner for BracketScanner {
    fn scan(&self, source_name: &str, text: &str) -> Result<ScanOutcome> {
        let mut expected = Vec::new();
        for (index, line) in text.lines().enumerate() {
            let line_number = (index + 1) as u32;
            for caps in DG_DIAG_RE.captures_iter(line) {
                let severity = match &caps["kind"] {
                    "warning" => Severity::Warning,
                    _ => Severity::Error,
                };
                let expected_line = match DG_TRAILING_LINE_RE
                    .captures(caps["rest"].trim_end())
                    .map(|c| c["line"].to_string())
                {
                    Some(token) if token == "." => line_number,
                    Some(token) => token.parse().unwrap_or(line_number),
                    None => line_number,
                };
                let message = match &caps["msg"] {
                    "" => None,
                    m => Some(m.to_string()),
                };
                expected.push(ExpectedDiagnostic {
                    diagnostic: Diagnostic::new(
                        Some(SourcePosition::new(source_name, expected_line, 0)),
                        Some(severity),
                        message,
                    ),
                    targets: selector_targets(&caps["rest"]),
                });
            }
        }

        let mut skip_targets = Vec::new();
        let mode = match DG_DO_RE.captures(text) {
            Some(caps) => {
                // A selector on dg-do restricts the whole test.
                skip_targets = selector_targets(&caps["rest"]);
                match &caps["mode"] {
                    "compile" | "assemble" => TestMode::Compile,
                    "link" => TestMode::Link,
                    "run" => TestMode::Run,
                    other => bail!("unsupported dg-do mode '{other}' in {source_name}"),
                }
            }
            None => bail!("missing dg-do marker in {source_name}"),
        };

        let options = DG_OPTIONS_RE.captures(text).map(|caps| {
            caps["options"]
                .split_whitespace()
                .map(str::to_string)
                .collect()
        });

        Ok(ScanOutcome {
            expected,
            mode,
            options,
            skip_targets,
            extra_sources: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan_legacy(text: &str) -> ScanOutcome {
        LegacyScanner.scan("t.C", text).unwrap()
    }

    fn scan_bracket(text: &str) -> ScanOutcome {
        BracketScanner.scan("t.C", text).unwrap()
    }

    #[test]
    fn legacy_markers_yield_one_diagnostic_per_annotation() {
        let out = scan_legacy(
            "int f();\n\
             int x = \"s\"; // ERROR - bad conversion\n\
             int y; // WARNING - shadowed\n",
        );
        assert_eq!(out.expected.len(), 2);
        assert_eq!(out.expected[0].diagnostic.position.as_ref().unwrap().line, 2);
        assert_eq!(out.expected[0].diagnostic.severity, Some(Severity::Error));
        assert_eq!(out.expected[0].diagnostic.message, None);
        assert_eq!(out.expected[1].diagnostic.position.as_ref().unwrap().line, 3);
        assert_eq!(out.expected[1].diagnostic.severity, Some(Severity::Warning));
    }

    #[test]
    fn legacy_line_marker_overrides_position() {
        let out = scan_legacy("template <class T> void f(T); // ERROR - LINE 12\n");
        assert_eq!(out.expected[0].diagnostic.position.as_ref().unwrap().line, 12);
    }

    #[test]
    fn legacy_mode_phrases() {
        assert_eq!(
            scan_legacy("// Build don't link:\nint x;\n").mode,
            TestMode::Compile
        );
        assert_eq!(
            scan_legacy("// Build don't run:\nint main() {}\n").mode,
            TestMode::Link
        );
        assert_eq!(
            scan_legacy("// Build then link:\nint main() {}\n").mode,
            TestMode::CompileAndLink
        );
    }

    #[test]
    fn legacy_default_mode_depends_on_expectations() {
        assert_eq!(scan_legacy("int main() {}\n").mode, TestMode::Run);
        assert_eq!(
            scan_legacy("int x = f(); // ERROR - undeclared\n").mode,
            TestMode::Link
        );
    }

    #[test]
    fn legacy_special_options_override() {
        let out = scan_legacy("// Special g++ Options: -w -O2\nint main() {}\n");
        assert_eq!(
            out.options,
            Some(vec!["-w".to_string(), "-O2".to_string()])
        );
    }

    #[test]
    fn legacy_skip_and_additional_sources() {
        let out = scan_legacy(
            "// Skip if not target: i?86-*-* x86_64-*-*\n\
             // Additional sources: helper.C\n\
             int main() {}\n",
        );
        assert_eq!(out.skip_targets, vec!["i?86-*-*", "x86_64-*-*"]);
        assert_eq!(out.extra_sources, vec!["helper.C"]);
    }

    #[test]
    fn bracket_diag_defaults_to_current_line() {
        let text = "\n\n\n\n\n\n// { dg-error \"mismatched\" }\n// { dg-do compile }\n";
        let out = scan_bracket(text);
        assert_eq!(out.expected.len(), 1);
        let d = &out.expected[0].diagnostic;
        assert_eq!(d.position.as_ref().unwrap().line, 7);
        assert_eq!(d.severity, Some(Severity::Error));
        assert_eq!(d.message.as_deref(), Some("mismatched"));
        assert!(out.expected[0].targets.is_empty());
    }

    #[test]
    fn bracket_trailing_line_number_overrides() {
        let out = scan_bracket(
            "// { dg-do compile }\n// { dg-warning \"unused\" \"\" { target *-*-* } 42 }\n",
        );
        assert_eq!(out.expected[0].diagnostic.position.as_ref().unwrap().line, 42);
        assert_eq!(out.expected[0].diagnostic.severity, Some(Severity::Warning));
    }

    #[test]
    fn bracket_dot_means_current_line() {
        let out = scan_bracket("// { dg-do compile }\n// { dg-error \"bad\" \"\" . }\n");
        assert_eq!(out.expected[0].diagnostic.position.as_ref().unwrap().line, 2);
    }

    #[test]
    fn bracket_mode_is_mandatory() {
        assert!(BracketScanner
            .scan("t.C", "// { dg-error \"bad\" }\n")
            .is_err());
    }

    #[test]
    fn bracket_modes_map() {
        for (mode, want) in [
            ("compile", TestMode::Compile),
            ("assemble", TestMode::Compile),
            ("link", TestMode::Link),
            ("run", TestMode::Run),
        ] {
            let text = format!("// {{ dg-do {mode} }}\nint main() {{}}\n");
            assert_eq!(scan_bracket(&text).mode, want);
        }
    }

    #[test]
    fn bracket_options_marker() {
        let out = scan_bracket("// { dg-do compile }\n// { dg-options \"-O2 -w\" }\n");
        assert_eq!(out.options, Some(vec!["-O2".to_string(), "-w".to_string()]));
    }

    #[test]
    fn bracket_target_selector_is_recorded_on_the_expectation() {
        let out = scan_bracket(
            "// { dg-do compile }\n\
             int x; // { dg-warning \"unused\" \"\" { target sparc-*-* } }\n\
             int y; // { dg-warning \"unused\" }\n",
        );
        assert_eq!(out.expected.len(), 2);
        assert_eq!(out.expected[0].targets, vec!["sparc-*-*"]);
        assert!(out.expected[1].targets.is_empty());
    }

    #[test]
    fn bracket_dg_do_selector_restricts_the_whole_test() {
        let out = scan_bracket("// { dg-do run { target sparc-*-* mips-*-* } }\nint main() {}\n");
        assert_eq!(out.mode, TestMode::Run);
        assert_eq!(out.skip_targets, vec!["sparc-*-*", "mips-*-*"]);

        let unrestricted = scan_bracket("// { dg-do run }\nint main() {}\n");
        assert!(unrestricted.skip_targets.is_empty());
    }

    #[test]
    fn dialect_detection() {
        assert_eq!(detect_dialect("// { dg-do run }\n"), Dialect::Bracket);
        assert_eq!(detect_dialect("// ERROR - bad\n"), Dialect::Legacy);
    }
}
