use crate::d_diag::{Diagnostic, Severity, SourcePosition};
use once_cell::sync::Lazy;
use regex::Regex;

/// The diagnostic grammar of one compiler kind, as pure data: an ordered
/// list of severity patterns (tried in sequence, first match wins), a list
/// of chatter patterns that must never be treated as diagnostics, and a
/// detector for messages that mean the compiler itself crashed.
///
/// Every severity pattern must provide the named capture groups `file`,
/// `message`, and optionally `line` and `column`.
pub struct DiagnosticSyntax {
    pub severities: Vec<(Severity, Regex)>,
    pub ignore: Vec<Regex>,
    pub internal_error: Regex,
}

impl DiagnosticSyntax {
    /// Turns the raw captured output into structured diagnostics, in the
    /// order they appeared in the stream.
    pub fn classify(&self, output: &str) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        for line in output.lines() {
            if let Some(diagnostic) = self.classify_line(line) {
                diagnostics.push(diagnostic);
            }
        }
        diagnostics
    }

    fn classify_line(&self, line: &str) -> Option<Diagnostic> {
        for (severity, pattern) in &self.severities {
            let caps = match pattern.captures(line) {
                Some(caps) => caps,
                None => continue,
            };
            let matched_text = caps.get(0).map(|m| m.as_str()).unwrap_or(line);
            if self.ignore.iter().any(|ig| ig.is_match(matched_text)) {
                return None;
            }

            let file = caps
                .name("file")
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            let line_number = capture_number(&caps, "line");
            let column_number = capture_number(&caps, "column");
            let message = caps
                .name("message")
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();

            // An internal error is an error that indicates that the
            // compiler crashed.
            let mut severity = *severity;
            if severity == Severity::Error && self.internal_error.is_match(&message) {
                severity = Severity::InternalError;
            }

            return Some(Diagnostic::new(
                Some(SourcePosition::new(file, line_number, column_number)),
                Some(severity),
                Some(message),
            ));
        }
        None
    }
}

fn capture_number(caps: &regex::Captures<'_>, name: &str) -> u32 {
    caps.name(name)
        .and_then(|m| m.as_str().trim().parse().ok())
        .unwrap_or(0)
}

/// GCC-like diagnostic grammar: `file:line[:column]: [severity:] message`,
/// one diagnostic per line (the harness always passes
/// `-fmessage-length=0`).
pub static GCC_SYNTAX: Lazy<DiagnosticSyntax> = Lazy::new(|| DiagnosticSyntax {
    severities: vec![
        (
            Severity::Warning,
            Regex::new(
                r"^(?P<file>[^:]*):((?P<line>[^:]*):)?(\s*(?P<column>[0-9]+):)? warning: (?P<message>.*)$",
            )
            .unwrap(),
        ),
        (
            Severity::Error,
            Regex::new(
                r"^(?P<file>[^:]*):((?P<line>[^:]*):)?(\s*(?P<column>[0-9]+):)? (?P<message>.*)$",
            )
            .unwrap(),
        ),
    ],
    ignore: vec![
        Regex::new(r"^.*: In (function|member|method|constructor|instantiation|program|subroutine|block-data)").unwrap(),
        Regex::new(r"^.*: In (.*function|method|.*structor)").unwrap(),
        Regex::new(r"^.*: In instantiation of").unwrap(),
        Regex::new(r"^.*:   instantiated from").unwrap(),
        Regex::new(r"^.*: At (top level|global scope)").unwrap(),
        Regex::new(r"^collect: re(compiling|linking)").unwrap(),
        Regex::new(r"^collect2: ld returned .*").unwrap(),
        Regex::new(r"^Please submit.*instructions").unwrap(),
        Regex::new(r"^.*: warning -f(pic|PIC) ignored for target").unwrap(),
        Regex::new(r"^.*file path prefix .* never used").unwrap(),
        Regex::new(r"^.*linker input file unused since linking not done").unwrap(),
    ],
    internal_error: Regex::new(r"Internal (compiler )?error").unwrap(),
});

/// EDG-like diagnostic grammar: `"file", line N: severity: message`.
pub static EDG_SYNTAX: Lazy<DiagnosticSyntax> = Lazy::new(|| DiagnosticSyntax {
    severities: vec![
        (
            Severity::Warning,
            Regex::new(r#"^"(?P<file>[^"]*)", line (?P<line>[0-9]+): warning: (?P<message>.*)$"#)
                .unwrap(),
        ),
        (
            Severity::Error,
            Regex::new(r#"^"(?P<file>[^"]*)", line (?P<line>[0-9]+): (catastrophic )?error: (?P<message>.*)$"#)
                .unwrap(),
        ),
    ],
    ignore: vec![
        Regex::new(r"^\s*detected during ").unwrap(),
        Regex::new(r"^\d+ errors? detected in the compilation of").unwrap(),
    ],
    internal_error: Regex::new(r"Internal error").unwrap(),
});
