use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// A location in source code. An empty `file` or a zero `line`/`column`
/// means the corresponding piece of information is unknown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePosition {
    pub file: String,
    /// 1-indexed; 0 = unknown.
    pub line: u32,
    /// 1-indexed; 0 = unknown.
    pub column: u32,
}

impl SourcePosition {
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        SourcePosition {
            file: file.into(),
            line,
            column,
        }
    }

    /// The base name of the file, for file comparisons that ignore paths.
    pub fn base_name(&self) -> &str {
        Path::new(&self.file)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.file)
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut wrote = false;
        if !self.file.is_empty() {
            write!(f, "\"{}\"", self.file)?;
            wrote = true;
        }
        if self.line != 0 {
            if wrote {
                write!(f, ", ")?;
            }
            write!(f, "line {}", self.line)?;
        }
        if self.column != 0 {
            write!(f, ": {}", self.column)?;
        }
        Ok(())
    }
}

/// The classification tier of a diagnostic. `InternalError` is synthetic:
/// it is never emitted by a compiler as such, but assigned when an
/// error-tier message matches the crash detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Warning,
    Error,
    InternalError,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "warning" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            "internal_error" => Ok(Severity::InternalError),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

/// A compiler-reported message, or the expectation of one.
///
/// The same type serves both sides of the reconciliation. For an emitted
/// diagnostic every field is populated and `message` holds literal text.
/// For an expected diagnostic, `message` is a search pattern, and any
/// `None` field means "don't care".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub position: Option<SourcePosition>,
    pub severity: Option<Severity>,
    pub message: Option<String>,
}

impl Diagnostic {
    pub fn new(
        position: Option<SourcePosition>,
        severity: Option<Severity>,
        message: Option<String>,
    ) -> Self {
        Diagnostic {
            position,
            severity,
            message,
        }
    }

    pub fn is_internal_error(&self) -> bool {
        self.severity == Some(Severity::InternalError)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.position {
            Some(p) => write!(f, "{p}")?,
            None => write!(f, "<no source position>")?,
        }
        match &self.severity {
            Some(s) => write!(f, ": {s}")?,
            None => write!(f, ": <no severity>")?,
        }
        match &self.message {
            Some(m) => write!(f, ": {m}"),
            None => write!(f, ": <no message>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_display_omits_unknown_fields() {
        let full = SourcePosition::new("foo.c", 10, 3);
        assert_eq!(full.to_string(), "\"foo.c\", line 10: 3");

        let no_column = SourcePosition::new("foo.c", 10, 0);
        assert_eq!(no_column.to_string(), "\"foo.c\", line 10");

        let line_only = SourcePosition::new("", 5, 0);
        assert_eq!(line_only.to_string(), "line 5");
    }

    #[test]
    fn base_name_strips_directories() {
        let pos = SourcePosition::new("a/b/foo.c", 1, 0);
        assert_eq!(pos.base_name(), "foo.c");
    }

    #[test]
    fn diagnostic_display_uses_placeholders() {
        let d = Diagnostic::new(None, None, None);
        assert_eq!(
            d.to_string(),
            "<no source position>: <no severity>: <no message>"
        );

        let d = Diagnostic::new(
            Some(SourcePosition::new("foo.c", 2, 0)),
            Some(Severity::Error),
            Some("bad cast".into()),
        );
        assert_eq!(d.to_string(), "\"foo.c\", line 2: error: bad cast");
    }

    #[test]
    fn severity_round_trips() {
        for s in [Severity::Warning, Severity::Error, Severity::InternalError] {
            assert_eq!(s.as_str().parse::<Severity>(), Ok(s));
        }
        assert!("fatal".parse::<Severity>().is_err());
    }
}
