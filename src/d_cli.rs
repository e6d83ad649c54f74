use crate::d_scan::Dialect;
use crate::prelude::*;
use clap::{Parser, ValueEnum};

/// Command-line interface for the harness.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "check-diag",
    version,
    about = "Check a compiler's diagnostics against annotated test sources"
)]
pub struct Cli {
    /// Test source files to check.
    #[arg(required = true, value_name = "SOURCE")]
    pub sources: Vec<PathBuf>,

    /// Compiler kind to test (see registry names, e.g. gcc, g++, edg).
    #[arg(long, default_value = "g++")]
    pub compiler: String,

    /// Explicit path to the compiler executable; defaults to a PATH lookup.
    #[arg(long, value_name = "PATH")]
    pub compiler_path: Option<PathBuf>,

    /// Annotation dialect; `auto` sniffs each file.
    #[arg(long, value_enum, default_value_t = DialectArg::Auto)]
    pub dialect: DialectArg,

    /// Wall-clock budget per child process, in seconds (0 = unbounded).
    #[arg(long, default_value_t = 300)]
    pub timeout: u64,

    /// Compiler options overriding the built-in defaults. In-source option
    /// markers still win over this.
    #[arg(long, value_name = "OPTS")]
    pub options: Option<String>,

    /// Platform triple the compiler targets, for `Skip if not target:`.
    #[arg(long)]
    pub target: Option<String>,

    /// Platform triple of this machine; paired with --target for `native`.
    #[arg(long)]
    pub host: Option<String>,

    /// Directory prepended to the library search path when running test
    /// executables. May be given more than once.
    #[arg(long = "library-path", value_name = "DIR")]
    pub library_path: Vec<String>,

    /// Print each test's annotations (commands, captured output).
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialectArg {
    /// Sniff the dialect from each file's contents.
    Auto,
    /// `WARNING - ` / `ERROR - ` markers.
    Legacy,
    /// `{ dg-... }` markers.
    Dg,
}

impl DialectArg {
    /// The forced dialect, if any.
    pub fn resolve(self) -> Option<Dialect> {
        match self {
            DialectArg::Auto => None,
            DialectArg::Legacy => Some(Dialect::Legacy),
            DialectArg::Dg => Some(Dialect::Bracket),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let cli = Cli::parse_from(["check-diag", "t.C"]);
        assert_eq!(cli.compiler, "g++");
        assert_eq!(cli.timeout, 300);
        assert_eq!(cli.dialect, DialectArg::Auto);
        assert!(!cli.verbose);
        assert_eq!(cli.sources, vec![PathBuf::from("t.C")]);
    }

    #[test]
    fn dialect_can_be_forced() {
        let cli = Cli::parse_from(["check-diag", "--dialect", "dg", "t.C"]);
        assert_eq!(cli.dialect.resolve(), Some(Dialect::Bracket));
        assert_eq!(DialectArg::Auto.resolve(), None);
    }

    #[test]
    fn library_path_accumulates() {
        let cli = Cli::parse_from([
            "check-diag",
            "--library-path",
            "/opt/lib",
            "--library-path",
            "/usr/local/lib",
            "t.C",
        ]);
        assert_eq!(cli.library_path, vec!["/opt/lib", "/usr/local/lib"]);
    }

    #[test]
    fn sources_are_required() {
        assert!(Cli::try_parse_from(["check-diag"]).is_err());
    }
}
