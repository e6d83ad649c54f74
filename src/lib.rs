//! check-diag verifies a compiler against annotated source files.
//!
//! Each test is a small source file carrying inline expectations about the
//! diagnostics the compiler should emit. The harness compiles (and, when the
//! test asks for it, links and runs) the file, captures the compiler's merged
//! output, classifies it into structured diagnostics, and reconciles those
//! against the expectations scanned from the source text. Two annotation
//! dialects are supported: the legacy `WARNING - ` / `ERROR - ` markers and
//! the bracketed `{ dg-... }` markers.

// Re-export std common modules
pub mod prelude {
    pub use std::env;
    pub use std::fs;
    pub use std::io;
    pub use std::path::{Path, PathBuf};
    pub use std::process::Child;
    pub use std::process::Command;
    pub use std::process::Stdio;
    pub use std::time::{Duration, Instant};

    pub use log::{debug, error, info, warn};
}

pub mod d_cli;
pub use d_cli::Cli;
pub mod d_classify;
pub mod d_compiler;
pub mod d_context;
pub mod d_diag;
pub mod d_match;
pub mod d_process;
pub mod d_report;
pub mod d_scan;
pub mod d_step;

pub use d_context::TestContext;
pub use d_report::{TestOutcome, TestReport};
pub use d_step::CompilerTestCase;
