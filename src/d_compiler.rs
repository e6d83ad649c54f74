use crate::d_classify::{DiagnosticSyntax, EDG_SYNTAX, GCC_SYNTAX};
use crate::prelude::*;
use anyhow::{Context as _, Result};
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// One compiler invocation flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMode {
    /// Compile to object files, do not link.
    Compile,
    /// Compile and link into an executable.
    Link,
}

/// The capability a compiler variant supplies to the harness: building a
/// command line for a step, naming the files that step will generate, and
/// telling the classifier which diagnostic grammar to apply.
pub trait Compiler: Send + Sync {
    /// Registry name of this variant.
    fn name(&self) -> &str;

    /// Path to the compiler executable.
    fn path(&self) -> &Path;

    /// The full argument vector for one compilation step, including
    /// `argv[0]`.
    fn command(
        &self,
        mode: StepMode,
        files: &[PathBuf],
        options: &[String],
        output: Option<&str>,
    ) -> Vec<String>;

    /// The diagnostic grammar this compiler's output follows.
    fn syntax(&self) -> &DiagnosticSyntax;

    /// Name of the executable produced when linking `sources`.
    fn executable_name(&self, sources: &[PathBuf]) -> String {
        // ".exe" is required on Windows and harmless elsewhere.
        format!("{}.exe", first_stem(sources))
    }

    /// Names of the object files produced when compiling `sources`.
    fn object_names(&self, sources: &[PathBuf]) -> Vec<String> {
        sources.iter().map(|s| format!("{}.o", stem_of(s))).collect()
    }
}

fn stem_of(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn first_stem(sources: &[PathBuf]) -> String {
    sources.first().map(|s| stem_of(s)).unwrap_or_else(|| "a".into())
}

/// A GCC-like compiler (gcc, g++, and friends).
pub struct GccCompiler {
    name: String,
    path: PathBuf,
    baseline: Vec<String>,
}

impl Compiler for GccCompiler {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn command(
        &self,
        mode: StepMode,
        files: &[PathBuf],
        options: &[String],
        output: Option<&str>,
    ) -> Vec<String> {
        let mut command = vec![self.path.to_string_lossy().into_owned()];
        // Keep each diagnostic on a single output line.
        command.push("-fmessage-length=0".into());
        if mode == StepMode::Compile {
            command.push("-c".into());
        }
        command.extend(self.baseline.iter().cloned());
        command.extend(options.iter().cloned());
        if let Some(output) = output {
            command.push("-o".into());
            command.push(output.into());
        }
        command.extend(files.iter().map(|f| f.to_string_lossy().into_owned()));
        command
    }

    fn syntax(&self) -> &DiagnosticSyntax {
        &GCC_SYNTAX
    }
}

/// An EDG-like compiler front end.
pub struct EdgCompiler {
    name: String,
    path: PathBuf,
    baseline: Vec<String>,
}

impl Compiler for EdgCompiler {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn command(
        &self,
        mode: StepMode,
        files: &[PathBuf],
        options: &[String],
        output: Option<&str>,
    ) -> Vec<String> {
        let mut command = vec![self.path.to_string_lossy().into_owned()];
        command.push("--brief_diagnostics".into());
        if mode == StepMode::Compile {
            command.push("-c".into());
        }
        command.extend(self.baseline.iter().cloned());
        command.extend(options.iter().cloned());
        if let Some(output) = output {
            command.push("-o".into());
            command.push(output.into());
        }
        command.extend(files.iter().map(|f| f.to_string_lossy().into_owned()));
        command
    }

    fn syntax(&self) -> &DiagnosticSyntax {
        &EDG_SYNTAX
    }
}

type CompilerFactory = fn(String, PathBuf, Vec<String>) -> Box<dyn Compiler>;

fn gcc_factory(name: String, path: PathBuf, baseline: Vec<String>) -> Box<dyn Compiler> {
    Box::new(GccCompiler {
        name,
        path,
        baseline,
    })
}

fn edg_factory(name: String, path: PathBuf, baseline: Vec<String>) -> Box<dyn Compiler> {
    Box::new(EdgCompiler {
        name,
        path,
        baseline,
    })
}

/// The name → variant registry. New compiler kinds are additive entries
/// here; nothing else in the harness changes.
static COMPILER_REGISTRY: Lazy<HashMap<&'static str, CompilerFactory>> = Lazy::new(|| {
    let mut registry: HashMap<&'static str, CompilerFactory> = HashMap::new();
    registry.insert("gcc", gcc_factory);
    registry.insert("g++", gcc_factory);
    registry.insert("edg", edg_factory);
    registry.insert("eccp", edg_factory);
    registry
});

/// Looks up a compiler variant by registry name. When `path` is not given,
/// the name is resolved through `PATH`.
pub fn lookup_compiler(
    name: &str,
    path: Option<PathBuf>,
    baseline: Vec<String>,
) -> Result<Box<dyn Compiler>> {
    let factory = COMPILER_REGISTRY
        .get(name)
        .with_context(|| format!("unknown compiler kind '{name}'"))?;
    let path = match path {
        Some(path) => path,
        None => which::which(name)
            .with_context(|| format!("compiler '{name}' not found in PATH"))?,
    };
    debug!("using compiler '{}' at {}", name, path.display());
    Ok(factory(name.to_string(), path, baseline))
}

/// Registered compiler names, for CLI help and error messages.
pub fn known_compilers() -> Vec<&'static str> {
    let mut names: Vec<_> = COMPILER_REGISTRY.keys().copied().collect();
    names.sort_unstable();
    names
}
