//! Shared helpers for the integration tests: a scripted stand-in compiler
//! whose diagnostics and generated executable are chosen per test.
#![cfg(unix)]

use check_diag::TestContext;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// A shell-script compiler. It tells compile invocations (`-c` present)
/// apart from link invocations, prints the canned output for each, creates
/// `.o` files when compiling, and honors `-o` when linking by writing an
/// executable script with the given body.
pub struct FakeCompiler {
    pub compile_output: String,
    pub compile_exit: i32,
    pub link_output: String,
    pub link_exit: i32,
    pub exe_body: String,
}

impl Default for FakeCompiler {
    fn default() -> Self {
        FakeCompiler {
            compile_output: String::new(),
            compile_exit: 0,
            link_output: String::new(),
            link_exit: 0,
            exe_body: "exit 0".to_string(),
        }
    }
}

impl FakeCompiler {
    pub fn install(&self, dir: &Path) -> PathBuf {
        let script = format!(
            r#"#!/bin/sh
mode=link
out=""
inputs=""
while [ $# -gt 0 ]; do
  case "$1" in
    -c) mode=compile ;;
    -o) shift; out="$1" ;;
    *.C|*.cc|*.c|*.o) inputs="$inputs $1" ;;
  esac
  shift
done
if [ "$mode" = compile ]; then
  for f in $inputs; do
    case "$f" in
      *.o) ;;
      *) b=`basename "$f"`; : > "${{b%.*}}.o" ;;
    esac
  done
  cat <<'FAKE_OUT'
{compile_output}FAKE_OUT
  exit {compile_exit}
fi
cat <<'FAKE_OUT'
{link_output}FAKE_OUT
if [ -n "$out" ]; then
  cat > "$out" <<'FAKE_EXE'
#!/bin/sh
{exe_body}
FAKE_EXE
  chmod +x "$out"
fi
exit {link_exit}
"#,
            compile_output = with_newline(&self.compile_output),
            compile_exit = self.compile_exit,
            link_output = with_newline(&self.link_output),
            link_exit = self.link_exit,
            exe_body = self.exe_body,
        );
        let path = dir.join("fake-compiler");
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }
}

fn with_newline(text: &str) -> String {
    if text.is_empty() || text.ends_with('\n') {
        text.to_string()
    } else {
        format!("{text}\n")
    }
}

pub fn write_source(dir: &Path, name: &str, text: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, text).unwrap();
    path
}

/// A context wired to the fake compiler through the gcc command grammar.
pub fn context(fake_compiler: &Path, work_dir: &Path) -> TestContext {
    let mut cx = TestContext::new("g++", work_dir);
    cx.compiler_path = Some(fake_compiler.to_path_buf());
    cx.timeout = 10;
    cx
}
