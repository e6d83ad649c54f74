use crate::prelude::*;
use anyhow::{Context as _, Result};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::io::Read;
use std::sync::Mutex;
use std::thread;

/// PID of the child currently being waited on, if any. The Ctrl+C handler
/// uses it to take the whole pipeline down with the harness.
pub static ACTIVE_CHILD_PID: Lazy<Mutex<Option<u32>>> = Lazy::new(|| Mutex::new(None));

/// Registers a global Ctrl+C handler once. The handler kills the active
/// child process, if there is one, and then exits.
pub fn register_ctrlc_handler() -> Result<()> {
    ctrlc::set_handler(move || {
        let pid = ACTIVE_CHILD_PID.lock().ok().and_then(|slot| *slot);
        if let Some(pid) = pid {
            eprintln!("Ctrl+C pressed, terminating running child process...");
            kill_pid(pid);
        }
        std::process::exit(130);
    })
    .context("failed to register Ctrl+C handler")?;
    Ok(())
}

#[cfg(unix)]
fn kill_pid(pid: u32) {
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_pid(_pid: u32) {}

/// How a captured invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitKind {
    /// The process exited normally with the given code.
    Exited(i32),
    /// The process was terminated by the given signal.
    Signaled(i32),
    /// The wall-clock timeout elapsed and the process was killed.
    TimedOut,
    /// The process could not be spawned at all.
    SpawnFailed(String),
}

impl ExitKind {
    pub fn success(&self) -> bool {
        matches!(self, ExitKind::Exited(0))
    }
}

impl std::fmt::Display for ExitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitKind::Exited(code) => write!(f, "exit code {code}"),
            ExitKind::Signaled(sig) => write!(f, "fatal signal {sig}"),
            ExitKind::TimedOut => write!(f, "timed out"),
            ExitKind::SpawnFailed(e) => write!(f, "failed to start: {e}"),
        }
    }
}

/// The result of one captured invocation: how it ended, plus everything it
/// wrote to standard output and standard error, merged into one stream.
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub status: ExitKind,
    pub output: String,
}

/// Runs `argv` in `dir`, capturing merged stdout/stderr, with `timeout`
/// seconds of wall-clock budget (0 = unbounded) and `env_overlay` applied on
/// top of the inherited environment.
///
/// The child's stdin is closed so an interactive tool cannot block, and core
/// dumps are disabled so a crash shows up only in the exit status. On
/// timeout the child is killed and `ExitKind::TimedOut` is returned together
/// with whatever output was captured before the kill. A spawn error maps to
/// `ExitKind::SpawnFailed` rather than an `Err`: the caller treats it like
/// any other non-success status.
pub fn run_captured(
    argv: &[String],
    dir: &Path,
    timeout: u64,
    env_overlay: &HashMap<String, String>,
) -> Result<ExecResult> {
    anyhow::ensure!(!argv.is_empty(), "empty command line");
    debug!("running: {} (cwd {})", argv.join(" "), dir.display());

    let mut cmd = Command::new(&argv[0]);
    cmd.args(&argv[1..]);
    cmd.current_dir(dir);
    cmd.stdin(Stdio::null());
    for (key, value) in env_overlay {
        cmd.env(key, value);
    }
    let pre_readers = setup_capture(&mut cmd)?;
    disable_core_dumps(&mut cmd);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!("failed to spawn {}: {e}", argv[0]);
            return Ok(ExecResult {
                status: ExitKind::SpawnFailed(e.to_string()),
                output: String::new(),
            });
        }
    };
    // Close the parent's copies of the write ends so the readers see EOF.
    drop(cmd);

    if let Ok(mut slot) = ACTIVE_CHILD_PID.lock() {
        *slot = Some(child.id());
    }
    let drains: Vec<_> = take_readers(&mut child, pre_readers)
        .into_iter()
        .map(|mut r| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = r.read_to_end(&mut buf);
                buf
            })
        })
        .collect();

    let status = wait_with_timeout(&mut child, timeout)?;
    if let Ok(mut slot) = ACTIVE_CHILD_PID.lock() {
        *slot = None;
    }
    let mut output = String::new();
    for drain in drains {
        if let Ok(buf) = drain.join() {
            output.push_str(&String::from_utf8_lossy(&buf));
        }
    }

    Ok(ExecResult { status, output })
}

fn wait_with_timeout(child: &mut Child, timeout: u64) -> Result<ExitKind> {
    if timeout == 0 {
        let status = child.wait().context("failed to wait for child")?;
        return Ok(decode_status(status));
    }

    let deadline = Instant::now() + Duration::from_secs(timeout);
    loop {
        if let Some(status) = child.try_wait().context("failed to poll child")? {
            return Ok(decode_status(status));
        }
        if Instant::now() >= deadline {
            warn!("child {} exceeded {timeout}s timeout; killing", child.id());
            let _ = child.kill();
            let _ = child.wait();
            return Ok(ExitKind::TimedOut);
        }
        thread::sleep(Duration::from_millis(20));
    }
}

#[cfg(unix)]
fn decode_status(status: std::process::ExitStatus) -> ExitKind {
    use std::os::unix::process::ExitStatusExt;
    match status.code() {
        Some(code) => ExitKind::Exited(code),
        None => ExitKind::Signaled(status.signal().unwrap_or(0)),
    }
}

#[cfg(not(unix))]
fn decode_status(status: std::process::ExitStatus) -> ExitKind {
    ExitKind::Exited(status.code().unwrap_or(1))
}

/// Configures `cmd` to capture stdout and stderr and returns any reader
/// created ahead of the spawn.
///
/// On unix both streams are redirected into a single pipe, so the captured
/// text preserves the interleaving the compiler produced. Elsewhere the two
/// streams are piped separately and concatenated.
#[cfg(unix)]
fn setup_capture(cmd: &mut Command) -> Result<Vec<Box<dyn Read + Send>>> {
    use std::fs::File;
    use std::os::unix::io::FromRawFd;

    let mut fds = [0 as libc::c_int; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error()).context("failed to create capture pipe");
    }
    let (read_fd, write_fd) = (fds[0], fds[1]);
    let write_dup = unsafe { libc::dup(write_fd) };
    if write_dup < 0 {
        let e = io::Error::last_os_error();
        unsafe {
            libc::close(read_fd);
            libc::close(write_fd);
        }
        return Err(e).context("failed to duplicate capture pipe");
    }
    unsafe {
        cmd.stdout(Stdio::from_raw_fd(write_fd));
        cmd.stderr(Stdio::from_raw_fd(write_dup));
        Ok(vec![Box::new(File::from_raw_fd(read_fd))])
    }
}

#[cfg(not(unix))]
fn setup_capture(cmd: &mut Command) -> Result<Vec<Box<dyn Read + Send>>> {
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    Ok(Vec::new())
}

#[cfg(unix)]
fn take_readers(
    _child: &mut Child,
    pre_readers: Vec<Box<dyn Read + Send>>,
) -> Vec<Box<dyn Read + Send>> {
    pre_readers
}

#[cfg(not(unix))]
fn take_readers(
    child: &mut Child,
    _pre_readers: Vec<Box<dyn Read + Send>>,
) -> Vec<Box<dyn Read + Send>> {
    let mut readers: Vec<Box<dyn Read + Send>> = Vec::new();
    if let Some(out) = child.stdout.take() {
        readers.push(Box::new(out));
    }
    if let Some(err) = child.stderr.take() {
        readers.push(Box::new(err));
    }
    readers
}

#[cfg(unix)]
fn disable_core_dumps(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    unsafe {
        cmd.pre_exec(|| {
            let limit = libc::rlimit {
                rlim_cur: 0,
                rlim_max: 0,
            };
            libc::setrlimit(libc::RLIMIT_CORE, &limit);
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn disable_core_dumps(_cmd: &mut Command) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sh(script: &str) -> Vec<String> {
        vec!["/bin/sh".into(), "-c".into(), script.into()]
    }

    fn no_env() -> HashMap<String, String> {
        HashMap::new()
    }

    #[test]
    fn captures_merged_output_in_order() {
        let result = run_captured(
            &sh("echo one; echo two >&2; echo three"),
            Path::new("."),
            10,
            &no_env(),
        )
        .unwrap();
        assert_eq!(result.status, ExitKind::Exited(0));
        assert_eq!(result.output, "one\ntwo\nthree\n");
    }

    #[test]
    fn reports_exit_code() {
        let result = run_captured(&sh("exit 3"), Path::new("."), 10, &no_env()).unwrap();
        assert_eq!(result.status, ExitKind::Exited(3));
    }

    #[test]
    fn timeout_kills_child_and_keeps_partial_output() {
        let start = Instant::now();
        let result = run_captured(
            &sh("echo before; sleep 30"),
            Path::new("."),
            1,
            &no_env(),
        )
        .unwrap();
        assert_eq!(result.status, ExitKind::TimedOut);
        assert!(result.output.contains("before"));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn spawn_failure_is_not_a_hang() {
        let argv = vec!["/nonexistent/compiler-binary".to_string()];
        let result = run_captured(&argv, Path::new("."), 10, &no_env()).unwrap();
        assert!(matches!(result.status, ExitKind::SpawnFailed(_)));
        assert!(!result.status.success());
    }

    #[test]
    fn env_overlay_reaches_the_child() {
        let mut env = HashMap::new();
        env.insert("CHECK_DIAG_PROBE".to_string(), "visible".to_string());
        let result = run_captured(
            &sh("printf '%s' \"$CHECK_DIAG_PROBE\""),
            Path::new("."),
            10,
            &env,
        )
        .unwrap();
        assert_eq!(result.output, "visible");
    }

    #[test]
    fn stdin_is_closed_in_the_child() {
        // `cat` exits immediately when stdin is closed instead of blocking.
        let result = run_captured(&sh("cat"), Path::new("."), 5, &no_env()).unwrap();
        assert_eq!(result.status, ExitKind::Exited(0));
        assert_eq!(result.output, "");
    }
}
