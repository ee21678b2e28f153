//! Narrow view of the host machine used by detection and validation
//!
//! Everything the probes and checks look at (environment, device nodes,
//! executables on PATH, short diagnostic commands) goes through [`Host`],
//! so the decision logic can be exercised against an in-memory fake.

use std::ffi::OsStr;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

/// How often a bounded child is polled for exit
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Failure to obtain a result from an external command
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("{program} is not installed or not in PATH")]
    NotFound { program: String },

    #[error("{program} timed out after {}s", .timeout.as_secs_f32())]
    TimedOut { program: String, timeout: Duration },

    #[error("failed to run {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// Captured result of a completed command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when terminated by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

pub trait Host {
    /// Raw environment lookup
    fn env_var(&self, key: &str) -> Option<String>;

    fn path_exists(&self, path: &Path) -> bool;

    /// File names inside a directory; empty when it cannot be read
    fn dir_entries(&self, path: &Path) -> Vec<String>;

    /// Resolve an executable on the search path
    fn which(&self, program: &str) -> Option<PathBuf>;

    /// Run a command to completion, killing it once `timeout` elapses
    fn run(&self, program: &str, args: &[&str], timeout: Duration) -> Result<CommandOutput, ProcessError>;

    /// Real uid of the current user
    fn uid(&self) -> u32;

    /// Environment lookup that treats an empty value as unset
    fn env_set(&self, key: &str) -> Option<String> {
        self.env_var(key).filter(|v| !v.is_empty())
    }
}

/// The machine we are running on
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemHost;

impl Host for SystemHost {
    fn env_var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn path_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn dir_entries(&self, path: &Path) -> Vec<String> {
        match std::fs::read_dir(path) {
            Ok(entries) => entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .collect(),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Cannot list directory");
                Vec::new()
            }
        }
    }

    fn which(&self, program: &str) -> Option<PathBuf> {
        which::which(program).ok()
    }

    fn run(&self, program: &str, args: &[&str], timeout: Duration) -> Result<CommandOutput, ProcessError> {
        run_with_timeout(program, args, timeout)
    }

    fn uid(&self) -> u32 {
        nix::unistd::getuid().as_raw()
    }
}

/// Spawn `program`, capture stdout/stderr, and wait at most `timeout` for it to exit.
/// A child still running at the deadline is killed and reaped.
pub fn run_with_timeout<I, S>(program: &str, args: I, timeout: Duration) -> Result<CommandOutput, ProcessError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| spawn_error(program, source))?;

    let (tx, rx) = mpsc::channel();
    if let Some(stdout) = child.stdout.take() {
        drain_in_background(stdout, Pipe::Stdout, tx.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        drain_in_background(stderr, Pipe::Stderr, tx.clone());
    }
    drop(tx);

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                debug!(program, timeout_secs = timeout.as_secs_f32(), "Killing command after timeout");
                let _ = child.kill();
                let _ = child.wait();
                return Err(ProcessError::TimedOut {
                    program: program.to_string(),
                    timeout,
                });
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(source) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ProcessError::Io {
                    program: program.to_string(),
                    source,
                });
            }
        }
    };

    // A grandchild can inherit the pipes and outlive the child, so output gets the same deadline
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now()).max(POLL_INTERVAL);
        match rx.recv_timeout(remaining) {
            Ok((Pipe::Stdout, chunk)) => stdout.extend_from_slice(&chunk),
            Ok((Pipe::Stderr, chunk)) => stderr.extend_from_slice(&chunk),
            Err(RecvTimeoutError::Timeout) => {
                debug!(program, "Output still open after exit, keeping what arrived");
                break;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    Ok(CommandOutput {
        code: status.code(),
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    })
}

pub(crate) fn spawn_error(program: &str, source: io::Error) -> ProcessError {
    if source.kind() == io::ErrorKind::NotFound {
        ProcessError::NotFound {
            program: program.to_string(),
        }
    } else {
        ProcessError::Io {
            program: program.to_string(),
            source,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Pipe {
    Stdout,
    Stderr,
}

/// Forward `pipe` in chunks until EOF or until nobody is listening
fn drain_in_background<R: Read + Send + 'static>(mut pipe: R, which: Pipe, tx: Sender<(Pipe, Vec<u8>)>) {
    thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            match pipe.read(&mut buf) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send((which, buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-memory host for detector and validator tests

    use super::*;
    use std::cell::RefCell;
    use std::collections::{HashMap, HashSet};

    #[derive(Debug, Clone)]
    pub enum FakeResponse {
        Exit(i32, String),
        Timeout,
        Missing,
    }

    #[derive(Debug, Default)]
    pub struct FakeHost {
        pub env: HashMap<String, String>,
        pub paths: HashSet<PathBuf>,
        pub dirs: HashMap<PathBuf, Vec<String>>,
        pub executables: HashMap<String, PathBuf>,
        pub responses: HashMap<String, FakeResponse>,
        pub uid: u32,
        pub calls: RefCell<Vec<String>>,
    }

    impl FakeHost {
        pub fn new() -> Self {
            Self {
                uid: 1000,
                ..Default::default()
            }
        }

        pub fn with_env(mut self, key: &str, value: &str) -> Self {
            self.env.insert(key.to_string(), value.to_string());
            self
        }

        pub fn with_path(mut self, path: &str) -> Self {
            self.paths.insert(PathBuf::from(path));
            self
        }

        pub fn with_dir(mut self, path: &str, entries: &[&str]) -> Self {
            self.paths.insert(PathBuf::from(path));
            self.dirs.insert(
                PathBuf::from(path),
                entries.iter().map(|e| e.to_string()).collect(),
            );
            self
        }

        pub fn with_executable(mut self, program: &str) -> Self {
            self.executables
                .insert(program.to_string(), PathBuf::from(format!("/usr/bin/{program}")));
            self
        }

        /// Register the response for `program args...` (joined with single spaces)
        pub fn with_response(mut self, command_line: &str, response: FakeResponse) -> Self {
            self.responses.insert(command_line.to_string(), response);
            self
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }
    }

    impl Host for FakeHost {
        fn env_var(&self, key: &str) -> Option<String> {
            self.env.get(key).cloned()
        }

        fn path_exists(&self, path: &Path) -> bool {
            self.paths.contains(path)
        }

        fn dir_entries(&self, path: &Path) -> Vec<String> {
            self.dirs.get(path).cloned().unwrap_or_default()
        }

        fn which(&self, program: &str) -> Option<PathBuf> {
            self.executables.get(program).cloned()
        }

        fn run(&self, program: &str, args: &[&str], timeout: Duration) -> Result<CommandOutput, ProcessError> {
            let mut line = program.to_string();
            for arg in args {
                line.push(' ');
                line.push_str(arg);
            }
            self.calls.borrow_mut().push(line.clone());

            match self.responses.get(&line) {
                Some(FakeResponse::Exit(code, stdout)) => Ok(CommandOutput {
                    code: Some(*code),
                    stdout: stdout.clone(),
                    stderr: String::new(),
                }),
                Some(FakeResponse::Timeout) => Err(ProcessError::TimedOut {
                    program: program.to_string(),
                    timeout,
                }),
                Some(FakeResponse::Missing) | None => Err(ProcessError::NotFound {
                    program: program.to_string(),
                }),
            }
        }

        fn uid(&self) -> u32 {
            self.uid
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_with_timeout_captures_output() {
        let out = run_with_timeout("sh", ["-c", "echo hello; echo oops >&2; exit 3"], Duration::from_secs(5))
            .expect("sh should run");
        assert_eq!(out.code, Some(3));
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
        assert!(!out.success());
    }

    #[test]
    fn test_run_with_timeout_kills_slow_command() {
        let started = Instant::now();
        let err = run_with_timeout("sleep", ["5"], Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, ProcessError::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_run_with_timeout_bounds_inherited_pipes() {
        let started = Instant::now();
        let out = run_with_timeout("sh", ["-c", "sleep 5 & echo hi"], Duration::from_secs(1)).unwrap();
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hi");
    }

    #[test]
    fn test_run_with_timeout_missing_program() {
        let err = run_with_timeout("definitely-not-a-real-binary-xyz", Vec::<&str>::new(), Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, ProcessError::NotFound { .. }));
    }

    #[test]
    fn test_env_set_ignores_empty_values() {
        let host = fake::FakeHost::new().with_env("DISPLAY", "");
        assert_eq!(host.env_set("DISPLAY"), None);
        assert_eq!(host.env_var("DISPLAY"), Some(String::new()));
    }
}
