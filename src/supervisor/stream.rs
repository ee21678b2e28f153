//! Output plumbing for supervised processes
//!
//! stdout and stderr are each read on their own thread and merged into one
//! channel, so the caller only ever sees complete lines in arrival order.

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;

use tracing::{debug, error};

use super::{LifecycleSupervisor, StartOptions};
use crate::host::spawn_error;

/// Merge both pipes of a child into one line channel.
/// The channel closes once both pipes reach EOF.
pub(super) fn merge_lines(stdout: Option<ChildStdout>, stderr: Option<ChildStderr>) -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    if let Some(stdout) = stdout {
        forward_lines(stdout, tx.clone(), "output");
    }
    if let Some(stderr) = stderr {
        forward_lines(stderr, tx, "output");
    }
    rx
}

/// Send each line of `pipe` to `tx` until EOF, a read error, or the receiver goes away.
/// A read error is forwarded as one final line.
fn forward_lines<R: Read + Send + 'static>(pipe: R, tx: Sender<String>, what: &'static str) {
    thread::spawn(move || {
        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.send(format!("Error reading {what}: {e}"));
                    break;
                }
            }
        }
    });
}

/// Lines from `compose logs`. Without `-f` the stream ends with the command;
/// with `-f` it runs until dropped, which also kills the command.
pub struct LogStream {
    lines: Receiver<String>,
    child: Option<Child>,
}

impl LogStream {
    pub(super) fn spawn(argv: &[String]) -> Self {
        let child = Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();

        match child {
            Ok(mut child) => {
                debug!(pid = child.id(), "Following logs");
                let (tx, rx) = mpsc::channel();
                if let Some(stdout) = child.stdout.take() {
                    forward_lines(stdout, tx.clone(), "logs");
                }
                if let Some(stderr) = child.stderr.take() {
                    forward_lines(stderr, tx, "logs");
                }
                Self {
                    lines: rx,
                    child: Some(child),
                }
            }
            Err(e) => {
                let e = spawn_error(&argv[0], e);
                error!(error = %e, "Failed to run compose logs");
                Self::single(format!("Error reading logs: {e}"))
            }
        }
    }

    /// A stream that yields one line and ends
    fn single(line: String) -> Self {
        let (tx, rx) = mpsc::channel();
        let _ = tx.send(line);
        Self { lines: rx, child: None }
    }
}

impl Iterator for LogStream {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        match self.lines.recv() {
            Ok(line) => Some(line),
            Err(_) => {
                if let Some(mut child) = self.child.take() {
                    let _ = child.wait();
                }
                None
            }
        }
    }
}

impl Drop for LogStream {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Ok(None) = child.try_wait() {
                let _ = child.kill();
            }
            let _ = child.wait();
        }
    }
}

/// Notifications from a background start
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    Line(String),
    /// The launcher finished loading; sent at most once per start
    Ready,
    Exited { success: bool },
}

/// Run a foreground start on a worker thread and report through a channel,
/// so an event-loop front end never blocks on output.
pub fn spawn_start(
    supervisor: Arc<LifecycleSupervisor>,
    options: StartOptions,
) -> (Receiver<SupervisorEvent>, thread::JoinHandle<bool>) {
    let (tx, rx) = mpsc::channel();
    let handle = thread::spawn(move || {
        let ready_tx = tx.clone();
        let success = supervisor.start(
            options,
            |line| {
                let _ = tx.send(SupervisorEvent::Line(line.to_string()));
            },
            move || {
                let _ = ready_tx.send(SupervisorEvent::Ready);
            },
        );
        let _ = tx.send(SupervisorEvent::Exited { success });
        success
    });
    (rx, handle)
}
