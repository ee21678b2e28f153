//! Lifecycle supervision of the containerized launcher
//!
//! One supervisor owns one workload: it starts it (detached or streaming),
//! recognizes when the launcher inside has finished loading, and stops it
//! with a bounded `compose stop` followed by `compose down`.
//!
//! Nothing here locks the named workload. Two supervisors (say a CLI call
//! and a running GUI) can race on the same container; [`LifecycleSupervisor::status`]
//! and [`LifecycleSupervisor::existing_instance`] are the only safeguards.

mod stats;
mod stream;

pub use stats::ResourceStats;
pub use stream::{spawn_start, LogStream, SupervisorEvent};

use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::compose::CommandComposer;
use crate::constants::{timeouts, workload};
use crate::host::{run_with_timeout, spawn_error, ProcessError, SystemHost};
use crate::types::EffectiveConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Starting,
    Running,
    Stopping,
}

/// How the most recent start ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    Success,
    /// Non-zero exit; `None` when killed by a signal or never launched
    Failed(Option<i32>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartOptions {
    /// `up -d`: return once compose has launched the container
    pub detached: bool,
    /// `up --force-recreate`
    pub force_recreate: bool,
}

/// Bounds for the non-streaming compose calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorTimeouts {
    /// Added to the grace period to bound `compose stop`
    pub stop_margin: Duration,
    pub down: Duration,
    pub status: Duration,
    pub existence: Duration,
}

impl Default for SupervisorTimeouts {
    fn default() -> Self {
        Self {
            stop_margin: Duration::from_secs(timeouts::STOP_MARGIN_SECS),
            down: Duration::from_secs(timeouts::DOWN_SECS),
            status: Duration::from_secs(timeouts::STATUS_SECS),
            existence: Duration::from_secs(timeouts::EXISTENCE_SECS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusDetail {
    /// Raw `compose ps` output
    Output(String),
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub running: bool,
    pub detail: StatusDetail,
}

pub struct LifecycleSupervisor {
    config: EffectiveConfig,
    composer: CommandComposer,
    timeouts: SupervisorTimeouts,
    workload: String,
    stop_requested: Arc<AtomicBool>,
    state: Mutex<SupervisorState>,
    last_exit: Mutex<Option<ExitOutcome>>,
    pid: Mutex<Option<u32>>,
}

impl LifecycleSupervisor {
    pub fn new(config: EffectiveConfig, composer: CommandComposer) -> Self {
        Self {
            config,
            composer,
            timeouts: SupervisorTimeouts::default(),
            workload: workload::NAME.to_string(),
            stop_requested: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(SupervisorState::Idle),
            last_exit: Mutex::new(None),
            pid: Mutex::new(None),
        }
    }

    pub fn with_timeouts(mut self, timeouts: SupervisorTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_workload(mut self, name: impl Into<String>) -> Self {
        self.workload = name.into();
        self
    }

    pub fn config(&self) -> &EffectiveConfig {
        &self.config
    }

    pub fn workload(&self) -> &str {
        &self.workload
    }

    pub fn state(&self) -> SupervisorState {
        *lock(&self.state)
    }

    pub fn last_exit(&self) -> Option<ExitOutcome> {
        *lock(&self.last_exit)
    }

    /// PID of the foreground compose process, while one is attached
    pub fn pid(&self) -> Option<u32> {
        *lock(&self.pid)
    }

    /// Flag checked between output lines of a foreground start.
    /// Shared so signal handlers can raise it.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop_requested)
    }

    /// Ask a foreground start to stop reading output. Does not terminate anything.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    /// Bring the workload up. Detached mode waits for compose to return and never
    /// calls back; foreground mode streams every output line to `on_line`, calls
    /// `on_ready` at most once on the first readiness marker, and blocks until exit.
    /// Returns whether the compose process exited zero.
    pub fn start<L, R>(&self, options: StartOptions, mut on_line: L, on_ready: R) -> bool
    where
        L: FnMut(&str),
        R: FnOnce(),
    {
        let mut extra = Vec::new();
        if options.detached {
            extra.push("-d");
        }
        if options.force_recreate {
            extra.push("--force-recreate");
        }
        let argv = self.composer.compose(&self.config, "up", &extra);

        self.stop_requested.store(false, Ordering::SeqCst);
        self.set_state(SupervisorState::Starting);
        info!(detached = options.detached, force_recreate = options.force_recreate, "Starting workload");

        if options.detached {
            return self.start_detached(&argv);
        }

        let mut child = match Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                let e = spawn_error(&argv[0], e);
                error!(error = %e, "Failed to launch compose");
                on_line(&format!("Error starting container: {e}"));
                self.finish(ExitOutcome::Failed(None));
                return false;
            }
        };
        *lock(&self.pid) = Some(child.id());
        info!(pid = child.id(), "Compose process launched");

        let lines = stream::merge_lines(child.stdout.take(), child.stderr.take());
        let mut on_ready = Some(on_ready);

        for line in lines.iter() {
            on_line(&line);
            if on_ready.is_some() && is_ready_line(&line) {
                info!("Launcher reported ready");
                self.set_state(SupervisorState::Running);
                if let Some(ready) = on_ready.take() {
                    ready();
                }
            }
            if self.stop_requested.load(Ordering::SeqCst) {
                debug!("Stop requested, detaching from output");
                break;
            }
        }
        // Compose must keep a reader until it exits or its next write raises SIGPIPE
        thread::spawn(move || lines.iter().for_each(drop));

        let outcome = match child.wait() {
            Ok(status) if status.success() => ExitOutcome::Success,
            Ok(status) => ExitOutcome::Failed(status.code()),
            Err(e) => {
                error!(error = %e, "Failed to wait for compose process");
                ExitOutcome::Failed(None)
            }
        };
        *lock(&self.pid) = None;
        info!(outcome = ?outcome, "Compose process exited");
        self.finish(outcome);
        outcome == ExitOutcome::Success
    }

    fn start_detached(&self, argv: &[String]) -> bool {
        let result = Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::null())
            .output();

        let outcome = match result {
            Ok(out) if out.status.success() => ExitOutcome::Success,
            Ok(out) => {
                warn!(
                    code = ?out.status.code(),
                    stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                    "Detached start failed"
                );
                ExitOutcome::Failed(out.status.code())
            }
            Err(e) => {
                error!(error = %spawn_error(&argv[0], e), "Failed to launch compose");
                ExitOutcome::Failed(None)
            }
        };

        *lock(&self.last_exit) = Some(outcome);
        if outcome == ExitOutcome::Success {
            self.set_state(SupervisorState::Running);
            true
        } else {
            self.set_state(SupervisorState::Idle);
            false
        }
    }

    /// `compose stop -t <grace>` bounded by grace + margin, then `compose down`.
    /// Only the exit code of `down` decides the result; a timeout in either step is a failure.
    pub fn stop(&self, grace_period: Duration) -> bool {
        self.request_stop();
        let previous = self.state();
        self.set_state(SupervisorState::Stopping);

        let grace = grace_period.as_secs().to_string();
        let stop_argv = self.composer.compose(&self.config, "stop", &["-t", grace.as_str()]);
        info!(grace_secs = grace_period.as_secs(), "Stopping workload");

        match run_argv(&stop_argv, grace_period + self.timeouts.stop_margin) {
            Ok(out) if !out.success() => {
                warn!(code = ?out.code, stderr = %out.stderr.trim(), "compose stop exited non-zero");
            }
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "compose stop failed");
                self.set_state(previous);
                return false;
            }
        }

        let down_argv = self.composer.compose::<&str>(&self.config, "down", &[]);
        let stopped = match run_argv(&down_argv, self.timeouts.down) {
            Ok(out) => {
                if !out.success() {
                    warn!(code = ?out.code, stderr = %out.stderr.trim(), "compose down exited non-zero");
                }
                out.success()
            }
            Err(e) => {
                error!(error = %e, "compose down failed");
                false
            }
        };

        self.set_state(if stopped { SupervisorState::Idle } else { previous });
        info!(stopped, "Stop finished");
        stopped
    }

    /// Stop, then start in the foreground. A failed stop ends the restart without starting.
    pub fn restart<L: FnMut(&str)>(&self, grace_period: Duration, on_line: L) -> bool {
        self.restart_unless(grace_period, &AtomicBool::new(false), on_line)
    }

    /// [`restart`](Self::restart) that skips the start phase once `cancelled` is raised.
    /// `stop` raises the supervisor's own stop flag, so an interrupt needs a flag of its own.
    pub fn restart_unless<L: FnMut(&str)>(&self, grace_period: Duration, cancelled: &AtomicBool, mut on_line: L) -> bool {
        on_line("Stopping container...");
        if !self.stop(grace_period) {
            on_line("Failed to stop container");
            return false;
        }
        if cancelled.load(Ordering::SeqCst) {
            info!("Restart cancelled after stop");
            on_line("Restart cancelled");
            return false;
        }
        on_line("Starting container...");
        self.start(StartOptions::default(), &mut on_line, || {})
    }

    /// Container logs. `follow` never ends on its own; drop the stream to stop it.
    pub fn logs(&self, follow: bool, tail: Option<usize>) -> LogStream {
        let mut extra = Vec::new();
        if follow {
            extra.push("-f".to_string());
        }
        if let Some(tail) = tail.filter(|n| *n > 0) {
            extra.push("--tail".to_string());
            extra.push(tail.to_string());
        }
        let argv = self.composer.compose(&self.config, "logs", &extra);
        LogStream::spawn(&argv)
    }

    /// `compose ps`; running iff it succeeded and mentions the workload
    pub fn status(&self) -> StatusReport {
        let argv = self.composer.compose(&self.config, "ps", &["--format", "json"]);
        match run_argv(&argv, self.timeouts.status) {
            Ok(out) if out.success() => {
                let output = out.stdout.trim().to_string();
                let running =
                    !output.is_empty() && output.to_lowercase().contains(&self.workload.to_lowercase());
                StatusReport {
                    running,
                    detail: StatusDetail::Output(output),
                }
            }
            Ok(out) => StatusReport {
                running: false,
                detail: StatusDetail::Error(out.stderr.trim().to_string()),
            },
            Err(ProcessError::TimedOut { .. }) => StatusReport {
                running: false,
                detail: StatusDetail::Error("Status check timed out".to_string()),
            },
            Err(e) => StatusReport {
                running: false,
                detail: StatusDetail::Error(e.to_string()),
            },
        }
    }

    pub fn is_running(&self) -> bool {
        self.status().running
    }

    /// Whether a container with the workload's name already runs, possibly started elsewhere
    pub fn existing_instance(&self) -> bool {
        let program = self.composer.program(&self.config);
        let filter = format!("name={}", self.workload);
        match run_with_timeout(
            &program,
            ["ps", "--filter", filter.as_str(), "--format", "{{.Names}}"],
            self.timeouts.existence,
        ) {
            Ok(out) => out.success() && out.stdout.contains(&self.workload),
            Err(e) => {
                debug!(error = %e, "Existence check failed, assuming not running");
                false
            }
        }
    }

    /// One resource-usage snapshot, `None` when the workload is not running
    pub fn stats(&self) -> Option<ResourceStats> {
        let program = self.composer.program(&self.config);
        ResourceStats::query(&SystemHost, &program, &self.config, &self.workload)
    }

    fn set_state(&self, state: SupervisorState) {
        let mut current = lock(&self.state);
        if *current != state {
            debug!(from = ?*current, to = ?state, "Supervisor state change");
            *current = state;
        }
    }

    fn finish(&self, outcome: ExitOutcome) {
        *lock(&self.last_exit) = Some(outcome);
        self.set_state(SupervisorState::Idle);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn run_argv(argv: &[String], timeout: Duration) -> Result<crate::host::CommandOutput, ProcessError> {
    run_with_timeout(&argv[0], &argv[1..], timeout)
}

fn is_ready_line(line: &str) -> bool {
    workload::READINESS_MARKERS.iter().any(|marker| line.contains(marker))
}
