//! Command-line front end
//!
//! Each command re-derives the effective configuration (detected, saved,
//! command-line) and hands it to the core. Handlers return the process exit
//! code; only unexpected I/O on the terminal surfaces as an error.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{debug, info, warn};

use crate::compose::{resolve_compose_dir, CommandComposer};
use crate::config::{merge, Overrides, Preferences, PreferencesStore};
use crate::constants::timeouts;
use crate::detect::{DetectionFacts, SystemDetector};
use crate::host::SystemHost;
use crate::supervisor::{
    spawn_start, ExitOutcome, LifecycleSupervisor, ResourceStats, StartOptions, StatusDetail, SupervisorEvent,
};
use crate::types::{Audio, Display, EffectiveConfig, Gpu, Runtime};
use crate::validate::{grant_display_access, ValidationIssue, Validator};

pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_INTERRUPTED: i32 = 130;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Command {
    /// Start the launcher container
    Start,
    /// Stop and remove the container
    Stop,
    /// Stop, then start in the foreground
    Restart,
    /// Print container logs
    Logs,
    /// Show whether the container is running
    Status,
    /// Check the host and report what would block a start
    Doctor,
    /// Show one CPU/memory/network/GPU snapshot
    Stats,
    /// Profile archives (list, export, import, delete)
    Profiles,
}

#[derive(Debug, Parser)]
#[command(name = "minecraft-launcher")]
#[command(about = "Containerized TLauncher with host auto-detection", long_about = None)]
pub struct Cli {
    /// Command to execute
    #[arg(value_enum, default_value = "start")]
    pub command: Command,

    /// Arguments for `profiles` (action and profile name or archive)
    #[arg(hide = true)]
    pub profile_args: Vec<String>,

    /// Override runtime detection
    #[arg(long, value_enum)]
    pub runtime: Option<Runtime>,

    /// Override GPU detection
    #[arg(long, value_enum)]
    pub gpu: Option<Gpu>,

    /// Override display server detection
    #[arg(long, value_enum)]
    pub display: Option<Display>,

    /// Override audio detection
    #[arg(long, value_enum)]
    pub audio: Option<Audio>,

    /// Run the container in the background (start)
    #[arg(short, long)]
    pub detached: bool,

    /// Recreate the container even if unchanged (start)
    #[arg(long)]
    pub force_recreate: bool,

    /// Keep printing new log lines (logs)
    #[arg(short, long)]
    pub follow: bool,

    /// Only print the last N log lines (logs)
    #[arg(long, value_name = "N")]
    pub tail: Option<usize>,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Remember the selected configuration as saved preferences (start)
    #[arg(long)]
    pub save: bool,

    /// Forget saved preferences before running the command
    #[arg(long)]
    pub reset_preferences: bool,

    /// Accepted for compatibility; this binary has no GUI
    #[arg(long)]
    pub no_gui: bool,

    /// Directory holding the compose files
    #[arg(long, value_name = "DIR")]
    pub compose_dir: Option<PathBuf>,

    /// Seconds the launcher gets to shut down before being killed (stop, restart)
    #[arg(long, value_name = "SECS", default_value_t = timeouts::DEFAULT_GRACE_PERIOD_SECS)]
    pub grace_period: u64,
}

impl Cli {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            runtime: self.runtime,
            gpu: self.gpu,
            display: self.display,
            audio: self.audio,
        }
    }

    fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_period)
    }
}

/// Everything a command needs, derived once per invocation
struct Session {
    host: SystemHost,
    store: PreferencesStore,
    saved: Preferences,
    overrides: Overrides,
    config: EffectiveConfig,
    composer: CommandComposer,
}

impl Session {
    fn prepare(cli: &Cli) -> Self {
        let host = SystemHost;
        let store = PreferencesStore::default();
        let detected = SystemDetector::new(&host).detect();
        let saved = store.load();
        let overrides = cli.overrides();

        let mut persisted = saved.clone();
        persisted.apply(&overrides);
        let config = merge(&detected, &persisted);
        info!(
            runtime = %config.runtime,
            gpu = %config.gpu,
            display = %config.display,
            audio = %config.audio,
            "Effective configuration"
        );

        let composer = CommandComposer::new(resolve_compose_dir(cli.compose_dir.clone()));
        debug!(compose_dir = %composer.compose_dir().display(), "Compose directory");

        Self {
            host,
            store,
            saved,
            overrides,
            config,
            composer,
        }
    }

    fn supervisor(&self) -> LifecycleSupervisor {
        LifecycleSupervisor::new(self.config, self.composer.clone())
    }
}

pub fn run(cli: &Cli) -> Result<i32> {
    if cli.no_gui {
        debug!("--no-gui given, running in CLI mode");
    }
    if cli.reset_preferences {
        let store = PreferencesStore::default();
        store
            .reset()
            .with_context(|| format!("Failed to reset preferences at {}", store.path().display()))?;
        println!("Saved preferences cleared");
    }
    match cli.command {
        Command::Start => run_start(cli),
        Command::Stop => Ok(run_stop(cli)),
        Command::Restart => Ok(run_restart(cli)),
        Command::Logs => Ok(run_logs(cli)),
        Command::Status => Ok(run_status(cli)),
        Command::Doctor => Ok(run_doctor(cli)),
        Command::Stats => Ok(run_stats(cli)),
        Command::Profiles => Ok(run_profiles(cli)),
    }
}

fn run_start(cli: &Cli) -> Result<i32> {
    println!("Detecting system configuration...");
    let session = Session::prepare(cli);

    println!();
    println!("Configuration:");
    for (key, value, source) in configuration_rows(&session.config, &session.saved, &session.overrides) {
        println!("  {key:<8} {value:<11} ({source})");
    }

    if !cli.yes && !confirm("Start Minecraft with these settings?")? {
        println!("Cancelled.");
        return Ok(EXIT_OK);
    }

    if cli.save {
        match session.store.save(&Preferences::from_config(&session.config)) {
            Ok(()) => println!("Saved preferences to {}", session.store.path().display()),
            Err(e) => println!("⚠ Could not save preferences: {e:#}"),
        }
    }

    println!();
    println!("Validating system...");
    let (valid, issues) = Validator::new(&session.host, &session.composer).validate(&session.config);
    print_issues(&issues);
    if !valid {
        println!("✗ System validation failed. Cannot start.");
        return Ok(EXIT_FAILURE);
    }

    let supervisor = session.supervisor();
    if supervisor.existing_instance() {
        println!("⚠ A '{}' container is already running", supervisor.workload());
    }

    if session.config.wants_access_grant() {
        println!("Setting X11 permissions...");
        if grant_display_access(&session.config, &session.host) {
            println!("✓ X11 permissions set");
        } else {
            println!("⚠ Could not set X11 permissions automatically");
        }
    }

    println!();
    println!("Starting Minecraft...");
    println!("Command: {}", session.composer.preview(&session.config, "up"));
    println!();

    let interrupted = watch_interrupt(supervisor.stop_flag());
    let options = StartOptions {
        detached: cli.detached,
        force_recreate: cli.force_recreate,
    };
    let success = if options.detached {
        supervisor.start(options, |_| {}, || {})
    } else {
        let supervisor = Arc::new(supervisor);
        let (events, handle) = spawn_start(Arc::clone(&supervisor), options);
        for event in events {
            match event {
                SupervisorEvent::Line(line) => println!("{line}"),
                SupervisorEvent::Ready => println!("✓ Minecraft is ready"),
                SupervisorEvent::Exited { success } => debug!(success, "Foreground start finished"),
            }
        }
        let success = handle.join().unwrap_or(false);
        if let Some(ExitOutcome::Failed(Some(code))) = supervisor.last_exit() {
            println!("compose exited with code {code}");
        }
        success
    };

    if interrupted.load(Ordering::SeqCst) {
        println!();
        println!("Interrupted by user");
        return Ok(EXIT_INTERRUPTED);
    }
    if !success {
        println!();
        println!("✗ Failed to start container");
        return Ok(EXIT_FAILURE);
    }
    println!();
    if cli.detached {
        println!("✓ Container started in background");
        println!("View logs: minecraft-launcher logs -f");
    } else {
        println!("✓ Container stopped");
    }
    Ok(EXIT_OK)
}

fn run_stop(cli: &Cli) -> i32 {
    let supervisor = Session::prepare(cli).supervisor();
    println!("Stopping container...");
    if supervisor.stop(cli.grace()) {
        println!("✓ Container stopped");
        EXIT_OK
    } else {
        println!("✗ Failed to stop container");
        EXIT_FAILURE
    }
}

fn run_restart(cli: &Cli) -> i32 {
    let supervisor = Session::prepare(cli).supervisor();
    println!("Restarting container...");

    let interrupted = watch_interrupt(supervisor.stop_flag());
    let success = supervisor.restart_unless(cli.grace(), &interrupted, |line| println!("{line}"));

    if interrupted.load(Ordering::SeqCst) {
        println!();
        println!("Interrupted by user");
        EXIT_INTERRUPTED
    } else if success {
        println!("✓ Container restarted");
        EXIT_OK
    } else {
        println!("✗ Failed to restart container");
        EXIT_FAILURE
    }
}

fn run_logs(cli: &Cli) -> i32 {
    let supervisor = Session::prepare(cli).supervisor();
    let interrupted = watch_interrupt(supervisor.stop_flag());

    for line in supervisor.logs(cli.follow, cli.tail) {
        println!("{line}");
        if interrupted.load(Ordering::SeqCst) {
            break;
        }
    }

    if interrupted.load(Ordering::SeqCst) {
        EXIT_INTERRUPTED
    } else {
        EXIT_OK
    }
}

fn run_status(cli: &Cli) -> i32 {
    let status = Session::prepare(cli).supervisor().status();
    if status.running {
        println!("✓ Container is running");
    } else {
        println!("Container is not running");
    }
    match status.detail {
        StatusDetail::Output(output) if !output.is_empty() => {
            println!();
            println!("{output}");
        }
        StatusDetail::Output(_) => {}
        StatusDetail::Error(error) => {
            if !error.is_empty() {
                println!();
                println!("{error}");
            }
        }
    }
    EXIT_OK
}

fn run_doctor(cli: &Cli) -> i32 {
    println!("Minecraft Launcher - System Check");
    println!();

    let session = Session::prepare(cli);
    let facts = SystemDetector::new(&session.host).details();

    println!("Detection Results:");
    for line in doctor_lines(&facts) {
        println!("{line}");
    }
    println!("  Compose files: {}", session.composer.compose_dir().display());
    println!("  Preferences: {}{}", session.store.path().display(), if session.store.exists() { "" } else { " (none saved)" });

    println!();
    println!("Validation:");
    let (valid, issues) = Validator::new(&session.host, &session.composer).validate(&session.config);
    if issues.is_empty() {
        println!("✓ No issues found");
    } else {
        print_issues(&issues);
    }

    println!();
    if valid {
        println!("✓ System ready!");
        EXIT_OK
    } else {
        println!("✗ System has errors");
        EXIT_FAILURE
    }
}

fn run_stats(cli: &Cli) -> i32 {
    let supervisor = Session::prepare(cli).supervisor();
    match supervisor.stats() {
        Some(stats) => {
            let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
            for line in stats_lines(&stats, cores) {
                println!("{line}");
            }
            EXIT_OK
        }
        None => {
            println!("Container is not running");
            EXIT_FAILURE
        }
    }
}

fn run_profiles(cli: &Cli) -> i32 {
    if !cli.profile_args.is_empty() {
        debug!(args = ?cli.profile_args, "profiles arguments");
    }
    println!("Profile archives are managed by the separate profile tool; this launcher does not package profiles.");
    EXIT_FAILURE
}

/// `(setting, value, source)` where source is override, saved or detected
fn configuration_rows(
    config: &EffectiveConfig,
    saved: &Preferences,
    overrides: &Overrides,
) -> Vec<(&'static str, &'static str, &'static str)> {
    fn source(overridden: bool, saved: &str, value: &str) -> &'static str {
        if overridden {
            "override"
        } else if saved.trim().eq_ignore_ascii_case(value) {
            "saved"
        } else {
            "detected"
        }
    }

    vec![
        (
            "Runtime",
            config.runtime.as_str(),
            source(overrides.runtime.is_some(), &saved.runtime, config.runtime.as_str()),
        ),
        ("GPU", config.gpu.as_str(), source(overrides.gpu.is_some(), &saved.gpu, config.gpu.as_str())),
        (
            "Display",
            config.display.as_str(),
            source(overrides.display.is_some(), &saved.display, config.display.as_str()),
        ),
        (
            "Audio",
            config.audio.as_str(),
            source(overrides.audio.is_some(), &saved.audio, config.audio.as_str()),
        ),
    ]
}

fn doctor_lines(facts: &DetectionFacts) -> Vec<String> {
    let runtime = match &facts.runtime.path {
        Some(path) => format!("✓ Runtime: {} ({})", facts.runtime.value, path.display()),
        None => format!("✗ Runtime: {} (not found)", facts.runtime.value),
    };
    let gpu_mark = if facts.gpu.devices_exist { "✓" } else { "⚠" };
    let display = format!(
        "✓ Display: {} (session: {}, var: {})",
        facts.display.value,
        facts.display.session_type.as_deref().unwrap_or("unset"),
        facts.display.display_var.as_deref().unwrap_or("unset"),
    );
    let audio = match &facts.audio.server_name {
        Some(name) => format!("  Audio: {} ({name})", facts.audio.value),
        None => format!("  Audio: {} (no audio server found)", facts.audio.value),
    };
    vec![runtime, format!("{gpu_mark} GPU: {}", facts.gpu.model), display, audio]
}

fn stats_lines(stats: &ResourceStats, cores: usize) -> Vec<String> {
    let gpu = match stats.gpu_utilization {
        Some(util) => format!("{util:.0}%"),
        None => "n/a".to_string(),
    };
    vec![
        format!(
            "CPU:     {:.1}% of {cores} cores ({:.1}% raw, {:.2} cores in use)",
            stats.cpu_normalized(cores),
            stats.cpu_percent(),
            stats.cpu_cores_used()
        ),
        format!("Memory:  {}", stats.mem_usage),
        format!("Network: in {} / out {}", stats.net_in, stats.net_out),
        format!("GPU:     {gpu}"),
    ]
}

fn print_issues(issues: &[ValidationIssue]) {
    for issue in issues {
        println!("{issue}");
    }
}

fn confirm(question: &str) -> Result<bool> {
    print!("\n{question} [Y/n] ");
    io::stdout().flush().context("Failed to flush stdout")?;

    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("Failed to read confirmation")?;
    Ok(is_yes(&answer))
}

/// Empty input accepts the default (yes)
fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "" | "y" | "yes")
}

/// Raise the supervisor's stop flag on SIGINT and remember that it happened.
/// Installed only around supervised work so the confirmation prompt keeps the default Ctrl-C.
#[cfg(unix)]
fn watch_interrupt(stop: Arc<AtomicBool>) -> Arc<AtomicBool> {
    use signal_hook::consts::SIGINT;

    let interrupted = Arc::new(AtomicBool::new(false));
    for flag in [Arc::clone(&interrupted), stop] {
        if let Err(e) = signal_hook::flag::register(SIGINT, flag) {
            warn!(error = %e, "Failed to install SIGINT handler");
        }
    }
    interrupted
}

#[cfg(not(unix))]
fn watch_interrupt(_stop: Arc<AtomicBool>) -> Arc<AtomicBool> {
    Arc::new(AtomicBool::new(false))
}
