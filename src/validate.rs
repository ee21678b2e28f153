//! Pre-flight checks
//!
//! Six independent checks run in a fixed order and each may add issues.
//! A configuration is startable iff no issue is blocking; advisory issues
//! are shown to the user but never prevent a start.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::compose::CommandComposer;
use crate::constants::{commands, env, paths, timeouts};
use crate::host::{Host, ProcessError};
use crate::types::{Audio, Display, EffectiveConfig, Gpu, Runtime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Start must not be attempted
    Blocking,
    /// Surfaced to the operator only
    Advisory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub message: String,
    pub severity: Severity,
    pub fix_hint: Option<String>,
}

impl ValidationIssue {
    fn blocking(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: Severity::Blocking,
            fix_hint: None,
        }
    }

    fn advisory(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: Severity::Advisory,
            fix_hint: None,
        }
    }

    fn hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    pub fn is_blocking(&self) -> bool {
        self.severity == Severity::Blocking
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = if self.is_blocking() { "✗" } else { "⚠" };
        write!(f, "{symbol} {}", self.message)?;
        if let Some(hint) = &self.fix_hint {
            write!(f, "\n  → {hint}")?;
        }
        Ok(())
    }
}

pub struct Validator<'a, H: Host + ?Sized> {
    host: &'a H,
    composer: &'a CommandComposer,
}

impl<'a, H: Host + ?Sized> Validator<'a, H> {
    pub fn new(host: &'a H, composer: &'a CommandComposer) -> Self {
        Self { host, composer }
    }

    /// Run every check. Returns `(is_valid, issues)` with issues in check order.
    pub fn validate(&self, config: &EffectiveConfig) -> (bool, Vec<ValidationIssue>) {
        let mut issues = Vec::new();
        self.check_runtime(config, &mut issues);
        self.check_gpu(config, &mut issues);
        self.check_display(config, &mut issues);
        self.check_audio(config, &mut issues);
        self.check_compose_files(config, &mut issues);
        self.check_access_grant(config, &mut issues);

        let valid = !issues.iter().any(ValidationIssue::is_blocking);
        info!(valid, issues = issues.len(), "Validation finished");
        (valid, issues)
    }

    fn check_runtime(&self, config: &EffectiveConfig, issues: &mut Vec<ValidationIssue>) {
        let program = self.composer.program(config);

        if self.host.which(&program).is_none() {
            issues.push(
                ValidationIssue::blocking(format!("{program} is not installed or not in PATH"))
                    .hint(install_hint(config.runtime)),
            );
            return;
        }

        match self
            .host
            .run(&program, &["--version"], Duration::from_secs(timeouts::VERSION_CHECK_SECS))
        {
            Ok(out) if out.success() => {}
            Ok(out) => {
                debug!(program, code = ?out.code, stderr = %out.stderr.trim(), "Version check failed");
                issues.push(
                    ValidationIssue::blocking(format!("{program} is installed but not working properly"))
                        .hint(format!("Try running '{program} --version' manually to see the error")),
                );
            }
            Err(ProcessError::TimedOut { .. }) => {
                issues.push(ValidationIssue::advisory(format!("{program} command timed out")));
            }
            Err(e) => {
                issues.push(ValidationIssue::advisory(format!("Error checking {program}: {e}")));
            }
        }
    }

    fn check_gpu(&self, config: &EffectiveConfig, issues: &mut Vec<ValidationIssue>) {
        match config.gpu {
            Gpu::Nvidia => {
                if !self.exists(paths::NVIDIA_DEVICE) {
                    issues.push(
                        ValidationIssue::blocking(format!(
                            "NVIDIA GPU selected but {} not found",
                            paths::NVIDIA_DEVICE
                        ))
                        .hint("Install NVIDIA drivers or select 'amd' GPU type"),
                    );
                }
                if !self.exists(paths::NVIDIA_CTL_DEVICE) {
                    issues.push(
                        ValidationIssue::advisory(format!("{} device not found", paths::NVIDIA_CTL_DEVICE))
                            .hint("NVIDIA drivers may not be properly installed"),
                    );
                }
            }
            Gpu::Amd => {
                if !self.exists(paths::DRI_DIR) {
                    issues.push(
                        ValidationIssue::advisory(format!(
                            "{} not found - no GPU acceleration available",
                            paths::DRI_DIR
                        ))
                        .hint("Install Mesa drivers for GPU acceleration"),
                    );
                }
            }
        }
    }

    fn check_display(&self, config: &EffectiveConfig, issues: &mut Vec<ValidationIssue>) {
        match config.display {
            Display::X11 => {
                if self.host.env_set(env::X11_DISPLAY).is_none() {
                    issues.push(
                        ValidationIssue::blocking("X11 selected but DISPLAY environment variable not set")
                            .hint("Ensure you're running in an X11 session"),
                    );
                }
                if !self.exists(paths::X11_SOCKET_DIR) {
                    issues.push(ValidationIssue::advisory(format!(
                        "X11 socket directory {} not found",
                        paths::X11_SOCKET_DIR
                    )));
                }
            }
            Display::Wayland => {
                if self.host.env_set(env::WAYLAND_DISPLAY).is_none() {
                    issues.push(
                        ValidationIssue::advisory("Wayland selected but WAYLAND_DISPLAY not set")
                            .hint("Ensure you're running in a Wayland session"),
                    );
                }
            }
        }
    }

    fn check_audio(&self, config: &EffectiveConfig, issues: &mut Vec<ValidationIssue>) {
        if config.audio != Audio::PulseAudio {
            return;
        }

        let socket = paths::pulse_socket(self.host.uid());
        if !self.exists(&socket) {
            issues.push(
                ValidationIssue::advisory(format!("PulseAudio socket not found at {socket}"))
                    .hint("Audio may not work. Start PulseAudio/PipeWire or select 'none' for audio"),
            );
        }
        if !self.exists(paths::SOUND_DIR) {
            issues.push(
                ValidationIssue::advisory(format!("{} not found - ALSA devices unavailable", paths::SOUND_DIR))
                    .hint("Audio hardware may not be accessible"),
            );
        }
    }

    fn check_compose_files(&self, config: &EffectiveConfig, issues: &mut Vec<ValidationIssue>) {
        let (_, missing) = self.composer.verify_files_exist(config);
        let dir = self.composer.compose_dir();
        for file in missing {
            issues.push(
                ValidationIssue::blocking(format!("Compose file not found: {}", dir.join(&file).display()))
                    .hint(format!("Ensure {file} exists in {}", dir.display())),
            );
        }
    }

    fn check_access_grant(&self, config: &EffectiveConfig, issues: &mut Vec<ValidationIssue>) {
        if !config.wants_access_grant() {
            return;
        }

        if self.host.which(commands::XHOST).is_none() {
            issues.push(
                ValidationIssue::advisory("xhost command not found")
                    .hint("Install xhost or manually allow X11 access"),
            );
            return;
        }

        let user = current_user(self.host);
        let marker = match &user {
            Some(user) => format!("{}{user}", commands::XHOST_LOCALUSER_PREFIX),
            None => commands::XHOST_LOCALUSER_PREFIX.to_string(),
        };

        match self
            .host
            .run(commands::XHOST, &[], Duration::from_secs(timeouts::ACCESS_QUERY_SECS))
        {
            Ok(out) if out.success() && !out.stdout.contains(&marker) => {
                let user = user.unwrap_or_else(|| "$USER".to_string());
                issues.push(
                    ValidationIssue::advisory("X11 access may need to be granted").hint(format!(
                        "Will attempt to run: {} {}{user}",
                        commands::XHOST,
                        grant_prefix()
                    )),
                );
            }
            Ok(_) => {}
            Err(e) => debug!(error = %e, "Could not query X11 access control"),
        }
    }

    fn exists(&self, path: &str) -> bool {
        self.host.path_exists(Path::new(path))
    }
}

/// Allow the current user to draw on the x11 display.
/// Returns true when nothing needs doing (not x11, or auto-grant disabled).
pub fn grant_display_access<H: Host + ?Sized>(config: &EffectiveConfig, host: &H) -> bool {
    if !config.wants_access_grant() {
        return true;
    }
    if host.which(commands::XHOST).is_none() {
        warn!("xhost not found, cannot grant X11 access");
        return false;
    }
    let Some(user) = current_user(host) else {
        warn!("Cannot determine current user for X11 access grant");
        return false;
    };

    let grant = format!("{}{user}", grant_prefix());
    match host.run(commands::XHOST, &[grant.as_str()], Duration::from_secs(timeouts::ACCESS_GRANT_SECS)) {
        Ok(out) => {
            info!(user = %user, success = out.success(), "Granted X11 access");
            out.success()
        }
        Err(e) => {
            warn!(error = %e, "X11 access grant failed");
            false
        }
    }
}

fn grant_prefix() -> String {
    format!("+{}", commands::XHOST_LOCALUSER_PREFIX)
}

fn current_user<H: Host + ?Sized>(host: &H) -> Option<String> {
    host.env_set(env::USER).or_else(|| host.env_set(env::USERNAME))
}

fn install_hint(runtime: Runtime) -> String {
    match runtime {
        Runtime::Podman => "Install podman: https://podman.io/docs/installation".to_string(),
        Runtime::Docker => "Install docker: https://docs.docker.com/engine/install/".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::files_for;
    use crate::host::fake::{FakeHost, FakeResponse};
    use std::fs;

    fn config(runtime: Runtime, gpu: Gpu, display: Display, audio: Audio) -> EffectiveConfig {
        EffectiveConfig {
            runtime,
            gpu,
            display,
            audio,
            auto_grant_display_access: false,
        }
    }

    /// Compose directory holding every file the configuration needs
    fn compose_dir_for(config: &EffectiveConfig) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for file in files_for(config) {
            fs::write(dir.path().join(file), "services: {}\n").unwrap();
        }
        dir
    }

    fn blocking(issues: &[ValidationIssue]) -> Vec<&str> {
        issues
            .iter()
            .filter(|i| i.is_blocking())
            .map(|i| i.message.as_str())
            .collect()
    }

    fn healthy_podman() -> FakeHost {
        FakeHost::new()
            .with_executable("podman")
            .with_response("podman --version", FakeResponse::Exit(0, "podman version 5.0.0".into()))
    }

    #[test]
    fn test_three_blocking_issues_when_nothing_present() {
        let cfg = config(Runtime::Podman, Gpu::Nvidia, Display::X11, Audio::None);
        let dir = compose_dir_for(&cfg);
        let composer = CommandComposer::new(dir.path());
        let host = FakeHost::new();

        let (valid, issues) = Validator::new(&host, &composer).validate(&cfg);

        assert!(!valid);
        assert_eq!(
            blocking(&issues),
            vec![
                "podman is not installed or not in PATH",
                "NVIDIA GPU selected but /dev/nvidia0 not found",
                "X11 selected but DISPLAY environment variable not set",
            ]
        );
    }

    #[test]
    fn test_valid_with_only_advisories() {
        let cfg = config(Runtime::Podman, Gpu::Nvidia, Display::X11, Audio::None);
        let dir = compose_dir_for(&cfg);
        let composer = CommandComposer::new(dir.path());
        let host = healthy_podman().with_path("/dev/nvidia0").with_env("DISPLAY", ":0");

        let (valid, issues) = Validator::new(&host, &composer).validate(&cfg);

        assert!(valid);
        assert!(!issues.is_empty());
        assert!(issues.iter().all(|i| i.severity == Severity::Advisory));
    }

    #[test]
    fn test_runtime_version_failure_blocks_and_timeout_advises() {
        let cfg = config(Runtime::Docker, Gpu::Amd, Display::Wayland, Audio::None);
        let dir = compose_dir_for(&cfg);
        let composer = CommandComposer::new(dir.path());

        let broken = FakeHost::new()
            .with_executable("docker")
            .with_response("docker --version", FakeResponse::Exit(1, String::new()));
        let (valid, issues) = Validator::new(&broken, &composer).validate(&cfg);
        assert!(!valid);
        assert_eq!(issues[0].message, "docker is installed but not working properly");

        let slow = FakeHost::new()
            .with_executable("docker")
            .with_response("docker --version", FakeResponse::Timeout);
        let (valid, issues) = Validator::new(&slow, &composer).validate(&cfg);
        assert!(valid);
        assert_eq!(issues[0].message, "docker command timed out");
        assert_eq!(issues[0].severity, Severity::Advisory);
    }

    #[test]
    fn test_secondary_choices_never_block() {
        let cfg = config(Runtime::Podman, Gpu::Amd, Display::Wayland, Audio::PulseAudio);
        let dir = compose_dir_for(&cfg);
        let composer = CommandComposer::new(dir.path());
        let host = healthy_podman();

        let (valid, issues) = Validator::new(&host, &composer).validate(&cfg);

        assert!(valid);
        let messages: Vec<&str> = issues.iter().map(|i| i.message.as_str()).collect();
        assert_eq!(
            messages,
            vec![
                "/dev/dri not found - no GPU acceleration available",
                "Wayland selected but WAYLAND_DISPLAY not set",
                "PulseAudio socket not found at /run/user/1000/pulse/native",
                "/dev/snd not found - ALSA devices unavailable",
            ]
        );
    }

    #[test]
    fn test_missing_compose_file_blocks_once_per_file() {
        let cfg = config(Runtime::Podman, Gpu::Amd, Display::Wayland, Audio::None);
        let dir = compose_dir_for(&cfg);
        fs::remove_file(dir.path().join("compose.podman.yaml")).unwrap();
        fs::remove_file(dir.path().join("compose.audio-none.yaml")).unwrap();
        let composer = CommandComposer::new(dir.path());
        let host = healthy_podman()
            .with_path("/dev/dri")
            .with_env("WAYLAND_DISPLAY", "wayland-0");

        let (valid, issues) = Validator::new(&host, &composer).validate(&cfg);

        assert!(!valid);
        assert_eq!(issues.len(), 2);
        assert!(issues[0].message.ends_with("compose.podman.yaml"));
        assert!(issues[1].message.ends_with("compose.audio-none.yaml"));
        assert!(issues.iter().all(ValidationIssue::is_blocking));
    }

    #[test]
    fn test_access_grant_advisory_carries_command() {
        let mut cfg = config(Runtime::Podman, Gpu::Amd, Display::X11, Audio::None);
        cfg.auto_grant_display_access = true;
        let dir = compose_dir_for(&cfg);
        let composer = CommandComposer::new(dir.path());
        let host = healthy_podman()
            .with_path("/dev/dri")
            .with_path("/tmp/.X11-unix")
            .with_env("DISPLAY", ":0")
            .with_env("USER", "steve")
            .with_executable("xhost")
            .with_response(
                "xhost",
                FakeResponse::Exit(0, "access control enabled\nSI:localuser:alex\n".into()),
            );

        let (valid, issues) = Validator::new(&host, &composer).validate(&cfg);

        assert!(valid);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].message, "X11 access may need to be granted");
        assert_eq!(
            issues[0].fix_hint.as_deref(),
            Some("Will attempt to run: xhost +SI:localuser:steve")
        );
    }

    #[test]
    fn test_access_grant_already_present_is_silent() {
        let mut cfg = config(Runtime::Podman, Gpu::Amd, Display::X11, Audio::None);
        cfg.auto_grant_display_access = true;
        let dir = compose_dir_for(&cfg);
        let composer = CommandComposer::new(dir.path());
        let host = healthy_podman()
            .with_path("/dev/dri")
            .with_path("/tmp/.X11-unix")
            .with_env("DISPLAY", ":0")
            .with_env("USER", "steve")
            .with_executable("xhost")
            .with_response("xhost", FakeResponse::Exit(0, "SI:localuser:steve\n".into()));

        let (valid, issues) = Validator::new(&host, &composer).validate(&cfg);
        assert!(valid);
        assert!(issues.is_empty());
    }

    #[test]
    fn test_missing_xhost_is_advisory() {
        let mut cfg = config(Runtime::Podman, Gpu::Amd, Display::X11, Audio::None);
        cfg.auto_grant_display_access = true;
        let dir = compose_dir_for(&cfg);
        let composer = CommandComposer::new(dir.path());
        let host = healthy_podman()
            .with_path("/dev/dri")
            .with_path("/tmp/.X11-unix")
            .with_env("DISPLAY", ":0");

        let (valid, issues) = Validator::new(&host, &composer).validate(&cfg);
        assert!(valid);
        assert_eq!(issues[0].message, "xhost command not found");
    }

    #[test]
    fn test_grant_display_access() {
        let mut cfg = config(Runtime::Podman, Gpu::Amd, Display::Wayland, Audio::None);
        cfg.auto_grant_display_access = true;
        assert!(grant_display_access(&cfg, &FakeHost::new()));

        cfg.display = Display::X11;
        assert!(!grant_display_access(&cfg, &FakeHost::new()));

        let host = FakeHost::new()
            .with_executable("xhost")
            .with_env("USERNAME", "steve")
            .with_response("xhost +SI:localuser:steve", FakeResponse::Exit(0, String::new()));
        assert!(grant_display_access(&cfg, &host));
        assert_eq!(host.calls(), vec!["xhost +SI:localuser:steve".to_string()]);
    }

    #[test]
    fn test_issue_display_format() {
        let issue = ValidationIssue::blocking("broken").hint("fix it");
        assert_eq!(issue.to_string(), "✗ broken\n  → fix it");
        assert_eq!(ValidationIssue::advisory("meh").to_string(), "⚠ meh");
    }
}
