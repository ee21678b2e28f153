//! Compose command construction
//!
//! Pure mapping from an [`EffectiveConfig`] and an action to the argument
//! vector for `<runtime> compose`. The five `-f` files always appear in the
//! order base, runtime, gpu, display, audio: later files override earlier
//! ones, so reordering them changes what the container gets.

use std::env;
use std::path::{Path, PathBuf};

use crate::constants::compose::{AUDIO_PREFIX, BASE_FILE, FILE_PREFIX, FILE_SUFFIX};
use crate::types::EffectiveConfig;

/// Number of compose files combined per invocation
pub const FILE_COUNT: usize = 5;

/// Compose file names for a configuration, in override order
pub fn files_for(config: &EffectiveConfig) -> [String; FILE_COUNT] {
    [
        BASE_FILE.to_string(),
        format!("{FILE_PREFIX}{}{FILE_SUFFIX}", config.runtime),
        format!("{FILE_PREFIX}{}{FILE_SUFFIX}", config.gpu),
        format!("{FILE_PREFIX}{}{FILE_SUFFIX}", config.display),
        format!("{FILE_PREFIX}{AUDIO_PREFIX}{}{FILE_SUFFIX}", config.audio),
    ]
}

/// Which of the configuration's compose files are present in `base_dir`.
/// Returns `(all_present, missing)` with `missing` in override order.
pub fn verify_files_exist(config: &EffectiveConfig, base_dir: &Path) -> (bool, Vec<String>) {
    let missing: Vec<String> = files_for(config)
        .into_iter()
        .filter(|name| !base_dir.join(name).exists())
        .collect();
    (missing.is_empty(), missing)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandComposer {
    compose_dir: PathBuf,
    /// Replaces the runtime name as argv[0]
    executable: Option<PathBuf>,
}

impl CommandComposer {
    pub fn new(compose_dir: impl Into<PathBuf>) -> Self {
        Self {
            compose_dir: compose_dir.into(),
            executable: None,
        }
    }

    pub fn with_executable(mut self, executable: impl Into<PathBuf>) -> Self {
        self.executable = Some(executable.into());
        self
    }

    pub fn compose_dir(&self) -> &Path {
        &self.compose_dir
    }

    /// Program used as argv[0] for this configuration
    pub fn program(&self, config: &EffectiveConfig) -> String {
        match &self.executable {
            Some(path) => path.to_string_lossy().into_owned(),
            None => config.runtime.to_string(),
        }
    }

    /// `[program, "compose", -f x5, action, extra...]`
    pub fn compose<S: AsRef<str>>(&self, config: &EffectiveConfig, action: &str, extra_args: &[S]) -> Vec<String> {
        let mut cmd = Vec::with_capacity(3 + FILE_COUNT * 2 + extra_args.len());
        cmd.push(self.program(config));
        cmd.push("compose".to_string());
        for file in files_for(config) {
            cmd.push("-f".to_string());
            cmd.push(self.compose_dir.join(file).to_string_lossy().into_owned());
        }
        cmd.push(action.to_string());
        cmd.extend(extra_args.iter().map(|a| a.as_ref().to_string()));
        cmd
    }

    /// Space-joined command for display. Arguments are not quoted, so this must never be re-parsed.
    pub fn preview(&self, config: &EffectiveConfig, action: &str) -> String {
        self.compose::<&str>(config, action, &[]).join(" ")
    }

    pub fn verify_files_exist(&self, config: &EffectiveConfig) -> (bool, Vec<String>) {
        verify_files_exist(config, &self.compose_dir)
    }
}

/// Locate the compose files: explicit flag, then `MC_LAUNCHER_COMPOSE_DIR`,
/// then the executable's directory if it holds the base file, then the working directory.
pub fn resolve_compose_dir(explicit: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = explicit {
        return dir;
    }
    if let Some(dir) = env::var_os(crate::constants::env::COMPOSE_DIR).filter(|v| !v.is_empty()) {
        return PathBuf::from(dir);
    }
    if let Some(dir) = env::current_exe().ok().and_then(|exe| exe.parent().map(Path::to_path_buf)) {
        if dir.join(BASE_FILE).exists() {
            return dir;
        }
    }
    env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Audio, Display, Gpu, Runtime};
    use std::fs;

    fn config() -> EffectiveConfig {
        EffectiveConfig {
            runtime: Runtime::Docker,
            gpu: Gpu::Nvidia,
            display: Display::Wayland,
            audio: Audio::PulseAudio,
            auto_grant_display_access: true,
        }
    }

    #[test]
    fn test_files_for_fixed_order() {
        assert_eq!(
            files_for(&config()),
            [
                "compose.base.yaml",
                "compose.docker.yaml",
                "compose.nvidia.yaml",
                "compose.wayland.yaml",
                "compose.audio-pulseaudio.yaml",
            ]
        );
    }

    #[test]
    fn test_compose_places_action_after_files() {
        let composer = CommandComposer::new("/opt/mc");
        let cmd = composer.compose(&config(), "up", &["-d", "--force-recreate"]);

        assert_eq!(cmd.len(), 2 + FILE_COUNT * 2 + 3);
        assert_eq!(&cmd[..2], &["docker", "compose"]);
        for (i, file) in files_for(&config()).iter().enumerate() {
            assert_eq!(cmd[2 + i * 2], "-f");
            assert_eq!(cmd[3 + i * 2], format!("/opt/mc/{file}"));
        }
        assert_eq!(cmd[12], "up");
        assert_eq!(&cmd[13..], &["-d", "--force-recreate"]);
    }

    #[test]
    fn test_compose_without_extra_args_ends_with_action() {
        let cmd = CommandComposer::new("/c").compose::<&str>(&config(), "down", &[]);
        assert_eq!(cmd.last().map(String::as_str), Some("down"));
    }

    #[test]
    fn test_executable_override_only_changes_program() {
        let composer = CommandComposer::new("/c").with_executable("/tmp/fake-runtime");
        let cmd = composer.compose::<&str>(&config(), "ps", &[]);
        assert_eq!(cmd[0], "/tmp/fake-runtime");
        assert_eq!(cmd[5], "/c/compose.docker.yaml");
    }

    #[test]
    fn test_preview_joins_with_spaces() {
        let preview = CommandComposer::new("/c").preview(&config(), "up");
        assert!(preview.starts_with("docker compose -f /c/compose.base.yaml -f"));
        assert!(preview.ends_with("compose.audio-pulseaudio.yaml up"));
    }

    #[test]
    fn test_verify_files_exist_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        for file in files_for(&config()) {
            fs::write(dir.path().join(file), "services: {}\n").unwrap();
        }

        let composer = CommandComposer::new(dir.path());
        assert_eq!(composer.verify_files_exist(&config()), (true, Vec::new()));

        fs::remove_file(dir.path().join("compose.nvidia.yaml")).unwrap();
        let (all_present, missing) = composer.verify_files_exist(&config());
        assert!(!all_present);
        assert_eq!(missing, vec!["compose.nvidia.yaml".to_string()]);
    }

    #[test]
    fn test_resolve_compose_dir_prefers_explicit() {
        let dir = PathBuf::from("/srv/compose");
        assert_eq!(resolve_compose_dir(Some(dir.clone())), dir);
    }
}
