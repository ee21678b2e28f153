//! Saved user preferences
//!
//! Flat TOML file under the XDG config dir. Empty strings mean "auto-detect".
//! The file is shared with any other launcher instance, so it is re-read
//! before every merge and never assumed to be exclusively ours.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::types::EffectiveConfig;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default)]
    pub runtime: String,
    #[serde(default)]
    pub gpu: String,
    #[serde(default)]
    pub display: String,
    #[serde(default)]
    pub audio: String,

    /// Run the x11 access helper before start. Older files call this `auto_xhost`.
    #[serde(default, alias = "auto_xhost", skip_serializing_if = "Option::is_none")]
    pub auto_grant_display_access: Option<bool>,
}

impl Preferences {
    /// Preferences that pin every dimension to the given configuration
    pub fn from_config(config: &EffectiveConfig) -> Self {
        Self {
            runtime: config.runtime.to_string(),
            gpu: config.gpu.to_string(),
            display: config.display.to_string(),
            audio: config.audio.to_string(),
            auto_grant_display_access: Some(config.auto_grant_display_access),
        }
    }
}

/// Load/save access to the preferences file
#[derive(Debug, Clone)]
pub struct PreferencesStore {
    path: PathBuf,
}

impl Default for PreferencesStore {
    fn default() -> Self {
        Self::new(Self::default_path())
    }
}

impl PreferencesStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(crate::constants::config::APP_DIR);
        path.push(crate::constants::config::FILENAME);
        path
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read saved preferences. A missing, unreadable or malformed file yields empty preferences.
    pub fn load(&self) -> Preferences {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Preferences::default(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Could not read config file, using defaults");
                return Preferences::default();
            }
        };

        match toml::from_str::<Preferences>(&contents) {
            Ok(prefs) => prefs,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Could not parse config file, using defaults");
                Preferences::default()
            }
        }
    }

    pub fn save(&self, prefs: &Preferences) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .context(format!("Failed to create config directory: {}", parent.display()))?;
        }

        let mut prefs = prefs.clone();
        prefs.auto_grant_display_access.get_or_insert(true);

        let contents = toml::to_string_pretty(&prefs).context("Failed to serialize config to TOML")?;
        fs::write(&self.path, contents)
            .context(format!("Failed to write config file to {}", self.path.display()))?;
        info!(path = %self.path.display(), "Saved configuration");
        Ok(())
    }

    /// Delete the preferences file; succeeds when there is nothing to delete
    pub fn reset(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "Removed config file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context(format!("Failed to delete config file {}", self.path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> PreferencesStore {
        PreferencesStore::new(dir.path().join("minecraft-launcher").join("config.toml"))
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(!store.exists());
        assert_eq!(store.load(), Preferences::default());
    }

    #[test]
    fn test_load_malformed_file_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "runtime = [not toml").unwrap();
        assert_eq!(store.load(), Preferences::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let prefs = Preferences {
            runtime: "docker".to_string(),
            audio: "none".to_string(),
            ..Default::default()
        };

        store.save(&prefs).unwrap();
        let loaded = store.load();

        assert_eq!(loaded.runtime, "docker");
        assert_eq!(loaded.gpu, "");
        assert_eq!(loaded.audio, "none");
        assert_eq!(loaded.auto_grant_display_access, Some(true));
    }

    #[test]
    fn test_legacy_auto_xhost_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "runtime = \"podman\"\nauto_xhost = false\n").unwrap();

        let loaded = store.load();
        assert_eq!(loaded.runtime, "podman");
        assert_eq!(loaded.auto_grant_display_access, Some(false));
    }

    #[test]
    fn test_reset_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.save(&Preferences::default()).unwrap();
        assert!(store.exists());

        store.reset().unwrap();
        assert!(!store.exists());
        store.reset().unwrap();
    }
}
