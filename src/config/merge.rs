//! Combine detected values with saved and per-invocation choices
//!
//! Precedence is a single linear rule: explicit > persisted > detected.
//! Explicit overrides are written into the persisted view before merging,
//! so `merge` itself only ever sees two inputs.

use std::str::FromStr;
use tracing::warn;

use super::preferences::Preferences;
use crate::types::{Audio, Detected, Display, EffectiveConfig, Gpu, Runtime};

/// Values chosen for this invocation only (command-line flags)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Overrides {
    pub runtime: Option<Runtime>,
    pub gpu: Option<Gpu>,
    pub display: Option<Display>,
    pub audio: Option<Audio>,
}

impl Overrides {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl Preferences {
    /// Pre-populate the persisted view with explicit choices
    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(runtime) = overrides.runtime {
            self.runtime = runtime.to_string();
        }
        if let Some(gpu) = overrides.gpu {
            self.gpu = gpu.to_string();
        }
        if let Some(display) = overrides.display {
            self.display = display.to_string();
        }
        if let Some(audio) = overrides.audio {
            self.audio = audio.to_string();
        }
    }
}

pub fn merge(detected: &Detected, persisted: &Preferences) -> EffectiveConfig {
    EffectiveConfig {
        runtime: pick("runtime", &persisted.runtime, detected.runtime),
        gpu: pick("gpu", &persisted.gpu, detected.gpu),
        display: pick("display", &persisted.display, detected.display),
        audio: pick("audio", &persisted.audio, detected.audio),
        auto_grant_display_access: persisted.auto_grant_display_access.unwrap_or(true),
    }
}

/// Saved value when it is non-blank and names a known variant, detected value otherwise
fn pick<T: FromStr + Copy>(key: &str, saved: &str, detected: T) -> T
where
    T::Err: std::fmt::Display,
{
    if saved.trim().is_empty() {
        return detected;
    }
    match saved.parse() {
        Ok(value) => value,
        Err(e) => {
            warn!(key, error = %e, "Ignoring saved value");
            detected
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detected() -> Detected {
        Detected {
            runtime: Runtime::Podman,
            gpu: Gpu::Amd,
            display: Display::Wayland,
            audio: Audio::PulseAudio,
        }
    }

    #[test]
    fn test_empty_preferences_keep_detection() {
        let config = merge(&detected(), &Preferences::default());
        assert_eq!(config.runtime, Runtime::Podman);
        assert_eq!(config.gpu, Gpu::Amd);
        assert_eq!(config.display, Display::Wayland);
        assert_eq!(config.audio, Audio::PulseAudio);
        assert!(config.auto_grant_display_access);
    }

    #[test]
    fn test_saved_values_override_detection() {
        let prefs = Preferences {
            runtime: "docker".to_string(),
            display: "  x11 ".to_string(),
            audio: "   ".to_string(),
            auto_grant_display_access: Some(false),
            ..Default::default()
        };
        let config = merge(&detected(), &prefs);
        assert_eq!(config.runtime, Runtime::Docker);
        assert_eq!(config.gpu, Gpu::Amd);
        assert_eq!(config.display, Display::X11);
        assert_eq!(config.audio, Audio::PulseAudio);
        assert!(!config.auto_grant_display_access);
    }

    #[test]
    fn test_unknown_saved_value_falls_back() {
        let prefs = Preferences {
            gpu: "intel".to_string(),
            ..Default::default()
        };
        assert_eq!(merge(&detected(), &prefs).gpu, Gpu::Amd);
    }

    #[test]
    fn test_runtime_precedence_for_any_detection() {
        for runtime in Runtime::ALL {
            let mut d = detected();
            d.runtime = *runtime;
            let prefs = Preferences {
                runtime: "docker".to_string(),
                ..Default::default()
            };
            assert_eq!(merge(&d, &prefs).runtime, Runtime::Docker);
        }
    }

    #[test]
    fn test_overrides_beat_saved_values() {
        let mut prefs = Preferences {
            runtime: "docker".to_string(),
            gpu: "nvidia".to_string(),
            ..Default::default()
        };
        prefs.apply(&Overrides {
            runtime: Some(Runtime::Podman),
            audio: Some(Audio::None),
            ..Default::default()
        });

        let config = merge(&detected(), &prefs);
        assert_eq!(config.runtime, Runtime::Podman);
        assert_eq!(config.gpu, Gpu::Nvidia);
        assert_eq!(config.audio, Audio::None);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let prefs = Preferences {
            gpu: "nvidia".to_string(),
            auto_grant_display_access: Some(false),
            ..Default::default()
        };
        let first = merge(&detected(), &prefs);
        let second = merge(&detected(), &Preferences::from_config(&first));
        assert_eq!(first, second);
    }

    #[test]
    fn test_overrides_is_empty() {
        assert!(Overrides::default().is_empty());
        assert!(!Overrides {
            gpu: Some(Gpu::Nvidia),
            ..Default::default()
        }
        .is_empty());
    }
}
