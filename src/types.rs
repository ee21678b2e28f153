//! Core value types shared by detection, composition, validation and supervision

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Implements `as_str`, `ALL`, `Display` and `FromStr` for a closed string-backed enum.
/// Parsing is case-insensitive and ignores surrounding whitespace.
macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownValue;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let wanted = s.trim().to_ascii_lowercase();
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str() == wanted)
                    .ok_or_else(|| UnknownValue {
                        kind: stringify!($name),
                        value: s.to_string(),
                    })
            }
        }
    };
}

/// A persisted or user-supplied string that names no known variant
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value '{value}'")]
pub struct UnknownValue {
    pub kind: &'static str,
    pub value: String,
}

/// Container orchestration CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Runtime {
    Podman,
    Docker,
}

string_enum!(Runtime { Podman => "podman", Docker => "docker" });

/// GPU vendor family; `Amd` also covers Intel and other Mesa DRI hosts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Gpu {
    Nvidia,
    Amd,
}

string_enum!(Gpu { Nvidia => "nvidia", Amd => "amd" });

/// Display server protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Display {
    X11,
    Wayland,
}

string_enum!(Display { X11 => "x11", Wayland => "wayland" });

/// Audio server passed through to the container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Audio {
    #[value(name = "pulseaudio")]
    PulseAudio,
    None,
}

string_enum!(Audio { PulseAudio => "pulseaudio", None => "none" });

/// Host capabilities resolved by detection, one value per dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detected {
    pub runtime: Runtime,
    pub gpu: Gpu,
    pub display: Display,
    pub audio: Audio,
}

/// The configuration handed to validation and supervision.
/// Built once per action from detected ⊕ persisted ⊕ explicit values and never mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveConfig {
    pub runtime: Runtime,
    pub gpu: Gpu,
    pub display: Display,
    pub audio: Audio,
    pub auto_grant_display_access: bool,
}

impl EffectiveConfig {
    /// Whether the x11 access helper should be consulted for this configuration
    pub fn wants_access_grant(&self) -> bool {
        self.display == Display::X11 && self.auto_grant_display_access
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_insensitive_and_trimmed() {
        assert_eq!(" Podman ".parse::<Runtime>(), Ok(Runtime::Podman));
        assert_eq!("WAYLAND".parse::<Display>(), Ok(Display::Wayland));
        assert_eq!("pulseaudio".parse::<Audio>(), Ok(Audio::PulseAudio));
    }

    #[test]
    fn test_parse_rejects_unknown_values() {
        let err = "intel".parse::<Gpu>().unwrap_err();
        assert_eq!(err.kind, "Gpu");
        assert_eq!(err.value, "intel");
        assert!("".parse::<Runtime>().is_err());
    }

    #[test]
    fn test_display_matches_as_str() {
        for gpu in Gpu::ALL {
            assert_eq!(gpu.to_string(), gpu.as_str());
        }
        assert_eq!(Audio::None.to_string(), "none");
    }

    #[test]
    fn test_wants_access_grant_only_for_x11_with_flag() {
        let mut config = EffectiveConfig {
            runtime: Runtime::Podman,
            gpu: Gpu::Amd,
            display: Display::X11,
            audio: Audio::None,
            auto_grant_display_access: true,
        };
        assert!(config.wants_access_grant());

        config.auto_grant_display_access = false;
        assert!(!config.wants_access_grant());

        config.auto_grant_display_access = true;
        config.display = Display::Wayland;
        assert!(!config.wants_access_grant());
    }
}
