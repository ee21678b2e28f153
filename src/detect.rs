//! Host capability detection
//!
//! Every probe is total: when no signal is present it falls back to a fixed
//! default, so a missing runtime or GPU is reported later by validation
//! instead of failing here.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};

use crate::constants::{commands, env, paths, timeouts};
use crate::host::Host;
use crate::types::{Audio, Detected, Display, Gpu, Runtime};

/// Diagnostic evidence gathered for the `doctor` report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionFacts {
    pub runtime: RuntimeFacts,
    pub gpu: GpuFacts,
    pub display: DisplayFacts,
    pub audio: AudioFacts,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeFacts {
    pub value: Runtime,
    /// Resolved executable, `None` when not on PATH
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuFacts {
    pub value: Gpu,
    /// Adapter description from lspci, or a generic vendor label
    pub model: String,
    /// The lspci line the model was taken from
    pub matched_line: Option<String>,
    pub devices_exist: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayFacts {
    pub value: Display,
    pub session_type: Option<String>,
    /// `DISPLAY` for x11, `WAYLAND_DISPLAY` for wayland
    pub display_var: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFacts {
    pub value: Audio,
    pub server_name: Option<String>,
}

impl Detected {
    pub fn from_facts(facts: &DetectionFacts) -> Self {
        Self {
            runtime: facts.runtime.value,
            gpu: facts.gpu.value,
            display: facts.display.value,
            audio: facts.audio.value,
        }
    }
}

pub struct SystemDetector<'a, H: Host + ?Sized> {
    host: &'a H,
}

impl<'a, H: Host + ?Sized> SystemDetector<'a, H> {
    pub fn new(host: &'a H) -> Self {
        Self { host }
    }

    pub fn detect(&self) -> Detected {
        let detected = Detected {
            runtime: self.runtime(),
            gpu: self.gpu(),
            display: self.display(),
            audio: self.audio(),
        };
        info!(
            runtime = %detected.runtime,
            gpu = %detected.gpu,
            display = %detected.display,
            audio = %detected.audio,
            "Detected system configuration"
        );
        detected
    }

    /// First runtime found on PATH, podman preferred
    pub fn runtime(&self) -> Runtime {
        Runtime::ALL
            .iter()
            .copied()
            .find(|rt| self.host.which(rt.as_str()).is_some())
            .unwrap_or(Runtime::Podman)
    }

    /// Vendor device nodes, then DRI card nodes, then lspci keywords
    pub fn gpu(&self) -> Gpu {
        if self.exists(paths::NVIDIA_DEVICE) || self.exists(paths::NVIDIA_CTL_DEVICE) {
            return Gpu::Nvidia;
        }

        let dri = Path::new(paths::DRI_DIR);
        if self.host.path_exists(dri)
            && self
                .host
                .dir_entries(dri)
                .iter()
                .any(|name| name.starts_with(paths::DRI_CARD_PREFIX))
        {
            return Gpu::Amd;
        }

        if let Some(listing) = self.lspci() {
            if let Some(gpu) = gpu_from_listing(&listing) {
                return gpu;
            }
        }

        Gpu::Amd
    }

    pub fn display(&self) -> Display {
        if let Some(session) = self.host.env_var(env::SESSION_TYPE) {
            // Parsing also trims, so " wayland" counts as a wayland session
            if let Ok(display) = session.parse::<Display>() {
                return display;
            }
        }
        if self.host.env_set(env::WAYLAND_DISPLAY).is_some() {
            return Display::Wayland;
        }
        if self.host.env_set(env::X11_DISPLAY).is_some() {
            return Display::X11;
        }
        Display::X11
    }

    pub fn audio(&self) -> Audio {
        if self.host.path_exists(&self.pulse_socket()) {
            return Audio::PulseAudio;
        }
        match self.pactl_info() {
            Some(info) if info.contains(commands::PACTL_SUCCESS_MARKER) => Audio::PulseAudio,
            _ => Audio::None,
        }
    }

    /// Re-run every probe and keep the raw evidence alongside the result
    pub fn details(&self) -> DetectionFacts {
        let runtime = self.runtime();
        let gpu = self.gpu();
        let display = self.display();
        let audio = self.audio();

        let matched_line = self.lspci().and_then(|listing| adapter_line(&listing, gpu));
        let model = matched_line
            .as_deref()
            .and_then(|line| line.split_once(": "))
            .map(|(_, name)| name.trim().to_string())
            .unwrap_or_else(|| format!("{} GPU", gpu.as_str().to_uppercase()));

        let devices_exist = match gpu {
            Gpu::Nvidia => self.exists(paths::NVIDIA_DEVICE),
            Gpu::Amd => self.exists(paths::DRI_DIR),
        };

        let display_var = match display {
            Display::X11 => self.host.env_var(env::X11_DISPLAY),
            Display::Wayland => self.host.env_var(env::WAYLAND_DISPLAY),
        };

        let server_name = self.pactl_info().and_then(|info| {
            info.lines()
                .find(|line| line.contains(commands::PACTL_SUCCESS_MARKER))
                .and_then(|line| line.split_once(':'))
                .map(|(_, name)| name.trim().to_string())
        });

        DetectionFacts {
            runtime: RuntimeFacts {
                value: runtime,
                path: self.host.which(runtime.as_str()),
            },
            gpu: GpuFacts {
                value: gpu,
                model,
                matched_line,
                devices_exist,
            },
            display: DisplayFacts {
                value: display,
                session_type: self.host.env_var(env::SESSION_TYPE),
                display_var,
            },
            audio: AudioFacts {
                value: audio,
                server_name,
            },
        }
    }

    fn exists(&self, path: &str) -> bool {
        self.host.path_exists(Path::new(path))
    }

    fn pulse_socket(&self) -> PathBuf {
        PathBuf::from(paths::pulse_socket(self.host.uid()))
    }

    /// lspci output, `None` when it failed or timed out
    fn lspci(&self) -> Option<String> {
        self.probe(commands::LSPCI, &[]).map(|(_, stdout)| stdout)
    }

    /// `pactl info` output, only when it exited zero
    fn pactl_info(&self) -> Option<String> {
        self.probe(commands::PACTL, &["info"])
            .filter(|(success, _)| *success)
            .map(|(_, stdout)| stdout)
    }

    fn probe(&self, program: &str, args: &[&str]) -> Option<(bool, String)> {
        match self
            .host
            .run(program, args, Duration::from_secs(timeouts::PROBE_SECS))
        {
            Ok(out) => Some((out.success(), out.stdout)),
            Err(e) => {
                debug!(program, error = %e, "Probe gave no signal");
                None
            }
        }
    }
}

/// Vendor keyword match over a whole lspci listing
fn gpu_from_listing(listing: &str) -> Option<Gpu> {
    let lower = listing.to_lowercase();
    if commands::NVIDIA_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return Some(Gpu::Nvidia);
    }
    if commands::AMD_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return Some(Gpu::Amd);
    }
    // Intel goes through the same DRI path as AMD
    if lower.contains("intel") && lower.contains("vga") {
        return Some(Gpu::Amd);
    }
    None
}

/// The display-controller line describing an adapter of the given vendor
fn adapter_line(listing: &str, gpu: Gpu) -> Option<String> {
    listing
        .lines()
        .find(|line| {
            let lower = line.to_lowercase();
            let is_display = lower.contains("vga") || lower.contains("3d");
            let vendor = match gpu {
                Gpu::Nvidia => lower.contains("nvidia"),
                Gpu::Amd => lower.contains("amd") || lower.contains("radeon"),
            };
            is_display && vendor
        })
        .map(str::to_string)
}
