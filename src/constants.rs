//! Application-wide constants
//!
//! This module contains all magic numbers and string literals used throughout
//! the application, providing a single source of truth for constant values.

/// Host device nodes and sockets probed during detection and validation
pub mod paths {
    /// Primary NVIDIA device node
    pub const NVIDIA_DEVICE: &str = "/dev/nvidia0";

    /// NVIDIA control device node
    pub const NVIDIA_CTL_DEVICE: &str = "/dev/nvidiactl";

    /// Generic DRM directory (AMD, Intel, Mesa drivers)
    pub const DRI_DIR: &str = "/dev/dri";

    /// Prefix of card nodes inside the DRM directory
    pub const DRI_CARD_PREFIX: &str = "card";

    /// ALSA device directory
    pub const SOUND_DIR: &str = "/dev/snd";

    /// X11 socket directory
    pub const X11_SOCKET_DIR: &str = "/tmp/.X11-unix";

    /// Per-user PulseAudio/PipeWire socket, `{}` is replaced by the uid
    pub const PULSE_SOCKET_FORMAT: &str = "/run/user/{}/pulse/native";

    pub fn pulse_socket(uid: u32) -> String {
        PULSE_SOCKET_FORMAT.replace("{}", &uid.to_string())
    }
}

/// Environment variables read from the host session
pub mod env {
    pub const SESSION_TYPE: &str = "XDG_SESSION_TYPE";
    pub const X11_DISPLAY: &str = "DISPLAY";
    pub const WAYLAND_DISPLAY: &str = "WAYLAND_DISPLAY";
    pub const USER: &str = "USER";
    pub const USERNAME: &str = "USERNAME";

    /// Overrides the directory holding the compose files
    pub const COMPOSE_DIR: &str = "MC_LAUNCHER_COMPOSE_DIR";

    /// Log verbosity (trace, debug, info, warn, error)
    pub const LOG_LEVEL: &str = "LOG_LEVEL";
}

/// External diagnostic and helper commands
pub mod commands {
    pub const LSPCI: &str = "lspci";
    pub const PACTL: &str = "pactl";
    pub const XHOST: &str = "xhost";
    pub const NVIDIA_SMI: &str = "nvidia-smi";

    /// Marker in `pactl info` output when a sound server answered
    pub const PACTL_SUCCESS_MARKER: &str = "Server Name:";

    /// Prefix of a per-user allow entry in `xhost` output
    pub const XHOST_LOCALUSER_PREFIX: &str = "SI:localuser:";

    /// lspci keywords (lowercase) that identify an NVIDIA adapter
    pub const NVIDIA_KEYWORDS: &[&str] = &["nvidia", "geforce", "quadro", "rtx"];

    /// lspci keywords (lowercase) that identify an AMD adapter
    pub const AMD_KEYWORDS: &[&str] = &["amd", "radeon"];
}

/// Timeouts for external process invocations, in seconds
pub mod timeouts {
    /// Detection probes (lspci, pactl)
    pub const PROBE_SECS: u64 = 2;

    /// `<runtime> --version` availability check
    pub const VERSION_CHECK_SECS: u64 = 5;

    /// `xhost` access query
    pub const ACCESS_QUERY_SECS: u64 = 2;

    /// `xhost +SI:localuser:<user>` grant
    pub const ACCESS_GRANT_SECS: u64 = 5;

    /// `compose ps` status query
    pub const STATUS_SECS: u64 = 10;

    /// `<runtime> ps --filter` existence query
    pub const EXISTENCE_SECS: u64 = 3;

    /// Margin added on top of the grace period for `compose stop`
    pub const STOP_MARGIN_SECS: u64 = 15;

    /// `compose down` after a stop
    pub const DOWN_SECS: u64 = 15;

    /// `<runtime> stats --no-stream`
    pub const STATS_SECS: u64 = 3;

    /// `nvidia-smi` utilization query
    pub const GPU_UTIL_SECS: u64 = 1;

    /// Default grace period passed to `compose stop -t`
    pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 5;
}

/// The supervised workload
pub mod workload {
    /// Container name used by status, existence and stats queries
    pub const NAME: &str = "tlauncher";

    /// Output lines that show the launcher finished loading and its window is up
    pub const READINESS_MARKERS: &[&str] = &["[Loading] SUCCESS", "Started!"];
}

/// Compose file naming
pub mod compose {
    pub const BASE_FILE: &str = "compose.base.yaml";
    pub const FILE_PREFIX: &str = "compose.";
    pub const FILE_SUFFIX: &str = ".yaml";
    pub const AUDIO_PREFIX: &str = "audio-";
}

/// Configuration file location
pub mod config {
    /// Directory under the XDG config dir
    pub const APP_DIR: &str = "minecraft-launcher";

    /// Preferences file name
    pub const FILENAME: &str = "config.toml";
}
