//! Point-in-time resource usage of the workload

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::constants::{commands, timeouts};
use crate::host::Host;
use crate::types::{EffectiveConfig, Gpu, Runtime};

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceStats {
    /// CPU as reported by the runtime, 100 per fully used core
    pub cpu_raw: f64,
    /// `used / limit` as reported
    pub mem_usage: String,
    pub net_in: String,
    pub net_out: String,
    /// Percent, nvidia only
    pub gpu_utilization: Option<f64>,
}

/// One row of `podman stats --format json`
#[derive(Debug, Deserialize)]
struct PodmanRow {
    cpu_percent: String,
    #[serde(default)]
    mem_usage: String,
    #[serde(default)]
    net_io: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PodmanOutput {
    Rows(Vec<PodmanRow>),
    Row(PodmanRow),
}

impl ResourceStats {
    pub fn cpu_percent(&self) -> f64 {
        self.cpu_raw
    }

    /// Share of the whole machine, 0..=100
    pub fn cpu_normalized(&self, cores: usize) -> f64 {
        self.cpu_raw / cores.max(1) as f64
    }

    pub fn cpu_cores_used(&self) -> f64 {
        self.cpu_raw / 100.0
    }

    /// Snapshot via `<runtime> stats --no-stream`. `None` whenever the command
    /// fails or prints nothing usable, which in practice means not running.
    pub fn query<H: Host + ?Sized>(
        host: &H,
        program: &str,
        config: &EffectiveConfig,
        workload: &str,
    ) -> Option<Self> {
        let format = match config.runtime {
            Runtime::Podman => "json",
            Runtime::Docker => "table",
        };
        let out = match host.run(
            program,
            &["stats", "--no-stream", "--format", format, workload],
            Duration::from_secs(timeouts::STATS_SECS),
        ) {
            Ok(out) if out.success() => out,
            Ok(out) => {
                debug!(code = ?out.code, "stats exited non-zero");
                return None;
            }
            Err(e) => {
                debug!(error = %e, "stats failed");
                return None;
            }
        };

        let mut stats = match config.runtime {
            Runtime::Podman => parse_podman(&out.stdout),
            Runtime::Docker => parse_docker(&out.stdout),
        }?;

        if config.gpu == Gpu::Nvidia {
            stats.gpu_utilization = nvidia_utilization(host);
        }
        Some(stats)
    }
}

fn parse_podman(output: &str) -> Option<ResourceStats> {
    let output = output.trim();
    if output.is_empty() {
        return None;
    }
    let row = match serde_json::from_str::<PodmanOutput>(output) {
        Ok(PodmanOutput::Rows(rows)) => rows.into_iter().next()?,
        Ok(PodmanOutput::Row(row)) => row,
        Err(e) => {
            debug!(error = %e, "Unparsable podman stats output");
            return None;
        }
    };
    let (net_in, net_out) = split_pair(&row.net_io);
    Some(ResourceStats {
        cpu_raw: parse_percent(&row.cpu_percent)?,
        mem_usage: row.mem_usage.trim().to_string(),
        net_in,
        net_out,
        gpu_utilization: None,
    })
}

/// Columns: CONTAINER ID, NAME, CPU %, MEM USAGE / LIMIT, MEM %, NET I/O, ...
fn parse_docker(output: &str) -> Option<ResourceStats> {
    let line = output.lines().map(str::trim).filter(|l| !l.is_empty()).last()?;
    let columns = split_columns(line);
    if columns.len() < 6 {
        return None;
    }
    let (net_in, net_out) = split_pair(columns[5]);
    Some(ResourceStats {
        cpu_raw: parse_percent(columns[2])?,
        mem_usage: columns[3].to_string(),
        net_in,
        net_out,
        gpu_utilization: None,
    })
}

/// Split a table row on runs of two or more spaces; single spaces stay inside a column.
fn split_columns(line: &str) -> Vec<&str> {
    line.split("  ").map(str::trim).filter(|c| !c.is_empty()).collect()
}

fn parse_percent(value: &str) -> Option<f64> {
    value.trim().trim_end_matches('%').trim().parse().ok()
}

/// `"a / b"` into its halves; a value without a slash is all `a`
fn split_pair(value: &str) -> (String, String) {
    match value.split_once('/') {
        Some((a, b)) => (a.trim().to_string(), b.trim().to_string()),
        None => (value.trim().to_string(), String::new()),
    }
}

fn nvidia_utilization<H: Host + ?Sized>(host: &H) -> Option<f64> {
    let out = host
        .run(
            commands::NVIDIA_SMI,
            &["--query-gpu=utilization.gpu", "--format=csv,noheader,nounits"],
            Duration::from_secs(timeouts::GPU_UTIL_SECS),
        )
        .ok()
        .filter(|out| out.success())?;
    out.stdout.lines().next()?.trim().parse().ok()
}
