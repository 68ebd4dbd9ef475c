//! systemd journal access for `--log <unit>`.

use anyhow::{bail, Context, Result};
use std::process::Command;

/// Suffixes that mark a systemd unit name.
const UNIT_SUFFIXES: [&str; 11] = [
    ".service",
    ".socket",
    ".timer",
    ".path",
    ".slice",
    ".scope",
    ".device",
    ".mount",
    ".automount",
    ".swap",
    ".target",
];

/// Bare names treated as units even without a suffix.
const COMMON_SERVICES: [&str; 17] = [
    "nginx",
    "apache2",
    "apache",
    "httpd",
    "docker",
    "containerd",
    "sshd",
    "ssh",
    "mysql",
    "mariadb",
    "postgresql",
    "postgres",
    "redis",
    "mongodb",
    "systemd",
    "network",
    "cron",
];

/// Check whether `input` looks like a systemd unit rather than a file path.
pub fn is_unit(input: &str) -> bool {
    if UNIT_SUFFIXES.iter().any(|suffix| input.ends_with(suffix)) {
        return true;
    }

    let lower = input.to_lowercase();
    COMMON_SERVICES.contains(&lower.as_str())
}

/// Fetch the journal for `unit`, limited to the last `limit` lines when `limit > 0`.
pub fn fetch_unit_logs(unit: &str, limit: usize) -> Result<String> {
    let mut cmd = Command::new("journalctl");
    cmd.args(["-u", unit, "--no-pager"]);
    if limit > 0 {
        cmd.args(["-n", &limit.to_string()]);
    }

    tracing::debug!(unit, limit, "running journalctl");
    let output = cmd
        .output()
        .context("journalctl not found; is this a systemd host?")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("journalctl failed for {unit}: {}", stderr.trim());
    }

    let logs = String::from_utf8_lossy(&output.stdout).into_owned();
    if logs.trim().is_empty() || logs.trim() == "-- No entries --" {
        bail!("no logs found for unit {unit}");
    }

    Ok(logs)
}
