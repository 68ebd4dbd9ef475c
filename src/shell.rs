//! Access to the calling shell: last failed command and history.
//!
//! Failed commands are recorded by a prompt hook that writes
//! `exitcode|command|unix_ts` to `/tmp/.ohman_last_failed_<shell pid>`.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Records older than this are ignored
const MAX_RECORD_AGE_SECS: i64 = 5 * 60;

const RECORD_PREFIX: &str = "/tmp/.ohman_last_failed";

/// A command that exited non-zero
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedCommand {
    pub command: String,
    pub exit_code: i32,
    /// Captured error output (empty when the hook recorded none)
    pub error: String,
    pub recorded_at: Option<DateTime<Utc>>,
}

/// Supported interactive shells
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellKind {
    Zsh,
    Bash,
    Fish,
    Unknown,
}

impl ShellKind {
    /// Classify a `$SHELL`-style path
    pub fn from_path(shell: &str) -> Self {
        if shell.contains("zsh") {
            ShellKind::Zsh
        } else if shell.contains("bash") {
            ShellKind::Bash
        } else if shell.contains("fish") {
            ShellKind::Fish
        } else {
            ShellKind::Unknown
        }
    }

    /// Default history file name in the home directory
    fn history_file_name(self) -> &'static str {
        match self {
            ShellKind::Zsh => ".zsh_history",
            ShellKind::Fish => ".local/share/fish/fish_history",
            ShellKind::Bash | ShellKind::Unknown => ".bash_history",
        }
    }
}

impl fmt::Display for ShellKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShellKind::Zsh => write!(f, "zsh"),
            ShellKind::Bash => write!(f, "bash"),
            ShellKind::Fish => write!(f, "fish"),
            ShellKind::Unknown => write!(f, "unknown"),
        }
    }
}

/// Shell named by `$SHELL`
pub fn detect_shell() -> ShellKind {
    std::env::var("SHELL")
        .map(|shell| ShellKind::from_path(&shell))
        .unwrap_or(ShellKind::Unknown)
}

/// The most recent failed command recorded for this shell.
pub fn last_failed() -> Result<FailedCommand> {
    let now = Utc::now();
    for path in record_paths() {
        if !path.exists() {
            continue;
        }
        tracing::debug!(path = %path.display(), "reading failed command record");
        return read_record(&path, now);
    }

    bail!("no failed command recorded; install the ohman prompt hook for your shell")
}

/// Pid-specific record first, then the shared one
fn record_paths() -> Vec<PathBuf> {
    let mut paths = Vec::with_capacity(2);
    #[cfg(unix)]
    {
        // SAFETY: getppid has no preconditions and cannot fail
        let ppid = unsafe { libc::getppid() };
        paths.push(PathBuf::from(format!("{RECORD_PREFIX}_{ppid}")));
    }
    paths.push(PathBuf::from(RECORD_PREFIX));
    paths
}

fn read_record(path: &Path, now: DateTime<Utc>) -> Result<FailedCommand> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_record(&text, now)
}

/// Parse `exitcode|command|unix_ts`. The command itself may contain `|`.
fn parse_record(text: &str, now: DateTime<Utc>) -> Result<FailedCommand> {
    let text = text.trim();
    let Some((code, rest)) = text.split_once('|') else {
        bail!("invalid failed command record: {text:?}");
    };

    let (command, recorded_at) = match rest.rsplit_once('|') {
        Some((command, ts)) => match ts.trim().parse::<i64>() {
            Ok(secs) => (command, DateTime::from_timestamp(secs, 0)),
            Err(_) => (rest, None),
        },
        None => (rest, None),
    };

    if let Some(at) = recorded_at {
        if now.signed_duration_since(at) > Duration::seconds(MAX_RECORD_AGE_SECS) {
            bail!("the last failed command was recorded more than 5 minutes ago");
        }
    }

    let command = command.trim();
    if command.is_empty() {
        bail!("failed command record has no command");
    }

    Ok(FailedCommand {
        command: command.to_string(),
        exit_code: code.trim().parse().unwrap_or(1),
        error: String::new(),
        recorded_at,
    })
}

/// The last `limit` commands from the shell history file.
pub fn history(limit: usize) -> Result<Vec<String>> {
    let Some(path) = history_file() else {
        bail!("unable to determine history file location");
    };
    read_history(&path, limit)
}

fn history_file() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os("HISTFILE").filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }
    dirs::home_dir().map(|home| home.join(detect_shell().history_file_name()))
}

fn read_history(path: &Path, limit: usize) -> Result<Vec<String>> {
    // zsh "metafies" non-ASCII bytes, so history is not always valid UTF-8
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let text = String::from_utf8_lossy(&bytes);

    let lines: Vec<String> = text
        .lines()
        .map(strip_history_prefix)
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect();

    let skip = lines.len().saturating_sub(limit);
    Ok(lines.into_iter().skip(skip).collect())
}

/// Drop zsh extended-history metadata (`: 1700000000:0;cmd`)
fn strip_history_prefix(line: &str) -> &str {
    if let Some(rest) = line.strip_prefix(": ") {
        if let Some((meta, command)) = rest.split_once(';') {
            if meta.chars().all(|c| c.is_ascii_digit() || c == ':') {
                return command;
            }
        }
    }
    line
}

/// Program name of a command line, skipping `VAR=value` assignments and
/// leading path components.
pub fn command_name(full: &str) -> &str {
    full.split_whitespace()
        .find(|word| !is_assignment(word))
        .map(|word| word.rsplit('/').next().unwrap_or(word))
        .unwrap_or("")
}

fn is_assignment(word: &str) -> bool {
    match word.split_once('=') {
        Some((name, _)) => {
            !name.is_empty()
                && !name.starts_with(|c: char| c.is_ascii_digit())
                && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}
