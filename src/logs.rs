//! Log analysis: classify lines by level and build a prompt-ready report.
//!
//! Classification is keyword based and deliberately loose. A line is tagged
//! with the first level name it contains, timestamps are picked out by short
//! shape fragments rather than parsed, and the report keeps a bounded
//! head/middle/tail sample so large logs stay small in the prompt.

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::fs::File;
use std::io::{self, BufRead, BufReader, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use thiserror::Error;

/// Maximum entries kept in [`AnalysisResult::samples`].
pub const MAX_SAMPLES: usize = 20;
/// Error entries shown in the text report.
pub const MAX_ERROR_SAMPLES: usize = 10;
/// Warning entries shown in the text report.
pub const MAX_WARNING_SAMPLES: usize = 5;

/// Characters taken from the start of a detected timestamp.
const TIMESTAMP_WINDOW: usize = 30;

/// Log severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    /// Order in which level names are searched for in a line.
    pub const PRIORITY: [LogLevel; 5] = [
        LogLevel::Fatal,
        LogLevel::Error,
        LogLevel::Warn,
        LogLevel::Debug,
        LogLevel::Info,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Fatal => "FATAL",
        }
    }

    pub fn is_error(self) -> bool {
        matches!(self, LogLevel::Error | LogLevel::Fatal)
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of log source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogType {
    Application,
    System,
    Access,
    Error,
    #[default]
    Unknown,
}

impl LogType {
    /// Guess the log type from a file path.
    pub fn from_path(path: &Path) -> Self {
        let path = path.to_string_lossy();
        if path.contains("access") {
            LogType::Access
        } else if path.contains("error") || path.contains("err") {
            LogType::Error
        } else if path.contains("syslog") || path.contains("dmesg") {
            LogType::System
        } else {
            LogType::Application
        }
    }
}

impl fmt::Display for LogType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogType::Application => "application",
            LogType::System => "system",
            LogType::Access => "access",
            LogType::Error => "error",
            LogType::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// A classified log line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub raw: String,
    pub timestamp: String,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn parse(line: &str) -> Self {
        Self {
            raw: line.to_string(),
            timestamp: extract_timestamp(line),
            level: classify_level(line),
            message: extract_message(line),
        }
    }
}

/// Aggregated view of a log
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub log_type: LogType,
    pub total: usize,
    pub by_level: BTreeMap<LogLevel, usize>,
    pub samples: Vec<LogEntry>,
    pub errors: Vec<LogEntry>,
    pub warnings: Vec<LogEntry>,
}

impl AnalysisResult {
    fn from_entries(log_type: LogType, entries: Vec<LogEntry>) -> Self {
        let mut by_level = BTreeMap::new();
        for entry in &entries {
            *by_level.entry(entry.level).or_insert(0) += 1;
        }

        let errors = entries.iter().filter(|e| e.level.is_error()).cloned().collect();
        let warnings = entries
            .iter()
            .filter(|e| e.level == LogLevel::Warn)
            .cloned()
            .collect();

        Self {
            log_type,
            total: entries.len(),
            by_level,
            samples: sample_entries(&entries, MAX_SAMPLES),
            errors,
            warnings,
        }
    }

    /// Count for a level, zero if it never appeared.
    pub fn count(&self, level: LogLevel) -> usize {
        self.by_level.get(&level).copied().unwrap_or(0)
    }

    /// Render the fixed-section report handed to the prompt builder.
    pub fn to_text(&self) -> String {
        let mut out = String::new();

        let _ = writeln!(out, "## Log Analysis Summary\n");
        let _ = writeln!(out, "Log Type: {}", self.log_type);
        let _ = writeln!(out, "Total Entries: {}\n", self.total);

        let _ = writeln!(out, "## Statistics by Level");
        for level in LogLevel::PRIORITY {
            let count = self.count(level);
            if count > 0 {
                let _ = writeln!(out, "- {level}: {count}");
            }
        }
        out.push('\n');

        if !self.errors.is_empty() {
            let _ = writeln!(out, "## Error Entries ({})", self.errors.len());
            for entry in sample_entries(&self.errors, MAX_ERROR_SAMPLES) {
                let _ = writeln!(out, "{}\n", entry.raw);
            }
            out.push('\n');
        }

        if !self.warnings.is_empty() {
            let _ = writeln!(out, "## Warning Entries ({})", self.warnings.len());
            for entry in sample_entries(&self.warnings, MAX_WARNING_SAMPLES) {
                let _ = writeln!(out, "{}\n", entry.raw);
            }
            out.push('\n');
        }

        let _ = writeln!(out, "## Sample Log Entries");
        for entry in &self.samples {
            let _ = writeln!(out, "{}\n", entry.raw);
        }

        out
    }
}

/// Errors from reading a log file
#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error("failed to open log file {}: {source}", path.display())]
    Open { path: PathBuf, source: io::Error },

    #[error("failed to read log file {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
}

/// Analyse in-memory log text. Never fails; empty input gives an empty result.
pub fn analyze_text(content: &str) -> AnalysisResult {
    analyze_text_as(content, LogType::Application)
}

/// [`analyze_text`] for text whose source kind is already known, such as
/// journal output.
pub fn analyze_text_as(content: &str, log_type: LogType) -> AnalysisResult {
    let entries = content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(LogEntry::parse)
        .collect();

    AnalysisResult::from_entries(log_type, entries)
}

/// Analyse a log file, reading at most `limit` non-blank lines when `limit > 0`.
pub fn analyze_file(path: impl AsRef<Path>, limit: usize) -> Result<AnalysisResult, AnalyzeError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| AnalyzeError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    let entries = read_entries(BufReader::new(file), limit).map_err(|source| AnalyzeError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    tracing::debug!(path = %path.display(), entries = entries.len(), "analysed log file");
    Ok(AnalysisResult::from_entries(LogType::from_path(path), entries))
}

fn read_entries<R: BufRead>(mut reader: R, limit: usize) -> io::Result<Vec<LogEntry>> {
    let mut entries = Vec::new();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }

        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\n', '\r']);
        if line.trim().is_empty() {
            continue;
        }

        entries.push(LogEntry::parse(line));
        if limit > 0 && entries.len() >= limit {
            break;
        }
    }

    Ok(entries)
}

/// Read everything from stdin when it is a pipe or redirect. `None` on a terminal.
pub fn read_piped_stdin() -> io::Result<Option<String>> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut content = String::new();
    stdin.lock().read_to_string(&mut content)?;
    Ok(Some(content))
}

/// Head, middle and tail slices of `max / 3` entries each once `entries`
/// exceeds `max`; otherwise everything.
pub fn sample_entries<T: Clone>(entries: &[T], max: usize) -> Vec<T> {
    if entries.len() <= max {
        return entries.to_vec();
    }

    let third = max / 3;
    let middle = entries.len() / 2;

    let mut samples = Vec::with_capacity(third * 3);
    samples.extend_from_slice(&entries[..third]);
    samples.extend_from_slice(&entries[middle..middle + third]);
    samples.extend_from_slice(&entries[entries.len() - third..]);
    samples
}

/// First level name found in the line, case-insensitively; INFO otherwise.
pub fn classify_level(line: &str) -> LogLevel {
    let lower = line.to_lowercase();
    LogLevel::PRIORITY
        .into_iter()
        .find(|level| lower.contains(&level.as_str().to_lowercase()))
        .unwrap_or(LogLevel::Info)
}

const MONTHS: [&[u8; 3]; 12] = [
    b"Jan", b"Feb", b"Mar", b"Apr", b"May", b"Jun", b"Jul", b"Aug", b"Sep", b"Oct", b"Nov", b"Dec",
];

fn digits(bytes: &[u8]) -> bool {
    bytes.iter().all(u8::is_ascii_digit)
}

/// `2025-02-01T10:23:45`
fn iso_fragment(w: &[u8]) -> bool {
    digits(&w[..4]) && w[4] == b'-' && w[5].is_ascii_digit()
}

/// `2025/02/01 10:23:45`
fn slash_fragment(w: &[u8]) -> bool {
    digits(&w[..4]) && w[4] == b'/' && w[5].is_ascii_digit()
}

/// `02/01/2025 10:23:45`
fn us_slash_fragment(w: &[u8]) -> bool {
    digits(&w[..2]) && w[2] == b'/' && digits(&w[3..5]) && w[5] == b'/'
}

/// `Feb  1 10:23:45`
fn syslog_fragment(w: &[u8]) -> bool {
    MONTHS.iter().any(|m| &w[..3] == *m)
        && w[3] == b' '
        && (w[4].is_ascii_digit() || w[4] == b' ')
        && (w[5].is_ascii_digit() || w[5] == b' ')
}

/// Six-byte prefix fragments, one per recognised timestamp layout, in the
/// order they are tried.
const TIMESTAMP_FRAGMENTS: [fn(&[u8]) -> bool; 4] =
    [iso_fragment, slash_fragment, us_slash_fragment, syslog_fragment];

/// Best-effort timestamp: the first shape whose fragment occurs in the line
/// wins, and up to 30 characters from that point are returned trimmed.
pub fn extract_timestamp(line: &str) -> String {
    let bytes = line.as_bytes();
    if bytes.len() < 6 {
        return String::new();
    }

    for fragment in TIMESTAMP_FRAGMENTS {
        if let Some(idx) = bytes.windows(6).position(fragment) {
            let mut end = (idx + TIMESTAMP_WINDOW).min(line.len());
            while !line.is_char_boundary(end) {
                end -= 1;
            }
            return line[idx..end].trim().to_string();
        }
    }

    String::new()
}

static TIMESTAMP_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:[.,]\d+)?(?:Z|[+-]\d{2}:?\d{2})?")
        .expect("timestamp prefix regex is valid")
});

static LEVEL_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\[?(?:DEBUG|INFO|WARN(?:ING)?|ERROR|FATAL)\b\]?\s*:?\s*")
        .expect("level prefix regex is valid")
});

/// Keywords searched, in order, for the start of the message text.
const LEVEL_MARKERS: [&str; 6] = ["DEBUG", "INFO", "WARNING", "WARN", "ERROR", "FATAL"];

/// Best-effort message text with a leading timestamp or level tag removed.
/// Lines with neither come back unchanged.
pub fn extract_message(line: &str) -> String {
    let mut rest = line;
    let mut stripped = false;

    for prefix in [&*TIMESTAMP_PREFIX, &*LEVEL_PREFIX] {
        if let Some(m) = prefix.find(rest) {
            rest = &rest[m.end()..];
            stripped = true;
            break;
        }
    }

    for marker in LEVEL_MARKERS {
        if let Some(idx) = rest.find(marker) {
            let after = &rest[idx + marker.len()..];
            return after.trim_start_matches([']', ':']).trim().to_string();
        }
    }

    if stripped {
        rest.trim().to_string()
    } else {
        line.to_string()
    }
}
