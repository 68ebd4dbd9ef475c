//! Persistent history of questions and answers.
//!
//! Stored as a pretty-printed JSON array in `history.json` under the ohman
//! config directory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Entries kept on disk; older ones are dropped first
pub const MAX_ENTRIES: usize = 100;

const HISTORY_FILE: &str = "history.json";

/// What kind of request produced an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Question,
    Diagnose,
    Interactive,
    Error,
    Log,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::Question => write!(f, "question"),
            EntryKind::Diagnose => write!(f, "diagnose"),
            EntryKind::Interactive => write!(f, "interactive"),
            EntryKind::Error => write!(f, "error"),
            EntryKind::Log => write!(f, "log"),
        }
    }
}

/// One recorded exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// Assigned on `add` when empty
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub answer: String,
    pub timestamp: DateTime<Utc>,
}

impl Entry {
    /// New entry stamped with the current time
    pub fn new(
        kind: EntryKind,
        command: impl Into<String>,
        question: impl Into<String>,
        answer: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            kind,
            command: command.into(),
            question: question.into(),
            answer: answer.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Corrupt history file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize history: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Unable to determine the config directory")]
    NoConfigDir,
}

/// File-backed history store
#[derive(Debug)]
pub struct SessionStore {
    path: PathBuf,
    entries: Vec<Entry>,
}

impl SessionStore {
    /// Open (creating if needed) the store in `dir`. A missing file is an
    /// empty history.
    pub fn open(dir: &Path) -> Result<Self, SessionError> {
        fs::create_dir_all(dir).map_err(|source| SessionError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let path = dir.join(HISTORY_FILE);
        let entries = match fs::read(&path) {
            Ok(data) if data.iter().all(u8::is_ascii_whitespace) => Vec::new(),
            Ok(data) => serde_json::from_slice(&data).map_err(|source| SessionError::Parse {
                path: path.clone(),
                source,
            })?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(source) => return Err(SessionError::Io { path, source }),
        };

        tracing::debug!(path = %path.display(), entries = entries.len(), "opened history");
        Ok(Self { path, entries })
    }

    /// Open the store in `$OHMAN_CONFIG_DIR`, or the platform config directory.
    pub fn open_default() -> Result<Self, SessionError> {
        Self::open(&default_dir()?)
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an entry, trim to `MAX_ENTRIES` and persist.
    pub fn add(&mut self, mut entry: Entry) -> Result<(), SessionError> {
        if entry.id.is_empty() {
            entry.id = self.next_id();
        }
        self.entries.push(entry);

        if self.entries.len() > MAX_ENTRIES {
            let excess = self.entries.len() - MAX_ENTRIES;
            self.entries.drain(..excess);
        }

        self.save()
    }

    pub fn all(&self) -> &[Entry] {
        &self.entries
    }

    /// The most recent `n` entries, oldest first. `0` means all.
    pub fn last_n(&self, n: usize) -> &[Entry] {
        if n == 0 || n >= self.entries.len() {
            return &self.entries;
        }
        &self.entries[self.entries.len() - n..]
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) -> Result<(), SessionError> {
        self.entries.clear();
        self.save()
    }

    /// Nanosecond timestamp, bumped past the previous id if the clock repeats
    fn next_id(&self) -> String {
        let now = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let last = self
            .entries
            .last()
            .and_then(|entry| entry.id.parse::<i64>().ok())
            .unwrap_or(0);
        now.max(last + 1).to_string()
    }

    /// Write to a temporary file, then rename over the real one
    fn save(&self) -> Result<(), SessionError> {
        let data = serde_json::to_vec_pretty(&self.entries)?;
        let tmp = self.path.with_extension("json.tmp");

        write_private(&tmp, &data).map_err(|source| SessionError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &self.path).map_err(|source| SessionError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

fn default_dir() -> Result<PathBuf, SessionError> {
    if let Some(dir) = std::env::var_os("OHMAN_CONFIG_DIR").filter(|d| !d.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    dirs::config_dir()
        .map(|dir| dir.join("ohman"))
        .ok_or(SessionError::NoConfigDir)
}

#[cfg(unix)]
fn write_private(path: &Path, data: &[u8]) -> io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(data)
}

#[cfg(not(unix))]
fn write_private(path: &Path, data: &[u8]) -> io::Result<()> {
    fs::write(path, data)
}

/// Human-friendly age of `then`, e.g. "5m ago"
pub fn relative_time(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = now.signed_duration_since(then).num_seconds().max(0);
    match secs {
        0..=59 => "just now".to_string(),
        60..=3599 => format!("{}m ago", secs / 60),
        3600..=86_399 => format!("{}h ago", secs / 3600),
        86_400..=604_799 => format!("{}d ago", secs / 86_400),
        _ => then.format("%Y-%m-%d").to_string(),
    }
}
