//! Man page and `--help` retrieval.

use regex::Regex;
use std::io;
use std::process::{Command, Stdio};
use std::sync::LazyLock;

/// Flags tried, in order, when a command has no man page
const HELP_FLAGS: [&str; 3] = ["--help", "-h", "-help"];

/// Highest standard manual section
const MAX_SECTION: u8 = 8;

/// Overstrike bold (`X\bX`) and underline (`_\bX`) sequences left by nroff
static OVERSTRIKE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s).\x08").expect("valid overstrike regex"));

/// SGR escape sequences some man implementations emit
static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").expect("valid ansi regex"));

/// Documentation for a single command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManPage {
    pub command: String,
    /// Manual section, when one was requested
    pub section: Option<u8>,
    pub content: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ManError {
    #[error("No manual entry for {0}")]
    NotFound(String),

    #[error("No help output found for {0}")]
    NoHelp(String),

    #[error("No documentation found for {0}: no man page and no --help output")]
    NoDocumentation(String),

    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// Fetch the man page for `command`, rendered as plain text.
pub fn fetch(command: &str, section: Option<u8>) -> Result<ManPage, ManError> {
    let args = man_args(command, section);

    let content = match render_through_col(&args) {
        Some(text) => text,
        None => {
            tracing::debug!(command, "col unavailable, stripping formatting ourselves");
            render_plain(&args)?
        }
    };

    let content = strip_formatting(&content);
    if content.trim().is_empty() {
        return Err(ManError::NotFound(command.to_string()));
    }

    Ok(ManPage {
        command: command.to_string(),
        section,
        content,
    })
}

/// Run `command` with the usual help flags and return the first useful output.
pub fn help_output(command: &str) -> Result<String, ManError> {
    if command.trim().is_empty() {
        return Err(ManError::NoHelp(command.to_string()));
    }

    for flag in HELP_FLAGS {
        let output = match Command::new(command)
            .arg(flag)
            .stdin(Stdio::null())
            .output()
        {
            Ok(output) => output,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(ManError::NoHelp(command.to_string()));
            }
            Err(err) => {
                tracing::debug!(command, flag, %err, "help flag failed");
                continue;
            }
        };

        if !output.status.success() {
            continue;
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            return Ok(strip_formatting(stdout.trim()));
        }

        // some programs print their help to stderr
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            return Ok(strip_formatting(stderr.trim()));
        }
    }

    Err(ManError::NoHelp(command.to_string()))
}

/// Man page if there is one, otherwise the command's own help output.
pub fn documentation(command: &str, section: Option<u8>) -> Result<ManPage, ManError> {
    match fetch(command, section) {
        Ok(page) => Ok(page),
        Err(err) => {
            tracing::debug!(command, %err, "no man page, trying help flags");
            let content =
                help_output(command).map_err(|_| ManError::NoDocumentation(command.to_string()))?;
            Ok(ManPage {
                command: command.to_string(),
                section: None,
                content,
            })
        }
    }
}

/// Whether `man` knows about `command`.
pub fn exists(command: &str) -> bool {
    man_locates(&[command.to_string()])
}

/// Manual sections (1-8) that have a page for `command`.
pub fn sections(command: &str) -> Vec<u8> {
    (1..=MAX_SECTION)
        .filter(|section| man_locates(&man_args(command, Some(*section))))
        .collect()
}

/// One-line description from `whatis`.
pub fn whatis(command: &str) -> Result<String, ManError> {
    let output = Command::new("whatis")
        .arg(command)
        .stderr(Stdio::null())
        .output()
        .map_err(|source| ManError::Spawn {
            program: "whatis".to_string(),
            source,
        })?;

    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if !output.status.success() || text.is_empty() {
        return Err(ManError::NotFound(command.to_string()));
    }
    Ok(text)
}

/// Remove overstrike and escape sequences from rendered man output.
pub fn strip_formatting(text: &str) -> String {
    let text = OVERSTRIKE.replace_all(text, "");
    ANSI_ESCAPE.replace_all(&text, "").into_owned()
}

fn man_args(command: &str, section: Option<u8>) -> Vec<String> {
    let mut args = Vec::with_capacity(2);
    if let Some(section) = section {
        args.push(section.to_string());
    }
    args.push(command.to_string());
    args
}

fn man_locates(args: &[String]) -> bool {
    Command::new("man")
        .arg("-w")
        .args(args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// `man args | col -b`; `None` if either side fails.
fn render_through_col(args: &[String]) -> Option<String> {
    let mut man = Command::new("man")
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .ok()?;
    let man_stdout = man.stdout.take()?;

    let col = Command::new("col")
        .arg("-b")
        .stdin(Stdio::from(man_stdout))
        .stderr(Stdio::null())
        .output();

    let man_ok = man.wait().map(|status| status.success()).unwrap_or(false);
    let col = col.ok()?;
    if !man_ok || !col.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&col.stdout).into_owned())
}

fn render_plain(args: &[String]) -> Result<String, ManError> {
    let command = args.last().cloned().unwrap_or_default();
    let output = Command::new("man")
        .args(args)
        .stderr(Stdio::null())
        .output()
        .map_err(|source| ManError::Spawn {
            program: "man".to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(ManError::NotFound(command));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
