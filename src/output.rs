//! Terminal output formatting.

use chrono::Utc;
use colored::Colorize;
use std::io::{self, Write};

use crate::logs::{AnalysisResult, LogLevel};
use crate::session::{relative_time, Entry, EntryKind};

/// Widest column answers are wrapped to
const MAX_WIDTH: usize = 100;

/// Questions longer than this are shortened in the history listing
const HISTORY_PREVIEW_CHARS: usize = 60;

/// Apply the `[output] color` setting. `NO_COLOR` and non-tty detection are
/// handled by `colored` itself.
pub fn init_color(enabled: bool) {
    if !enabled {
        colored::control::set_override(false);
    }
}

/// Terminal width for wrapping, capped at `MAX_WIDTH`
pub fn wrap_width() -> usize {
    textwrap::termwidth().min(MAX_WIDTH)
}

pub fn format_error(message: &str, tip: Option<&str>) -> String {
    let mut output = format!("{} {}", "Error:".red().bold(), message);
    if let Some(tip) = tip {
        output.push('\n');
        output.push_str(&format!("{} {}", "Tip:".blue().bold(), tip));
    }
    output
}

/// Progress line on stderr, kept out of the answer on stdout
pub fn status(message: &str) {
    eprintln!("{} {}", "▸".cyan(), message.dimmed());
}

pub fn print_debug_section(title: &str, body: &str, footer: Option<String>) {
    eprintln!("{}", format!("=== DEBUG: {title} ===").yellow().bold());
    if body.trim().is_empty() {
        eprintln!("{}", "| <empty>".dimmed());
    } else {
        for line in body.lines() {
            eprintln!("{}", format!("| {line}").bright_white());
        }
    }
    if let Some(footer) = footer {
        eprintln!("{}", footer.dimmed());
    }
    eprintln!();
}

/// Print a streamed chunk immediately.
pub fn print_chunk(chunk: &str) -> io::Result<()> {
    let mut stdout = io::stdout().lock();
    stdout.write_all(chunk.as_bytes())?;
    stdout.flush()
}

/// Print a complete (non-streamed) answer.
pub fn print_answer(content: &str, markdown: bool) {
    if markdown {
        for line in render_markdown(content, wrap_width(), "") {
            println!("{line}");
        }
    } else {
        println!("{}", content.trim_end());
    }
}

/// Render markdown text to terminal lines: headings, bullets, fenced code and
/// inline `code` / **bold** / *italic*.
pub fn render_markdown(text: &str, width: usize, indent: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut in_code_block = false;
    let wrap_at = width.saturating_sub(indent.len()).max(20);

    for line in text.lines() {
        let trimmed = line.trim();

        if trimmed.starts_with("```") {
            in_code_block = !in_code_block;
            continue;
        }

        if in_code_block {
            lines.push(format!("{indent}  {}", line.cyan()));
            continue;
        }

        if let Some(heading) = heading_text(trimmed) {
            lines.push(format!(
                "{indent}{} {}",
                "▸".blue(),
                render_inline_markdown(heading).blue().bold()
            ));
            continue;
        }

        if let Some(item) = trimmed
            .strip_prefix("- ")
            .or_else(|| trimmed.strip_prefix("* "))
        {
            let body = render_inline_markdown(item);
            let options = textwrap::Options::new(wrap_at)
                .initial_indent("  • ")
                .subsequent_indent("    ");
            for wrapped in textwrap::wrap(&body, options) {
                lines.push(format!("{indent}{wrapped}"));
            }
            continue;
        }

        if trimmed.is_empty() {
            lines.push(String::new());
            continue;
        }

        let processed = render_inline_markdown(line);
        for wrapped in textwrap::wrap(&processed, wrap_at) {
            lines.push(format!("{indent}{wrapped}"));
        }
    }

    lines
}

fn heading_text(line: &str) -> Option<&str> {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    line[hashes..].strip_prefix(' ').map(str::trim)
}

/// Process inline markdown: `code`, **bold**, *italic*
pub fn render_inline_markdown(text: &str) -> String {
    let mut result = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '`' => {
                let code: String = chars.by_ref().take_while(|&next| next != '`').collect();
                result.push_str(&code.cyan().to_string());
            }
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut bold_text = String::new();
                while let Some(next) = chars.next() {
                    if next == '*' {
                        if chars.peek() == Some(&'*') {
                            chars.next();
                        }
                        break;
                    }
                    bold_text.push(next);
                }
                result.push_str(&bold_text.bold().to_string());
            }
            '*' if chars.peek().is_some_and(|next| !next.is_whitespace()) => {
                let italic_text: String = chars.by_ref().take_while(|&next| next != '*').collect();
                result.push_str(&italic_text.italic().to_string());
            }
            _ => result.push(c),
        }
    }

    result
}

/// Short description of a shell exit status
pub fn describe_exit_code(code: i32) -> Option<&'static str> {
    let description = match code {
        1 => "general error",
        2 => "misuse of shell builtin",
        126 => "permission denied or not executable",
        127 => "command not found",
        130 => "interrupted (SIGINT)",
        137 => "killed (SIGKILL)",
        139 => "segmentation fault (SIGSEGV)",
        141 => "broken pipe (SIGPIPE)",
        143 => "terminated (SIGTERM)",
        129..=192 => "killed by a signal",
        _ => return None,
    };
    Some(description)
}

/// Header printed before diagnosing a failed command
pub fn print_failed_command(command: &str, exit_code: i32) {
    let code = match describe_exit_code(exit_code) {
        Some(description) => format!("exit {exit_code}, {description}"),
        None => format!("exit {exit_code}"),
    };
    println!();
    println!("{} {} {}", "●".red(), command.bold(), format!("({code})").dimmed());
    println!();
}

/// Level counts from a log analysis, most severe first
pub fn print_log_summary(result: &AnalysisResult) {
    println!();
    println!(
        "{} {} {}",
        "▸".magenta(),
        "Log summary".magenta().bold(),
        format!("({} entries, {})", result.total, result.log_type).dimmed()
    );

    let counts: Vec<String> = LogLevel::PRIORITY
        .iter()
        .filter_map(|level| {
            let count = result.count(*level);
            (count > 0).then(|| {
                let label = format!("{level}: {count}");
                match level {
                    LogLevel::Fatal | LogLevel::Error => label.red().to_string(),
                    LogLevel::Warn => label.yellow().to_string(),
                    _ => label,
                }
            })
        })
        .collect();
    if !counts.is_empty() {
        println!("  {}", counts.join("  "));
    }
    println!();
}

/// Listing for `ohman history`
pub fn print_history(entries: &[Entry]) {
    if entries.is_empty() {
        println!("No session history found.");
        println!(
            "{} {}",
            "Tip:".blue().bold(),
            "use `ohman <command> [question]` to start asking questions"
        );
        return;
    }

    println!("{} ({} entries)", "Session history".bold(), entries.len());
    println!();
    let now = Utc::now();
    for (i, entry) in entries.iter().enumerate() {
        for line in history_lines(i + 1, entry, now) {
            println!("{line}");
        }
        println!();
    }
}

fn history_lines(number: usize, entry: &Entry, now: chrono::DateTime<Utc>) -> Vec<String> {
    let mut lines = vec![format!(
        "  [{number}] {} {}",
        relative_time(entry.timestamp, now).dimmed(),
        entry.kind.to_string().cyan()
    )];

    let preview = truncate_preview(&entry.question);
    match entry.kind {
        EntryKind::Error => lines.push(format!("      Error: {preview}")),
        EntryKind::Log => lines.push(format!("      Source: {}", entry.command)),
        EntryKind::Diagnose => lines.push(format!("      Command: {}", entry.command)),
        EntryKind::Question | EntryKind::Interactive => {
            lines.push(format!("      Command: {}", entry.command));
            if !preview.is_empty() {
                lines.push(format!("      Question: {preview}"));
            }
        }
    }
    lines
}

fn truncate_preview(text: &str) -> String {
    let single_line = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if single_line.chars().count() <= HISTORY_PREVIEW_CHARS {
        return single_line;
    }
    let cut: String = single_line.chars().take(HISTORY_PREVIEW_CHARS).collect();
    format!("{cut}...")
}
