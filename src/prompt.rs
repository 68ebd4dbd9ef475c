//! Chat message construction.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper bound on documentation characters embedded in a prompt.
pub const MAX_DOC_CHARS: usize = 50_000;

/// Upper bound on pasted error / log characters embedded in a prompt.
pub const MAX_INPUT_CHARS: usize = 20_000;

const TRUNCATION_NOTICE: &str = "\n\n... (content truncated)";

/// Author of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Messages for a one-off question about `command`. Without a question only
/// the system message is produced, ready for a conversation.
pub fn question(command: &str, docs: &str, question: &str) -> Vec<Message> {
    let docs = truncate_content(docs, MAX_DOC_CHARS);
    let system = format!(
        "You help people use the Unix command `{command}`. Answer from the documentation \
         below, quote the relevant options, and give runnable examples in ```sh blocks. \
         Say so plainly when the documentation does not cover the question.\n\n\
         <documentation command=\"{command}\">\n{docs}\n</documentation>"
    );

    let mut messages = vec![Message::system(system)];
    if !question.trim().is_empty() {
        messages.push(Message::user(question.trim()));
    }
    messages
}

/// Messages for diagnosing a command that exited non-zero.
///
/// `recent` is the tail of the shell history, oldest first; it is left out
/// when empty.
pub fn diagnose(
    command: &str,
    exit_code: i32,
    error: &str,
    docs: &str,
    recent: &[String],
) -> Vec<Message> {
    let docs = truncate_content(docs, MAX_DOC_CHARS);
    let error = if error.trim().is_empty() {
        "(no error output captured)"
    } else {
        error.trim()
    };
    let history = if recent.is_empty() {
        String::new()
    } else {
        format!("Recent commands:\n{}\n\n", recent.join("\n"))
    };

    let system = format!(
        "A shell command failed. Reply with two markdown sections: `## Problem` (one or two \
         sentences on the cause) and `## Fix` (the corrected command in a ```sh block, plus \
         one line of explanation if needed).\n\n\
         Command: {command}\nExit code: {exit_code}\nError output:\n{error}\n\n\
         {history}<documentation>\n{docs}\n</documentation>"
    );

    vec![
        Message::system(system),
        Message::user("Why did this command fail and how do I fix it?"),
    ]
}

/// System message for an interactive session about `command`.
pub fn interactive(command: &str, docs: &str) -> Vec<Message> {
    let docs = truncate_content(docs, MAX_DOC_CHARS);
    let system = format!(
        "You are chatting with someone about the `{command}` command. Keep answers short, \
         show practical examples, and mention related options when they help.\n\n\
         <documentation command=\"{command}\">\n{docs}\n</documentation>"
    );
    vec![Message::system(system)]
}

/// Messages for explaining a pasted error message.
pub fn error_analysis(error_text: &str) -> Vec<Message> {
    let error_text = truncate_content(error_text.trim(), MAX_INPUT_CHARS);
    let system = "You explain terminal and program errors. Reply with `## Problem` (what went \
                  wrong), `## Cause` (the most likely reason) and `## Fix` (concrete steps, \
                  commands in ```sh blocks). Be brief.";

    vec![
        Message::system(system),
        Message::user(format!("Explain this error:\n\n{error_text}")),
    ]
}

/// Messages for analysing a log report (usually `AnalysisResult::to_text`).
pub fn log_analysis(report: &str) -> Vec<Message> {
    let report = truncate_content(report, MAX_INPUT_CHARS);
    let system = format!(
        "You analyse logs for an operator. Summarise the overall health, group the errors \
         and warnings by likely root cause, and list the next debugging steps in priority \
         order.\n\n<logs>\n{report}\n</logs>"
    );

    vec![
        Message::system(system),
        Message::user("What is going wrong in these logs and what should I check first?"),
    ]
}

/// Cut `content` to at most `max_chars` characters, preferring a paragraph
/// break in the final quarter, and mark the cut.
pub fn truncate_content(content: &str, max_chars: usize) -> String {
    let Some((cut, _)) = content.char_indices().nth(max_chars) else {
        return content.to_string();
    };

    let mut truncated = &content[..cut];
    if let Some(idx) = truncated.rfind("\n\n") {
        if truncated[..idx].chars().count() > max_chars * 3 / 4 {
            truncated = &truncated[..idx];
        }
    }

    format!("{truncated}{TRUNCATION_NOTICE}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_question_prompt() {
        let messages = question("grep", "GREP(1) - print lines matching a pattern", "How to search recursively?");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.contains("grep"));
        assert!(messages[0].content.contains("GREP(1) - print lines matching a pattern"));
        assert_eq!(messages[1].role, Role::User);
        assert_eq!(messages[1].content, "How to search recursively?");
    }

    #[test]
    fn test_question_prompt_without_question() {
        assert_eq!(question("ls", "LS(1)", "").len(), 1);
        assert_eq!(question("ls", "LS(1)", "   ").len(), 1);
    }

    #[test]
    fn test_diagnose_prompt() {
        let messages = diagnose("chmod 777 /etc/passwd", 1, "Operation not permitted", "CHMOD(1)", &[]);
        assert_eq!(messages.len(), 2);
        assert!(!messages[0].content.contains("Recent commands"));
        assert!(messages[0].content.contains("chmod 777 /etc/passwd"));
        assert!(messages[0].content.contains("Operation not permitted"));
        assert!(messages[0].content.contains("Exit code: 1"));
        assert_eq!(messages[1].role, Role::User);
    }

    #[test]
    fn test_diagnose_prompt_without_error_output() {
        let messages = diagnose("false", 1, "", "", &[]);
        assert!(messages[0].content.contains("no error output captured"));
    }

    #[test]
    fn test_diagnose_prompt_with_recent_commands() {
        let recent = vec!["cd /srv/app".to_string(), "make deploy".to_string()];
        let messages = diagnose("make deploy", 2, "No rule to make target", "MAKE(1)", &recent);
        assert!(messages[0]
            .content
            .contains("Recent commands:\ncd /srv/app\nmake deploy\n\n<documentation>"));
    }

    #[test]
    fn test_log_prompt_embeds_report() {
        let logs = "2025-02-01 10:23:45 ERROR Database connection failed\n\
                    2025-02-01 10:23:46 WARN Retrying connection";
        let messages = log_analysis(logs);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.contains(logs));
        assert_eq!(messages[1].role, Role::User);
    }

    #[test]
    fn test_error_prompt_embeds_error() {
        let messages = error_analysis("  bash: foo: command not found \n");
        assert!(messages[1].content.ends_with("bash: foo: command not found"));
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&Message::assistant("hi")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"hi"}"#);
        assert_eq!(Role::System.to_string(), "system");
    }

    #[test]
    fn test_truncate_short_content_untouched() {
        assert_eq!(truncate_content("hello", 100), "hello");
        assert_eq!(truncate_content("hello", 5), "hello");
    }

    #[test]
    fn test_truncate_long_content() {
        let result = truncate_content(&"a".repeat(1000), 100);
        assert!(result.ends_with("... (content truncated)"));
        assert_eq!(result.len(), 100 + TRUNCATION_NOTICE.len());
    }

    #[test]
    fn test_truncate_counts_chars_not_bytes() {
        let result = truncate_content(&"é".repeat(50), 10);
        assert!(result.starts_with(&"é".repeat(10)));
        assert!(!result.starts_with(&"é".repeat(11)));
    }

    #[test]
    fn test_truncate_prefers_paragraph_break() {
        let content = format!("{}\n\n{}", "a".repeat(90), "b".repeat(50));
        let result = truncate_content(&content, 100);
        assert_eq!(result, format!("{}{TRUNCATION_NOTICE}", "a".repeat(90)));
    }
}
