//! Command-line interface definitions for `ohman`.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

use crate::providers::ProviderType;

/// Input longer than this is treated as pasted output, not a question
const ERROR_MESSAGE_MIN_CHARS: usize = 150;

/// Substrings (lowercase) that mark input as an error message
const ERROR_KEYWORDS: [&str; 14] = [
    "error:",
    "failed",
    "cannot",
    "permission denied",
    "no such file",
    "command not found",
    "segmentation fault",
    "core dumped",
    "fatal",
    "exception",
    "undefined",
    "not found",
    "connection refused",
    "timeout",
];

/// Man page assistant: ask about commands, diagnose failures, explain errors
/// and analyse logs
#[derive(Parser, Debug)]
#[command(
    name = "ohman",
    version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("OHMAN_GIT_SHA"), ")"),
    about,
    long_about = None,
    args_conflicts_with_subcommands = true
)]
#[command(
    after_help = "EXAMPLES:\n    ohman grep \"how to search recursively?\"\n    ohman tar              (interactive)\n    ohman                  (diagnose the last failed command)\n    ohman \"bash: foo: command not found\"\n    ohman -l /var/log/nginx/error.log\n    journalctl -u nginx | ohman -l -"
)]
pub struct Cli {
    /// Command and optional question, or an error message to explain
    #[arg(trailing_var_arg = true, value_name = "COMMAND [QUESTION]...")]
    pub args: Vec<String>,

    /// Config file path
    #[arg(long, short = 'c', value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Man page section (1-8)
    #[arg(long, short = 's', value_name = "N", value_parser = clap::value_parser!(u8).range(1..=8))]
    pub section: Option<u8>,

    /// Model name (overrides config)
    #[arg(long, short = 'm', value_name = "MODEL")]
    pub model: Option<String>,

    /// Provider (overrides config)
    #[arg(long, short = 'p', value_enum, value_name = "PROVIDER")]
    pub provider: Option<ProviderType>,

    /// Print the documentation only, without asking the model
    #[arg(long, short = 'r')]
    pub raw: bool,

    /// Force interactive mode even when a question is given
    #[arg(long, short = 'i')]
    pub interactive: bool,

    /// Verbose output (debug logging)
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Analyse logs from a file, a systemd unit, or `-` for stdin
    #[arg(long, short = 'l', value_name = "PATH|UNIT|-")]
    pub log: Option<String>,

    /// Maximum log lines to read (0 = no limit)
    #[arg(long, short = 'n', default_value = "1000", value_name = "N")]
    pub lines: usize,

    /// Wait for the full answer instead of streaming it
    #[arg(long)]
    pub no_stream: bool,

    /// Generate shell completions
    #[arg(long, value_enum, value_name = "SHELL")]
    pub completions: Option<Shell>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Configure the LLM provider, endpoint, key and model
    Config {
        /// Print the current settings instead of running the wizard
        #[arg(long)]
        show: bool,

        /// Print a commented default config file
        #[arg(long, conflicts_with = "show")]
        default: bool,
    },
    /// View session history
    History {
        /// Show only the most recent N entries
        #[arg(long, short = 'n', value_name = "N")]
        limit: Option<usize>,
    },
    /// Clear session history
    Clear {
        /// Do not ask for confirmation
        #[arg(long, short = 'y')]
        yes: bool,
    },
}

/// What the positional arguments ask for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// No arguments: diagnose the last failed command
    DiagnoseLastFailed,
    /// Input that reads like pasted error output
    AnalyzeError(String),
    /// Print the documentation
    ShowManPage { command: String },
    /// Conversation about a command
    Interactive { command: String },
    /// One question about a command
    Ask { command: String, question: String },
}

impl Cli {
    /// Route the positional arguments to an operation.
    pub fn request(&self) -> Request {
        if self.args.is_empty() {
            return Request::DiagnoseLastFailed;
        }

        let input = self.args.join(" ");
        if looks_like_error_message(&input) {
            return Request::AnalyzeError(input);
        }

        let command = self.args[0].clone();
        let question = self.args[1..].join(" ");

        if self.raw {
            Request::ShowManPage { command }
        } else if self.interactive || question.trim().is_empty() {
            Request::Interactive { command }
        } else {
            Request::Ask { command, question }
        }
    }
}

/// Heuristic: multi-line input, an error keyword, or long pasted text.
pub fn looks_like_error_message(input: &str) -> bool {
    if input.contains('\n') {
        return true;
    }

    let lower = input.to_lowercase();
    if ERROR_KEYWORDS.iter().any(|keyword| lower.contains(keyword)) {
        return true;
    }

    input.chars().count() > ERROR_MESSAGE_MIN_CHARS
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_no_args_diagnoses() {
        let cli = Cli::parse_from(["ohman"]);
        assert_eq!(cli.request(), Request::DiagnoseLastFailed);
        assert_eq!(cli.command, None);
    }

    #[test]
    fn test_cli_command_and_question() {
        let cli = Cli::parse_from(["ohman", "grep", "how to search recursively?"]);
        assert_eq!(
            cli.request(),
            Request::Ask {
                command: "grep".to_string(),
                question: "how to search recursively?".to_string()
            }
        );
    }

    #[test]
    fn test_cli_unquoted_question_words_joined() {
        let cli = Cli::parse_from(["ohman", "tar", "what", "does", "xvf", "mean"]);
        assert_eq!(
            cli.request(),
            Request::Ask {
                command: "tar".to_string(),
                question: "what does xvf mean".to_string()
            }
        );
    }

    #[test]
    fn test_cli_command_only_is_interactive() {
        let cli = Cli::parse_from(["ohman", "git"]);
        assert_eq!(
            cli.request(),
            Request::Interactive {
                command: "git".to_string()
            }
        );
    }

    #[test]
    fn test_cli_interactive_flag() {
        let cli = Cli::parse_from(["ohman", "-i", "git", "how to rebase?"]);
        assert_eq!(
            cli.request(),
            Request::Interactive {
                command: "git".to_string()
            }
        );
    }

    #[test]
    fn test_cli_raw_flag() {
        let cli = Cli::parse_from(["ohman", "-r", "-s", "3", "printf"]);
        assert_eq!(cli.section, Some(3));
        assert_eq!(
            cli.request(),
            Request::ShowManPage {
                command: "printf".to_string()
            }
        );
    }

    #[test]
    fn test_cli_error_message_routed() {
        let cli = Cli::parse_from(["ohman", "bash: foo: command not found"]);
        assert_eq!(
            cli.request(),
            Request::AnalyzeError("bash: foo: command not found".to_string())
        );
    }

    #[test]
    fn test_cli_section_range() {
        assert!(Cli::try_parse_from(["ohman", "-s", "9", "ls"]).is_err());
        assert!(Cli::try_parse_from(["ohman", "-s", "0", "ls"]).is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "ohman",
            "-m",
            "llama3.2",
            "-p",
            "ollama",
            "-c",
            "/tmp/ohman.toml",
            "--no-stream",
            "-v",
            "ls",
        ]);
        assert_eq!(cli.model.as_deref(), Some("llama3.2"));
        assert_eq!(cli.provider, Some(ProviderType::Ollama));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/ohman.toml")));
        assert!(cli.no_stream);
        assert!(cli.verbose);
    }

    #[test]
    fn test_cli_log_flags() {
        let cli = Cli::parse_from(["ohman", "-l", "nginx.service", "-n", "200"]);
        assert_eq!(cli.log.as_deref(), Some("nginx.service"));
        assert_eq!(cli.lines, 200);

        let cli = Cli::parse_from(["ohman", "--log", "-"]);
        assert_eq!(cli.log.as_deref(), Some("-"));
        assert_eq!(cli.lines, 1000);
    }

    #[test]
    fn test_cli_parses_completions() {
        let cli = Cli::parse_from(["ohman", "--completions", "zsh"]);
        assert_eq!(cli.completions, Some(Shell::Zsh));
    }

    #[test]
    fn test_cli_subcommands() {
        let cli = Cli::parse_from(["ohman", "history", "-n", "5"]);
        assert_eq!(cli.command, Some(Command::History { limit: Some(5) }));

        let cli = Cli::parse_from(["ohman", "clear", "--yes"]);
        assert_eq!(cli.command, Some(Command::Clear { yes: true }));

        let cli = Cli::parse_from(["ohman", "config", "--show"]);
        assert_eq!(
            cli.command,
            Some(Command::Config {
                show: true,
                default: false
            })
        );
    }

    #[test]
    fn test_looks_like_error_message() {
        assert!(looks_like_error_message("line one\nline two"));
        assert!(looks_like_error_message("Permission denied (publickey)"));
        assert!(looks_like_error_message("ERROR: could not open file"));
        assert!(looks_like_error_message("connection refused"));
        assert!(looks_like_error_message(&"x".repeat(151)));

        assert!(!looks_like_error_message("grep how to search recursively?"));
        assert!(!looks_like_error_message("tar what does xvf mean"));
        assert!(!looks_like_error_message(&"x".repeat(150)));
    }
}
