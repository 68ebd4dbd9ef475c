//! ohman - man page assistant
//!
//! Feeds a command's man page (or `--help` output) to a chat-completion
//! model to answer questions about it, diagnoses the last failed shell
//! command, explains pasted error output and summarises logs.

pub mod app;
pub mod cli;
pub mod config;
pub mod input;
pub mod interrupt;
pub mod journal;
pub mod logging;
pub mod logs;
pub mod man;
pub mod output;
pub mod prompt;
pub mod providers;
pub mod session;
pub mod shell;

// Re-export commonly used types
pub use app::App;
pub use cli::{Cli, Command, Request};
pub use config::Config;
pub use logs::{AnalysisResult, LogLevel, LogType};
pub use man::ManPage;
pub use prompt::{Message, Role};
pub use providers::{ChatClient, ChatResponse, ProviderType};
pub use session::{Entry, EntryKind, SessionStore};
pub use shell::FailedCommand;
