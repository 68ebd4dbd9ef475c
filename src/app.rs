//! Request orchestration: documentation, prompt, chat client, output and
//! history for each user-facing operation.

use anyhow::{bail, Context, Result};
use colored::Colorize;
use std::path::Path;

use crate::config::Config;
use crate::input::{LineReader, Terminal};
use crate::interrupt;
use crate::journal;
use crate::logs::{self, AnalysisResult, LogType};
use crate::man;
use crate::output;
use crate::prompt::{self, Message, Role};
use crate::providers::{self, ChatClient, ChatResponse};
use crate::session::{Entry, EntryKind, SessionStore};
use crate::shell;

/// Words that leave an interactive session
const EXIT_WORDS: [&str; 3] = ["exit", "quit", "q"];

/// Placeholder when a failed command has no documentation
const NO_DOCS: &str = "(documentation not available)";

/// Shell history lines given as context when diagnosing
const RECENT_COMMANDS: usize = 10;

pub struct App {
    config: Config,
    /// Stream answers as they are generated
    stream: bool,
    /// Created on first use so offline paths (`--raw`) need no API key
    client: Option<Box<dyn ChatClient>>,
    /// Opened on first record
    history: Option<SessionStore>,
}

impl App {
    pub fn new(config: Config, stream: bool) -> Self {
        Self {
            config,
            stream,
            client: None,
            history: None,
        }
    }

    /// Use `client` instead of building one from the config
    pub fn with_client(mut self, client: Box<dyn ChatClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Record history in `store` instead of the default location
    pub fn with_history(mut self, store: SessionStore) -> Self {
        self.history = Some(store);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Answer a single question about `command`.
    pub async fn ask(&mut self, command: &str, section: Option<u8>, question: &str) -> Result<()> {
        let docs = lookup_docs(command, section)?;
        output::status(&format!("Reading the {command} documentation..."));

        let messages = prompt::question(command, &docs.content, question);
        let answer = self.complete(&messages).await?;
        self.record(Entry::new(EntryKind::Question, command, question, answer));
        Ok(())
    }

    /// Explain why the most recently recorded failed command failed.
    pub async fn diagnose_last_failed(&mut self) -> Result<()> {
        let failed = match shell::last_failed() {
            Ok(failed) => failed,
            Err(err) => {
                tracing::debug!(%err, "no failed command to diagnose");
                println!("{} {}", "✓".green(), "No recent failed command to diagnose.".bold());
                println!(
                    "{} {}",
                    "Tip:".blue().bold(),
                    "use `ohman <command> [question]` to ask about a command"
                );
                return Ok(());
            }
        };

        let name = shell::command_name(&failed.command);
        if name.is_empty() {
            bail!("unable to parse a command name from {:?}", failed.command);
        }

        output::print_failed_command(&failed.command, failed.exit_code);

        let docs = match man::documentation(name, None) {
            Ok(page) => page.content,
            Err(err) => {
                tracing::debug!(%err, command = name, "diagnosing without documentation");
                output::status(&format!("No documentation for {name}, diagnosing anyway"));
                NO_DOCS.to_string()
            }
        };

        let recent = recent_commands();
        let messages = prompt::diagnose(
            &failed.command,
            failed.exit_code,
            &failed.error,
            &docs,
            &recent,
        );
        let answer = self.complete(&messages).await?;
        self.record(Entry::new(EntryKind::Diagnose, &failed.command, "", answer));
        Ok(())
    }

    /// Explain a pasted error message.
    pub async fn analyze_error(&mut self, error_text: &str) -> Result<()> {
        output::status("Analysing error message...");
        let messages = prompt::error_analysis(error_text);
        let answer = self.complete(&messages).await?;
        self.record(Entry::new(EntryKind::Error, "", error_text.trim(), answer));
        Ok(())
    }

    /// Analyse logs from a file, a systemd unit, or stdin (`-`).
    pub async fn analyze_log(&mut self, source: &str, lines: usize) -> Result<()> {
        let result = load_logs(source, lines)?;
        if result.total == 0 {
            println!("No log entries found in {source}.");
            return Ok(());
        }

        output::print_log_summary(&result);
        let messages = prompt::log_analysis(&result.to_text());
        let answer = self.complete(&messages).await?;
        self.record(Entry::new(EntryKind::Log, source, "", answer));
        Ok(())
    }

    /// Conversation about `command` on the controlling terminal.
    pub async fn interactive(&mut self, command: &str, section: Option<u8>) -> Result<()> {
        let docs = lookup_docs(command, section)?;
        if let Ok(summary) = man::whatis(command) {
            output::status(summary.lines().next().unwrap_or_default());
        }
        let mut reader = LineReader::stdio(format!("{} ", "❯".green().bold()));
        self.converse(command, &docs.content, &mut reader).await
    }

    /// Question loop over any terminal. Leaves on an exit word, Ctrl-D or Ctrl-C.
    pub async fn converse<T: Terminal>(
        &mut self,
        command: &str,
        docs: &str,
        reader: &mut LineReader<T>,
    ) -> Result<()> {
        println!(
            "{} {}",
            "●".blue(),
            format!("Loaded documentation for {command}").bold()
        );
        println!(
            "  {}",
            "Ask a question, or type 'exit' / 'quit' to leave.".dimmed()
        );
        println!();

        let mut conversation = prompt::interactive(command, docs);

        loop {
            let question = match reader.read_line() {
                Ok(line) => line,
                Err(err) if err.is_interrupted() => break,
                Err(err) => return Err(err).context("Failed to read question"),
            };

            if question.is_empty() {
                continue;
            }
            if EXIT_WORDS.contains(&question.as_str()) {
                break;
            }

            conversation.push(Message::user(&question));
            println!();
            match self.complete(&conversation).await {
                Ok(answer) => {
                    conversation.push(Message::assistant(&answer));
                    self.record(Entry::new(EntryKind::Interactive, command, &question, answer));
                }
                Err(err) => {
                    conversation.pop();
                    eprintln!("{}", output::format_error(&format!("{err:#}"), None));
                }
            }
            println!();
        }

        println!("{}", "Goodbye!".dimmed());
        Ok(())
    }

    /// Print the documentation itself, without asking the model.
    pub fn show_man_page(&self, command: &str, section: Option<u8>) -> Result<()> {
        let page = lookup_docs(command, section)?;
        println!("{}", page.content.trim_end());
        Ok(())
    }

    /// Send `messages`, print the answer and return its text.
    async fn complete(&mut self, messages: &[Message]) -> Result<String> {
        let stream = self.stream;
        let markdown = self.config.output.markdown;
        if self.config.debug.show_prompt {
            print_prompt(messages);
        }

        let client = self.client()?;
        let response = if stream {
            stream_answer(client, messages).await?
        } else {
            let response = client.chat(messages).await?;
            output::print_answer(&response.content, markdown);
            response
        };

        tracing::debug!(
            model = %response.model,
            finish_reason = response.finish_reason.as_deref().unwrap_or("-"),
            chars = response.content.len(),
            "answer complete"
        );
        Ok(response.content)
    }

    fn client(&mut self) -> Result<&dyn ChatClient> {
        if self.client.is_none() {
            let client = providers::create_client(&self.config.llm)?;
            tracing::debug!(
                provider = %client.provider_type(),
                model = client.model_name(),
                "chat client ready"
            );
            self.client = Some(client);
        }
        self.client
            .as_deref()
            .context("chat client unavailable")
    }

    /// Save an exchange; failures are logged, never fatal.
    fn record(&mut self, entry: Entry) {
        if self.history.is_none() {
            match SessionStore::open_default() {
                Ok(store) => self.history = Some(store),
                Err(err) => {
                    tracing::warn!(%err, "history unavailable");
                    return;
                }
            }
        }

        if let Some(store) = self.history.as_mut() {
            if let Err(err) = store.add(entry) {
                tracing::warn!(%err, "failed to record history");
            }
        }
    }
}

async fn stream_answer(client: &dyn ChatClient, messages: &[Message]) -> Result<ChatResponse> {
    let _guard = interrupt::begin_stream();
    let response = client
        .chat_streaming(
            messages,
            Box::new(|chunk: &str| -> Result<bool> {
                if interrupt::interrupted() {
                    return Ok(false);
                }
                output::print_chunk(chunk)?;
                Ok(true)
            }),
        )
        .await?;

    println!();
    if interrupt::interrupted() {
        eprintln!("{}", "(interrupted)".dimmed());
    }
    Ok(response)
}

fn print_prompt(messages: &[Message]) {
    for message in messages {
        let title = match message.role {
            Role::System => "System Prompt",
            Role::User => "User Message",
            Role::Assistant => "Assistant Message",
        };
        output::print_debug_section(
            title,
            &message.content,
            Some(format!("({} chars)", message.content.len())),
        );
    }
}

/// Documentation for `command`. A page missing only from the requested
/// section names the sections that do have one.
fn lookup_docs(command: &str, section: Option<u8>) -> Result<man::ManPage> {
    match man::documentation(command, section) {
        Ok(page) => Ok(page),
        Err(err) => {
            let Some(section) = section else {
                return Err(err.into());
            };
            if !man::exists(command) {
                return Err(err.into());
            }
            let available: Vec<String> = man::sections(command)
                .iter()
                .map(u8::to_string)
                .collect();
            bail!(
                "no manual entry for {command} in section {section}; available sections: {}",
                available.join(", ")
            )
        }
    }
}

/// Tail of the shell history; empty when it cannot be read.
fn recent_commands() -> Vec<String> {
    tracing::debug!(shell = %shell::detect_shell(), "reading shell history");
    shell::history(RECENT_COMMANDS).unwrap_or_else(|err| {
        tracing::debug!(%err, "diagnosing without shell history");
        Vec::new()
    })
}

/// Resolve `--log` into an analysis: `-` is stdin, an existing path is a
/// file, a unit-looking name goes to the journal.
fn load_logs(source: &str, lines: usize) -> Result<AnalysisResult> {
    if source == "-" {
        let content = logs::read_piped_stdin()
            .context("Failed to read logs from stdin")?
            .context("no log data on stdin; pipe logs in or pass a file")?;
        return Ok(logs::analyze_text(&content));
    }

    let path = Path::new(source);
    if path.exists() {
        return Ok(logs::analyze_file(path, lines)?);
    }

    if journal::is_unit(source) {
        let content = journal::fetch_unit_logs(source, lines)?;
        return Ok(logs::analyze_text_as(&content, LogType::System));
    }

    bail!("log file not found: {source}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::tests::ScriptedTerminal;
    use crate::providers::{ProviderType, StreamCallback};
    use async_trait::async_trait;
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    /// Replies with a fixed answer and remembers every request.
    struct CannedClient {
        answer: String,
        requests: Arc<Mutex<Vec<Vec<Message>>>>,
    }

    #[async_trait]
    impl ChatClient for CannedClient {
        fn provider_type(&self) -> ProviderType {
            ProviderType::OpenAI
        }

        fn model_name(&self) -> &str {
            "canned"
        }

        async fn chat(&self, messages: &[Message]) -> Result<ChatResponse> {
            self.requests.lock().unwrap().push(messages.to_vec());
            Ok(ChatResponse {
                content: self.answer.clone(),
                finish_reason: Some("stop".to_string()),
                model: "canned".to_string(),
                streamed: false,
            })
        }

        async fn chat_streaming(
            &self,
            messages: &[Message],
            mut callback: StreamCallback,
        ) -> Result<ChatResponse> {
            let mut response = self.chat(messages).await?;
            callback(&response.content)?;
            response.streamed = true;
            Ok(response)
        }
    }

    fn app(dir: &TempDir) -> (App, Arc<Mutex<Vec<Vec<Message>>>>) {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let client = CannedClient {
            answer: "## Fix\nUse `grep -r`.".to_string(),
            requests: Arc::clone(&requests),
        };
        let store = SessionStore::open(dir.path()).unwrap();
        let app = App::new(Config::default(), false)
            .with_client(Box::new(client))
            .with_history(store);
        (app, requests)
    }

    fn history(dir: &TempDir) -> Vec<Entry> {
        SessionStore::open(dir.path()).unwrap().all().to_vec()
    }

    #[tokio::test]
    async fn test_analyze_error_records_history() {
        let dir = TempDir::new().unwrap();
        let (mut app, requests) = app(&dir);

        app.analyze_error("bash: foo: command not found\n").await.unwrap();

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0][1].content.contains("bash: foo: command not found"));

        let entries = history(&dir);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, EntryKind::Error);
        assert_eq!(entries[0].question, "bash: foo: command not found");
        assert_eq!(entries[0].answer, "## Fix\nUse `grep -r`.");
    }

    #[tokio::test]
    async fn test_analyze_log_file() {
        let dir = TempDir::new().unwrap();
        let (mut app, requests) = app(&dir);

        let mut log = tempfile::Builder::new().suffix("-error.log").tempfile().unwrap();
        writeln!(log, "2025-02-01 10:23:45 ERROR Database connection failed").unwrap();
        writeln!(log, "2025-02-01 10:23:46 WARN Retrying connection").unwrap();
        writeln!(log, "2025-02-01 10:23:47 INFO Connected").unwrap();
        let source = log.path().to_string_lossy().to_string();

        app.analyze_log(&source, 1000).await.unwrap();

        let requests = requests.lock().unwrap();
        assert!(requests[0][0].content.contains("Total Entries: 3"));
        assert!(requests[0][0].content.contains("ERROR: 1"));

        let entries = history(&dir);
        assert_eq!(entries[0].kind, EntryKind::Log);
        assert_eq!(entries[0].command, source);
    }

    #[tokio::test]
    async fn test_analyze_log_empty_file_skips_model() {
        let dir = TempDir::new().unwrap();
        let (mut app, requests) = app(&dir);
        let log = tempfile::NamedTempFile::new().unwrap();

        app.analyze_log(&log.path().to_string_lossy(), 0).await.unwrap();
        assert!(requests.lock().unwrap().is_empty());
        assert!(history(&dir).is_empty());
    }

    #[test]
    fn test_lookup_docs_unknown_command() {
        assert!(lookup_docs("ohman-no-such-command-xyz", Some(3)).is_err());
        assert!(lookup_docs("ohman-no-such-command-xyz", None).is_err());
    }

    #[test]
    fn test_load_logs_missing_source() {
        let err = load_logs("/definitely/not/here.log", 10).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_converse_keeps_conversation() {
        let dir = TempDir::new().unwrap();
        let (mut app, requests) = app(&dir);
        let terminal = ScriptedTerminal::new(b"how to search?\r\r\nand recursively?\rquit\r");
        let mut reader = LineReader::new(terminal, "> ");

        app.converse("grep", "GREP(1)", &mut reader).await.unwrap();

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        // system + question
        assert_eq!(requests[0].len(), 2);
        // system + question + answer + question
        assert_eq!(requests[1].len(), 4);
        assert_eq!(requests[1][2].role, Role::Assistant);
        assert_eq!(requests[1][3].content, "and recursively?");

        let entries = history(&dir);
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.kind == EntryKind::Interactive));
        assert_eq!(entries[1].question, "and recursively?");
    }

    #[tokio::test]
    async fn test_converse_leaves_on_ctrl_d_and_ctrl_c() {
        let dir = TempDir::new().unwrap();

        let (mut app_d, requests) = app(&dir);
        let mut reader = LineReader::new(ScriptedTerminal::new(&[4]), "> ");
        app_d.converse("ls", "LS(1)", &mut reader).await.unwrap();
        assert!(requests.lock().unwrap().is_empty());

        let (mut app_c, requests) = app(&dir);
        let mut reader = LineReader::new(ScriptedTerminal::new(b"ab\x03"), "> ");
        app_c.converse("ls", "LS(1)", &mut reader).await.unwrap();
        assert!(requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_converse_input_closed_is_error() {
        let dir = TempDir::new().unwrap();
        let (mut app, _) = app(&dir);
        let mut reader = LineReader::new(ScriptedTerminal::new(b"half a question"), "> ");
        assert!(app.converse("ls", "LS(1)", &mut reader).await.is_err());
    }
}
