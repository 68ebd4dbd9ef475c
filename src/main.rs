use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use clap_complete::{generate, Shell};
use colored::Colorize;
use std::io;
use std::path::PathBuf;

use ohman::app::App;
use ohman::cli::{Cli, Command, Request};
use ohman::config::{self, Config, ConfigError};
use ohman::input::{LineReader, EXIT_SENTINEL};
use ohman::output::{self, format_error};
use ohman::providers::ProviderError;
use ohman::session::SessionStore;
use ohman::{interrupt, logging};

fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "ohman", &mut io::stdout());
}

fn config_file(cli: &Cli) -> Result<PathBuf, ConfigError> {
    match &cli.config {
        Some(path) => Ok(path.clone()),
        None => Config::config_path().ok_or(ConfigError::NoConfigDir),
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let path = config_file(cli)?;
    let mut config = Config::load(Some(path.as_path()))?;

    if let Some(provider) = cli.provider {
        config.llm.provider = provider;
    }
    if let Some(model) = &cli.model {
        config.llm.model = model.clone();
    }
    Ok(config)
}

fn run_config(cli: &Cli, show: bool, default: bool) -> Result<()> {
    if default {
        print!("{}", config::generate_default_config());
        return Ok(());
    }

    let path = config_file(cli)?;
    let current = Config::load(Some(path.as_path()))?;

    if show {
        println!("{} {}", "Config file:".blue().bold(), path.display());
        println!();
        println!("{}", current.summary());
        return Ok(());
    }

    println!("{}", "ohman setup".bold());
    println!("{}", "Press Enter to keep the value in brackets.".dimmed());
    println!();

    let mut reader = LineReader::stdio("");
    let updated = config::setup_wizard(&mut reader, &current)?;
    updated.save(&path)?;

    println!();
    println!("{} {}", "✓".green(), format!("Saved {}", path.display()).green());
    println!("{} {}", "Try:".blue().bold(), "ohman grep \"how to search recursively?\"");
    Ok(())
}

fn run_history(limit: Option<usize>) -> Result<()> {
    let store = SessionStore::open_default()?;
    let entries = match limit {
        Some(n) => store.last_n(n),
        None => store.all(),
    };
    output::print_history(entries);
    Ok(())
}

fn run_clear(yes: bool) -> Result<()> {
    let mut store = SessionStore::open_default()?;
    let count = store.count();
    if count == 0 {
        println!("No session history to clear.");
        return Ok(());
    }

    if !yes {
        let mut reader = LineReader::stdio(format!(
            "This will clear all {count} session entries. Continue? [y/N] "
        ));
        let answer = match reader.read_line() {
            Ok(line) if line == EXIT_SENTINEL => String::new(),
            Ok(line) => line.trim().to_lowercase(),
            Err(err) if err.is_interrupted() => String::new(),
            Err(err) => return Err(err).context("Failed to read confirmation"),
        };
        if answer != "y" && answer != "yes" {
            println!("Cancelled.");
            return Ok(());
        }
    }

    store.clear()?;
    println!("{} Cleared {count} session entries.", "✓".green());
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    if let Some(shell) = cli.completions {
        print_completions(shell);
        return Ok(());
    }

    if cli.command.is_some() {
        logging::init(cli.verbose, false);
    }
    match &cli.command {
        Some(Command::Config { show, default }) => return run_config(&cli, *show, *default),
        Some(Command::History { limit }) => return run_history(*limit),
        Some(Command::Clear { yes }) => return run_clear(*yes),
        None => {}
    }

    let config = load_config(&cli)?;
    logging::init(cli.verbose, config.debug.enabled);
    output::init_color(config.output.color);
    if let Err(err) = interrupt::install() {
        tracing::warn!("{err:#}");
    }
    tracing::debug!(
        provider = %config.llm.provider,
        model = %config.llm.model,
        "configuration loaded"
    );

    let mut app = App::new(config, !cli.no_stream);

    if let Some(source) = &cli.log {
        return app.analyze_log(source, cli.lines).await;
    }

    match cli.request() {
        Request::DiagnoseLastFailed => app.diagnose_last_failed().await,
        Request::AnalyzeError(text) => app.analyze_error(&text).await,
        Request::ShowManPage { command } => app.show_man_page(&command, cli.section),
        Request::Interactive { command } => app.interactive(&command, cli.section).await,
        Request::Ask { command, question } => app.ask(&command, cli.section, &question).await,
    }
}

/// Tip shown under an error, for failures the user can fix
fn error_tip(err: &anyhow::Error) -> Option<&'static str> {
    if let Some(err) = err.downcast_ref::<ProviderError>() {
        return match err {
            ProviderError::MissingApiKey { .. } => {
                Some("run `ohman config` or set OHMAN_API_KEY")
            }
            ProviderError::RateLimited { .. } => Some("wait a moment and try again"),
            ProviderError::Network(_) => Some("check the base_url in `ohman config --show`"),
            _ => None,
        };
    }
    match err.downcast_ref::<ConfigError>() {
        Some(ConfigError::Parse { .. }) => Some("run `ohman config --default` for a valid template"),
        Some(ConfigError::NoConfigDir) => Some("pass a config file with --config"),
        _ => None,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        if let Some(ConfigError::Cancelled) = err.downcast_ref::<ConfigError>() {
            eprintln!();
            eprintln!("{}", "Setup cancelled.".dimmed());
            std::process::exit(interrupt::EXIT_INTERRUPTED);
        }
        eprintln!("{}", format_error(&format!("{err:#}"), error_tip(&err)));
        std::process::exit(1);
    }
}
