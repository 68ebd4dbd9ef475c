//! Configuration system for `ohman`.
//!
//! Settings live in a TOML file (`~/.config/ohman/config.toml` or
//! `$OHMAN_CONFIG`); a missing file means defaults. API keys can also come
//! from the environment.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::input::{LineReader, ReadError, Terminal, EXIT_SENTINEL};
use crate::providers::ProviderType;

/// Key override honoured for every provider
pub const API_KEY_ENV: &str = "OHMAN_API_KEY";

/// Config file override
pub const CONFIG_PATH_ENV: &str = "OHMAN_CONFIG";

/// Chat backend settings (`[llm]`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: ProviderType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Custom OpenAI-compatible endpoint; the provider default when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub model: String,
    /// Completion budget; 0 leaves it to the server
    pub max_tokens: u32,
    /// Sampling temperature; 0 leaves it to the server
    pub temperature: f32,
    /// Request timeout in seconds; 0 disables it
    pub timeout: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: ProviderType::default(),
            api_key: None,
            base_url: None,
            model: "gpt-4o-mini".to_string(),
            max_tokens: 4096,
            temperature: 0.7,
            timeout: 60,
        }
    }
}

/// Terminal rendering settings (`[output]`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub color: bool,
    /// Render markdown in non-streamed answers
    pub markdown: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            color: true,
            markdown: true,
        }
    }
}

/// Diagnostics (`[debug]`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Debug-level logging unless `RUST_LOG` says otherwise
    pub enabled: bool,
    /// Print the prompt sent to the model
    pub show_prompt: bool,
}

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub output: OutputConfig,
    pub debug: DebugConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Unable to determine the config directory; set {CONFIG_PATH_ENV}")]
    NoConfigDir,

    #[error("Setup cancelled")]
    Cancelled,

    #[error(transparent)]
    Input(#[from] ReadError),
}

impl Config {
    /// Load config from `path` (or the default location) and apply
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::config_path().ok_or(ConfigError::NoConfigDir)?,
        };

        let mut config = Self::load_from_path(&path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load config from a specific path; a missing file yields defaults
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Get the config file path (`$OHMAN_CONFIG` or ~/.config/ohman/config.toml)
    pub fn config_path() -> Option<PathBuf> {
        if let Some(path) = env::var_os(CONFIG_PATH_ENV).filter(|p| !p.is_empty()) {
            return Some(PathBuf::from(path));
        }
        dirs::config_dir().map(|p| p.join("ohman").join("config.toml"))
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| env::var(name).ok());
    }

    /// `OHMAN_API_KEY` always wins; the provider's own variable only fills
    /// in a missing key.
    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(key) = lookup(API_KEY_ENV) {
            self.llm.api_key = Some(key);
            return;
        }

        let has_key = self
            .llm
            .api_key
            .as_deref()
            .is_some_and(|key| !key.trim().is_empty());
        let provider_var = self.llm.provider.api_key_env_var();
        if !has_key && !provider_var.is_empty() {
            if let Some(key) = lookup(provider_var) {
                self.llm.api_key = Some(key);
            }
        }
    }

    /// Write the config as TOML, readable only by the owner.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(write_err)?;
        }
        write_private(path, contents.as_bytes()).map_err(write_err)
    }

    /// Human-readable summary with the API key masked.
    pub fn summary(&self) -> String {
        let base_url = self
            .llm
            .base_url
            .clone()
            .unwrap_or_else(|| format!("{} (default)", self.llm.provider.default_base_url()));
        let api_key = self
            .llm
            .api_key
            .as_deref()
            .map(mask_key)
            .unwrap_or_else(|| "(not set)".to_string());

        format!(
            "provider:    {}\nbase_url:    {}\napi_key:     {}\nmodel:       {}\nmax_tokens:  {}\ntemperature: {}\ntimeout:     {}s\ncolor:       {}\nmarkdown:    {}",
            self.llm.provider,
            base_url,
            api_key,
            self.llm.model,
            self.llm.max_tokens,
            self.llm.temperature,
            self.llm.timeout,
            self.output.color,
            self.output.markdown,
        )
    }
}

/// Interactive setup: prompts for provider, endpoint, key and model,
/// starting from `current`.
pub fn setup_wizard<T: Terminal>(
    reader: &mut LineReader<T>,
    current: &Config,
) -> Result<Config, ConfigError> {
    let mut config = current.clone();

    let provider = ask(reader, &format!("Provider (openai/openrouter/ollama) [{}]: ", config.llm.provider))?;
    if !provider.is_empty() {
        match provider.parse::<ProviderType>() {
            Ok(provider) => config.llm.provider = provider,
            Err(err) => {
                tracing::warn!(%err, "keeping provider {}", config.llm.provider);
            }
        }
    }

    let default_url = config
        .llm
        .base_url
        .clone()
        .unwrap_or_else(|| config.llm.provider.default_base_url().to_string());
    let base_url = ask(reader, &format!("API Base URL [{default_url}]: "))?;
    if !base_url.is_empty() {
        config.llm.base_url = Some(base_url);
    }

    if config.llm.provider.requires_api_key() || config.llm.base_url.is_some() {
        let hint = if config.llm.api_key.is_some() { " [keep current]" } else { "" };
        let api_key = ask(reader, &format!("API Key{hint}: "))?;
        if !api_key.is_empty() {
            config.llm.api_key = Some(api_key);
        }
    }

    let model = ask(reader, &format!("Model name [{}]: ", config.llm.model))?;
    if !model.is_empty() {
        config.llm.model = model;
    }

    Ok(config)
}

fn ask<T: Terminal>(reader: &mut LineReader<T>, prompt: &str) -> Result<String, ConfigError> {
    reader.set_prompt(prompt);
    match reader.read_line() {
        Ok(line) if line == EXIT_SENTINEL => Err(ConfigError::Cancelled),
        Ok(line) => Ok(line),
        Err(err) if err.is_interrupted() => Err(ConfigError::Cancelled),
        Err(err) => Err(err.into()),
    }
}

/// `sk-abcdef123456` -> `sk-a…3456`
fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}…{tail}")
}

#[cfg(unix)]
fn write_private(path: &Path, data: &[u8]) -> io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // mode() only applies on creation
    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    file.write_all(data)
}

#[cfg(not(unix))]
fn write_private(path: &Path, data: &[u8]) -> io::Result<()> {
    fs::write(path, data)
}

/// Generate default config as TOML string
pub fn generate_default_config() -> String {
    r#"# ohman configuration
# Place this file at ~/.config/ohman/config.toml (or point OHMAN_CONFIG at it)

[llm]
# openai, openrouter or ollama
provider = "openai"
# api_key = "sk-..."            # or set OHMAN_API_KEY / OPENAI_API_KEY
# base_url = "https://api.openai.com/v1"
model = "gpt-4o-mini"
max_tokens = 4096
temperature = 0.7
timeout = 60                    # seconds, 0 = no timeout

[output]
color = true
markdown = true

[debug]
enabled = false
show_prompt = false
"#
    .to_string()
}
