//! Chat provider abstraction.
//!
//! Every supported backend speaks the OpenAI chat completions protocol, so a
//! single client covers them; `ProviderType` only decides the defaults
//! (endpoint and API key variable).

pub mod openai;

use anyhow::Result;
use async_trait::async_trait;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::LlmConfig;
use crate::prompt::Message;

pub use openai::OpenAiClient;

/// Available chat backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    /// OpenAI API
    #[default]
    #[value(name = "openai")]
    OpenAI,
    /// OpenRouter API (access to multiple models)
    #[value(name = "openrouter")]
    OpenRouter,
    /// Local Ollama server
    Ollama,
}

impl ProviderType {
    /// Endpoint used when no `base_url` is configured
    pub fn default_base_url(self) -> &'static str {
        match self {
            ProviderType::OpenAI => "https://api.openai.com/v1",
            ProviderType::OpenRouter => "https://openrouter.ai/api/v1",
            ProviderType::Ollama => "http://localhost:11434/v1",
        }
    }

    /// Environment variable holding this provider's API key (empty if none)
    pub fn api_key_env_var(self) -> &'static str {
        match self {
            ProviderType::OpenAI => "OPENAI_API_KEY",
            ProviderType::OpenRouter => "OPENROUTER_API_KEY",
            ProviderType::Ollama => "",
        }
    }

    pub fn requires_api_key(self) -> bool {
        !self.api_key_env_var().is_empty()
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderType::OpenAI => write!(f, "openai"),
            ProviderType::OpenRouter => write!(f, "openrouter"),
            ProviderType::Ollama => write!(f, "ollama"),
        }
    }
}

impl std::str::FromStr for ProviderType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(ProviderType::OpenAI),
            "openrouter" => Ok(ProviderType::OpenRouter),
            "ollama" => Ok(ProviderType::Ollama),
            _ => Err(format!(
                "Unknown provider: {}. Valid options: openai, openrouter, ollama",
                s
            )),
        }
    }
}

/// A completed chat exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Full assistant text
    pub content: String,
    /// Why generation stopped, when the server said
    pub finish_reason: Option<String>,
    /// Model that produced the answer
    pub model: String,
    /// Whether the answer arrived as a stream
    pub streamed: bool,
}

/// Callback for streamed text; return `Ok(false)` to stop early
pub type StreamCallback = Box<dyn FnMut(&str) -> Result<bool> + Send>;

/// Chat completion backend
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Backend this client talks to
    fn provider_type(&self) -> ProviderType;

    /// Model identifier sent with each request
    fn model_name(&self) -> &str;

    /// Send `messages` and wait for the whole answer
    async fn chat(&self, messages: &[Message]) -> Result<ChatResponse>;

    /// Send `messages` and hand each text delta to `callback` as it arrives
    ///
    /// # Returns
    /// The accumulated answer, including text received before an early stop
    async fn chat_streaming(
        &self,
        messages: &[Message],
        callback: StreamCallback,
    ) -> Result<ChatResponse>;
}

/// Error types for provider operations
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("API key not configured for {provider}. Set {env_var} or OHMAN_API_KEY, or run `ohman config`.")]
    MissingApiKey { provider: String, env_var: String },

    #[error("API error from {provider}: {message}")]
    Api { provider: String, message: String },

    #[error("Rate limited by {provider}. Please wait and try again.")]
    RateLimited { provider: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response from {provider}: {message}")]
    InvalidResponse { provider: String, message: String },

    #[error("{provider} returned an empty response")]
    EmptyResponse { provider: String },
}

/// Build the chat client described by `config`.
pub fn create_client(config: &LlmConfig) -> Result<Box<dyn ChatClient>> {
    Ok(Box::new(OpenAiClient::from_config(config)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_type_display() {
        assert_eq!(format!("{}", ProviderType::OpenAI), "openai");
        assert_eq!(format!("{}", ProviderType::OpenRouter), "openrouter");
        assert_eq!(format!("{}", ProviderType::Ollama), "ollama");
    }

    #[test]
    fn test_provider_type_from_str() {
        assert_eq!(
            "openai".parse::<ProviderType>().unwrap(),
            ProviderType::OpenAI
        );
        assert_eq!(
            "OpenRouter".parse::<ProviderType>().unwrap(),
            ProviderType::OpenRouter
        );
        assert_eq!(
            "ollama".parse::<ProviderType>().unwrap(),
            ProviderType::Ollama
        );
        assert!("anthropic".parse::<ProviderType>().is_err());
    }

    #[test]
    fn test_provider_type_default() {
        assert_eq!(ProviderType::default(), ProviderType::OpenAI);
    }

    #[test]
    fn test_provider_type_serde() {
        let json = serde_json::to_string(&ProviderType::OpenRouter).unwrap();
        assert_eq!(json, "\"openrouter\"");
        let parsed: ProviderType = serde_json::from_str("\"ollama\"").unwrap();
        assert_eq!(parsed, ProviderType::Ollama);
    }

    #[test]
    fn test_api_key_env_var() {
        assert_eq!(ProviderType::OpenAI.api_key_env_var(), "OPENAI_API_KEY");
        assert_eq!(
            ProviderType::OpenRouter.api_key_env_var(),
            "OPENROUTER_API_KEY"
        );
        assert_eq!(ProviderType::Ollama.api_key_env_var(), "");
        assert!(!ProviderType::Ollama.requires_api_key());
    }

    #[test]
    fn test_default_base_urls() {
        assert!(ProviderType::OpenAI.default_base_url().starts_with("https://"));
        assert!(ProviderType::Ollama.default_base_url().contains("11434"));
    }
}
