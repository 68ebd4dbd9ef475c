//! OpenAI-compatible chat completions client.
//!
//! Works against OpenAI, OpenRouter, Ollama and anything else exposing
//! `POST {base_url}/chat/completions`, streaming via server-sent events.

use anyhow::{Context, Result};
use async_trait::async_trait;
use encoding_rs::UTF_8;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use super::{ChatClient, ChatResponse, ProviderError, ProviderType, StreamCallback};
use crate::config::LlmConfig;
use crate::prompt::Message;

/// Terminal payload of an OpenAI event stream
const DONE_MARKER: &str = "[DONE]";

/// Longest error body echoed back to the user
const MAX_ERROR_BODY: usize = 500;

/// Chat client for OpenAI-compatible endpoints
pub struct OpenAiClient {
    /// HTTP client (carries the request timeout)
    client: Client,
    provider: ProviderType,
    /// Full `/chat/completions` URL
    endpoint: String,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiClient {
    /// Create a client from the `[llm]` configuration section.
    ///
    /// A key is required for hosted providers unless a custom `base_url`
    /// points somewhere else.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty());
        let base_url = config
            .base_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty());

        if api_key.is_none() && base_url.is_none() && config.provider.requires_api_key() {
            return Err(ProviderError::MissingApiKey {
                provider: config.provider.to_string(),
                env_var: config.provider.api_key_env_var().to_string(),
            }
            .into());
        }

        let mut builder = Client::builder();
        if config.timeout > 0 {
            builder = builder.timeout(Duration::from_secs(config.timeout));
        }
        let client = builder.build().context("Failed to build HTTP client")?;

        let base_url = base_url.unwrap_or(config.provider.default_base_url());
        Ok(Self {
            client,
            provider: config.provider,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    /// Full URL requests are posted to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Build the request body
    fn build_request<'a>(&'a self, messages: &'a [Message], stream: bool) -> ChatCompletionRequest<'a> {
        ChatCompletionRequest {
            model: &self.model,
            messages,
            max_tokens: (self.max_tokens > 0).then_some(self.max_tokens),
            temperature: (self.temperature > 0.0).then_some(self.temperature),
            stream,
        }
    }

    /// Post the request and turn non-2xx statuses into `ProviderError`s
    async fn send(&self, messages: &[Message], stream: bool) -> Result<reqwest::Response> {
        let request = self.build_request(messages, stream);
        tracing::debug!(
            endpoint = %self.endpoint,
            model = %self.model,
            stream,
            messages = messages.len(),
            "sending chat request"
        );

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        if self.provider == ProviderType::OpenRouter {
            builder = builder.header("X-Title", "ohman");
        }

        let response = builder.send().await.map_err(ProviderError::from)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::debug!(%status, body = %body, "chat request failed");
            return Err(self.status_error(status, &body).into());
        }

        Ok(response)
    }

    fn status_error(&self, status: StatusCode, body: &str) -> ProviderError {
        if status == StatusCode::TOO_MANY_REQUESTS {
            return ProviderError::RateLimited {
                provider: self.provider.to_string(),
            };
        }
        ProviderError::Api {
            provider: self.provider.to_string(),
            message: format!("HTTP {}: {}", status, extract_error_message(body)),
        }
    }

    fn finish(&self, state: StreamState, stopped: bool) -> Result<ChatResponse> {
        if state.content.is_empty() && !stopped {
            return Err(ProviderError::EmptyResponse {
                provider: self.provider.to_string(),
            }
            .into());
        }

        Ok(ChatResponse {
            content: state.content,
            finish_reason: state.finish_reason,
            model: state.model.unwrap_or_else(|| self.model.clone()),
            streamed: true,
        })
    }
}

#[async_trait]
impl ChatClient for OpenAiClient {
    fn provider_type(&self) -> ProviderType {
        self.provider
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn chat(&self, messages: &[Message]) -> Result<ChatResponse> {
        let response = self.send(messages, false).await?;
        let body: ChatCompletionResponse =
            response
                .json()
                .await
                .map_err(|err| ProviderError::InvalidResponse {
                    provider: self.provider.to_string(),
                    message: err.to_string(),
                })?;

        let choice = body.choices.into_iter().next();
        let finish_reason = choice.as_ref().and_then(|c| c.finish_reason.clone());
        let content = choice
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(ProviderError::EmptyResponse {
                provider: self.provider.to_string(),
            }
            .into());
        }

        Ok(ChatResponse {
            content,
            finish_reason,
            model: body.model.unwrap_or_else(|| self.model.clone()),
            streamed: false,
        })
    }

    async fn chat_streaming(
        &self,
        messages: &[Message],
        mut callback: StreamCallback,
    ) -> Result<ChatResponse> {
        let response = self.send(messages, true).await?;

        let mut state = StreamState::default();
        let stopped = drain_events(
            self.provider,
            response.bytes_stream(),
            &mut state,
            &mut callback,
        )
        .await?;
        if stopped {
            tracing::debug!("stream stopped by caller");
        }
        self.finish(state, stopped)
    }
}

/// Accumulated state of a streamed completion
#[derive(Debug, Default)]
struct StreamState {
    content: String,
    finish_reason: Option<String>,
    model: Option<String>,
    /// `[DONE]` seen
    done: bool,
}

impl StreamState {
    /// Apply one event payload, returning the text delta it carried.
    fn apply(&mut self, provider: ProviderType, payload: &str) -> Result<Option<String>, ProviderError> {
        if payload.trim() == DONE_MARKER {
            self.done = true;
            return Ok(None);
        }

        let chunk: StreamChunk = match serde_json::from_str(payload) {
            Ok(chunk) => chunk,
            Err(err) => {
                tracing::debug!(%err, payload, "skipping unparseable stream event");
                return Ok(None);
            }
        };

        if let Some(error) = chunk.error {
            return Err(ProviderError::Api {
                provider: provider.to_string(),
                message: error_message(&error),
            });
        }

        if self.model.is_none() {
            self.model = chunk.model;
        }

        let Some(choice) = chunk.choices.into_iter().next() else {
            return Ok(None);
        };
        if choice.finish_reason.is_some() {
            self.finish_reason = choice.finish_reason;
        }

        let delta = choice
            .delta
            .and_then(|d| d.content)
            .filter(|text| !text.is_empty());
        if let Some(text) = &delta {
            self.content.push_str(text);
        }
        Ok(delta)
    }

    /// Apply one payload and forward its delta. Returns `false` once the
    /// callback asks to stop.
    fn consume(
        &mut self,
        provider: ProviderType,
        payload: &str,
        callback: &mut StreamCallback,
    ) -> Result<bool> {
        match self.apply(provider, payload)? {
            Some(delta) => callback(&delta),
            None => Ok(true),
        }
    }
}

/// Run an SSE response body through `state` until `[DONE]`, the end of the
/// body, or the callback stopping it. Returns whether the callback stopped it.
async fn drain_events<S, B, E>(
    provider: ProviderType,
    body: S,
    state: &mut StreamState,
    callback: &mut StreamCallback,
) -> Result<bool>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let events = utf8_chunks(body).eventsource();
    let mut events = std::pin::pin!(events);

    while let Some(event) = events.next().await {
        let event = event.map_err(|err| ProviderError::InvalidResponse {
            provider: provider.to_string(),
            message: err.to_string(),
        })?;
        if !state.consume(provider, &event.data, callback)? {
            return Ok(true);
        }
        if state.done {
            break;
        }
    }
    Ok(false)
}

/// Re-chunk raw bytes on character boundaries; a sequence split between
/// network reads is held back until its remaining bytes arrive.
fn utf8_chunks<S, B, E>(body: S) -> impl Stream<Item = std::result::Result<String, E>>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
{
    let mut decoder = UTF_8.new_decoder_without_bom_handling();
    body.map(move |chunk| {
        chunk.map(|bytes| {
            let bytes = bytes.as_ref();
            let capacity = decoder
                .max_utf8_buffer_length(bytes.len())
                .unwrap_or(bytes.len() * 3 + 4);
            let mut text = String::with_capacity(capacity);
            let _ = decoder.decode_to_string(bytes, &mut text, false);
            text
        })
    })
}

/// Pull a readable message out of an error response body
fn extract_error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        if let Some(error) = value.get("error") {
            return error_message(error);
        }
    }

    let body = body.trim();
    if body.is_empty() {
        return "no response body".to_string();
    }
    body.chars().take(MAX_ERROR_BODY).collect()
}

fn error_message(error: &Value) -> String {
    match error {
        Value::String(message) => message.clone(),
        Value::Object(fields) => fields
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
        other => other.to_string(),
    }
}

// API types

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    model: Option<String>,
    #[serde(default)]
    choices: Vec<StreamChoice>,
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<Delta>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn test_config(base_url: Option<String>) -> LlmConfig {
        LlmConfig {
            api_key: Some("test-key".to_string()),
            base_url,
            model: "gpt-4o-mini".to_string(),
            ..LlmConfig::default()
        }
    }

    /// Serve one canned HTTP response on a local port and return its base URL.
    async fn serve_once(status: &'static str, content_type: &'static str, body: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await;
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });

        format!("http://{addr}/v1")
    }

    /// Read request headers plus a `Content-Length` body.
    async fn read_request(socket: &mut tokio::net::TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);

            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(header_end) = text.find("\r\n\r\n") {
                let length = text[..header_end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= header_end + 4 + length {
                    return;
                }
            }
        }
    }

    fn sse_body(deltas: &[&str]) -> String {
        let mut body = String::new();
        for delta in deltas {
            let chunk = serde_json::json!({
                "model": "gpt-4o-mini-2024",
                "choices": [{"delta": {"content": delta}, "finish_reason": null}]
            });
            body.push_str(&format!("data: {chunk}\n\n"));
        }
        body.push_str("data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n");
        body.push_str("data: [DONE]\n\n");
        body
    }

    fn collecting_callback() -> (StreamCallback, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: StreamCallback = Box::new(move |delta: &str| -> anyhow::Result<bool> {
            sink.lock().unwrap().push(delta.to_string());
            Ok(true)
        });
        (callback, seen)
    }

    fn chunked(parts: Vec<Vec<u8>>) -> impl Stream<Item = std::result::Result<Vec<u8>, std::io::Error>> {
        futures::stream::iter(parts.into_iter().map(Ok))
    }

    #[tokio::test]
    async fn test_drain_events_multibyte_split_across_chunks() {
        let body = sse_body(&["café", " au lait"]).into_bytes();
        // cut between the two bytes of "é"
        let split = body.iter().position(|b| *b == 0xC3).unwrap() + 1;
        let parts = vec![body[..split].to_vec(), body[split..].to_vec()];

        let (mut callback, seen) = collecting_callback();
        let mut state = StreamState::default();
        let stopped = drain_events(ProviderType::OpenAI, chunked(parts), &mut state, &mut callback)
            .await
            .unwrap();

        assert!(!stopped);
        assert!(state.done);
        assert_eq!(state.content, "café au lait");
        assert_eq!(*seen.lock().unwrap(), vec!["café", " au lait"]);
    }

    #[tokio::test]
    async fn test_drain_events_event_split_across_chunks() {
        let parts = vec![
            b"da".to_vec(),
            b"ta: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n".to_vec(),
            b"\n: keep-alive\n\ndata: [DONE]\n\n".to_vec(),
        ];

        let (mut callback, seen) = collecting_callback();
        let mut state = StreamState::default();
        drain_events(ProviderType::OpenAI, chunked(parts), &mut state, &mut callback)
            .await
            .unwrap();

        assert_eq!(state.content, "Hi");
        assert!(state.done);
        assert_eq!(*seen.lock().unwrap(), vec!["Hi"]);
    }

    #[tokio::test]
    async fn test_drain_events_ignores_events_after_done() {
        let mut body = sse_body(&["one"]);
        body.push_str("data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n\n");

        let (mut callback, _) = collecting_callback();
        let mut state = StreamState::default();
        drain_events(ProviderType::OpenAI, chunked(vec![body.into_bytes()]), &mut state, &mut callback)
            .await
            .unwrap();
        assert_eq!(state.content, "one");
    }

    #[test]
    fn test_stream_state_apply() {
        let mut state = StreamState::default();
        let delta = state
            .apply(
                ProviderType::OpenAI,
                r#"{"model":"m","choices":[{"delta":{"content":"Hi"}}]}"#,
            )
            .unwrap();
        assert_eq!(delta.as_deref(), Some("Hi"));
        assert_eq!(state.model.as_deref(), Some("m"));

        let delta = state
            .apply(
                ProviderType::OpenAI,
                r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
            )
            .unwrap();
        assert_eq!(delta, None);
        assert_eq!(state.finish_reason.as_deref(), Some("stop"));

        assert_eq!(state.apply(ProviderType::OpenAI, "not json").unwrap(), None);
        assert!(!state.done);
        state.apply(ProviderType::OpenAI, "[DONE]").unwrap();
        assert!(state.done);
        assert_eq!(state.content, "Hi");
    }

    #[test]
    fn test_stream_state_error_event() {
        let mut state = StreamState::default();
        let err = state
            .apply(
                ProviderType::OpenRouter,
                r#"{"error":{"message":"model overloaded","code":502}}"#,
            )
            .unwrap_err();
        assert!(err.to_string().contains("model overloaded"));
    }

    #[test]
    fn test_extract_error_message() {
        assert_eq!(
            extract_error_message(r#"{"error":{"message":"Invalid API key","type":"auth"}}"#),
            "Invalid API key"
        );
        assert_eq!(extract_error_message(r#"{"error":"bad model"}"#), "bad model");
        assert_eq!(extract_error_message("  gateway timeout \n"), "gateway timeout");
        assert_eq!(extract_error_message(""), "no response body");
        assert_eq!(extract_error_message(&"x".repeat(2000)).len(), MAX_ERROR_BODY);
    }

    #[test]
    fn test_build_request() {
        let mut config = test_config(None);
        config.temperature = 0.0;
        config.max_tokens = 256;
        let client = OpenAiClient::from_config(&config).unwrap();
        let messages = vec![Message::system("sys"), Message::user("question")];

        let json = serde_json::to_value(client.build_request(&messages, true)).unwrap();
        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["max_tokens"], 256);
        assert_eq!(json["stream"], true);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "question");
        assert!(json.get("temperature").is_none());
    }

    #[test]
    fn test_endpoint_from_config() {
        let client = OpenAiClient::from_config(&test_config(None)).unwrap();
        assert_eq!(client.endpoint(), "https://api.openai.com/v1/chat/completions");

        let client = OpenAiClient::from_config(&test_config(Some(
            "https://llm.example.com/v1/".to_string(),
        )))
        .unwrap();
        assert_eq!(client.endpoint(), "https://llm.example.com/v1/chat/completions");
    }

    #[test]
    fn test_missing_api_key() {
        let config = LlmConfig {
            api_key: None,
            ..LlmConfig::default()
        };
        let err = OpenAiClient::from_config(&config).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<ProviderError>(),
            Some(ProviderError::MissingApiKey { .. })
        ));
    }

    #[test]
    fn test_ollama_needs_no_key() {
        let config = LlmConfig {
            provider: ProviderType::Ollama,
            api_key: None,
            ..LlmConfig::default()
        };
        let client = OpenAiClient::from_config(&config).unwrap();
        assert_eq!(client.provider_type(), ProviderType::Ollama);
        assert_eq!(client.endpoint(), "http://localhost:11434/v1/chat/completions");
    }

    #[tokio::test]
    async fn test_chat_streaming() {
        let base_url = serve_once("200 OK", "text/event-stream", sse_body(&["Use ", "`grep -r`", "."])).await;
        let client = OpenAiClient::from_config(&test_config(Some(base_url))).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let response = client
            .chat_streaming(
                &[Message::user("how to search recursively?")],
                Box::new(move |delta: &str| -> anyhow::Result<bool> {
                    sink.lock().unwrap().push(delta.to_string());
                    Ok(true)
                }),
            )
            .await
            .unwrap();

        assert_eq!(response.content, "Use `grep -r`.");
        assert_eq!(response.finish_reason.as_deref(), Some("stop"));
        assert_eq!(response.model, "gpt-4o-mini-2024");
        assert!(response.streamed);
        assert_eq!(*seen.lock().unwrap(), vec!["Use ", "`grep -r`", "."]);
    }

    #[tokio::test]
    async fn test_chat_streaming_stopped_by_callback() {
        let base_url = serve_once("200 OK", "text/event-stream", sse_body(&["first", "second"])).await;
        let client = OpenAiClient::from_config(&test_config(Some(base_url))).unwrap();

        let response = client
            .chat_streaming(&[Message::user("hi")], Box::new(|_: &str| -> anyhow::Result<bool> { Ok(false) }))
            .await
            .unwrap();
        assert_eq!(response.content, "first");
    }

    #[tokio::test]
    async fn test_chat_streaming_empty_response() {
        let base_url = serve_once("200 OK", "text/event-stream", "data: [DONE]\n\n".to_string()).await;
        let client = OpenAiClient::from_config(&test_config(Some(base_url))).unwrap();

        let err = client
            .chat_streaming(&[Message::user("hi")], Box::new(|_: &str| -> anyhow::Result<bool> { Ok(true) }))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProviderError>(),
            Some(ProviderError::EmptyResponse { .. })
        ));
    }

    #[tokio::test]
    async fn test_chat_non_streaming() {
        let body = serde_json::json!({
            "model": "gpt-4o-mini",
            "choices": [{"message": {"role": "assistant", "content": "Try `ls -la`."}, "finish_reason": "stop"}]
        })
        .to_string();
        let base_url = serve_once("200 OK", "application/json", body).await;
        let client = OpenAiClient::from_config(&test_config(Some(base_url))).unwrap();

        let response = client.chat(&[Message::user("list hidden files")]).await.unwrap();
        assert_eq!(response.content, "Try `ls -la`.");
        assert_eq!(response.finish_reason.as_deref(), Some("stop"));
        assert!(!response.streamed);
    }

    #[tokio::test]
    async fn test_rate_limited() {
        let base_url = serve_once(
            "429 Too Many Requests",
            "application/json",
            r#"{"error":{"message":"slow down"}}"#.to_string(),
        )
        .await;
        let client = OpenAiClient::from_config(&test_config(Some(base_url))).unwrap();

        let err = client.chat(&[Message::user("hi")]).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProviderError>(),
            Some(ProviderError::RateLimited { .. })
        ));
    }

    #[tokio::test]
    async fn test_api_error_message() {
        let base_url = serve_once(
            "401 Unauthorized",
            "application/json",
            r#"{"error":{"message":"Incorrect API key provided"}}"#.to_string(),
        )
        .await;
        let client = OpenAiClient::from_config(&test_config(Some(base_url))).unwrap();

        let err = client.chat(&[Message::user("hi")]).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("401"));
        assert!(message.contains("Incorrect API key provided"));
    }
}
