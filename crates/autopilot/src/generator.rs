//! Generation service client.
//!
//! [`Generator::generate`] never fails: transport and HTTP errors are
//! retried with backoff and finally folded into the returned text together
//! with a synthesized `STOP` decision, so the protocol parser always has
//! something to parse. An upstream 503 keeps its status in that text and is
//! therefore parsed as `RETRY`.

use async_trait::async_trait;
use autopilot_core::prompt::{turn_prompt, SYSTEM_PROMPT};
use autopilot_core::{Config, GeneratorProvider};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("missing API key: set {0}")]
    MissingApiKey(&'static str),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("no content in API response")]
    EmptyResponse,
}

pub type Result<T> = std::result::Result<T, GeneratorError>;

#[async_trait]
pub trait Generator: Send + Sync {
    /// Produce raw text for `turn` given the rendered context.
    async fn generate(&self, context: &str, turn: u32) -> String;

    fn model_name(&self) -> &str;
}

/// Settings for [`HttpGenerator`].
#[derive(Clone)]
pub struct GeneratorConfig {
    pub provider: GeneratorProvider,
    pub model: String,
    pub base_url: String,
    pub api_key: String,
    pub max_tokens: u32,
    pub retries: u32,
    pub retry_backoff: Duration,
    pub request_timeout: Duration,
}

impl std::fmt::Debug for GeneratorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratorConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("max_tokens", &self.max_tokens)
            .field("retries", &self.retries)
            .finish_non_exhaustive()
    }
}

impl GeneratorConfig {
    /// Build from run config, reading the API key from the environment.
    pub fn from_config(config: &Config) -> Result<Self> {
        let key_env = config.provider.api_key_env();
        let api_key = std::env::var(key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or(GeneratorError::MissingApiKey(key_env))?;
        Ok(Self {
            provider: config.provider,
            model: config.model.clone(),
            base_url: config.base_url().to_string(),
            api_key,
            max_tokens: config.max_tokens,
            retries: config.generation_retries,
            retry_backoff: config.generation_retry_backoff(),
            request_timeout: config.generation_timeout(),
        })
    }
}

/// Talks to Anthropic Messages or Gemini `generateContent` over HTTPS.
#[derive(Debug, Clone)]
pub struct HttpGenerator {
    client: reqwest::Client,
    config: GeneratorConfig,
}

impl HttpGenerator {
    /// A zero `request_timeout` leaves requests unbounded.
    pub fn new(config: GeneratorConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if !config.request_timeout.is_zero() {
            builder = builder.timeout(config.request_timeout);
        }
        let client = builder.build()?;
        Ok(Self { client, config })
    }

    async fn call_once(&self, prompt: &str) -> Result<String> {
        match self.config.provider {
            GeneratorProvider::Anthropic => self.call_anthropic(prompt).await,
            GeneratorProvider::Gemini => self.call_gemini(prompt).await,
        }
    }

    async fn call_anthropic(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/v1/messages", self.config.base_url);
        let response = self
            .client
            .post(url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&anthropic_body(&self.config.model, self.config.max_tokens, prompt))
            .send()
            .await?;
        let body: AnthropicResponse = check_status(response).await?.json().await?;
        body.content
            .into_iter()
            .find_map(|block| block.text)
            .ok_or(GeneratorError::EmptyResponse)
    }

    async fn call_gemini(&self, prompt: &str) -> Result<String> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url, self.config.model
        );
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(&gemini_body(self.config.max_tokens, prompt))
            .send()
            .await?;
        let body: GeminiResponse = check_status(response).await?.json().await?;
        body.candidates
            .into_iter()
            .flat_map(|candidate| candidate.content.parts)
            .find_map(|part| part.text)
            .ok_or(GeneratorError::EmptyResponse)
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn generate(&self, context: &str, turn: u32) -> String {
        let prompt = turn_prompt(context, turn);
        let max_attempts = self.config.retries + 1;
        let mut last_error = GeneratorError::EmptyResponse;

        for attempt in 1..=max_attempts {
            debug!(
                turn,
                attempt,
                provider = self.config.provider.as_str(),
                model = %self.config.model,
                "calling generation service"
            );
            match self.call_once(&prompt).await {
                Ok(text) => {
                    info!(turn, attempt, output_chars = text.len(), "generation received");
                    return text;
                }
                Err(err) => {
                    warn!(turn, attempt, error = %err, "generation call failed");
                    last_error = err;
                    if attempt < max_attempts {
                        tokio::time::sleep(self.config.retry_backoff).await;
                    }
                }
            }
        }

        error_response(&last_error.to_string())
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(GeneratorError::Status {
        status: status.as_u16(),
        body,
    })
}

fn anthropic_body(model: &str, max_tokens: u32, prompt: &str) -> serde_json::Value {
    json!({
        "model": model,
        "max_tokens": max_tokens,
        "system": SYSTEM_PROMPT,
        "messages": [{ "role": "user", "content": prompt }],
    })
}

fn gemini_body(max_tokens: u32, prompt: &str) -> serde_json::Value {
    json!({
        "systemInstruction": { "parts": [{ "text": SYSTEM_PROMPT }] },
        "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        "generationConfig": { "maxOutputTokens": max_tokens },
    })
}

/// Text returned when every attempt failed: the error plus a `STOP` decision.
pub fn error_response(error: &str) -> String {
    let message = format!("API call failed: {error}");
    let stop = json!({
        "decision": "STOP",
        "reason": format!("API error - {message}"),
        "commands": [],
        "next_hint": "Check API credentials and network",
    });
    format!(
        "I encountered an error calling the API: {message}\n\n\
         I'll stop here to avoid further issues.\n\n{stop}"
    )
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicBlock>,
}

#[derive(Debug, Deserialize)]
struct AnthropicBlock {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use autopilot_core::{parse_decision, DecisionKind};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answer one HTTP request with `body` as JSON and return the base URL.
    async fn serve_once(body: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            if name.eq_ignore_ascii_case("content-length") {
                                value.trim().parse::<usize>().ok()
                            } else {
                                None
                            }
                        })
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{addr}")
    }

    fn test_config(base_url: String, request_timeout: Duration) -> GeneratorConfig {
        GeneratorConfig {
            provider: GeneratorProvider::Anthropic,
            model: "m".into(),
            base_url,
            api_key: "sk-secret".into(),
            max_tokens: 1,
            retries: 0,
            retry_backoff: Duration::ZERO,
            request_timeout,
        }
    }

    #[tokio::test]
    async fn zero_request_timeout_does_not_bound_requests() {
        let base_url =
            serve_once(r#"{"content":[{"type":"text","text":"all good"}]}"#.to_string()).await;
        let generator = HttpGenerator::new(test_config(base_url, Duration::ZERO)).unwrap();
        assert_eq!(generator.generate("context", 1).await, "all good");
    }

    #[test]
    fn error_response_parses_as_stop() {
        let text = error_response("http error: connection refused");
        let decision = parse_decision(&text);
        assert_eq!(decision.kind, DecisionKind::Stop);
        assert!(decision.reason.contains("connection refused"));
    }

    #[test]
    fn upstream_503_parses_as_retry() {
        let err = GeneratorError::Status {
            status: 503,
            body: "{\"error\":\"overloaded\"}".into(),
        };
        let decision = parse_decision(&error_response(&err.to_string()));
        assert_eq!(decision.kind, DecisionKind::Retry);
    }

    #[test]
    fn anthropic_body_shape() {
        let body = anthropic_body("claude-sonnet-4-20250514", 4000, "hello");
        assert_eq!(body["model"], "claude-sonnet-4-20250514");
        assert_eq!(body["max_tokens"], 4000);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "hello");
        assert_eq!(body["system"], SYSTEM_PROMPT);
    }

    #[test]
    fn gemini_body_shape() {
        let body = gemini_body(256, "hello");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "hello");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 256);
    }

    #[test]
    fn responses_deserialize() {
        let anthropic: AnthropicResponse = serde_json::from_str(
            r#"{"id":"msg_1","content":[{"type":"text","text":"hi"}],"stop_reason":"end_turn"}"#,
        )
        .unwrap();
        assert_eq!(anthropic.content[0].text.as_deref(), Some("hi"));

        let gemini: GeminiResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"yo"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(gemini.candidates[0].content.parts[0].text.as_deref(), Some("yo"));
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = test_config("http://localhost".into(), Duration::from_secs(1));
        assert!(!format!("{config:?}").contains("sk-secret"));
    }
}
