//! OpenRouter chat completions client (OpenAI-compatible API).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use repotutor_shared::{AppConfig, api_key};

use crate::error::LlmError;
use crate::types::{GenerationRequest, TextGenerator};

const REFERER: &str = "https://github.com/repotutor/repotutor";
const TITLE: &str = "RepoTutor";

/// Single-attempt OpenRouter client. Retries are applied by the gateway.
pub struct OpenRouterClient {
    client: Client,
    endpoint: String,
    api_key: String,
    timeout: Duration,
}

impl OpenRouterClient {
    pub fn new(api_key: String, base_url: &str, timeout: Duration) -> Result<Self, LlmError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| LlmError::Misconfiguration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            timeout,
        })
    }

    /// Build from the `[openrouter]` config section and the API key env var.
    pub fn from_config(config: &AppConfig) -> Result<Self, LlmError> {
        let key = api_key(config).map_err(|e| LlmError::Misconfiguration(e.to_string()))?;
        Self::new(
            key,
            &config.openrouter.base_url,
            Duration::from_secs(config.openrouter.timeout_secs),
        )
    }
}

#[async_trait]
impl TextGenerator for OpenRouterClient {
    fn name(&self) -> &str {
        "openrouter"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, LlmError> {
        let body = ChatRequest {
            model: &request.params.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
            max_tokens: request.params.max_tokens,
            temperature: request.params.temperature,
            stream: false,
        };

        debug!(
            model = %request.params.model,
            prompt_chars = request.prompt.len(),
            "sending chat completion"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", REFERER)
            .header("X-Title", TITLE)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout {
                        duration: self.timeout,
                    }
                } else {
                    LlmError::Transport(format!("openrouter request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(map_status(status, &text));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(format!("undecodable body: {e}")))?;

        if let Some(error) = parsed.error {
            return Err(LlmError::ProviderOutage(error.message));
        }

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| LlmError::InvalidResponse("response has no content".into()))?;

        if let Some(usage) = parsed.usage {
            debug!(
                tokens_in = usage.prompt_tokens,
                tokens_out = usage.completion_tokens,
                "chat completion done"
            );
        }

        Ok(content)
    }
}

fn map_status(status: StatusCode, body: &str) -> LlmError {
    let detail: String = body.chars().take(300).collect();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            LlmError::Auth(format!("HTTP {status}: {detail}"))
        }
        StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimited(format!("HTTP {status}: {detail}")),
        StatusCode::REQUEST_TIMEOUT => LlmError::Timeout {
            duration: Duration::ZERO,
        },
        s if s.is_server_error() => LlmError::ProviderOutage(format!("HTTP {status}: {detail}")),
        _ => LlmError::InvalidRequest(format!("HTTP {status}: {detail}")),
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
    error: Option<ProviderError>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Deserialize)]
struct ProviderError {
    message: String,
}
