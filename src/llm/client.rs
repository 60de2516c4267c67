//! Completion clients
//!
//! `LlmClient` speaks Ollama's generate API or the OpenAI chat API;
//! `MockLlmClient` answers from canned responses for tests.

use super::prompts::INSUFFICIENT_INFORMATION;
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Text returned by a completion model
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    /// Tokens reported by the service, when it reports them
    pub tokens_used: Option<usize>,
}

/// Which wire protocol the generative service speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// `/api/generate`
    Ollama,
    /// `/v1/chat/completions`
    OpenAI,
}

/// Connection and sampling settings
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    /// Base URL, without the API path
    pub endpoint: String,
    pub model: String,
    /// Sent as a bearer token when present
    pub api_key: Option<String>,
    /// Cap on generated tokens
    pub max_tokens: usize,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Ollama,
            endpoint: "http://localhost:11434".to_string(),
            model: "llama3.1".to_string(),
            api_key: None,
            max_tokens: 1024,
            temperature: 0.2,
        }
    }
}

/// Anything that turns a prompt into text
#[async_trait::async_trait]
pub trait CompletionModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<LlmResponse>;

    /// Generate a completion, retrying failed attempts with a linear backoff
    async fn complete_with_retry(&self, prompt: &str, max_retries: usize) -> Result<LlmResponse> {
        let attempts = max_retries.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            match self.complete(prompt).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    tracing::warn!("LLM request failed (attempt {}): {}", attempt + 1, e);
                    last_error = Some(e);

                    if attempt + 1 < attempts {
                        tokio::time::sleep(tokio::time::Duration::from_millis(
                            500 * (attempt as u64 + 1),
                        ))
                        .await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Unknown error")))
    }
}

/// HTTP client for Ollama and OpenAI-compatible services
pub struct LlmClient {
    config: LlmConfig,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        let endpoint = config.endpoint.trim_end_matches('/').to_string();
        Self {
            config: LlmConfig { endpoint, ..config },
            http: reqwest::Client::new(),
        }
    }

    pub fn openai_compatible(endpoint: &str, model: &str, api_key: Option<&str>) -> Self {
        Self::new(LlmConfig {
            provider: LlmProvider::OpenAI,
            endpoint: endpoint.to_string(),
            model: model.to_string(),
            api_key: api_key.map(str::to_string),
            ..Default::default()
        })
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// Whether the service answers at all
    pub async fn is_available(&self) -> bool {
        let path = match self.config.provider {
            LlmProvider::Ollama => "api/tags",
            LlmProvider::OpenAI => "v1/models",
        };

        self.http
            .get(format!("{}/{}", self.config.endpoint, path))
            .send()
            .await
            .is_ok()
    }

    /// POST a JSON body to `path` and decode the JSON reply
    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}/{}", self.config.endpoint, path);
        let mut request = self.http.post(&url).json(body);
        if let Some(ref key) = self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", url))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            anyhow::bail!("{} returned {}: {}", url, status, detail);
        }

        response
            .json::<R>()
            .await
            .with_context(|| format!("Unexpected response body from {}", url))
    }

    async fn generate(&self, prompt: &str) -> Result<LlmResponse> {
        let body = wire::GenerateBody {
            model: &self.config.model,
            prompt,
            stream: false,
            options: wire::GenerateOptions {
                temperature: self.config.temperature,
                num_predict: self.config.max_tokens,
            },
        };

        let reply: wire::GenerateReply = self.post_json("api/generate", &body).await?;

        Ok(LlmResponse {
            content: reply.response,
            tokens_used: reply.eval_count,
        })
    }

    async fn chat(&self, prompt: &str) -> Result<LlmResponse> {
        let body = wire::ChatBody {
            model: &self.config.model,
            messages: vec![wire::ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let reply: wire::ChatReply = self.post_json("v1/chat/completions", &body).await?;

        let content = reply
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .context("Chat completion returned no choices")?;

        Ok(LlmResponse {
            content,
            tokens_used: reply.usage.map(|usage| usage.total_tokens),
        })
    }
}

#[async_trait::async_trait]
impl CompletionModel for LlmClient {
    async fn complete(&self, prompt: &str) -> Result<LlmResponse> {
        match self.config.provider {
            LlmProvider::Ollama => self.generate(prompt).await,
            LlmProvider::OpenAI => self.chat(prompt).await,
        }
    }
}

/// Request and response bodies of the two services
mod wire {
    use serde::{Deserialize, Serialize};

    /// Ollama `/api/generate`
    #[derive(Serialize)]
    pub struct GenerateBody<'a> {
        pub model: &'a str,
        pub prompt: &'a str,
        pub stream: bool,
        pub options: GenerateOptions,
    }

    #[derive(Serialize)]
    pub struct GenerateOptions {
        pub temperature: f32,
        pub num_predict: usize,
    }

    #[derive(Deserialize)]
    pub struct GenerateReply {
        pub response: String,
        pub eval_count: Option<usize>,
    }

    /// OpenAI `/v1/chat/completions`
    #[derive(Serialize)]
    pub struct ChatBody<'a> {
        pub model: &'a str,
        pub messages: Vec<ChatMessage>,
        pub max_tokens: usize,
        pub temperature: f32,
    }

    #[derive(Serialize, Deserialize)]
    pub struct ChatMessage {
        pub role: String,
        pub content: String,
    }

    #[derive(Deserialize)]
    pub struct ChatReply {
        pub choices: Vec<ChatChoice>,
        pub usage: Option<ChatUsage>,
    }

    #[derive(Deserialize)]
    pub struct ChatChoice {
        pub message: ChatMessage,
    }

    #[derive(Deserialize)]
    pub struct ChatUsage {
        pub total_tokens: usize,
    }
}

/// Canned-response model for tests
///
/// Answers with the first canned response whose key occurs in the prompt and
/// remembers every prompt it was given.
pub struct MockLlmClient {
    responses: Vec<(String, String)>,
    default_response: String,
    failing: bool,
    prompts: Mutex<Vec<String>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self {
            responses: Vec::new(),
            default_response: INSUFFICIENT_INFORMATION.to_string(),
            failing: false,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// A client whose every request fails
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::new()
        }
    }

    /// Answer `response` to any prompt containing `prompt_contains`
    pub fn add_response(&mut self, prompt_contains: &str, response: &str) {
        self.responses
            .push((prompt_contains.to_string(), response.to_string()));
    }

    /// Prompts received so far, oldest first
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|prompts| prompts.clone())
            .unwrap_or_default()
    }
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CompletionModel for MockLlmClient {
    async fn complete(&self, prompt: &str) -> Result<LlmResponse> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }

        if self.failing {
            anyhow::bail!("Mock LLM unavailable");
        }

        let content = self
            .responses
            .iter()
            .find(|(key, _)| prompt.contains(key.as_str()))
            .map(|(_, response)| response.clone())
            .unwrap_or_else(|| self.default_response.clone());

        Ok(LlmResponse {
            content,
            tokens_used: Some(100),
        })
    }
}
