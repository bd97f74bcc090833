//! HTTP implementation of [`LlmClient`] against an OpenAI-compatible
//! chat-completions endpoint with `response_format: json_schema`.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::{GenerateOptions, GeneratedObject, LlmClient, LlmError, TokenUsage};

pub const ENV_LLM_BASE_URL: &str = "IBX_LLM_BASE_URL";
pub const ENV_LLM_API_KEY: &str = "IBX_LLM_API_KEY";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub struct HttpLlmClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: TokenUsage,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

impl HttpLlmClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, LlmError> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(LlmError::Config("llm api key is empty".into()));
        }

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| LlmError::Config(format!("http client build failed: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// Construct from `IBX_LLM_BASE_URL` / `IBX_LLM_API_KEY`.
    pub fn from_env() -> Result<Self, LlmError> {
        let base = std::env::var(ENV_LLM_BASE_URL)
            .map_err(|_| LlmError::Config(format!("missing env var {ENV_LLM_BASE_URL}")))?;
        let key = std::env::var(ENV_LLM_API_KEY)
            .map_err(|_| LlmError::Config(format!("missing env var {ENV_LLM_API_KEY}")))?;
        Self::new(base, key)
    }
}

#[async_trait::async_trait]
impl LlmClient for HttpLlmClient {
    fn name(&self) -> &'static str {
        "openai-compatible"
    }

    async fn generate_object(
        &self,
        model: &str,
        schema: &Value,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<GeneratedObject, LlmError> {
        let url = format!("{}/v1/chat/completions", self.base_url);

        let body = json!({
            "model": model,
            "temperature": options.temperature,
            "messages": [
                { "role": "user", "content": prompt },
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": "structured_output",
                    "strict": options.strict_schema,
                    "schema": schema,
                }
            }
        });

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: Some(status.as_u16()),
                message,
            });
        }

        let chat: ChatResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let content = chat
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or_default();
        if content.is_empty() {
            return Err(LlmError::Schema("empty completion content".into()));
        }

        let object: Value = serde_json::from_str(content)
            .map_err(|e| LlmError::Schema(format!("completion is not valid JSON: {e}")))?;

        Ok(GeneratedObject {
            object,
            usage: chat.usage,
        })
    }
}
