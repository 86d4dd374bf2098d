//! OpenAI-compatible chat completion client.
//!
//! Used for hierarchy assignment, LLM summaries, and final answers. Any
//! endpoint speaking the `/chat/completions` protocol works via `base_url`.

use std::env;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::{LlmConfig, DEFAULT_BASE_URL};
use crate::{Error, Result};

/// OpenAI client.
#[derive(Debug, Clone)]
pub struct OpenAIClient {
    http: Client,
    api_key: String,
    base_url: String,
}

impl OpenAIClient {
    /// Create client from `ARK_API_KEY` / `OPENAI_API_KEY` and `BASE_URL`.
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("ARK_API_KEY")
            .or_else(|_| env::var("OPENAI_API_KEY"))
            .map_err(|_| Error::Oracle("OPENAI_API_KEY is not set".to_string()))?;
        let client = Self::new(api_key)?;
        match env::var("BASE_URL") {
            Ok(url) if !url.trim().is_empty() => Ok(client.with_base_url(url)),
            _ => Ok(client),
        }
    }

    /// Create client from loaded configuration.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| Error::Oracle("no LLM API key configured".to_string()))?;
        Ok(Self::new(api_key)?.with_base_url(config.base_url.clone()))
    }

    /// Create client with API key.
    pub fn new<S: Into<String>>(api_key: S) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(Error::Oracle("API key is empty".to_string()));
        }

        let http = Client::builder()
            .user_agent("abstract_forest/0.1.0")
            .build()
            .map_err(|e| Error::Oracle(format!("HTTP client error: {}", e)))?;

        Ok(Self {
            http,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Chat completion.
    pub async fn chat_completion(
        &self,
        messages: Vec<ChatMessage>,
        model: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String> {
        let request = ChatRequest {
            model: model.to_string(),
            messages,
            temperature,
            max_tokens,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Oracle(format!("chat request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::Oracle(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(Error::Oracle(format!("chat error {}: {}", status, text)));
        }

        let chat_response: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| Error::Oracle(format!("Invalid response: {}", e)))?;

        chat_response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| Error::Oracle("Empty response from chat model".to_string()))
    }

    /// Answer an assembled prompt with the answer system prompt.
    pub async fn answer(&self, prompt: &str, model: &str) -> Result<String> {
        let system_prompt = crate::Prompt::Answer.load_or_builtin();
        let messages = vec![ChatMessage::system(system_prompt), ChatMessage::user(prompt)];
        self.chat_completion(messages, model, 0.0, 1000).await
    }
}

/// Chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: Some(content.into()),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: Some(content.into()),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}
