//! Minimal client for OpenAI-compatible chat completions.
//!
//! Shared by the metadata and narrative generators. Errors come back as
//! plain strings; each caller wraps them in its own error variant.

use std::time::Duration;

use pulse_core::config::MetadataConfig;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::InsightError;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

pub struct ChatClient {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    max_input_chars: usize,
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_deref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ChatClient {
    pub fn from_config(config: &MetadataConfig) -> Result<Self, InsightError> {
        if config.endpoint.trim().is_empty() {
            return Err(InsightError::Config("metadata.endpoint is not set".to_string()));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| InsightError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: std::env::var(&config.api_key_env)
                .ok()
                .filter(|k| !k.is_empty()),
            max_input_chars: config.max_input_chars,
        })
    }

    pub fn max_input_chars(&self) -> usize {
        self.max_input_chars
    }

    /// Send one system + user exchange and return the reply text.
    ///
    /// `json` asks the provider for a JSON object reply.
    pub async fn complete(&self, system: &str, user: &str, json: bool) -> Result<String, String> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: 0.2,
            response_format: json.then_some(ResponseFormat { kind: "json_object" }),
        };

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;
        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(format!("provider returned {}: {}", status, detail));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| format!("malformed response: {}", e))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| "empty completion".to_string())
    }
}

/// Longest prefix of `text` holding at most `max_chars` characters.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
