//! Story metadata generation.
//!
//! A new story needs a title, a short summary and a category label. These
//! come from a text-generation provider; when it is unreachable or returns
//! garbage the clustering engine falls back to [`StoryMetadata::placeholder`].

use async_trait::async_trait;
use pulse_core::category::CanonicalCategory;
use pulse_core::config::MetadataConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::InsightError;
use crate::llm::{truncate_chars, ChatClient};

/// Title, summary and raw category label for a story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryMetadata {
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub category: String,
}

impl StoryMetadata {
    /// Metadata used when generation fails.
    pub fn placeholder() -> Self {
        Self {
            title: "new story".to_string(),
            summary: String::new(),
            category: "uncategorized-events".to_string(),
        }
    }
}

/// Produces story metadata from publication text.
#[async_trait]
pub trait MetadataGenerator: Send + Sync {
    async fn describe(&self, text: &str) -> Result<StoryMetadata, InsightError>;
}

/// Generator that never calls out and always returns the placeholder.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderMetadata;

#[async_trait]
impl MetadataGenerator for PlaceholderMetadata {
    async fn describe(&self, _text: &str) -> Result<StoryMetadata, InsightError> {
        Ok(StoryMetadata::placeholder())
    }
}

/// [`MetadataGenerator`] backed by an OpenAI-compatible chat endpoint.
#[derive(Debug)]
pub struct HttpMetadataGenerator {
    client: ChatClient,
    system_prompt: String,
}

impl HttpMetadataGenerator {
    pub fn from_config(config: &MetadataConfig) -> Result<Self, InsightError> {
        Ok(Self {
            client: ChatClient::from_config(config)?,
            system_prompt: system_prompt(),
        })
    }
}

#[async_trait]
impl MetadataGenerator for HttpMetadataGenerator {
    async fn describe(&self, text: &str) -> Result<StoryMetadata, InsightError> {
        let input = truncate_chars(text.trim(), self.client.max_input_chars());
        let reply = self
            .client
            .complete(&self.system_prompt, input, true)
            .await
            .map_err(InsightError::MetadataUnavailable)?;
        let metadata = parse_metadata(&reply)?;
        debug!(title = %metadata.title, category = %metadata.category, "Metadata generated");
        Ok(metadata)
    }
}

fn system_prompt() -> String {
    let categories: Vec<&str> = CanonicalCategory::all().map(|c| c.label()).collect();
    format!(
        "You read a single news post and describe the news story it belongs to. \
         Reply with a JSON object with the keys \"title\" (at most 12 words), \
         \"summary\" (one or two sentences) and \"category\" (exactly one of: {}). \
         Write in the language of the post. Do not add any other keys.",
        categories.join(", ")
    )
}

/// Parse a generator reply, tolerating Markdown code fences around the JSON.
fn parse_metadata(reply: &str) -> Result<StoryMetadata, InsightError> {
    let body = strip_code_fence(reply);
    let metadata: StoryMetadata = serde_json::from_str(body)
        .map_err(|e| InsightError::MetadataUnavailable(format!("unparseable reply: {}", e)))?;
    if metadata.title.trim().is_empty() {
        return Err(InsightError::MetadataUnavailable(
            "reply has an empty title".to_string(),
        ));
    }
    Ok(StoryMetadata {
        title: metadata.title.trim().to_string(),
        summary: metadata.summary.trim().to_string(),
        category: metadata.category.trim().to_string(),
    })
}

fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop an info string such as `json` on the opening fence.
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    rest.trim_end().trim_end_matches("```").trim()
}
