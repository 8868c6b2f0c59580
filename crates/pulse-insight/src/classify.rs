//! Channel classification.
//!
//! A channel seen for the first time gets a category from a text-generation
//! provider, based on its title, handle and a sample post. The raw reply is
//! a free-form label; the ingestor maps it through
//! [`pulse_core::canonicalize`] before storing it.

use async_trait::async_trait;
use pulse_core::category::CanonicalCategory;
use pulse_core::config::MetadataConfig;
use tracing::debug;

use crate::error::InsightError;
use crate::llm::{truncate_chars, ChatClient};

const SAMPLE_CHARS: usize = 500;

/// Suggests a category label for a channel.
#[async_trait]
pub trait ChannelClassifier: Send + Sync {
    async fn classify(
        &self,
        title: &str,
        handle: Option<&str>,
        sample: &str,
    ) -> Result<String, InsightError>;
}

/// [`ChannelClassifier`] backed by an OpenAI-compatible chat endpoint.
#[derive(Debug)]
pub struct HttpChannelClassifier {
    client: ChatClient,
    system_prompt: String,
}

impl HttpChannelClassifier {
    pub fn from_config(config: &MetadataConfig) -> Result<Self, InsightError> {
        Ok(Self {
            client: ChatClient::from_config(config)?,
            system_prompt: system_prompt(),
        })
    }
}

#[async_trait]
impl ChannelClassifier for HttpChannelClassifier {
    async fn classify(
        &self,
        title: &str,
        handle: Option<&str>,
        sample: &str,
    ) -> Result<String, InsightError> {
        let prompt = render_prompt(title, handle, sample);
        let reply = self
            .client
            .complete(&self.system_prompt, &prompt, false)
            .await
            .map_err(InsightError::MetadataUnavailable)?;
        let label = reply.trim().trim_matches('"').trim().to_string();
        if label.is_empty() {
            return Err(InsightError::MetadataUnavailable(
                "empty classification reply".to_string(),
            ));
        }
        debug!(title, label = %label, "Channel classified by provider");
        Ok(label)
    }
}

fn system_prompt() -> String {
    let categories: Vec<&str> = CanonicalCategory::all().map(|c| c.label()).collect();
    format!(
        "You assign a Telegram news channel to exactly one category from this list: {}. \
         Reply with the category name only, without explanations. \
         If the channel fits none of them, reply \"{}\".",
        categories.join(", "),
        CanonicalCategory::Events.label()
    )
}

fn render_prompt(title: &str, handle: Option<&str>, sample: &str) -> String {
    let title = if title.trim().is_empty() { "unknown" } else { title.trim() };
    let handle = handle
        .map(|h| h.trim_start_matches('@'))
        .filter(|h| !h.is_empty())
        .unwrap_or("none");
    let sample = truncate_chars(sample.trim(), SAMPLE_CHARS);
    let sample = if sample.is_empty() { "no text" } else { sample };
    format!(
        "Title: {}\nUsername: @{}\nSample post: {}",
        title, handle, sample
    )
}
