//! Narrative text digests.
//!
//! The text digest turns a day of stories and briefs into a short,
//! human-readable summary written by a text-generation provider.

use async_trait::async_trait;
use pulse_core::config::MetadataConfig;
use serde::{Deserialize, Serialize};

use crate::error::InsightError;
use crate::llm::{truncate_chars, ChatClient};

const SYSTEM_PROMPT: &str = "You write a short daily news digest for a reader of Telegram news channels. \
     Start with the most important stories, one short paragraph each, naming the channels that reported them. \
     Finish with a compact list of the other news. Use plain text without Markdown links. \
     Write in the language of the material.";

/// A story as handed to the narrative generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrativeStory {
    pub title: String,
    pub summary: String,
    /// Channel names, most viewed first.
    pub sources: Vec<String>,
    pub url: Option<String>,
}

/// A standalone publication as handed to the narrative generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrativeBrief {
    pub channel: String,
    pub text: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NarrativeInput {
    pub top_stories: Vec<NarrativeStory>,
    pub other_news: Vec<NarrativeBrief>,
}

impl NarrativeInput {
    pub fn is_empty(&self) -> bool {
        self.top_stories.is_empty() && self.other_news.is_empty()
    }
}

/// Writes a narrative digest from stories and briefs.
#[async_trait]
pub trait NarrativeGenerator: Send + Sync {
    async fn write_digest(&self, input: &NarrativeInput) -> Result<String, InsightError>;
}

/// [`NarrativeGenerator`] backed by an OpenAI-compatible chat endpoint.
#[derive(Debug)]
pub struct HttpNarrativeGenerator {
    client: ChatClient,
}

impl HttpNarrativeGenerator {
    pub fn from_config(config: &MetadataConfig) -> Result<Self, InsightError> {
        Ok(Self {
            client: ChatClient::from_config(config)?,
        })
    }
}

#[async_trait]
impl NarrativeGenerator for HttpNarrativeGenerator {
    async fn write_digest(&self, input: &NarrativeInput) -> Result<String, InsightError> {
        let prompt = render_prompt(input, self.client.max_input_chars());
        self.client
            .complete(SYSTEM_PROMPT, &prompt, false)
            .await
            .map(|text| text.trim().to_string())
            .map_err(InsightError::NarrativeUnavailable)
    }
}

/// Plain-text rendering of the input, each entry cut to `max_chars`.
fn render_prompt(input: &NarrativeInput, max_chars: usize) -> String {
    let mut out = String::from("TOP STORIES:\n");
    for (i, story) in input.top_stories.iter().enumerate() {
        out.push_str(&format!(
            "{}. {} ({})\n{}\n",
            i + 1,
            story.title,
            story.sources.join(", "),
            truncate_chars(&story.summary, max_chars)
        ));
    }
    out.push_str("\nOTHER NEWS:\n");
    for brief in &input.other_news {
        out.push_str(&format!(
            "- [{}] {}\n",
            brief.channel,
            truncate_chars(&brief.text, max_chars)
        ));
    }
    out
}
