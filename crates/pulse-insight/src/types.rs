//! Digest request and response shapes.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use pulse_core::config::DigestConfig;
use serde::{Deserialize, Serialize};

use crate::error::InsightError;

/// How digest items are grouped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    #[default]
    Category,
    Channel,
    Time,
}

impl GroupBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupBy::Category => "category",
            GroupBy::Channel => "channel",
            GroupBy::Time => "time",
        }
    }
}

impl fmt::Display for GroupBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GroupBy {
    type Err = InsightError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "category" => Ok(GroupBy::Category),
            "channel" => Ok(GroupBy::Channel),
            "time" => Ok(GroupBy::Time),
            other => Err(InsightError::Config(format!("unknown grouping: {}", other))),
        }
    }
}

/// Parameters of one digest page.
#[derive(Clone, Debug, PartialEq)]
pub struct DigestRequest {
    pub lookback_hours: u32,
    pub group_by: GroupBy,
    /// Category labels (category mode) or channel titles (channel mode).
    /// Ignored in time mode.
    pub pinned: Vec<String>,
    pub limit: usize,
    pub offset: usize,
}

impl DigestRequest {
    /// Request using the configured lookback and page size.
    pub fn from_config(config: &DigestConfig) -> Self {
        Self {
            lookback_hours: config.default_lookback_hours,
            group_by: GroupBy::Category,
            pinned: Vec::new(),
            limit: config.default_limit,
            offset: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Story,
    Brief,
}

/// A channel a story was reported by.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub name: String,
    pub url: Option<String>,
}

/// One story or brief as shown in a digest.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DigestItem {
    /// `story_<id>` or `brief_<id>`; unique across kinds.
    pub uid: String,
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: ItemKind,
    pub title: String,
    pub summary: String,
    pub category: String,
    pub score: f64,
    pub sources: Vec<Source>,
    pub url: Option<String>,
    pub publications_count: i64,
    pub timestamp: DateTime<Utc>,
}

/// Items sharing a channel or category.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DigestBucket {
    pub name: String,
    /// At most `bucket_preview` items, newest first.
    pub items: Vec<DigestItem>,
    pub has_more: bool,
    /// Items in this bucket before truncation.
    pub total_count: usize,
}

/// A digest page in one of the three groupings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DigestView {
    Time {
        items: Vec<DigestItem>,
        has_more: bool,
        total: usize,
    },
    Channel {
        channels: Vec<DigestBucket>,
        has_more: bool,
        total_channels: usize,
    },
    Category {
        categories: Vec<DigestBucket>,
        has_more: bool,
        total_stories: usize,
        total_briefs: usize,
    },
}

impl DigestView {
    /// Whether another page may exist.
    pub fn has_more(&self) -> bool {
        match self {
            DigestView::Time { has_more, .. }
            | DigestView::Channel { has_more, .. }
            | DigestView::Category { has_more, .. } => *has_more,
        }
    }

    /// Buckets of a grouped view; empty in time mode.
    pub fn buckets(&self) -> &[DigestBucket] {
        match self {
            DigestView::Time { .. } => &[],
            DigestView::Channel { channels, .. } => channels,
            DigestView::Category { categories, .. } => categories,
        }
    }

    /// Every visible item in display order.
    pub fn items(&self) -> Vec<&DigestItem> {
        match self {
            DigestView::Time { items, .. } => items.iter().collect(),
            _ => self.buckets().iter().flat_map(|b| b.items.iter()).collect(),
        }
    }
}
