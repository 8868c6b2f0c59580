use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PulseError;

// =============================================================================
// Enums
// =============================================================================

/// Lifecycle state of a story.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoryStatus {
    /// Created but not yet visible in digests.
    #[default]
    Pending,
    /// Fully described and visible.
    Active,
}

impl StoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoryStatus::Pending => "pending",
            StoryStatus::Active => "active",
        }
    }
}

impl fmt::Display for StoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoryStatus {
    type Err = PulseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StoryStatus::Pending),
            "active" => Ok(StoryStatus::Active),
            other => Err(PulseError::Storage(format!("Unknown story status: {}", other))),
        }
    }
}

// =============================================================================
// Channels
// =============================================================================

/// A monitored source channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: i64,
    /// Platform-native numeric identifier (unique).
    pub platform_id: i64,
    pub title: String,
    /// Public handle without the leading `@`, used to build post links.
    pub handle: Option<String>,
    pub category: Option<String>,
    pub is_active: bool,
}

impl Channel {
    /// Public link to one of this channel's posts, when the channel has a handle.
    pub fn post_url(&self, message_id: i64) -> Option<String> {
        self.handle
            .as_deref()
            .map(|h| h.trim_start_matches('@'))
            .filter(|h| !h.is_empty())
            .map(|h| format!("https://t.me/{}/{}", h, message_id))
    }
}

/// Fields needed to register a channel on first sight.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewChannel {
    pub platform_id: i64,
    pub title: String,
    pub handle: Option<String>,
    pub category: Option<String>,
}

// =============================================================================
// Publications
// =============================================================================

/// One observed post.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Publication {
    pub id: i64,
    pub channel_id: i64,
    /// Platform-native message id, unique per channel.
    pub message_id: i64,
    pub content: String,
    pub category: Option<String>,
    pub url: Option<String>,
    pub published_at: DateTime<Utc>,
    pub views: i64,
    pub story_id: Option<i64>,
}

/// A publication that has not been stored yet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewPublication {
    pub channel_id: i64,
    pub message_id: i64,
    pub content: String,
    pub url: Option<String>,
    pub published_at: DateTime<Utc>,
    pub views: i64,
}

/// A publication joined with the title of its channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelPublication {
    pub publication: Publication,
    pub channel_title: String,
}

// =============================================================================
// Stories
// =============================================================================

/// A cluster of related publications.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Story {
    pub id: i64,
    pub title: String,
    pub summary: String,
    pub category: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    /// Never decreases; always at least the newest linked publication's time.
    pub last_updated_at: DateTime<Utc>,
    pub confidence: f64,
    pub status: StoryStatus,
    /// Representative vector. Empty when loaded by listing queries.
    pub embedding: Vec<f32>,
    /// Number of publications linked to the story at query time.
    pub publication_count: i64,
}

/// A story that has not been stored yet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewStory {
    pub title: String,
    pub summary: String,
    pub category: Option<String>,
    pub embedding: Vec<f32>,
    pub first_seen_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub confidence: f64,
    pub status: StoryStatus,
}

/// `now` minus `hours`, saturating at the earliest representable instant.
pub fn hours_before(now: DateTime<Utc>, hours: u32) -> DateTime<Utc> {
    now.checked_sub_signed(chrono::Duration::hours(i64::from(hours)))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_hours_before() {
        let now = Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap();
        assert_eq!(
            hours_before(now, 36),
            Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(hours_before(now, 0), now);
        assert_eq!(hours_before(now, u32::MAX), DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn test_story_status_round_trip() {
        for status in [StoryStatus::Pending, StoryStatus::Active] {
            assert_eq!(status.as_str().parse::<StoryStatus>().unwrap(), status);
        }
        assert!("archived".parse::<StoryStatus>().is_err());
    }

    #[test]
    fn test_story_status_serde() {
        let json = serde_json::to_string(&StoryStatus::Active).unwrap();
        assert_eq!(json, "\"active\"");
    }

    fn channel(handle: Option<&str>) -> Channel {
        Channel {
            id: 1,
            platform_id: -100123,
            title: "Kyiv Daily".to_string(),
            handle: handle.map(str::to_string),
            category: None,
            is_active: true,
        }
    }

    #[test]
    fn test_post_url_with_handle() {
        assert_eq!(
            channel(Some("kyivdaily")).post_url(42).as_deref(),
            Some("https://t.me/kyivdaily/42")
        );
        assert_eq!(
            channel(Some("@kyivdaily")).post_url(7).as_deref(),
            Some("https://t.me/kyivdaily/7")
        );
    }

    #[test]
    fn test_post_url_without_handle() {
        assert!(channel(None).post_url(42).is_none());
        assert!(channel(Some("")).post_url(42).is_none());
    }
}
