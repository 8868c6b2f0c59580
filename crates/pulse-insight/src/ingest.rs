//! Ingestion handoff.
//!
//! The transport hands over one post at a time. The [`Ingestor`] resolves the
//! channel (creating and classifying it on first sight), stores the
//! publication and pushes its id onto the clustering queue.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use pulse_core::category::{canonicalize, CanonicalCategory};
use pulse_core::types::{Channel, NewChannel, NewPublication};
use pulse_storage::{ChannelCache, ChannelRepository, StoryStore};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::classify::ChannelClassifier;
use crate::error::InsightError;
use crate::queue::ClusterQueue;

/// One post as received from the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingPost {
    pub channel: NewChannel,
    pub message_id: i64,
    pub text: String,
    #[serde(default)]
    pub views: i64,
    pub published_at: DateTime<Utc>,
}

/// Result of an ingestion attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum IngestOutcome {
    /// Stored and handed to clustering.
    Stored { publication_id: i64, channel_id: i64 },
    /// The (channel, message) pair was already stored.
    Duplicate { channel_id: i64, message_id: i64 },
    /// Nothing was stored.
    Skipped { reason: String },
}

/// Stores incoming posts and queues them for clustering.
pub struct Ingestor {
    channels: Arc<ChannelRepository>,
    cache: Arc<ChannelCache>,
    store: Arc<dyn StoryStore>,
    queue: Option<ClusterQueue>,
    classifier: Option<Arc<dyn ChannelClassifier>>,
}

impl Ingestor {
    pub fn new(
        channels: Arc<ChannelRepository>,
        cache: Arc<ChannelCache>,
        store: Arc<dyn StoryStore>,
    ) -> Self {
        Self {
            channels,
            cache,
            store,
            queue: None,
            classifier: None,
        }
    }

    /// Queue stored publications for clustering.
    pub fn with_queue(mut self, queue: ClusterQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Classify channels seen for the first time.
    pub fn with_classifier(mut self, classifier: Arc<dyn ChannelClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub async fn ingest(&self, post: IncomingPost) -> Result<IngestOutcome, InsightError> {
        if post.text.trim().is_empty() {
            debug!(
                platform_id = post.channel.platform_id,
                message_id = post.message_id,
                "Skipping post without text"
            );
            return Ok(IngestOutcome::Skipped {
                reason: "Post has no text".to_string(),
            });
        }

        let channel = self.resolve_channel(&post.channel, &post.text).await?;
        let publication = NewPublication {
            channel_id: channel.id,
            message_id: post.message_id,
            url: channel.post_url(post.message_id),
            content: post.text,
            published_at: post.published_at,
            views: post.views,
        };

        let publication_id = match self.store.insert_publication(publication).await {
            Ok(id) => id,
            Err(pulse_core::PulseError::Duplicate {
                channel_id,
                message_id,
            }) => {
                debug!(channel_id, message_id, "Duplicate publication ignored");
                return Ok(IngestOutcome::Duplicate {
                    channel_id,
                    message_id,
                });
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(queue) = &self.queue {
            if let Err(e) = queue.enqueue(publication_id).await {
                // The reconciliation sweep picks it up later.
                warn!(publication_id, error = %e, "Could not queue publication for clustering");
            }
        }

        debug!(publication_id, channel_id = channel.id, "Publication stored");
        Ok(IngestOutcome::Stored {
            publication_id,
            channel_id: channel.id,
        })
    }

    /// Cached channel, refreshed from the database when missing or renamed.
    async fn resolve_channel(
        &self,
        incoming: &NewChannel,
        sample: &str,
    ) -> Result<Channel, InsightError> {
        if let Some(cached) = self.cache.get(incoming.platform_id) {
            let renamed = cached.title != incoming.title
                || (incoming.handle.is_some() && cached.handle != incoming.handle);
            if !renamed {
                return Ok(cached);
            }
            self.cache.invalidate(incoming.platform_id);
        }

        let repo = Arc::clone(&self.channels);
        let new_channel = incoming.clone();
        let (mut channel, created) = tokio::task::spawn_blocking(move || {
            let created = repo.find_by_platform_id(new_channel.platform_id)?.is_none();
            repo.upsert(&new_channel).map(|channel| (channel, created))
        })
        .await
        .map_err(|e| InsightError::StoreUnavailable(format!("channel upsert task failed: {}", e)))??;

        if created {
            info!(
                channel_id = channel.id,
                platform_id = channel.platform_id,
                title = %channel.title,
                "Channel registered"
            );
            if channel.category.is_none() {
                if let Some(classifier) = &self.classifier {
                    let category = self.classify(classifier.as_ref(), &channel, sample).await?;
                    channel.category = Some(category);
                }
            }
        } else {
            debug!(channel_id = channel.id, title = %channel.title, "Channel refreshed");
        }

        self.cache.insert(channel.clone());
        Ok(channel)
    }

    /// Ask the classifier for a category and store its canonical label.
    /// Classifier failures fall back to the events bucket.
    async fn classify(
        &self,
        classifier: &dyn ChannelClassifier,
        channel: &Channel,
        sample: &str,
    ) -> Result<String, InsightError> {
        let category = match classifier
            .classify(&channel.title, channel.handle.as_deref(), sample)
            .await
        {
            Ok(label) => canonicalize(&label),
            Err(e) => {
                warn!(channel_id = channel.id, error = %e, "Channel classification failed");
                CanonicalCategory::Events
            }
        };
        let label = category.label().to_string();

        let repo = Arc::clone(&self.channels);
        let (channel_id, stored) = (channel.id, label.clone());
        tokio::task::spawn_blocking(move || repo.set_category(channel_id, &stored))
            .await
            .map_err(|e| InsightError::StoreUnavailable(format!("channel update task failed: {}", e)))??;

        info!(channel_id = channel.id, category = %label, "Channel classified");
        Ok(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use pulse_storage::{Database, SqliteStoryStore};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Replies with a fixed label, or fails when none is set.
    struct ScriptedClassifier {
        label: Option<&'static str>,
        calls: AtomicUsize,
    }

    impl ScriptedClassifier {
        fn new(label: Option<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                label,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ChannelClassifier for ScriptedClassifier {
        async fn classify(
            &self,
            _title: &str,
            _handle: Option<&str>,
            sample: &str,
        ) -> Result<String, InsightError> {
            assert!(!sample.trim().is_empty());
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.label
                .map(str::to_string)
                .ok_or_else(|| InsightError::MetadataUnavailable("provider down".to_string()))
        }
    }

    struct Fixture {
        ingestor: Ingestor,
        store: Arc<SqliteStoryStore>,
        cache: Arc<ChannelCache>,
        channels: Arc<ChannelRepository>,
    }

    fn fixture(queue: Option<ClusterQueue>) -> Fixture {
        let db = Arc::new(Database::in_memory().unwrap());
        let store = Arc::new(SqliteStoryStore::new(Arc::clone(&db)));
        let cache = Arc::new(ChannelCache::new(16, Duration::from_secs(300)));
        let channels = Arc::new(ChannelRepository::new(db));
        let mut ingestor = Ingestor::new(Arc::clone(&channels), Arc::clone(&cache), store.clone());
        if let Some(queue) = queue {
            ingestor = ingestor.with_queue(queue);
        }
        Fixture {
            ingestor,
            store,
            cache,
            channels,
        }
    }

    fn post(message_id: i64, text: &str) -> IncomingPost {
        IncomingPost {
            channel: NewChannel {
                platform_id: -1001,
                title: "Kyiv Daily".to_string(),
                handle: Some("@kyivdaily".to_string()),
                category: None,
            },
            message_id,
            text: text.to_string(),
            views: 120,
            published_at: Utc.with_ymd_and_hms(2024, 4, 1, 9, 30, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_ingest_stores_and_queues() {
        let (queue, mut rx) = ClusterQueue::bounded(4);
        let fx = fixture(Some(queue));

        let outcome = fx.ingestor.ingest(post(42, "Budget passed")).await.unwrap();
        let IngestOutcome::Stored { publication_id, .. } = outcome else {
            panic!("expected stored outcome");
        };
        assert_eq!(rx.recv().await, Some(publication_id));

        let stored = fx.store.get_publication(publication_id).await.unwrap();
        assert_eq!(stored.url.as_deref(), Some("https://t.me/kyivdaily/42"));
        assert_eq!(stored.views, 120);
        assert!(fx.cache.get(-1001).is_some());
    }

    #[tokio::test]
    async fn test_duplicate_is_reported_not_stored() {
        let fx = fixture(None);
        fx.ingestor.ingest(post(42, "Budget passed")).await.unwrap();
        let outcome = fx.ingestor.ingest(post(42, "Budget passed (edited)")).await.unwrap();
        assert!(matches!(outcome, IngestOutcome::Duplicate { message_id: 42, .. }));

        let count: i64 = fx
            .store
            .database()
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM publications", [], |r| r.get(0))
                    .map_err(|e| pulse_core::PulseError::Storage(e.to_string()))
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_blank_post_is_skipped() {
        let fx = fixture(None);
        let outcome = fx.ingestor.ingest(post(1, " \n\t")).await.unwrap();
        assert!(matches!(outcome, IngestOutcome::Skipped { .. }));
        assert!(fx.channels.find_by_platform_id(-1001).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_renamed_channel_is_refreshed() {
        let fx = fixture(None);
        fx.ingestor.ingest(post(1, "first")).await.unwrap();

        let mut renamed = post(2, "second");
        renamed.channel.title = "Kyiv Daily News".to_string();
        fx.ingestor.ingest(renamed).await.unwrap();

        assert_eq!(fx.cache.get(-1001).unwrap().title, "Kyiv Daily News");
        assert_eq!(
            fx.channels.find_by_platform_id(-1001).unwrap().unwrap().title,
            "Kyiv Daily News"
        );
    }

    #[tokio::test]
    async fn test_closed_queue_still_stores() {
        let (queue, rx) = ClusterQueue::bounded(1);
        drop(rx);
        let fx = fixture(Some(queue));
        let outcome = fx.ingestor.ingest(post(5, "text")).await.unwrap();
        assert!(matches!(outcome, IngestOutcome::Stored { .. }));
    }

    #[tokio::test]
    async fn test_new_channel_is_classified_once() {
        let classifier = ScriptedClassifier::new(Some("Business news"));
        let mut fx = fixture(None);
        fx.ingestor = fx.ingestor.with_classifier(classifier.clone());

        fx.ingestor.ingest(post(1, "Markets rally")).await.unwrap();
        let mut renamed = post(2, "Markets fall");
        renamed.channel.title = "Kyiv Daily Business".to_string();
        fx.ingestor.ingest(renamed).await.unwrap();
        fx.ingestor.ingest(post(3, "Markets flat")).await.unwrap();

        assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
        let stored = fx.channels.find_by_platform_id(-1001).unwrap().unwrap();
        assert_eq!(stored.category.as_deref(), Some("💰 Economy"));
        assert_eq!(fx.cache.get(-1001).unwrap().category.as_deref(), Some("💰 Economy"));
    }

    #[tokio::test]
    async fn test_classifier_failure_falls_back_to_events() {
        let classifier = ScriptedClassifier::new(None);
        let mut fx = fixture(None);
        fx.ingestor = fx.ingestor.with_classifier(classifier.clone());

        let outcome = fx.ingestor.ingest(post(1, "Something happened")).await.unwrap();
        assert!(matches!(outcome, IngestOutcome::Stored { .. }));
        let stored = fx.channels.find_by_platform_id(-1001).unwrap().unwrap();
        assert_eq!(stored.category.as_deref(), Some("📰 Events"));
    }

    #[tokio::test]
    async fn test_channel_with_known_category_is_not_classified() {
        let classifier = ScriptedClassifier::new(Some("Sports"));
        let mut fx = fixture(None);
        fx.ingestor = fx.ingestor.with_classifier(classifier.clone());

        let mut tagged = post(1, "Cup final");
        tagged.channel.category = Some("🏛 Politics".to_string());
        fx.ingestor.ingest(tagged).await.unwrap();

        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
        let stored = fx.channels.find_by_platform_id(-1001).unwrap().unwrap();
        assert_eq!(stored.category.as_deref(), Some("🏛 Politics"));
    }
}
