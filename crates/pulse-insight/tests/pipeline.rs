//! End-to-end tests for the news pipeline.
//!
//! Each test opens its own on-disk database, ingests posts through the
//! `Ingestor`, drains the clustering queue with a worker pool and reads the
//! result back through the digest aggregator.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tempfile::TempDir;

use pulse_core::config::{ClusteringConfig, ClusteringMode, DigestConfig};
use pulse_core::types::NewChannel;
use pulse_core::PulseError;
use pulse_insight::{
    ClusterQueue, ClusterWorkerPool, ClusteringEngine, DigestAggregator, DigestRequest,
    DigestView, GroupBy, IncomingPost, IngestOutcome, Ingestor, InsightError, MetadataGenerator,
    StoryMetadata,
};
use pulse_storage::{
    ChannelCache, ChannelRepository, Database, SqliteStoryStore, StoryStore, SubscriptionRepository,
};
use pulse_vector::embedding::FixedEmbedding;

// =============================================================================
// Helpers
// =============================================================================

const USER: i64 = 501;
const CHANNEL: i64 = -100_200;

const RATES: &str = "Central bank cuts the key rate to 13%";
const RATES_AGAIN: &str = "Key rate lowered to 13% by the central bank";
const FINAL: &str = "Dynamo win the cup final 2:1";

/// Metadata keyed by post text.
struct ScriptedMetadata(HashMap<&'static str, StoryMetadata>);

#[async_trait]
impl MetadataGenerator for ScriptedMetadata {
    async fn describe(&self, text: &str) -> Result<StoryMetadata, InsightError> {
        self.0
            .get(text)
            .cloned()
            .ok_or_else(|| InsightError::MetadataUnavailable(format!("no script for {}", text)))
    }
}

fn scripted_metadata() -> ScriptedMetadata {
    let mut map = HashMap::new();
    map.insert(
        RATES,
        StoryMetadata {
            title: "**Rate cut**".to_string(),
            summary: "The [central bank](https://bank.test) eased policy.".to_string(),
            category: "economy".to_string(),
        },
    );
    map.insert(
        RATES_AGAIN,
        StoryMetadata {
            title: "Rate cut".to_string(),
            summary: String::new(),
            category: "economy".to_string(),
        },
    );
    map.insert(
        FINAL,
        StoryMetadata {
            title: "Cup final".to_string(),
            summary: "Dynamo took the cup.".to_string(),
            category: "Football".to_string(),
        },
    );
    ScriptedMetadata(map)
}

fn embedder() -> FixedEmbedding {
    // Distances from RATES: 0.05 for RATES_AGAIN, 0.6 for FINAL.
    FixedEmbedding::new(2)
        .with(RATES, vec![1.0, 0.0])
        .with(RATES_AGAIN, vec![0.95, 0.31225])
        .with(FINAL, vec![0.4, 0.916515])
}

struct Pipeline {
    _dir: TempDir,
    db: Arc<Database>,
    store: Arc<SqliteStoryStore>,
    engine: Arc<ClusteringEngine>,
    channels: Arc<ChannelRepository>,
    cache: Arc<ChannelCache>,
}

impl Pipeline {
    fn new(mode: ClusteringMode) -> Self {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(Database::new(&dir.path().join("pulse.db")).unwrap());
        let store = Arc::new(SqliteStoryStore::new(Arc::clone(&db)));
        let engine = Arc::new(ClusteringEngine::new(
            store.clone(),
            Arc::new(embedder()),
            Arc::new(scripted_metadata()),
            ClusteringConfig {
                mode,
                ..ClusteringConfig::default()
            },
        ));
        Self {
            _dir: dir,
            channels: Arc::new(ChannelRepository::new(Arc::clone(&db))),
            cache: Arc::new(ChannelCache::new(8, StdDuration::from_secs(60))),
            db,
            store,
            engine,
        }
    }

    fn ingestor(&self) -> Ingestor {
        Ingestor::new(
            Arc::clone(&self.channels),
            Arc::clone(&self.cache),
            self.store.clone(),
        )
    }

    /// Ingest posts through the queue and drain it with a single worker.
    async fn ingest_all(&self, posts: Vec<IncomingPost>) -> Vec<i64> {
        let (queue, rx) = ClusterQueue::bounded(16);
        let ingestor = self.ingestor().with_queue(queue);
        let mut ids = Vec::new();
        for post in posts {
            match ingestor.ingest(post).await.unwrap() {
                IngestOutcome::Stored { publication_id, .. } => ids.push(publication_id),
                other => panic!("unexpected ingest outcome: {:?}", other),
            }
        }
        drop(ingestor);

        let pool = ClusterWorkerPool::new(Arc::clone(&self.engine), 1);
        pool.run(rx).await;
        ids
    }

    fn subscribe(&self) {
        let channel = self.channels.find_by_platform_id(CHANNEL).unwrap().unwrap();
        SubscriptionRepository::new(Arc::clone(&self.db))
            .subscribe(USER, channel.id)
            .unwrap();
    }

    fn aggregator(&self) -> DigestAggregator {
        DigestAggregator::new(self.store.clone(), DigestConfig::default())
    }

    fn scalar(&self, sql: &str) -> i64 {
        self.db
            .with_conn(|conn| {
                conn.query_row(sql, [], |r| r.get(0))
                    .map_err(|e| PulseError::Storage(e.to_string()))
            })
            .unwrap()
    }
}

fn post(message_id: i64, text: &str, published_at: DateTime<Utc>) -> IncomingPost {
    IncomingPost {
        channel: NewChannel {
            platform_id: CHANNEL,
            title: "Morning Wire".to_string(),
            handle: Some("morningwire".to_string()),
            category: None,
        },
        message_id,
        text: text.to_string(),
        views: message_id * 100,
        published_at,
    }
}

fn ago(hours: i64) -> DateTime<Utc> {
    Utc::now() - Duration::hours(hours)
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_end_to_end_two_stories() {
    let pipeline = Pipeline::new(ClusteringMode::Merge);
    let ids = pipeline
        .ingest_all(vec![
            post(1, RATES, ago(5)),
            post(2, RATES_AGAIN, ago(4)),
            post(3, FINAL, ago(3)),
        ])
        .await;
    pipeline.subscribe();

    assert_eq!(pipeline.scalar("SELECT COUNT(*) FROM stories"), 2);
    let rates_story = pipeline.store.get_publication(ids[0]).await.unwrap().story_id;
    assert_eq!(
        pipeline.store.get_publication(ids[1]).await.unwrap().story_id,
        rates_story
    );

    let view = pipeline
        .aggregator()
        .get_digest(
            USER,
            &DigestRequest {
                lookback_hours: 24,
                group_by: GroupBy::Category,
                pinned: vec![],
                limit: 20,
                offset: 0,
            },
        )
        .await
        .unwrap();

    let DigestView::Category {
        categories,
        total_stories,
        total_briefs,
        has_more,
    } = view
    else {
        panic!("expected category view");
    };
    assert_eq!(total_stories, 2);
    assert_eq!(total_briefs, 0);
    assert!(!has_more);

    let names: Vec<&str> = categories.iter().map(|b| b.name.as_str()).collect();
    assert_eq!(names, vec!["⚽ Sports", "💰 Economy"]);

    let economy = &categories[1];
    assert_eq!(economy.total_count, 1);
    let rates = &economy.items[0];
    assert_eq!(rates.publications_count, 2);
    assert_eq!(rates.title, "Rate cut");
    assert_eq!(rates.summary, "The central bank eased policy.");
    assert_eq!(rates.sources.len(), 2);
    // Sources are ordered by views: message 2 has more than message 1.
    assert_eq!(rates.url.as_deref(), Some("https://t.me/morningwire/2"));

    let sports = &categories[0];
    assert_eq!(sports.items[0].publications_count, 1);
    assert_eq!(sports.items[0].uid, format!("story_{}", sports.items[0].id));
}

#[tokio::test]
async fn test_merge_is_order_independent() {
    let pipeline = Pipeline::new(ClusteringMode::Merge);
    let ids = pipeline
        .ingest_all(vec![post(1, RATES_AGAIN, ago(2)), post(2, RATES, ago(3))])
        .await;

    let a = pipeline.store.get_publication(ids[0]).await.unwrap();
    let b = pipeline.store.get_publication(ids[1]).await.unwrap();
    assert!(a.story_id.is_some());
    assert_eq!(a.story_id, b.story_id);
}

#[tokio::test]
async fn test_isolate_mode_is_one_to_one() {
    let pipeline = Pipeline::new(ClusteringMode::Isolate);
    let ids = pipeline
        .ingest_all(vec![
            post(1, RATES, ago(3)),
            post(2, RATES_AGAIN, ago(2)),
            post(3, FINAL, ago(1)),
        ])
        .await;

    assert_eq!(pipeline.scalar("SELECT COUNT(*) FROM stories"), 3);
    for id in ids {
        let story_id = pipeline.store.get_publication(id).await.unwrap().story_id.unwrap();
        assert_eq!(pipeline.store.get_story(story_id).await.unwrap().publication_count, 1);
    }
}

#[tokio::test]
async fn test_story_never_older_than_its_publications() {
    let pipeline = Pipeline::new(ClusteringMode::Merge);
    pipeline
        .ingest_all(vec![
            post(1, RATES, ago(10)),
            post(2, RATES_AGAIN, ago(1)),
            post(3, FINAL, ago(6)),
        ])
        .await;

    let violations = pipeline.scalar(
        "SELECT COUNT(*) FROM publications p JOIN stories s ON s.id = p.story_id
         WHERE s.last_updated_at < p.published_at",
    );
    assert_eq!(violations, 0);
}

#[tokio::test]
async fn test_reingesting_post_keeps_one_row() {
    let pipeline = Pipeline::new(ClusteringMode::Merge);
    let ingestor = pipeline.ingestor();
    let first = ingestor.ingest(post(9, RATES, ago(1))).await.unwrap();
    let second = ingestor.ingest(post(9, RATES, ago(1))).await.unwrap();

    assert!(matches!(first, IngestOutcome::Stored { .. }));
    assert!(matches!(second, IngestOutcome::Duplicate { message_id: 9, .. }));
    assert_eq!(pipeline.scalar("SELECT COUNT(*) FROM publications"), 1);
}

#[tokio::test]
async fn test_recluster_is_idempotent() {
    let pipeline = Pipeline::new(ClusteringMode::Merge);
    let ids = pipeline.ingest_all(vec![post(1, RATES, ago(1))]).await;
    let before = pipeline.store.get_publication(ids[0]).await.unwrap();

    pipeline.engine.cluster(ids[0]).await.unwrap();
    pipeline.engine.cluster(ids[0]).await.unwrap();

    let after = pipeline.store.get_publication(ids[0]).await.unwrap();
    assert_eq!(before, after);
    assert_eq!(pipeline.scalar("SELECT COUNT(*) FROM stories"), 1);
}

#[tokio::test]
async fn test_digest_without_subscriptions() {
    let pipeline = Pipeline::new(ClusteringMode::Merge);
    pipeline.ingest_all(vec![post(1, RATES, ago(1))]).await;

    let err = pipeline
        .aggregator()
        .get_digest(USER, &DigestRequest::from_config(&DigestConfig::default()))
        .await
        .unwrap_err();
    assert!(matches!(err, InsightError::NoSubscriptions(USER)));
}

#[tokio::test]
async fn test_time_digest_is_newest_first() {
    let pipeline = Pipeline::new(ClusteringMode::Merge);
    pipeline
        .ingest_all(vec![
            post(1, RATES, ago(8)),
            post(2, FINAL, ago(2)),
            post(3, "A post with no embedding", ago(5)),
        ])
        .await;
    pipeline.subscribe();

    let view = pipeline
        .aggregator()
        .get_digest(
            USER,
            &DigestRequest {
                group_by: GroupBy::Time,
                ..DigestRequest::from_config(&DigestConfig::default())
            },
        )
        .await
        .unwrap();
    let items = view.items();
    assert_eq!(items.len(), 3);
    assert!(items.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
}
