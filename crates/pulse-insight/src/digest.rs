//! Personalized digests.
//!
//! A digest page is built from two independent queries over the user's
//! subscribed channels: stories updated within the lookback window, and
//! "briefs" (publications whose story is not on this page, or that have no
//! story yet). The two lists are then merged into a time line or grouped
//! into channel or category buckets.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use pulse_core::config::DigestConfig;
use pulse_core::types::{hours_before, ChannelPublication, Story};
use pulse_storage::{BriefQuery, PinnedFilter, StoryQuery, StoryStore};
use tracing::{debug, info, warn};

use crate::error::InsightError;
use crate::markdown::{brief_title, strip_markdown};
use crate::narrative::{NarrativeBrief, NarrativeGenerator, NarrativeInput, NarrativeStory};
use crate::types::{DigestBucket, DigestItem, DigestRequest, DigestView, GroupBy, ItemKind, Source};

/// Reply when the text digest window holds nothing.
pub const EMPTY_TEXT_DIGEST: &str =
    "Nothing notable happened in your channels over the last 24 hours.";

/// Reply when the narrative generator fails.
pub const TEXT_DIGEST_UNAVAILABLE: &str =
    "Sorry, the digest could not be written right now. Please try again later.";

/// Builds digests for one user at a time. Holds no state between calls.
pub struct DigestAggregator {
    store: Arc<dyn StoryStore>,
    config: DigestConfig,
}

impl DigestAggregator {
    pub fn new(store: Arc<dyn StoryStore>, config: DigestConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &DigestConfig {
        &self.config
    }

    /// Digest page anchored at the current time.
    pub async fn get_digest(
        &self,
        user_id: i64,
        request: &DigestRequest,
    ) -> Result<DigestView, InsightError> {
        self.get_digest_at(user_id, request, Utc::now()).await
    }

    /// Digest page with the lookback window anchored at `now`.
    pub async fn get_digest_at(
        &self,
        user_id: i64,
        request: &DigestRequest,
        now: DateTime<Utc>,
    ) -> Result<DigestView, InsightError> {
        let channel_ids = self.store.subscribed_channel_ids(user_id).await?;
        if channel_ids.is_empty() {
            debug!(user_id, "Digest requested without subscriptions");
            return Err(InsightError::NoSubscriptions(user_id));
        }

        let limit = request.limit.clamp(1, self.config.max_limit.max(1));
        let since = hours_before(now, request.lookback_hours);
        let pinned = pinned_filter(request);

        let stories = self
            .store
            .query_stories(StoryQuery {
                channel_ids: channel_ids.clone(),
                since,
                pinned: pinned.clone(),
                limit,
                offset: request.offset,
            })
            .await?;

        let mut story_items = Vec::with_capacity(stories.len());
        for story in &stories {
            let sources = self
                .store
                .story_sources(story.id, channel_ids.clone(), self.config.sources_per_story)
                .await?;
            story_items.push(self.story_item(story, &sources));
        }

        let briefs = self
            .store
            .query_unlinked_publications(BriefQuery {
                channel_ids,
                since,
                exclude_story_ids: stories.iter().map(|s| s.id).collect(),
                pinned,
                limit,
                offset: request.offset,
            })
            .await?;
        let brief_items: Vec<DigestItem> = briefs.iter().map(|b| self.brief_item(b)).collect();

        // Over-approximation: a full page from either query may be the last one.
        let has_more = stories.len() == limit || briefs.len() == limit;

        debug!(
            user_id,
            group_by = %request.group_by,
            stories = story_items.len(),
            briefs = brief_items.len(),
            "Digest assembled"
        );

        Ok(match request.group_by {
            GroupBy::Time => {
                let mut items = story_items;
                items.extend(brief_items);
                sort_newest_first(&mut items);
                DigestView::Time {
                    total: items.len(),
                    items,
                    has_more,
                }
            }
            GroupBy::Channel => {
                let items = story_items.into_iter().chain(brief_items);
                let mut channels = self.bucketize(items, |item| {
                    item.sources.first().map(|s| s.name.clone())
                });
                // Plain code-point order: uppercase titles sort first.
                channels.sort_by(|a, b| a.name.cmp(&b.name));
                DigestView::Channel {
                    total_channels: channels.len(),
                    channels,
                    has_more,
                }
            }
            GroupBy::Category => {
                let total_stories = story_items.len();
                let total_briefs = brief_items.len();
                let items = story_items.into_iter().chain(brief_items);
                let mut categories = self.bucketize(items, |item| Some(item.category.clone()));
                rank_category_buckets(&mut categories, &request.pinned, &self.config.author_markers);
                DigestView::Category {
                    categories,
                    has_more,
                    total_stories,
                    total_briefs,
                }
            }
        })
    }

    /// Narrative digest of the last `text_digest_hours`.
    ///
    /// Generator failures degrade to [`TEXT_DIGEST_UNAVAILABLE`]; a user
    /// without subscriptions still gets [`InsightError::NoSubscriptions`].
    pub async fn get_text_digest(
        &self,
        user_id: i64,
        generator: &dyn NarrativeGenerator,
    ) -> Result<String, InsightError> {
        let request = DigestRequest {
            lookback_hours: self.config.text_digest_hours,
            ..DigestRequest::from_config(&self.config)
        };
        let view = self.get_digest(user_id, &request).await?;
        let input = narrative_input(&view);

        if input.is_empty() {
            return Ok(EMPTY_TEXT_DIGEST.to_string());
        }

        info!(
            user_id,
            top_stories = input.top_stories.len(),
            other_news = input.other_news.len(),
            "Writing text digest"
        );
        match generator.write_digest(&input).await {
            Ok(text) => Ok(text),
            Err(e) => {
                warn!(user_id, error = %e, "Text digest generation failed");
                Ok(TEXT_DIGEST_UNAVAILABLE.to_string())
            }
        }
    }

    fn story_item(&self, story: &Story, sources: &[ChannelPublication]) -> DigestItem {
        let sources: Vec<Source> = sources
            .iter()
            .map(|s| Source {
                name: s.channel_title.clone(),
                url: s.publication.url.clone(),
            })
            .collect();
        DigestItem {
            uid: format!("story_{}", story.id),
            id: story.id,
            kind: ItemKind::Story,
            title: strip_markdown(&story.title),
            summary: strip_markdown(&story.summary),
            category: self.category_or_fallback(story.category.as_deref()),
            score: story.confidence,
            url: sources.first().and_then(|s| s.url.clone()),
            sources,
            publications_count: story.publication_count,
            timestamp: story.last_updated_at,
        }
    }

    fn brief_item(&self, brief: &ChannelPublication) -> DigestItem {
        let publication = &brief.publication;
        let text = strip_markdown(&publication.content);
        DigestItem {
            uid: format!("brief_{}", publication.id),
            id: publication.id,
            kind: ItemKind::Brief,
            title: brief_title(&text, self.config.brief_title_words),
            summary: text,
            category: self.category_or_fallback(publication.category.as_deref()),
            score: 0.0,
            sources: vec![Source {
                name: brief.channel_title.clone(),
                url: publication.url.clone(),
            }],
            url: publication.url.clone(),
            publications_count: 1,
            timestamp: publication.published_at,
        }
    }

    fn category_or_fallback(&self, category: Option<&str>) -> String {
        category
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.config.fallback_category.clone())
    }

    /// Group items by key, newest first inside each bucket, keeping only the
    /// preview items. Bucket order is left to the caller.
    fn bucketize<I, F>(&self, items: I, key: F) -> Vec<DigestBucket>
    where
        I: IntoIterator<Item = DigestItem>,
        F: Fn(&DigestItem) -> Option<String>,
    {
        let mut groups: BTreeMap<String, Vec<DigestItem>> = BTreeMap::new();
        for item in items {
            let name = key(&item)
                .filter(|k| !k.trim().is_empty())
                .unwrap_or_else(|| self.config.fallback_category.clone());
            groups.entry(name).or_default().push(item);
        }

        groups
            .into_iter()
            .map(|(name, mut items)| {
                sort_newest_first(&mut items);
                let total_count = items.len();
                items.truncate(self.config.bucket_preview);
                DigestBucket {
                    name,
                    has_more: total_count > self.config.bucket_preview,
                    total_count,
                    items,
                }
            })
            .collect()
    }
}

fn pinned_filter(request: &DigestRequest) -> Option<PinnedFilter> {
    if request.pinned.is_empty() {
        return None;
    }
    match request.group_by {
        GroupBy::Category => Some(PinnedFilter::Categories(request.pinned.clone())),
        GroupBy::Channel => Some(PinnedFilter::ChannelTitles(request.pinned.clone())),
        GroupBy::Time => None,
    }
}

/// Stable sort by timestamp, newest first.
fn sort_newest_first(items: &mut [DigestItem]) {
    items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
}

/// Order category buckets: pinned categories in pinned order, then
/// categories carrying an author marker, then everything else. Ties break
/// alphabetically.
pub fn rank_category_buckets(buckets: &mut [DigestBucket], pinned: &[String], markers: &[String]) {
    let markers: Vec<String> = markers.iter().map(|m| m.to_lowercase()).collect();
    let rank = |name: &str| -> (u8, usize) {
        if let Some(pos) = pinned.iter().position(|p| p == name) {
            return (0, pos);
        }
        let lower = name.to_lowercase();
        if markers.iter().any(|m| !m.is_empty() && lower.contains(m.as_str())) {
            (1, 0)
        } else {
            (2, 0)
        }
    };
    buckets.sort_by(|a, b| match rank(&a.name).cmp(&rank(&b.name)) {
        Ordering::Equal => a.name.cmp(&b.name),
        other => other,
    });
}

/// Visible items of a view split into stories and briefs, each uid once.
fn narrative_input(view: &DigestView) -> NarrativeInput {
    let mut seen = HashSet::new();
    let mut input = NarrativeInput::default();
    for item in view.items() {
        if !seen.insert(item.uid.as_str()) {
            continue;
        }
        match item.kind {
            ItemKind::Story => input.top_stories.push(NarrativeStory {
                title: item.title.clone(),
                summary: item.summary.clone(),
                sources: item.sources.iter().map(|s| s.name.clone()).collect(),
                url: item.url.clone(),
            }),
            ItemKind::Brief => input.other_news.push(NarrativeBrief {
                channel: item
                    .sources
                    .first()
                    .map(|s| s.name.clone())
                    .unwrap_or_default(),
                text: item.summary.clone(),
                url: item.url.clone(),
            }),
        }
    }
    input
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use pulse_core::types::{NewChannel, NewPublication, NewStory, StoryStatus};
    use pulse_storage::{ChannelRepository, Database, SqliteStoryStore, SubscriptionRepository};
    use std::sync::Mutex;

    const USER: i64 = 77;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 10, 12, 0, 0).unwrap()
    }

    fn hours_ago(h: i64) -> DateTime<Utc> {
        now() - Duration::hours(h)
    }

    struct Fixture {
        db: Arc<Database>,
        store: Arc<SqliteStoryStore>,
        next_message: i64,
    }

    impl Fixture {
        fn new() -> Self {
            let db = Arc::new(Database::in_memory().unwrap());
            Self {
                store: Arc::new(SqliteStoryStore::new(Arc::clone(&db))),
                db,
                next_message: 0,
            }
        }

        fn channel(&self, platform_id: i64, title: &str, subscribe: bool) -> i64 {
            let id = ChannelRepository::new(Arc::clone(&self.db))
                .upsert(&NewChannel {
                    platform_id,
                    title: title.to_string(),
                    handle: Some(format!("ch{}", platform_id)),
                    category: None,
                })
                .unwrap()
                .id;
            if subscribe {
                SubscriptionRepository::new(Arc::clone(&self.db))
                    .subscribe(USER, id)
                    .unwrap();
            }
            id
        }

        async fn publication(&mut self, channel_id: i64, text: &str, at: DateTime<Utc>, views: i64) -> i64 {
            self.next_message += 1;
            self.store
                .insert_publication(NewPublication {
                    channel_id,
                    message_id: self.next_message,
                    content: text.to_string(),
                    url: Some(format!("https://t.me/c{}/{}", channel_id, self.next_message)),
                    published_at: at,
                    views,
                })
                .await
                .unwrap()
        }

        async fn story(&self, publication_id: i64, title: &str, category: &str, at: DateTime<Utc>) -> i64 {
            self.store
                .commit_new_story(
                    publication_id,
                    NewStory {
                        title: title.to_string(),
                        summary: format!("About [{}](https://x.test)", title),
                        category: Some(category.to_string()),
                        embedding: vec![1.0, 0.0],
                        first_seen_at: at,
                        last_updated_at: at,
                        confidence: 0.8,
                        status: StoryStatus::Active,
                    },
                )
                .await
                .unwrap()
                .unwrap()
        }

        fn aggregator(&self) -> DigestAggregator {
            DigestAggregator::new(self.store.clone(), DigestConfig::default())
        }
    }

    fn request(group_by: GroupBy) -> DigestRequest {
        DigestRequest {
            lookback_hours: 24,
            group_by,
            pinned: vec![],
            limit: 20,
            offset: 0,
        }
    }

    #[tokio::test]
    async fn test_no_subscriptions() {
        let fx = Fixture::new();
        fx.channel(1, "Unwatched", false);
        let err = fx
            .aggregator()
            .get_digest_at(USER, &request(GroupBy::Category), now())
            .await
            .unwrap_err();
        assert!(matches!(err, InsightError::NoSubscriptions(USER)));
        assert!(err.is_user_facing());
    }

    #[tokio::test]
    async fn test_empty_window_is_not_an_error() {
        let fx = Fixture::new();
        fx.channel(1, "Quiet", true);
        let view = fx
            .aggregator()
            .get_digest_at(USER, &request(GroupBy::Time), now())
            .await
            .unwrap();
        assert_eq!(
            view,
            DigestView::Time {
                items: vec![],
                has_more: false,
                total: 0
            }
        );
    }

    #[tokio::test]
    async fn test_unbounded_lookback_saturates() {
        let mut fx = Fixture::new();
        let alpha = fx.channel(1, "Alpha", true);
        fx.publication(alpha, "very old news", hours_ago(24 * 400), 0).await;

        let request = DigestRequest {
            lookback_hours: u32::MAX,
            ..request(GroupBy::Time)
        };
        let view = fx.aggregator().get_digest_at(USER, &request, now()).await.unwrap();
        assert_eq!(view.items().len(), 1);
    }

    #[tokio::test]
    async fn test_story_item_materialization() {
        let mut fx = Fixture::new();
        let alpha = fx.channel(1, "Alpha", true);
        let beta = fx.channel(2, "Beta", true);
        let hidden = fx.channel(3, "Hidden", false);

        let p1 = fx.publication(alpha, "first", hours_ago(5), 10).await;
        let sid = fx.story(p1, "**Rates** cut", "💰 Economy", hours_ago(5)).await;
        let p2 = fx.publication(beta, "second", hours_ago(4), 900).await;
        fx.store.commit_link(p2, sid, Some("💰 Economy".into()), hours_ago(4)).await.unwrap();
        let p3 = fx.publication(hidden, "third", hours_ago(3), 5000).await;
        fx.store.commit_link(p3, sid, Some("💰 Economy".into()), hours_ago(3)).await.unwrap();

        let view = fx
            .aggregator()
            .get_digest_at(USER, &request(GroupBy::Time), now())
            .await
            .unwrap();
        let items = view.items();
        assert_eq!(items.len(), 1);
        let story = items[0];
        assert_eq!(story.uid, format!("story_{}", sid));
        assert_eq!(story.kind, ItemKind::Story);
        assert_eq!(story.title, "Rates cut");
        assert_eq!(story.summary, "About Rates cut");
        assert_eq!(story.score, 0.8);
        assert_eq!(story.publications_count, 3);
        assert_eq!(story.timestamp, hours_ago(3));
        let names: Vec<&str> = story.sources.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Beta", "Alpha"]);
        assert_eq!(story.url, story.sources[0].url);
    }

    #[tokio::test]
    async fn test_time_mode_merges_and_sorts() {
        let mut fx = Fixture::new();
        let alpha = fx.channel(1, "Alpha", true);

        let p1 = fx.publication(alpha, "story post", hours_ago(6), 0).await;
        fx.story(p1, "Story", "⚽ Sports", hours_ago(2)).await;
        fx.publication(alpha, "loose post one", hours_ago(1), 0).await;
        fx.publication(alpha, "loose post two", hours_ago(4), 0).await;
        fx.publication(alpha, "too old", hours_ago(30), 0).await;

        let view = fx
            .aggregator()
            .get_digest_at(USER, &request(GroupBy::Time), now())
            .await
            .unwrap();
        let items = view.items();
        let kinds: Vec<ItemKind> = items.iter().map(|i| i.kind).collect();
        assert_eq!(kinds, vec![ItemKind::Brief, ItemKind::Story, ItemKind::Brief]);
        assert!(items.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
        assert_eq!(items[0].title, "loose post one");
        assert_eq!(items[0].publications_count, 1);
        assert_eq!(items[0].category, "📰 Other");
    }

    #[tokio::test]
    async fn test_channel_mode_buckets_alphabetical_with_preview() {
        let mut fx = Fixture::new();
        let zulu = fx.channel(1, "zulu", true);
        let alpha = fx.channel(2, "Alpha", true);
        for h in 1..=3 {
            fx.publication(zulu, &format!("zulu {}", h), hours_ago(h), 0).await;
        }
        fx.publication(alpha, "alpha news", hours_ago(2), 0).await;

        let view = fx
            .aggregator()
            .get_digest_at(USER, &request(GroupBy::Channel), now())
            .await
            .unwrap();
        let DigestView::Channel {
            channels,
            total_channels,
            ..
        } = view
        else {
            panic!("expected channel view");
        };
        assert_eq!(total_channels, 2);
        assert_eq!(channels[0].name, "Alpha");
        assert_eq!(channels[1].name, "zulu");
        assert_eq!(channels[1].total_count, 3);
        assert!(channels[1].has_more);
        assert_eq!(channels[1].items.len(), 2);
        assert_eq!(channels[1].items[0].title, "zulu 1");
        assert!(!channels[0].has_more);
    }

    #[tokio::test]
    async fn test_channel_mode_orders_by_code_point() {
        let mut fx = Fixture::new();
        let lower = fx.channel(1, "alpha", true);
        let upper = fx.channel(2, "Beta", true);
        fx.publication(lower, "lower news", hours_ago(1), 0).await;
        fx.publication(upper, "upper news", hours_ago(2), 0).await;

        let view = fx
            .aggregator()
            .get_digest_at(USER, &request(GroupBy::Channel), now())
            .await
            .unwrap();
        let DigestView::Channel { channels, .. } = view else {
            panic!("expected channel view");
        };
        let names: Vec<&str> = channels.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Beta", "alpha"]);
    }

    #[tokio::test]
    async fn test_category_mode_counts_and_pinned_filter() {
        let mut fx = Fixture::new();
        let alpha = fx.channel(1, "Alpha", true);
        let p1 = fx.publication(alpha, "a", hours_ago(3), 0).await;
        fx.story(p1, "Economy story", "💰 Economy", hours_ago(3)).await;
        let p2 = fx.publication(alpha, "b", hours_ago(2), 0).await;
        fx.story(p2, "Sports story", "⚽ Sports", hours_ago(2)).await;
        fx.publication(alpha, "unclustered", hours_ago(1), 0).await;

        let aggregator = fx.aggregator();
        let view = aggregator
            .get_digest_at(USER, &request(GroupBy::Category), now())
            .await
            .unwrap();
        let DigestView::Category {
            categories,
            total_stories,
            total_briefs,
            ..
        } = &view
        else {
            panic!("expected category view");
        };
        assert_eq!(*total_stories, 2);
        assert_eq!(*total_briefs, 1);
        let names: Vec<&str> = categories.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["⚽ Sports", "💰 Economy", "📰 Other"]);

        let pinned = DigestRequest {
            pinned: vec!["💰 Economy".to_string()],
            ..request(GroupBy::Category)
        };
        let view = aggregator.get_digest_at(USER, &pinned, now()).await.unwrap();
        let names: Vec<&str> = view.buckets().iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["💰 Economy"]);
    }

    #[tokio::test]
    async fn test_has_more_and_offset() {
        let mut fx = Fixture::new();
        let alpha = fx.channel(1, "Alpha", true);
        for h in 1..=3 {
            fx.publication(alpha, &format!("post {}", h), hours_ago(h), 0).await;
        }
        let aggregator = fx.aggregator();

        let first = DigestRequest {
            limit: 2,
            ..request(GroupBy::Time)
        };
        let page = aggregator.get_digest_at(USER, &first, now()).await.unwrap();
        assert!(page.has_more());
        assert_eq!(page.items().len(), 2);

        let second = DigestRequest { offset: 2, ..first };
        let page = aggregator.get_digest_at(USER, &second, now()).await.unwrap();
        assert!(!page.has_more());
        assert_eq!(page.items()[0].title, "post 3");
    }

    #[tokio::test]
    async fn test_limit_is_clamped() {
        let mut fx = Fixture::new();
        let alpha = fx.channel(1, "Alpha", true);
        fx.publication(alpha, "only", hours_ago(1), 0).await;
        let zero = DigestRequest {
            limit: 0,
            ..request(GroupBy::Time)
        };
        let page = fx.aggregator().get_digest_at(USER, &zero, now()).await.unwrap();
        assert_eq!(page.items().len(), 1);
        assert!(page.has_more());
    }

    fn bucket(name: &str) -> DigestBucket {
        DigestBucket {
            name: name.to_string(),
            items: vec![],
            has_more: false,
            total_count: 0,
        }
    }

    #[test]
    fn test_rank_category_buckets() {
        let mut buckets = vec![bucket("Sports"), bucket("Politics - author"), bucket("Economy")];
        rank_category_buckets(
            &mut buckets,
            &["Economy".to_string()],
            &DigestConfig::default().author_markers,
        );
        let names: Vec<&str> = buckets.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["Economy", "Politics - author", "Sports"]);
    }

    #[test]
    fn test_rank_keeps_pinned_order() {
        let mut buckets = vec![bucket("A"), bucket("B"), bucket("✍️ Author columns"), bucket("C")];
        rank_category_buckets(
            &mut buckets,
            &["C".to_string(), "A".to_string()],
            &["AUTHOR".to_string()],
        );
        let names: Vec<&str> = buckets.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["C", "A", "✍️ Author columns", "B"]);
    }

    struct RecordingNarrative {
        inputs: Mutex<Vec<NarrativeInput>>,
        fail: bool,
    }

    #[async_trait]
    impl NarrativeGenerator for RecordingNarrative {
        async fn write_digest(&self, input: &NarrativeInput) -> Result<String, InsightError> {
            self.inputs.lock().unwrap().push(input.clone());
            if self.fail {
                Err(InsightError::NarrativeUnavailable("timeout".to_string()))
            } else {
                Ok("Today: rates were cut.".to_string())
            }
        }
    }

    #[tokio::test]
    async fn test_text_digest_empty_window_skips_generator() {
        let fx = Fixture::new();
        fx.channel(1, "Quiet", true);
        let generator = RecordingNarrative {
            inputs: Mutex::new(vec![]),
            fail: false,
        };
        let text = fx.aggregator().get_text_digest(USER, &generator).await.unwrap();
        assert_eq!(text, EMPTY_TEXT_DIGEST);
        assert!(generator.inputs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_text_digest_passes_stories_and_briefs() {
        let mut fx = Fixture::new();
        let alpha = fx.channel(1, "Alpha", true);
        let p1 = fx.publication(alpha, "a", Utc::now() - Duration::hours(2), 0).await;
        fx.story(p1, "Rates cut", "💰 Economy", Utc::now() - Duration::hours(2)).await;
        fx.publication(alpha, "a brief", Utc::now() - Duration::hours(1), 0).await;

        let generator = RecordingNarrative {
            inputs: Mutex::new(vec![]),
            fail: false,
        };
        let text = fx.aggregator().get_text_digest(USER, &generator).await.unwrap();
        assert_eq!(text, "Today: rates were cut.");

        let inputs = generator.inputs.lock().unwrap();
        assert_eq!(inputs[0].top_stories.len(), 1);
        assert_eq!(inputs[0].top_stories[0].sources, vec!["Alpha".to_string()]);
        assert_eq!(inputs[0].other_news.len(), 1);
        assert_eq!(inputs[0].other_news[0].text, "a brief");
    }

    #[tokio::test]
    async fn test_text_digest_generator_failure_degrades() {
        let mut fx = Fixture::new();
        let alpha = fx.channel(1, "Alpha", true);
        fx.publication(alpha, "a brief", Utc::now() - Duration::hours(1), 0).await;
        let generator = RecordingNarrative {
            inputs: Mutex::new(vec![]),
            fail: true,
        };
        let text = fx.aggregator().get_text_digest(USER, &generator).await.unwrap();
        assert_eq!(text, TEXT_DIGEST_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_text_digest_requires_subscriptions() {
        let fx = Fixture::new();
        let generator = RecordingNarrative {
            inputs: Mutex::new(vec![]),
            fail: false,
        };
        let err = fx.aggregator().get_text_digest(USER, &generator).await.unwrap_err();
        assert!(matches!(err, InsightError::NoSubscriptions(_)));
    }
}
