//! Story clustering.
//!
//! [`ClusteringEngine::cluster`] places one publication into the story
//! space. It embeds the text, optionally joins the nearest story when it is
//! close enough, and otherwise creates a new story described by the metadata
//! generator. The final write is a single store transaction, so an abandoned
//! call leaves the publication unclustered and safe to retry.

use std::sync::Arc;

use pulse_core::category::canonicalize;
use pulse_core::config::{ClusteringConfig, ClusteringMode};
use pulse_core::types::{NewStory, Publication, StoryStatus};
use pulse_storage::StoryStore;
use pulse_vector::embedding::DynEmbeddingService;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::InsightError;
use crate::metadata::{MetadataGenerator, StoryMetadata};

/// What a `cluster` call did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ClusterOutcome {
    /// The publication already had a story; nothing was written.
    AlreadyClustered { story_id: i64 },
    /// Joined an existing story at the given cosine distance.
    Linked { story_id: i64, distance: f64 },
    /// Started a new story.
    Created { story_id: i64 },
}

impl ClusterOutcome {
    pub fn story_id(&self) -> i64 {
        match self {
            ClusterOutcome::AlreadyClustered { story_id }
            | ClusterOutcome::Linked { story_id, .. }
            | ClusterOutcome::Created { story_id } => *story_id,
        }
    }
}

/// Assigns publications to stories.
pub struct ClusteringEngine {
    store: Arc<dyn StoryStore>,
    embedder: Arc<dyn DynEmbeddingService>,
    metadata: Arc<dyn MetadataGenerator>,
    config: ClusteringConfig,
}

impl ClusteringEngine {
    pub fn new(
        store: Arc<dyn StoryStore>,
        embedder: Arc<dyn DynEmbeddingService>,
        metadata: Arc<dyn MetadataGenerator>,
        config: ClusteringConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            metadata,
            config,
        }
    }

    pub fn mode(&self) -> ClusteringMode {
        self.config.mode
    }

    /// Cluster one publication.
    ///
    /// Idempotent: a publication that already has a story is left alone.
    /// Embedding and storage failures abort without writing anything.
    pub async fn cluster(&self, publication_id: i64) -> Result<ClusterOutcome, InsightError> {
        let publication = self.store.get_publication(publication_id).await?;
        if let Some(story_id) = publication.story_id {
            debug!(publication_id, story_id, "Publication already clustered");
            return Ok(ClusterOutcome::AlreadyClustered { story_id });
        }

        let text = publication.content.trim();
        if text.is_empty() {
            return Err(InsightError::EmptyContent(publication_id));
        }

        let vector = self
            .embedder
            .embed_boxed(text)
            .await
            .map_err(|e| InsightError::EmbeddingUnavailable(e.to_string()))?;
        if vector.is_empty() || vector.iter().any(|x| !x.is_finite()) {
            return Err(InsightError::EmbeddingUnavailable(format!(
                "non-finite embedding for publication {}",
                publication_id
            )));
        }

        if self.config.mode == ClusteringMode::Merge {
            if let Some(outcome) = self.try_merge(&publication, &vector).await? {
                return Ok(outcome);
            }
        }

        self.create_story(&publication, text, vector).await
    }

    /// Link to the nearest story if it is strictly within the threshold.
    async fn try_merge(
        &self,
        publication: &Publication,
        vector: &[f32],
    ) -> Result<Option<ClusterOutcome>, InsightError> {
        let Some((story, distance)) = self.store.find_nearest_story(vector).await? else {
            return Ok(None);
        };
        // NaN never merges.
        if !(distance < self.config.similarity_threshold) {
            debug!(
                publication_id = publication.id,
                nearest_story = story.id,
                distance,
                "Nearest story too far, creating a new one"
            );
            return Ok(None);
        }

        let linked = self
            .store
            .commit_link(
                publication.id,
                story.id,
                story.category.clone(),
                publication.published_at,
            )
            .await?;
        if !linked {
            return self.already_clustered(publication.id).await.map(Some);
        }

        info!(
            publication_id = publication.id,
            story_id = story.id,
            distance,
            "Publication linked to story"
        );
        Ok(Some(ClusterOutcome::Linked {
            story_id: story.id,
            distance,
        }))
    }

    async fn create_story(
        &self,
        publication: &Publication,
        text: &str,
        vector: Vec<f32>,
    ) -> Result<ClusterOutcome, InsightError> {
        let (metadata, generated) = match self.metadata.describe(text).await {
            Ok(meta) => {
                let generated = meta != StoryMetadata::placeholder();
                (meta, generated)
            }
            Err(e) => {
                warn!(
                    publication_id = publication.id,
                    error = %e,
                    "Metadata generation failed, using placeholder"
                );
                (StoryMetadata::placeholder(), false)
            }
        };

        let category = canonicalize(&metadata.category);
        let story = NewStory {
            title: metadata.title,
            summary: metadata.summary,
            category: Some(category.label().to_string()),
            embedding: vector,
            first_seen_at: publication.published_at,
            last_updated_at: publication.published_at,
            confidence: if generated { 1.0 } else { 0.0 },
            status: StoryStatus::Active,
        };

        match self.store.commit_new_story(publication.id, story).await? {
            Some(story_id) => {
                info!(
                    publication_id = publication.id,
                    story_id,
                    category = category.label(),
                    "Story created"
                );
                Ok(ClusterOutcome::Created { story_id })
            }
            None => self.already_clustered(publication.id).await,
        }
    }

    /// Another call linked the publication first; report its story.
    async fn already_clustered(&self, publication_id: i64) -> Result<ClusterOutcome, InsightError> {
        let publication = self.store.get_publication(publication_id).await?;
        match publication.story_id {
            Some(story_id) => {
                debug!(publication_id, story_id, "Publication clustered concurrently");
                Ok(ClusterOutcome::AlreadyClustered { story_id })
            }
            None => Err(InsightError::StoreUnavailable(format!(
                "publication {} lost its story link",
                publication_id
            ))),
        }
    }
}
