//! Pulse Insight crate - story clustering and personalized digests.
//!
//! Provides the news pipeline on top of `pulse-storage`:
//! - Incremental clustering of publications into stories by embedding distance
//! - A bounded work queue and worker pool feeding the clustering engine
//! - Reconciliation of publications left unclustered by failures
//! - Ingestion handoff from the transport into storage and the queue
//! - Category assignment for newly seen channels
//! - Category / channel / time digests with pagination and bucket previews
//! - Narrative text digests through a text-generation provider

pub mod classify;
pub mod cluster;
pub mod digest;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod markdown;
pub mod metadata;
pub mod narrative;
pub mod queue;
pub mod reconcile;
pub mod types;

pub use classify::{ChannelClassifier, HttpChannelClassifier};
pub use cluster::{ClusterOutcome, ClusteringEngine};
pub use digest::{DigestAggregator, EMPTY_TEXT_DIGEST, TEXT_DIGEST_UNAVAILABLE};
pub use error::InsightError;
pub use ingest::{IncomingPost, IngestOutcome, Ingestor};
pub use metadata::{HttpMetadataGenerator, MetadataGenerator, PlaceholderMetadata, StoryMetadata};
pub use narrative::{
    HttpNarrativeGenerator, NarrativeBrief, NarrativeGenerator, NarrativeInput, NarrativeStory,
};
pub use queue::{ClusterQueue, ClusterWorkerPool, PoolStats};
pub use reconcile::{recluster_pending, ReconcileReport, Reconciler};
pub use types::{DigestBucket, DigestItem, DigestRequest, DigestView, GroupBy, ItemKind, Source};
