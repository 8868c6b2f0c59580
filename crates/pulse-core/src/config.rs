use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{PulseError, Result};

/// Upper bound for every hour-denominated window (ten years).
pub const MAX_WINDOW_HOURS: u32 = 24 * 365 * 10;

/// Top-level configuration for the Pulse service.
///
/// Loaded from `~/.pulse/config.toml` by default. Every section is optional
/// in the file and falls back to its `Default` impl.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PulseConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub clustering: ClusteringConfig,
    #[serde(default)]
    pub digest: DigestConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl PulseConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: PulseConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Reject values the engines cannot run with.
    pub fn validate(&self) -> Result<()> {
        let threshold = self.clustering.similarity_threshold;
        if !(threshold > 0.0 && threshold <= 2.0) {
            return Err(PulseError::Config(format!(
                "clustering.similarity_threshold must be in (0, 2], got {}",
                threshold
            )));
        }
        if self.clustering.workers == 0 {
            return Err(PulseError::Config(
                "clustering.workers must be at least 1".to_string(),
            ));
        }
        if self.clustering.queue_capacity == 0 {
            return Err(PulseError::Config(
                "clustering.queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.digest.default_limit == 0 || self.digest.default_limit > self.digest.max_limit {
            return Err(PulseError::Config(format!(
                "digest.default_limit must be in 1..={}, got {}",
                self.digest.max_limit, self.digest.default_limit
            )));
        }
        for (name, hours) in [
            ("clustering.reconcile_window_hours", self.clustering.reconcile_window_hours),
            ("digest.default_lookback_hours", self.digest.default_lookback_hours),
            ("digest.text_digest_hours", self.digest.text_digest_hours),
            ("retention.story_max_age_hours", self.retention.story_max_age_hours),
        ] {
            if hours == 0 || hours > MAX_WINDOW_HOURS {
                return Err(PulseError::Config(format!(
                    "{} must be in 1..={}, got {}",
                    name, MAX_WINDOW_HOURS, hours
                )));
            }
        }
        if self.embedding.dimensions == 0 {
            return Err(PulseError::Config(
                "embedding.dimensions must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// General service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory holding the SQLite database.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.pulse/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// How a fresh publication is placed into the story space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusteringMode {
    /// Join the nearest story when it is within the similarity threshold.
    #[default]
    Merge,
    /// Every publication starts its own story.
    Isolate,
}

/// Clustering engine and work-queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    pub mode: ClusteringMode,
    /// Cosine distance strictly below this value merges into the nearest story.
    pub similarity_threshold: f64,
    /// Concurrent clustering tasks.
    pub workers: usize,
    /// Bounded queue length between ingestion and the worker pool.
    pub queue_capacity: usize,
    /// Unclustered publications younger than this are re-enqueued by reconciliation.
    pub reconcile_window_hours: u32,
    pub reconcile_interval_minutes: u64,
    /// Most publications re-enqueued by one reconciliation pass.
    pub reconcile_batch_limit: usize,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            mode: ClusteringMode::Merge,
            similarity_threshold: 0.15,
            workers: 4,
            queue_capacity: 1024,
            reconcile_window_hours: 48,
            reconcile_interval_minutes: 30,
            reconcile_batch_limit: 500,
        }
    }
}

/// Digest aggregation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DigestConfig {
    pub default_lookback_hours: u32,
    /// Window used by the narrative text digest.
    pub text_digest_hours: u32,
    pub default_limit: usize,
    pub max_limit: usize,
    /// Items shown per channel/category bucket before `has_more` kicks in.
    pub bucket_preview: usize,
    /// Publications materialized as sources for each story.
    pub sources_per_story: usize,
    /// Words kept in a brief's display title.
    pub brief_title_words: usize,
    /// Case-insensitive substrings marking author/columnist categories.
    pub author_markers: Vec<String>,
    /// Bucket label for items without a category or channel.
    pub fallback_category: String,
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            default_lookback_hours: 120,
            text_digest_hours: 24,
            default_limit: 20,
            max_limit: 100,
            bucket_preview: 2,
            sources_per_story: 5,
            brief_title_words: 8,
            author_markers: vec![
                "author".to_string(),
                "columnist".to_string(),
                "автор".to_string(),
            ],
            fallback_category: "📰 Other".to_string(),
        }
    }
}

/// Retention sweep settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Stories whose last update is older than this are deleted with their publications.
    pub story_max_age_hours: u32,
    pub sweep_interval_minutes: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            story_max_age_hours: 24,
            sweep_interval_minutes: 60,
        }
    }
}

/// Embedding provider settings (OpenAI-compatible `/embeddings`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Base URL; empty selects the deterministic offline embedder.
    pub endpoint: String,
    pub model: String,
    /// Vector width. Changing it requires a fresh database.
    pub dimensions: usize,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub max_input_chars: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            model: "text-embedding-004".to_string(),
            dimensions: 768,
            api_key_env: "PULSE_EMBEDDING_API_KEY".to_string(),
            timeout_secs: 30,
            max_input_chars: 8000,
        }
    }
}

/// Text-generation provider settings (OpenAI-compatible chat completions).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    /// Base URL; empty disables generation and uses placeholders.
    pub endpoint: String,
    pub model: String,
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub max_input_chars: usize,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "PULSE_LLM_API_KEY".to_string(),
            timeout_secs: 60,
            max_input_chars: 2000,
        }
    }
}

/// Channel lookup cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub channel_capacity: usize,
    /// Entries older than this are re-read from the database.
    pub channel_refresh_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            channel_refresh_secs: 300,
        }
    }
}
