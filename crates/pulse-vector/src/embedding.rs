//! Embedding service trait and implementations.
//!
//! - `HttpEmbeddingService` calls an OpenAI-compatible `/embeddings`
//!   endpoint. This is the production backend.
//! - `MockEmbedding` provides deterministic hash-based vectors for offline
//!   runs and tests.
//! - `FixedEmbedding` returns hand-picked vectors per text so tests can
//!   control exact distances.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use pulse_core::config::EmbeddingConfig;
use pulse_core::error::PulseError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Service for generating text embeddings.
///
/// Implementations convert text into fixed-dimensional vectors. Stories and
/// publications are compared by cosine distance over these vectors, so every
/// vector in one deployment must come from the same service.
pub trait EmbeddingService: Send + Sync {
    /// Generate an embedding vector for the given text.
    fn embed(
        &self,
        text: &str,
    ) -> impl std::future::Future<Output = Result<Vec<f32>, PulseError>> + Send;

    /// Return the dimensionality of vectors produced by this service.
    fn dimensions(&self) -> usize;
}

/// Object-safe version of [`EmbeddingService`] for dynamic dispatch.
///
/// `EmbeddingService::embed` returns `impl Future`, which is not
/// object-safe. This trait boxes the future so engines can hold an
/// `Arc<dyn DynEmbeddingService>` chosen at startup.
pub trait DynEmbeddingService: Send + Sync {
    /// Generate an embedding vector for the given text (boxed future).
    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<f32>, PulseError>> + Send + 'a>>;

    /// Return the dimensionality of vectors produced by this service.
    fn dimensions(&self) -> usize;
}

impl<T: EmbeddingService> DynEmbeddingService for T {
    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<f32>, PulseError>> + Send + 'a>> {
        Box::pin(self.embed(text))
    }

    fn dimensions(&self) -> usize {
        EmbeddingService::dimensions(self)
    }
}

// ---------------------------------------------------------------------------
// HttpEmbeddingService - OpenAI-compatible /embeddings
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
    dimensions: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Embedding client for any OpenAI-compatible embeddings API.
pub struct HttpEmbeddingService {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    dimensions: usize,
    max_input_chars: usize,
}

impl std::fmt::Debug for HttpEmbeddingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEmbeddingService")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_deref().map(|_| "<redacted>"))
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

impl HttpEmbeddingService {
    /// Build a client from config, reading the API key from `api_key_env`.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, PulseError> {
        if config.endpoint.trim().is_empty() {
            return Err(PulseError::Config(
                "embedding.endpoint is not set".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PulseError::Config(format!("Failed to create HTTP client: {}", e)))?;

        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.is_empty());

        info!(
            endpoint = %config.endpoint,
            model = %config.model,
            dimensions = config.dimensions,
            "HTTP embedding service configured"
        );

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            dimensions: config.dimensions,
            max_input_chars: config.max_input_chars,
        })
    }

    async fn request(&self, text: &str) -> Result<Vec<f32>, PulseError> {
        if text.trim().is_empty() {
            return Err(PulseError::Embedding("Cannot embed empty text".to_string()));
        }

        let input = truncate_chars(text, self.max_input_chars);
        let body = EmbeddingRequest {
            model: &self.model,
            input,
            dimensions: self.dimensions,
        };

        let mut request = self
            .client
            .post(format!("{}/embeddings", self.endpoint))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PulseError::Embedding(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(PulseError::Embedding(format!(
                "Provider returned {}: {}",
                status, detail
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| PulseError::Embedding(format!("Malformed response: {}", e)))?;

        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| PulseError::Embedding("Response contained no vectors".to_string()))?;

        let vector = check_vector(vector, self.dimensions)?;

        debug!(chars = input.chars().count(), "Text embedded");
        Ok(vector)
    }
}

impl EmbeddingService for HttpEmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, PulseError> {
        self.request(text).await
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Reject vectors of the wrong width or with non-finite components.
fn check_vector(vector: Vec<f32>, dimensions: usize) -> Result<Vec<f32>, PulseError> {
    if vector.len() != dimensions {
        return Err(PulseError::Embedding(format!(
            "Expected {} dimensions, provider returned {}",
            dimensions,
            vector.len()
        )));
    }
    if let Some(idx) = vector.iter().position(|x| !x.is_finite()) {
        return Err(PulseError::Embedding(format!(
            "Provider returned a non-finite component at index {}",
            idx
        )));
    }
    Ok(vector)
}

/// Longest prefix of `text` holding at most `max_chars` characters.
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

// ---------------------------------------------------------------------------
// MockEmbedding - deterministic hash-based vectors
// ---------------------------------------------------------------------------

/// Mock embedding service that returns deterministic vectors.
///
/// The output is derived from a hash of the input text, so identical inputs
/// always produce identical outputs and distinct inputs are almost
/// orthogonal. Useful for running the pipeline without a provider.
#[derive(Debug, Clone)]
pub struct MockEmbedding {
    dimensions: usize,
}

impl Default for MockEmbedding {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEmbedding {
    pub fn new() -> Self {
        Self::with_dimensions(768)
    }

    pub fn with_dimensions(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn hash_to_vector(&self, text: &str) -> Vec<f32> {
        let mut result = Vec::with_capacity(self.dimensions);
        for i in 0..self.dimensions {
            let mut hasher = DefaultHasher::new();
            text.hash(&mut hasher);
            i.hash(&mut hasher);
            let h = hasher.finish();
            let val = ((h as f64) / (u64::MAX as f64)) * 2.0 - 1.0;
            result.push(val as f32);
        }

        let norm: f32 = result.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for val in &mut result {
                *val /= norm;
            }
        }
        result
    }
}

impl EmbeddingService for MockEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, PulseError> {
        if text.trim().is_empty() {
            return Err(PulseError::Embedding("Cannot embed empty text".to_string()));
        }
        Ok(self.hash_to_vector(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

// ---------------------------------------------------------------------------
// FixedEmbedding - scripted vectors
// ---------------------------------------------------------------------------

/// Returns a pre-registered vector for each known text and fails for
/// anything else, which doubles as a provider outage.
#[derive(Debug, Clone, Default)]
pub struct FixedEmbedding {
    vectors: HashMap<String, Vec<f32>>,
    dimensions: usize,
}

impl FixedEmbedding {
    pub fn new(dimensions: usize) -> Self {
        Self {
            vectors: HashMap::new(),
            dimensions,
        }
    }

    /// Register the vector returned for `text`.
    pub fn with(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.into(), vector);
        self
    }
}

impl EmbeddingService for FixedEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, PulseError> {
        self.vectors
            .get(text)
            .cloned()
            .ok_or_else(|| PulseError::Embedding(format!("No vector for text: {:.32}", text)))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
