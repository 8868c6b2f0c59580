//! Pulse Vector crate - embedding providers and vector math.
//!
//! Provides the `EmbeddingService` trait with an HTTP backend for
//! OpenAI-compatible `/embeddings` endpoints, deterministic offline
//! embedders for tests and local runs, and the cosine helpers used by the
//! story store's nearest-neighbour search.

pub mod distance;
pub mod embedding;

pub use distance::{cosine_distance, cosine_similarity, decode_vector, encode_vector};
pub use embedding::{
    DynEmbeddingService, EmbeddingService, FixedEmbedding, HttpEmbeddingService, MockEmbedding,
};
