//! Pulse Storage crate - SQLite persistence for channels, publications and stories.
//!
//! Provides a WAL-mode SQLite database with migrations, the `StoryStore`
//! contract consumed by the clustering and digest engines, channel and
//! subscription repositories, an injectable channel lookup cache, and the
//! retention sweep.

pub mod cache;
pub mod db;
pub mod migrations;
pub mod repository;
pub mod retention;
pub mod store;

pub use cache::ChannelCache;
pub use db::Database;
pub use repository::{ChannelRepository, SubscriptionRepository};
pub use retention::{RetentionSweep, SweepResult};
pub use store::{BriefQuery, PinnedFilter, SqliteStoryStore, StoryQuery, StoryStore};
