//! Database schema migrations.
//!
//! Version 1 creates channels, stories, publications and
//! user_subscriptions. The embedding width is recorded per story; changing
//! the deployment's vector dimension means starting from a fresh database.

use rusqlite::Connection;
use tracing::info;

use pulse_core::error::PulseError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), PulseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| PulseError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| PulseError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<(), PulseError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS channels (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            platform_id     INTEGER NOT NULL UNIQUE,
            title           TEXT NOT NULL,
            handle          TEXT,
            category        TEXT,
            is_active       INTEGER NOT NULL DEFAULT 1,
            created_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        CREATE TABLE IF NOT EXISTS stories (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            title           TEXT NOT NULL,
            summary         TEXT NOT NULL DEFAULT '',
            category        TEXT,
            first_seen_at   INTEGER NOT NULL,
            last_updated_at INTEGER NOT NULL,
            confidence      REAL NOT NULL DEFAULT 0,
            status          TEXT NOT NULL DEFAULT 'pending'
                            CHECK (status IN ('pending', 'active')),
            embedding       BLOB,
            embedding_dim   INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_stories_last_updated
            ON stories (last_updated_at DESC);

        CREATE INDEX IF NOT EXISTS idx_stories_category
            ON stories (category, last_updated_at DESC);

        CREATE TABLE IF NOT EXISTS publications (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            channel_id      INTEGER NOT NULL REFERENCES channels (id),
            message_id      INTEGER NOT NULL,
            story_id        INTEGER REFERENCES stories (id) ON DELETE CASCADE,
            content         TEXT NOT NULL DEFAULT '',
            category        TEXT,
            url             TEXT,
            published_at    INTEGER NOT NULL,
            views           INTEGER NOT NULL DEFAULT 0,
            UNIQUE (channel_id, message_id)
        );

        CREATE INDEX IF NOT EXISTS idx_publications_story
            ON publications (story_id);

        CREATE INDEX IF NOT EXISTS idx_publications_channel_time
            ON publications (channel_id, published_at DESC);

        CREATE INDEX IF NOT EXISTS idx_publications_unclustered
            ON publications (published_at) WHERE story_id IS NULL;

        CREATE TABLE IF NOT EXISTS user_subscriptions (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id         INTEGER NOT NULL,
            channel_id      INTEGER NOT NULL REFERENCES channels (id) ON DELETE CASCADE,
            created_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            UNIQUE (user_id, channel_id)
        );

        CREATE INDEX IF NOT EXISTS idx_subscriptions_user
            ON user_subscriptions (user_id);

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
    )
    .map_err(|e| PulseError::Storage(format!("Migration v1 failed: {}", e)))?;

    Ok(())
}
