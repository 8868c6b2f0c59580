//! Channel and subscription repositories.
//!
//! Both are thin synchronous wrappers over `Database` using raw SQL. The
//! row helpers at the bottom are shared with the story store.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::Connection;

use pulse_core::error::PulseError;
use pulse_core::types::{Channel, NewChannel};

use crate::db::Database;

const CHANNEL_COLUMNS: &str = "id, platform_id, title, handle, category, is_active";

/// Repository for monitored channels.
pub struct ChannelRepository {
    db: Arc<Database>,
}

impl ChannelRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Create the channel on first sight, or refresh its title and handle.
    ///
    /// A `None` handle or category never clears a stored value.
    pub fn upsert(&self, channel: &NewChannel) -> Result<Channel, PulseError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO channels (platform_id, title, handle, category)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (platform_id) DO UPDATE SET
                     title = excluded.title,
                     handle = COALESCE(excluded.handle, channels.handle),
                     category = COALESCE(excluded.category, channels.category)",
                rusqlite::params![
                    channel.platform_id,
                    channel.title,
                    channel.handle,
                    channel.category,
                ],
            )
            .map_err(|e| PulseError::Storage(format!("Failed to upsert channel: {}", e)))?;

            select_channel(conn, channel.platform_id)?.ok_or_else(|| {
                PulseError::NotFound(format!("channel {}", channel.platform_id))
            })
        })
    }

    /// Find a channel by its platform-native identifier.
    pub fn find_by_platform_id(&self, platform_id: i64) -> Result<Option<Channel>, PulseError> {
        self.db
            .with_conn(|conn| select_channel(conn, platform_id))
    }

    /// Correct a channel's category label.
    pub fn set_category(&self, id: i64, category: &str) -> Result<bool, PulseError> {
        self.db.with_conn(|conn| {
            let updated = conn
                .execute(
                    "UPDATE channels SET category = ?1 WHERE id = ?2",
                    rusqlite::params![category, id],
                )
                .map_err(|e| PulseError::Storage(format!("Failed to set category: {}", e)))?;
            Ok(updated > 0)
        })
    }

    /// List channels ordered by title.
    pub fn list(&self, active_only: bool) -> Result<Vec<Channel>, PulseError> {
        self.db.with_conn(|conn| {
            let sql = if active_only {
                format!("SELECT {} FROM channels WHERE is_active = 1 ORDER BY title", CHANNEL_COLUMNS)
            } else {
                format!("SELECT {} FROM channels ORDER BY title", CHANNEL_COLUMNS)
            };
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| PulseError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map([], row_to_channel)
                .map_err(|e| PulseError::Storage(e.to_string()))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| PulseError::Storage(e.to_string()))
        })
    }
}

/// Repository for user-to-channel subscriptions.
pub struct SubscriptionRepository {
    db: Arc<Database>,
}

impl SubscriptionRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Subscribe a user to a channel. Returns false if already subscribed.
    pub fn subscribe(&self, user_id: i64, channel_id: i64) -> Result<bool, PulseError> {
        self.db.with_conn(|conn| {
            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO user_subscriptions (user_id, channel_id) VALUES (?1, ?2)",
                    rusqlite::params![user_id, channel_id],
                )
                .map_err(|e| PulseError::Storage(format!("Failed to subscribe: {}", e)))?;
            Ok(inserted > 0)
        })
    }

    /// Remove a subscription. Returns false if there was none.
    pub fn unsubscribe(&self, user_id: i64, channel_id: i64) -> Result<bool, PulseError> {
        self.db.with_conn(|conn| {
            let deleted = conn
                .execute(
                    "DELETE FROM user_subscriptions WHERE user_id = ?1 AND channel_id = ?2",
                    rusqlite::params![user_id, channel_id],
                )
                .map_err(|e| PulseError::Storage(format!("Failed to unsubscribe: {}", e)))?;
            Ok(deleted > 0)
        })
    }

    /// Local channel ids the user subscribes to.
    pub fn channel_ids(&self, user_id: i64) -> Result<Vec<i64>, PulseError> {
        self.db
            .with_conn(|conn| select_channel_ids_for_user(conn, user_id))
    }
}

// =============================================================================
// Shared row helpers
// =============================================================================

pub(crate) fn select_channel_ids_for_user(
    conn: &Connection,
    user_id: i64,
) -> Result<Vec<i64>, PulseError> {
    let mut stmt = conn
        .prepare("SELECT channel_id FROM user_subscriptions WHERE user_id = ?1 ORDER BY channel_id")
        .map_err(|e| PulseError::Storage(e.to_string()))?;
    let rows = stmt
        .query_map(rusqlite::params![user_id], |row| row.get::<_, i64>(0))
        .map_err(|e| PulseError::Storage(e.to_string()))?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(|e| PulseError::Storage(e.to_string()))
}

fn select_channel(conn: &Connection, platform_id: i64) -> Result<Option<Channel>, PulseError> {
    conn.query_row(
        &format!("SELECT {} FROM channels WHERE platform_id = ?1", CHANNEL_COLUMNS),
        rusqlite::params![platform_id],
        row_to_channel,
    )
    .optional()
    .map_err(|e| PulseError::Storage(e.to_string()))
}

fn row_to_channel(row: &rusqlite::Row<'_>) -> rusqlite::Result<Channel> {
    Ok(Channel {
        id: row.get(0)?,
        platform_id: row.get(1)?,
        title: row.get(2)?,
        handle: row.get(3)?,
        category: row.get(4)?,
        is_active: row.get::<_, i64>(5)? != 0,
    })
}

/// Convert stored unix seconds back to a UTC timestamp.
pub(crate) fn from_unix(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

/// Extension to map `QueryReturnedNoRows` to `None`.
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>, rusqlite::Error>;
}

impl<T> OptionalExt<T> for Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>, rusqlite::Error> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
