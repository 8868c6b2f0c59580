//! The story store: persistence contract for publications and stories.
//!
//! `StoryStore` is what the clustering and digest engines program against.
//! `SqliteStoryStore` implements it over [`Database`], pushing every query
//! onto the blocking pool so callers can stay fully async. Nearest-story
//! search is a linear cosine scan over stored vectors of matching width.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::Connection;
use tracing::debug;

use pulse_core::error::PulseError;
use pulse_core::types::{
    ChannelPublication, NewPublication, NewStory, Publication, Story, StoryStatus,
};
use pulse_vector::distance::{cosine_distance, decode_vector, encode_vector};

use crate::db::Database;
use crate::repository::{from_unix, select_channel_ids_for_user, OptionalExt};

/// Restricts digest queries to pinned categories or channel titles.
#[derive(Clone, Debug, PartialEq)]
pub enum PinnedFilter {
    Categories(Vec<String>),
    ChannelTitles(Vec<String>),
}

impl PinnedFilter {
    fn is_empty(&self) -> bool {
        match self {
            PinnedFilter::Categories(v) | PinnedFilter::ChannelTitles(v) => v.is_empty(),
        }
    }
}

/// Story candidates for a digest page.
#[derive(Clone, Debug)]
pub struct StoryQuery {
    pub channel_ids: Vec<i64>,
    /// Only stories updated at or after this instant.
    pub since: DateTime<Utc>,
    pub pinned: Option<PinnedFilter>,
    pub limit: usize,
    pub offset: usize,
}

/// Publications surfaced standalone because their story is not on the page.
#[derive(Clone, Debug)]
pub struct BriefQuery {
    pub channel_ids: Vec<i64>,
    /// Only publications published at or after this instant.
    pub since: DateTime<Utc>,
    pub exclude_story_ids: Vec<i64>,
    pub pinned: Option<PinnedFilter>,
    pub limit: usize,
    pub offset: usize,
}

/// Persistence contract for the clustering and digest engines.
#[async_trait]
pub trait StoryStore: Send + Sync {
    /// Store a new publication. A repeated (channel, message) pair fails with
    /// [`PulseError::Duplicate`] and leaves the existing row untouched.
    async fn insert_publication(&self, publication: NewPublication) -> Result<i64, PulseError>;

    async fn get_publication(&self, id: i64) -> Result<Publication, PulseError>;

    /// Story with its vector.
    async fn get_story(&self, id: i64) -> Result<Story, PulseError>;

    /// Closest story by cosine distance among stories whose vector has the
    /// same width. Ties go to the most recently updated story.
    async fn find_nearest_story(
        &self,
        vector: &[f32],
    ) -> Result<Option<(Story, f64)>, PulseError>;

    async fn create_story(&self, story: NewStory) -> Result<i64, PulseError>;

    /// Link an unlinked publication. Returns false if it already had a story.
    async fn link_publication_to_story(
        &self,
        publication_id: i64,
        story_id: i64,
        category: Option<String>,
    ) -> Result<bool, PulseError>;

    /// Advance `last_updated_at`; a timestamp at or before the current one is ignored.
    async fn touch_story_last_updated(
        &self,
        story_id: i64,
        at: DateTime<Utc>,
    ) -> Result<bool, PulseError>;

    /// Create a story and link the publication to it in one transaction.
    ///
    /// Returns `None` without writing anything when the publication is
    /// already linked.
    async fn commit_new_story(
        &self,
        publication_id: i64,
        story: NewStory,
    ) -> Result<Option<i64>, PulseError>;

    /// Link the publication, copy the category onto it and advance the
    /// story's last update, all in one transaction.
    ///
    /// Returns false without writing anything when the publication is
    /// already linked.
    async fn commit_link(
        &self,
        publication_id: i64,
        story_id: i64,
        category: Option<String>,
        published_at: DateTime<Utc>,
    ) -> Result<bool, PulseError>;

    /// Stories with at least one publication in `channel_ids`, newest first.
    async fn query_stories(&self, query: StoryQuery) -> Result<Vec<Story>, PulseError>;

    /// Publications in scope that are unlinked or linked to a story outside
    /// `exclude_story_ids`, newest first.
    async fn query_unlinked_publications(
        &self,
        query: BriefQuery,
    ) -> Result<Vec<ChannelPublication>, PulseError>;

    /// Most viewed publications of a story within the given channels.
    async fn story_sources(
        &self,
        story_id: i64,
        channel_ids: Vec<i64>,
        limit: usize,
    ) -> Result<Vec<ChannelPublication>, PulseError>;

    async fn subscribed_channel_ids(&self, user_id: i64) -> Result<Vec<i64>, PulseError>;

    /// Unlinked publications with text, published at or after `since`, oldest first.
    async fn unclustered_publication_ids(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<i64>, PulseError>;
}

const PUBLICATION_COLUMNS: &str =
    "p.id, p.channel_id, p.message_id, p.content, p.category, p.url, p.published_at, p.views, p.story_id";

const STORY_COLUMNS: &str = "s.id, s.title, s.summary, s.category, s.first_seen_at, s.last_updated_at, \
     s.confidence, s.status, (SELECT COUNT(*) FROM publications WHERE story_id = s.id)";

/// SQLite-backed [`StoryStore`].
#[derive(Debug, Clone)]
pub struct SqliteStoryStore {
    db: Arc<Database>,
}

impl SqliteStoryStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }
}

#[async_trait]
impl StoryStore for SqliteStoryStore {
    async fn insert_publication(&self, publication: NewPublication) -> Result<i64, PulseError> {
        self.db
            .call(move |db| db.with_conn(|conn| insert_publication(conn, &publication)))
            .await
    }

    async fn get_publication(&self, id: i64) -> Result<Publication, PulseError> {
        self.db
            .call(move |db| {
                db.with_conn(|conn| {
                    conn.query_row(
                        &format!("SELECT {} FROM publications p WHERE p.id = ?1", PUBLICATION_COLUMNS),
                        rusqlite::params![id],
                        row_to_publication,
                    )
                    .optional()
                    .map_err(|e| PulseError::Storage(e.to_string()))?
                    .ok_or_else(|| PulseError::NotFound(format!("publication {}", id)))
                })
            })
            .await
    }

    async fn get_story(&self, id: i64) -> Result<Story, PulseError> {
        self.db
            .call(move |db| {
                db.with_conn(|conn| {
                    conn.query_row(
                        &format!("SELECT {}, s.embedding FROM stories s WHERE s.id = ?1", STORY_COLUMNS),
                        rusqlite::params![id],
                        |row| row_to_story(row, true),
                    )
                    .optional()
                    .map_err(|e| PulseError::Storage(e.to_string()))?
                    .ok_or_else(|| PulseError::NotFound(format!("story {}", id)))
                })
            })
            .await
    }

    async fn find_nearest_story(
        &self,
        vector: &[f32],
    ) -> Result<Option<(Story, f64)>, PulseError> {
        let vector = vector.to_vec();
        self.db
            .call(move |db| db.with_conn(|conn| nearest_story(conn, &vector)))
            .await
    }

    async fn create_story(&self, story: NewStory) -> Result<i64, PulseError> {
        self.db
            .call(move |db| db.with_conn(|conn| insert_story(conn, &story)))
            .await
    }

    async fn link_publication_to_story(
        &self,
        publication_id: i64,
        story_id: i64,
        category: Option<String>,
    ) -> Result<bool, PulseError> {
        self.db
            .call(move |db| {
                db.with_conn(|conn| link_unlinked(conn, publication_id, story_id, category.as_deref()))
            })
            .await
    }

    async fn touch_story_last_updated(
        &self,
        story_id: i64,
        at: DateTime<Utc>,
    ) -> Result<bool, PulseError> {
        self.db
            .call(move |db| db.with_conn(|conn| touch_story(conn, story_id, at)))
            .await
    }

    async fn commit_new_story(
        &self,
        publication_id: i64,
        story: NewStory,
    ) -> Result<Option<i64>, PulseError> {
        self.db
            .call(move |db| {
                db.transaction(|tx| {
                    if linked_story(tx, publication_id)?.is_some() {
                        return Ok(None);
                    }
                    let story_id = insert_story(tx, &story)?;
                    if !link_unlinked(tx, publication_id, story_id, story.category.as_deref())? {
                        return Err(PulseError::Storage(format!(
                            "Publication {} changed during story creation",
                            publication_id
                        )));
                    }
                    debug!(publication_id, story_id, "Story created and linked");
                    Ok(Some(story_id))
                })
            })
            .await
    }

    async fn commit_link(
        &self,
        publication_id: i64,
        story_id: i64,
        category: Option<String>,
        published_at: DateTime<Utc>,
    ) -> Result<bool, PulseError> {
        self.db
            .call(move |db| {
                db.transaction(|tx| {
                    if linked_story(tx, publication_id)?.is_some() {
                        return Ok(false);
                    }
                    if !link_unlinked(tx, publication_id, story_id, category.as_deref())? {
                        return Ok(false);
                    }
                    touch_story(tx, story_id, published_at)?;
                    Ok(true)
                })
            })
            .await
    }

    async fn query_stories(&self, query: StoryQuery) -> Result<Vec<Story>, PulseError> {
        if query.channel_ids.is_empty() || query.limit == 0 {
            return Ok(Vec::new());
        }
        self.db
            .call(move |db| db.with_conn(|conn| select_stories(conn, &query)))
            .await
    }

    async fn query_unlinked_publications(
        &self,
        query: BriefQuery,
    ) -> Result<Vec<ChannelPublication>, PulseError> {
        if query.channel_ids.is_empty() || query.limit == 0 {
            return Ok(Vec::new());
        }
        self.db
            .call(move |db| db.with_conn(|conn| select_briefs(conn, &query)))
            .await
    }

    async fn story_sources(
        &self,
        story_id: i64,
        channel_ids: Vec<i64>,
        limit: usize,
    ) -> Result<Vec<ChannelPublication>, PulseError> {
        if channel_ids.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        self.db
            .call(move |db| {
                db.with_conn(|conn| {
                    let sql = format!(
                        "SELECT {}, c.title FROM publications p
                         JOIN channels c ON c.id = p.channel_id
                         WHERE p.story_id = ? AND p.channel_id IN ({})
                         ORDER BY p.views DESC, p.published_at ASC, p.id ASC
                         LIMIT ?",
                        PUBLICATION_COLUMNS,
                        placeholders(channel_ids.len())
                    );
                    let mut params = vec![Value::Integer(story_id)];
                    params.extend(channel_ids.iter().map(|id| Value::Integer(*id)));
                    params.push(Value::Integer(limit as i64));
                    query_channel_publications(conn, &sql, params)
                })
            })
            .await
    }

    async fn subscribed_channel_ids(&self, user_id: i64) -> Result<Vec<i64>, PulseError> {
        self.db
            .call(move |db| db.with_conn(|conn| select_channel_ids_for_user(conn, user_id)))
            .await
    }

    async fn unclustered_publication_ids(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<i64>, PulseError> {
        self.db
            .call(move |db| {
                db.with_conn(|conn| {
                    let mut stmt = conn
                        .prepare(
                            "SELECT id FROM publications
                             WHERE story_id IS NULL AND published_at >= ?1 AND TRIM(content) <> ''
                             ORDER BY published_at ASC, id ASC
                             LIMIT ?2",
                        )
                        .map_err(|e| PulseError::Storage(e.to_string()))?;
                    let rows = stmt
                        .query_map(rusqlite::params![since.timestamp(), limit as i64], |row| {
                            row.get::<_, i64>(0)
                        })
                        .map_err(|e| PulseError::Storage(e.to_string()))?;
                    rows.collect::<Result<Vec<_>, _>>()
                        .map_err(|e| PulseError::Storage(e.to_string()))
                })
            })
            .await
    }
}

// =============================================================================
// Statements
// =============================================================================

fn insert_publication(conn: &Connection, p: &NewPublication) -> Result<i64, PulseError> {
    let result = conn.execute(
        "INSERT INTO publications (channel_id, message_id, content, url, published_at, views)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            p.channel_id,
            p.message_id,
            p.content,
            p.url,
            p.published_at.timestamp(),
            p.views,
        ],
    );
    match result {
        Ok(_) => Ok(conn.last_insert_rowid()),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            Err(PulseError::Duplicate {
                channel_id: p.channel_id,
                message_id: p.message_id,
            })
        }
        Err(e) => Err(PulseError::Storage(format!("Failed to insert publication: {}", e))),
    }
}

fn insert_story(conn: &Connection, story: &NewStory) -> Result<i64, PulseError> {
    conn.execute(
        "INSERT INTO stories (title, summary, category, first_seen_at, last_updated_at,
                              confidence, status, embedding, embedding_dim)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        rusqlite::params![
            story.title,
            story.summary,
            story.category,
            story.first_seen_at.timestamp(),
            story.last_updated_at.timestamp(),
            story.confidence,
            story.status.as_str(),
            encode_vector(&story.embedding),
            story.embedding.len() as i64,
        ],
    )
    .map_err(|e| PulseError::Storage(format!("Failed to insert story: {}", e)))?;
    Ok(conn.last_insert_rowid())
}

/// Current story link of a publication; `NotFound` if the row is missing.
fn linked_story(conn: &Connection, publication_id: i64) -> Result<Option<i64>, PulseError> {
    conn.query_row(
        "SELECT story_id FROM publications WHERE id = ?1",
        rusqlite::params![publication_id],
        |row| row.get::<_, Option<i64>>(0),
    )
    .optional()
    .map_err(|e| PulseError::Storage(e.to_string()))?
    .ok_or_else(|| PulseError::NotFound(format!("publication {}", publication_id)))
}

fn link_unlinked(
    conn: &Connection,
    publication_id: i64,
    story_id: i64,
    category: Option<&str>,
) -> Result<bool, PulseError> {
    let updated = conn
        .execute(
            "UPDATE publications SET story_id = ?1, category = ?2
             WHERE id = ?3 AND story_id IS NULL",
            rusqlite::params![story_id, category, publication_id],
        )
        .map_err(|e| PulseError::Storage(format!("Failed to link publication: {}", e)))?;
    Ok(updated > 0)
}

fn touch_story(conn: &Connection, story_id: i64, at: DateTime<Utc>) -> Result<bool, PulseError> {
    let updated = conn
        .execute(
            "UPDATE stories SET last_updated_at = ?1 WHERE id = ?2 AND last_updated_at < ?1",
            rusqlite::params![at.timestamp(), story_id],
        )
        .map_err(|e| PulseError::Storage(format!("Failed to touch story: {}", e)))?;
    Ok(updated > 0)
}

fn nearest_story(conn: &Connection, vector: &[f32]) -> Result<Option<(Story, f64)>, PulseError> {
    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.title, s.summary, s.category, s.first_seen_at, s.last_updated_at,
                    s.confidence, s.status, 0, s.embedding
             FROM stories s
             WHERE s.embedding_dim = ?1 AND s.embedding IS NOT NULL",
        )
        .map_err(|e| PulseError::Storage(e.to_string()))?;
    let rows = stmt
        .query_map(rusqlite::params![vector.len() as i64], |row| row_to_story(row, true))
        .map_err(|e| PulseError::Storage(e.to_string()))?;

    let mut best: Option<(Story, f64)> = None;
    for row in rows {
        let story = row.map_err(|e| PulseError::Storage(e.to_string()))?;
        let distance = cosine_distance(vector, &story.embedding);
        if !distance.is_finite() {
            continue;
        }
        let better = match &best {
            None => true,
            Some((current, current_distance)) => {
                distance < *current_distance
                    || (distance == *current_distance
                        && (story.last_updated_at, -story.id)
                            > (current.last_updated_at, -current.id))
            }
        };
        if better {
            best = Some((story, distance));
        }
    }

    match best {
        Some((mut story, distance)) => {
            story.publication_count = conn
                .query_row(
                    "SELECT COUNT(*) FROM publications WHERE story_id = ?1",
                    rusqlite::params![story.id],
                    |row| row.get(0),
                )
                .map_err(|e| PulseError::Storage(e.to_string()))?;
            Ok(Some((story, distance)))
        }
        None => Ok(None),
    }
}

fn select_stories(conn: &Connection, query: &StoryQuery) -> Result<Vec<Story>, PulseError> {
    let mut params: Vec<Value> = Vec::new();
    let mut scope = format!(
        "SELECT p.story_id FROM publications p
         JOIN channels c ON c.id = p.channel_id
         WHERE p.story_id IS NOT NULL AND p.channel_id IN ({})",
        placeholders(query.channel_ids.len())
    );
    params.extend(query.channel_ids.iter().map(|id| Value::Integer(*id)));

    let mut category_clause = String::new();
    match query.pinned.as_ref().filter(|p| !p.is_empty()) {
        Some(PinnedFilter::ChannelTitles(titles)) => {
            scope.push_str(&format!(" AND c.title IN ({})", placeholders(titles.len())));
            params.extend(titles.iter().map(|t| Value::Text(t.clone())));
        }
        Some(PinnedFilter::Categories(categories)) => {
            category_clause = format!(" AND s.category IN ({})", placeholders(categories.len()));
        }
        None => {}
    }

    params.push(Value::Integer(query.since.timestamp()));
    if let Some(PinnedFilter::Categories(categories)) = &query.pinned {
        params.extend(categories.iter().map(|c| Value::Text(c.clone())));
    }
    params.push(Value::Integer(query.limit as i64));
    params.push(Value::Integer(query.offset as i64));

    let sql = format!(
        "SELECT {} FROM stories s
         WHERE s.id IN ({}) AND s.last_updated_at >= ?{}
         ORDER BY s.last_updated_at DESC, s.confidence DESC, s.id DESC
         LIMIT ? OFFSET ?",
        STORY_COLUMNS, scope, category_clause
    );

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| PulseError::Storage(e.to_string()))?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params), |row| row_to_story(row, false))
        .map_err(|e| PulseError::Storage(e.to_string()))?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(|e| PulseError::Storage(e.to_string()))
}

fn select_briefs(
    conn: &Connection,
    query: &BriefQuery,
) -> Result<Vec<ChannelPublication>, PulseError> {
    let mut sql = format!(
        "SELECT {}, c.title FROM publications p
         JOIN channels c ON c.id = p.channel_id
         WHERE p.channel_id IN ({}) AND p.published_at >= ?",
        PUBLICATION_COLUMNS,
        placeholders(query.channel_ids.len())
    );
    let mut params: Vec<Value> = query
        .channel_ids
        .iter()
        .map(|id| Value::Integer(*id))
        .collect();
    params.push(Value::Integer(query.since.timestamp()));

    if !query.exclude_story_ids.is_empty() {
        sql.push_str(&format!(
            " AND (p.story_id IS NULL OR p.story_id NOT IN ({}))",
            placeholders(query.exclude_story_ids.len())
        ));
        params.extend(query.exclude_story_ids.iter().map(|id| Value::Integer(*id)));
    }

    match query.pinned.as_ref().filter(|p| !p.is_empty()) {
        Some(PinnedFilter::Categories(categories)) => {
            sql.push_str(&format!(" AND p.category IN ({})", placeholders(categories.len())));
            params.extend(categories.iter().map(|c| Value::Text(c.clone())));
        }
        Some(PinnedFilter::ChannelTitles(titles)) => {
            sql.push_str(&format!(" AND c.title IN ({})", placeholders(titles.len())));
            params.extend(titles.iter().map(|t| Value::Text(t.clone())));
        }
        None => {}
    }

    sql.push_str(" ORDER BY p.published_at DESC, p.id DESC LIMIT ? OFFSET ?");
    params.push(Value::Integer(query.limit as i64));
    params.push(Value::Integer(query.offset as i64));

    query_channel_publications(conn, &sql, params)
}

fn query_channel_publications(
    conn: &Connection,
    sql: &str,
    params: Vec<Value>,
) -> Result<Vec<ChannelPublication>, PulseError> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| PulseError::Storage(e.to_string()))?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params), |row| {
            Ok(ChannelPublication {
                publication: row_to_publication(row)?,
                channel_title: row.get(9)?,
            })
        })
        .map_err(|e| PulseError::Storage(e.to_string()))?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(|e| PulseError::Storage(e.to_string()))
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn row_to_publication(row: &rusqlite::Row<'_>) -> rusqlite::Result<Publication> {
    Ok(Publication {
        id: row.get(0)?,
        channel_id: row.get(1)?,
        message_id: row.get(2)?,
        content: row.get(3)?,
        category: row.get(4)?,
        url: row.get(5)?,
        published_at: from_unix(row.get(6)?),
        views: row.get(7)?,
        story_id: row.get(8)?,
    })
}

fn row_to_story(row: &rusqlite::Row<'_>, with_embedding: bool) -> rusqlite::Result<Story> {
    let status: String = row.get(7)?;
    let status = status.parse::<StoryStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let embedding = if with_embedding {
        row.get::<_, Option<Vec<u8>>>(9)?
            .and_then(|bytes| decode_vector(&bytes))
            .unwrap_or_default()
    } else {
        Vec::new()
    };

    Ok(Story {
        id: row.get(0)?,
        title: row.get(1)?,
        summary: row.get(2)?,
        category: row.get(3)?,
        first_seen_at: from_unix(row.get(4)?),
        last_updated_at: from_unix(row.get(5)?),
        confidence: row.get(6)?,
        status,
        embedding,
        publication_count: row.get(8)?,
    })
}
