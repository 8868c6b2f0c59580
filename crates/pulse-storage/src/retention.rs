//! Retention sweep.
//!
//! Stories whose last update is older than `story_max_age_hours` are
//! deleted. Their publications go with them through the foreign-key
//! cascade, so a story and its posts always expire together.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use pulse_core::config::RetentionConfig;
use pulse_core::error::PulseError;
use pulse_core::types::hours_before;

use crate::db::Database;

/// Result of a retention sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepResult {
    pub stories_deleted: usize,
    pub publications_deleted: usize,
}

/// Deletes expired stories and their publications.
pub struct RetentionSweep;

impl RetentionSweep {
    /// Cutoff instant for a sweep run at `now`.
    pub fn cutoff(now: DateTime<Utc>, config: &RetentionConfig) -> DateTime<Utc> {
        hours_before(now, config.story_max_age_hours)
    }

    /// Run a sweep against the current wall clock.
    pub fn run(db: &Database, config: &RetentionConfig) -> Result<SweepResult, PulseError> {
        Self::run_at(db, config, Utc::now())
    }

    /// Run a sweep as if the current time were `now`.
    pub fn run_at(
        db: &Database,
        config: &RetentionConfig,
        now: DateTime<Utc>,
    ) -> Result<SweepResult, PulseError> {
        let cutoff = Self::cutoff(now, config).timestamp();

        let result = db.transaction(|tx| {
            let publications_deleted: i64 = tx
                .query_row(
                    "SELECT COUNT(*) FROM publications
                     WHERE story_id IN (SELECT id FROM stories WHERE last_updated_at < ?1)",
                    rusqlite::params![cutoff],
                    |row| row.get(0),
                )
                .map_err(|e| PulseError::Storage(format!("Retention count failed: {}", e)))?;

            let stories_deleted = tx
                .execute(
                    "DELETE FROM stories WHERE last_updated_at < ?1",
                    rusqlite::params![cutoff],
                )
                .map_err(|e| PulseError::Storage(format!("Retention delete failed: {}", e)))?;

            Ok(SweepResult {
                stories_deleted,
                publications_deleted: publications_deleted as usize,
            })
        })?;

        if result.stories_deleted > 0 {
            info!(
                stories_deleted = result.stories_deleted,
                publications_deleted = result.publications_deleted,
                "Retention sweep completed"
            );
        } else {
            debug!("Retention sweep found nothing to delete");
        }
        Ok(result)
    }
}
