//! Database connection management.
//!
//! Wraps a single rusqlite Connection in a Mutex for thread-safe access.
//! Configures WAL mode and foreign keys on initialization; foreign keys
//! must be on for story deletion to cascade to publications.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{Connection, Transaction};
use tracing::info;

use pulse_core::error::PulseError;

use crate::migrations;

/// Thread-safe SQLite database wrapper.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a database at the given path.
    ///
    /// Configures WAL mode, synchronous=NORMAL, foreign keys, and runs
    /// all pending migrations.
    pub fn new(path: &Path) -> Result<Self, PulseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| PulseError::Storage(format!("Failed to open database: {}", e)))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| PulseError::Storage(format!("Failed to set pragmas: {}", e)))?;

        info!("Database opened at {}", path.display());

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, PulseError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| PulseError::Storage(format!("Failed to open in-memory db: {}", e)))?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| PulseError::Storage(format!("Failed to set pragmas: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Execute a closure with a reference to the underlying connection.
    ///
    /// The mutex is held for the duration of the closure.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, PulseError>
    where
        F: FnOnce(&Connection) -> Result<T, PulseError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| PulseError::Storage(format!("Database lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Execute a closure inside a transaction.
    ///
    /// Commits when the closure returns `Ok`; any error rolls back every
    /// statement the closure issued.
    pub fn transaction<F, T>(&self, f: F) -> Result<T, PulseError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, PulseError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| PulseError::Storage(format!("Database lock poisoned: {}", e)))?;
        let tx = conn
            .transaction()
            .map_err(|e| PulseError::Storage(format!("Failed to begin transaction: {}", e)))?;
        let value = f(&tx)?;
        tx.commit()
            .map_err(|e| PulseError::Storage(format!("Failed to commit: {}", e)))?;
        Ok(value)
    }

    /// Run a blocking closure on the tokio blocking pool.
    ///
    /// Async callers use this so SQLite work never stalls a runtime worker.
    pub async fn call<F, T>(self: &Arc<Self>, f: F) -> Result<T, PulseError>
    where
        F: FnOnce(&Database) -> Result<T, PulseError> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(self);
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| PulseError::Storage(format!("Database task failed: {}", e)))?
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}
