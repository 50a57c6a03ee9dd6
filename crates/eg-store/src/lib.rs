//! Storage layer for visitor identity.
//!
//! Implements [`eg_core::KeyValueStore`] on top of `rusqlite`, standing in for
//! the cookie and local-storage pair a browser host would use.
//!
//! # Scopes
//!
//! Values are keyed by `(scope, key)`. Persistent values live until deleted.
//! Session values live until [`IdentityDb::clear_session`] is called, which
//! a host does when it starts a new browsing session.
//!
//! # Thread Safety
//!
//! [`IdentityDb`] wraps a `rusqlite::Connection`, which is `Send` but not
//! `Sync`. The engine is single-threaded, so one instance per host is enough.

use std::path::Path;

use chrono::{SecondsFormat, Utc};
use eg_core::{KeyValueStore, Scope, StoreError};
use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;

/// Database errors.
#[derive(Debug, Error)]
pub enum StoreDbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl From<StoreDbError> for StoreError {
    fn from(err: StoreDbError) -> Self {
        Self::wrap("identity database failure", err)
    }
}

/// Identity database connection wrapper.
pub struct IdentityDb {
    conn: Connection,
}

impl std::fmt::Debug for IdentityDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityDb")
            .field("path", &self.conn.path())
            .finish()
    }
}

impl IdentityDb {
    /// Opens a database at the given path, creating it if necessary.
    pub fn open(path: &Path) -> Result<Self, StoreDbError> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Opens an in-memory database, destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, StoreDbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initializes the schema. Safe to call on an initialized database.
    fn init(&self) -> Result<(), StoreDbError> {
        self.conn.execute_batch(
            "
            -- scope: 'session' or 'persistent'
            -- updated_at: ISO 8601 (e.g., '2024-01-15T10:30:00.000Z')
            CREATE TABLE IF NOT EXISTS identity_values (
                scope TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (scope, key)
            );
            ",
        )?;
        Ok(())
    }

    pub fn get_value(&self, scope: Scope, key: &str) -> Result<Option<String>, StoreDbError> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM identity_values WHERE scope = ? AND key = ?",
                params![scope.as_str(), key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Inserts or replaces a value.
    pub fn set_value(&self, scope: Scope, key: &str, value: &str) -> Result<(), StoreDbError> {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        self.conn.execute(
            "
            INSERT INTO identity_values (scope, key, value, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (scope, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            ",
            params![scope.as_str(), key, value, now],
        )?;
        Ok(())
    }

    /// Deletes every session-scoped value, returning how many were removed.
    pub fn clear_session(&self) -> Result<usize, StoreDbError> {
        let removed = self.conn.execute(
            "DELETE FROM identity_values WHERE scope = ?",
            params![Scope::Session.as_str()],
        )?;
        tracing::debug!(removed, "cleared session values");
        Ok(removed)
    }
}

impl KeyValueStore for IdentityDb {
    fn get(&self, scope: Scope, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.get_value(scope, key)?)
    }

    fn set(&mut self, scope: Scope, key: &str, value: &str) -> Result<(), StoreError> {
        Ok(self.set_value(scope, key, value)?)
    }
}
