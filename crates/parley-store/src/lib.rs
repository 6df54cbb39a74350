//! # parley-store
//!
//! SQLite persistence for the Parley chat backend: users, rooms, room
//! membership, and the durable message log. The schema is created on
//! startup if absent; all queries go through the sqlx runtime API against
//! a shared [`SqlitePool`].
//!
//! This crate implements the [`parley_core::MessageStore`] collaborator
//! the engine's read pump calls; everything else is consumed by the server
//! layer (auth lookups, history replay, room listing).

pub mod messages;
pub mod rooms;
pub mod users;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use thiserror::Error;
use tracing::info;

pub use messages::StoredMessage;
pub use rooms::RoomRow;
pub use users::User;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Handle to the chat database.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) the database at `url` and ensure the
    /// schema exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        let store = Self { pool };
        store.migrate().await?;
        info!(url, "store ready");
        Ok(store)
    }

    /// Open a process-private in-memory database. Used by tests and ad-hoc
    /// runs that don't want a file on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub async fn in_memory() -> Result<Self, StoreError> {
        // One connection only: each new in-memory connection would otherwise
        // get its own empty database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uuid TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                api_key TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS rooms (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uuid TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS room_members (
                room_id INTEGER NOT NULL REFERENCES rooms(id),
                user_id INTEGER NOT NULL REFERENCES users(id),
                UNIQUE(room_id, user_id)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                room_id INTEGER NOT NULL REFERENCES rooms(id),
                sender_id INTEGER NOT NULL REFERENCES users(id),
                content BLOB NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl parley_core::MessageStore for Store {
    async fn create_message(
        &self,
        room_id: i64,
        sender_id: i64,
        content: &[u8],
    ) -> Result<(), parley_core::StoreError> {
        Store::create_message(self, room_id, sender_id, content)
            .await
            .map_err(parley_core::StoreError::new)
    }
}
