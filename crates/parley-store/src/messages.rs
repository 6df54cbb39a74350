//! Durable message log and history queries.

use crate::{Store, StoreError};
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

/// One logged message joined with its sender's display name.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    /// Raw message text as received.
    pub content: Vec<u8>,
    /// Display name of the sender at query time.
    pub sender_name: String,
}

impl sqlx::FromRow<'_, SqliteRow> for StoredMessage {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(Self {
            content: row.try_get("content")?,
            sender_name: row.try_get("sender_name")?,
        })
    }
}

impl Store {
    /// Append one message to the log.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn create_message(
        &self,
        room_id: i64,
        sender_id: i64,
        content: &[u8],
    ) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO messages (room_id, sender_id, content, created_at) VALUES (?, ?, ?, ?)")
            .bind(room_id)
            .bind(sender_id)
            .bind(content)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Fetch a room's messages, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn messages_by_room(
        &self,
        room_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let messages = sqlx::query_as::<_, StoredMessage>(
            "SELECT m.content, u.name AS sender_name
             FROM messages m
             JOIN users u ON u.id = m.sender_id
             WHERE m.room_id = ?
             ORDER BY m.id DESC
             LIMIT ? OFFSET ?",
        )
        .bind(room_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn history_is_newest_first() {
        let store = Store::in_memory().await.unwrap();
        let user = store.create_user("alice", "key-1").await.unwrap();
        let room = store.get_or_create_room(Uuid::new_v4()).await.unwrap();

        for text in [b"one".as_slice(), b"two", b"three"] {
            store.create_message(room.id, user.id, text).await.unwrap();
        }

        let history = store.messages_by_room(room.id, 10, 0).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].content, b"three");
        assert_eq!(history[0].sender_name, "alice");
        assert_eq!(history[2].content, b"one");

        let limited = store.messages_by_room(room.id, 2, 0).await.unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].content, b"three");
    }

    #[tokio::test]
    async fn history_is_scoped_to_the_room() {
        let store = Store::in_memory().await.unwrap();
        let user = store.create_user("alice", "key-1").await.unwrap();
        let a = store.get_or_create_room(Uuid::new_v4()).await.unwrap();
        let b = store.get_or_create_room(Uuid::new_v4()).await.unwrap();

        store.create_message(a.id, user.id, b"in-a").await.unwrap();

        assert_eq!(store.messages_by_room(a.id, 10, 0).await.unwrap().len(), 1);
        assert!(store.messages_by_room(b.id, 10, 0).await.unwrap().is_empty());
    }
}
