//! Room rows and membership.

use crate::{Store, StoreError};
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

/// A persisted room.
#[derive(Debug, Clone)]
pub struct RoomRow {
    /// Row id.
    pub id: i64,
    /// External identifier, matching the hub's room key.
    pub uuid: Uuid,
    /// Human-readable name; may be empty.
    pub name: String,
}

impl sqlx::FromRow<'_, SqliteRow> for RoomRow {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        let uuid: String = row.try_get("uuid")?;
        Ok(Self {
            id: row.try_get("id")?,
            uuid: Uuid::parse_str(&uuid).map_err(|err| sqlx::Error::ColumnDecode {
                index: "uuid".into(),
                source: Box::new(err),
            })?,
            name: row.try_get("name")?,
        })
    }
}

impl Store {
    /// Return the room row for `uuid`, inserting it on first reference.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn get_or_create_room(&self, uuid: Uuid) -> Result<RoomRow, StoreError> {
        sqlx::query("INSERT INTO rooms (uuid, name, created_at) VALUES (?, '', ?) ON CONFLICT(uuid) DO NOTHING")
            .bind(uuid.to_string())
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        let room = sqlx::query_as::<_, RoomRow>("SELECT id, uuid, name FROM rooms WHERE uuid = ?")
            .bind(uuid.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(room)
    }

    /// Insert a named room under a fresh uuid.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn create_room(&self, name: &str) -> Result<RoomRow, StoreError> {
        let uuid = Uuid::new_v4();
        let id = sqlx::query("INSERT INTO rooms (uuid, name, created_at) VALUES (?, ?, ?)")
            .bind(uuid.to_string())
            .bind(name)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?
            .last_insert_rowid();

        Ok(RoomRow {
            id,
            uuid,
            name: name.to_string(),
        })
    }

    /// List rooms, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn list_rooms(&self, limit: i64, offset: i64) -> Result<Vec<RoomRow>, StoreError> {
        let rooms = sqlx::query_as::<_, RoomRow>(
            "SELECT id, uuid, name FROM rooms ORDER BY id ASC LIMIT ? OFFSET ?",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rooms)
    }

    /// Record that a user belongs to a room. Rejoining is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn add_member(&self, room_id: i64, user_id: i64) -> Result<(), StoreError> {
        sqlx::query("INSERT OR IGNORE INTO room_members (room_id, user_id) VALUES (?, ?)")
            .bind(room_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
