//! User registration and API-key lookup.

use crate::{Store, StoreError};
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

/// A registered user.
#[derive(Debug, Clone)]
pub struct User {
    /// Row id.
    pub id: i64,
    /// Stable external identifier.
    pub uuid: Uuid,
    /// Display name.
    pub name: String,
    /// Bearer credential.
    pub api_key: String,
}

impl sqlx::FromRow<'_, SqliteRow> for User {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        let uuid: String = row.try_get("uuid")?;
        Ok(Self {
            id: row.try_get("id")?,
            uuid: Uuid::parse_str(&uuid).map_err(|err| sqlx::Error::ColumnDecode {
                index: "uuid".into(),
                source: Box::new(err),
            })?,
            name: row.try_get("name")?,
            api_key: row.try_get("api_key")?,
        })
    }
}

impl Store {
    /// Insert a user with a fresh uuid and the given credential.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure, including an `api_key`
    /// uniqueness violation.
    pub async fn create_user(&self, name: &str, api_key: &str) -> Result<User, StoreError> {
        let uuid = Uuid::new_v4();
        let id = sqlx::query("INSERT INTO users (uuid, name, api_key, created_at) VALUES (?, ?, ?, ?)")
            .bind(uuid.to_string())
            .bind(name)
            .bind(api_key)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?
            .last_insert_rowid();

        Ok(User {
            id,
            uuid,
            name: name.to_string(),
            api_key: api_key.to_string(),
        })
    }

    /// Resolve a bearer credential to its user.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure; an unknown key is `Ok(None)`.
    pub async fn user_by_api_key(&self, api_key: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, uuid, name, api_key FROM users WHERE api_key = ?",
        )
        .bind(api_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn api_key_round_trips() {
        let store = Store::in_memory().await.unwrap();
        let created = store.create_user("alice", "key-1").await.unwrap();

        let found = store.user_by_api_key("key-1").await.unwrap().unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(found.name, "alice");
        assert_eq!(found.uuid, created.uuid);

        assert!(store.user_by_api_key("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_api_key_is_rejected() {
        let store = Store::in_memory().await.unwrap();
        store.create_user("alice", "key-1").await.unwrap();
        assert!(store.create_user("bob", "key-1").await.is_err());
    }
}
