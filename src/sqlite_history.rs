//! SQLite-backed [`HistoryStore`].
//!
//! One row per conversation in `conversation_history`; the ordered message
//! list is stored as a JSON array and replaced wholesale on every save.
//! Every statement is filtered on `user_id`, so another user's conversation
//! reads as missing and cannot be overwritten.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use survey_chat_core::conversation::ConversationMessage;
use survey_chat_core::error::{CoreError, Result};
use survey_chat_core::history::{Conversation, HistoryStore};

pub struct SqliteHistoryStore {
    pool: SqlitePool,
}

impl SqliteHistoryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn store_err(e: sqlx::Error) -> CoreError {
    CoreError::Store(e.to_string())
}

fn not_owned(user_id: &str, conversation_id: &str) -> CoreError {
    CoreError::not_found(format!(
        "conversation {} for user {}",
        conversation_id, user_id
    ))
}

fn row_to_conversation(row: &SqliteRow) -> Result<Conversation> {
    let messages_json: String = row.try_get("messages_json").map_err(store_err)?;
    let messages: Vec<ConversationMessage> = serde_json::from_str(&messages_json)?;
    let updated_at: i64 = row.try_get("updated_at").map_err(store_err)?;

    Ok(Conversation {
        id: row.try_get("id").map_err(store_err)?,
        user_id: row.try_get("user_id").map_err(store_err)?,
        title: row.try_get("title").map_err(store_err)?,
        messages,
        updated_at: Utc
            .timestamp_opt(updated_at, 0)
            .single()
            .unwrap_or_else(Utc::now),
    })
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn save(&self, conversation: &Conversation) -> Result<()> {
        let messages_json = serde_json::to_string(&conversation.messages)?;

        // The conflict update only applies to the owner's row.
        let result = sqlx::query(
            r#"
            INSERT INTO conversation_history (id, user_id, title, messages_json, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                messages_json = excluded.messages_json,
                updated_at = excluded.updated_at
            WHERE conversation_history.user_id = excluded.user_id
            "#,
        )
        .bind(&conversation.id)
        .bind(&conversation.user_id)
        .bind(&conversation.title)
        .bind(&messages_json)
        .bind(conversation.updated_at.timestamp())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        if result.rows_affected() == 0 {
            return Err(not_owned(&conversation.user_id, &conversation.id));
        }
        Ok(())
    }

    async fn load(&self, user_id: &str, conversation_id: &str) -> Result<Option<Conversation>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, title, messages_json, updated_at
            FROM conversation_history
            WHERE id = ? AND user_id = ?
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        row.as_ref().map(row_to_conversation).transpose()
    }

    async fn list(
        &self,
        user_id: &str,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<Conversation>> {
        // LIMIT -1 means no limit in SQLite
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, title, messages_json, updated_at
            FROM conversation_history
            WHERE user_id = ?
            ORDER BY updated_at DESC, id ASC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.iter().map(row_to_conversation).collect()
    }

    async fn set_title(&self, user_id: &str, conversation_id: &str, title: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE conversation_history SET title = ?, updated_at = ? WHERE id = ? AND user_id = ?",
        )
        .bind(title)
        .bind(Utc::now().timestamp())
        .bind(conversation_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        if result.rows_affected() == 0 {
            return Err(not_owned(user_id, conversation_id));
        }
        Ok(())
    }

    async fn delete(&self, user_id: &str, conversation_id: &str) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM conversation_history WHERE id = ? AND user_id = ?")
                .bind(conversation_id)
                .bind(user_id)
                .execute(&self.pool)
                .await
                .map_err(store_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_all(&self, user_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM conversation_history WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(result.rows_affected())
    }
}
