//! Message Store Implementation
//!
//! PostgreSQL implementation of the MessageStore trait. Thread participation
//! and authorship are checked inside the same transaction as the write.
//!
//! Tables: `message_threads`, `thread_participants(thread_id, user_id)`,
//! `thread_messages` (soft-deleted via `deleted_at`) and
//! `thread_reads(thread_id, user_id, last_read_message_id, read_at)`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::domain::{
    DeletedMessage, MessageStore, NewThreadMessage, ReadMarker, ThreadMessage,
    MAX_MESSAGE_LENGTH,
};
use crate::shared::error::AppError;

/// Internal row type for message queries.
#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    thread_id: Uuid,
    sender_id: Uuid,
    content: String,
    reply_to_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    edited_at: Option<DateTime<Utc>>,
}

impl MessageRow {
    fn into_message(self) -> ThreadMessage {
        ThreadMessage {
            id: self.id.to_string(),
            thread_id: self.thread_id.to_string(),
            sender_id: self.sender_id.to_string(),
            content: self.content,
            reply_to_id: self.reply_to_id.map(|id| id.to_string()),
            created_at: self.created_at,
            edited_at: self.edited_at,
        }
    }
}

/// Author and thread of a live message.
#[derive(Debug, sqlx::FromRow)]
struct OwnershipRow {
    thread_id: Uuid,
    sender_id: Uuid,
}

/// PostgreSQL message store.
#[derive(Clone)]
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn is_participant(
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
        thread_id: Uuid,
    ) -> Result<bool, AppError> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM thread_participants
                WHERE thread_id = $1 AND user_id = $2
            )
            "#,
        )
        .bind(thread_id)
        .bind(user_id)
        .fetch_one(&mut **tx)
        .await?;

        Ok(exists)
    }

    /// Load a live message and check `user_id` wrote it.
    async fn authored_by(
        tx: &mut Transaction<'_, Postgres>,
        message_id: Uuid,
        user_id: Uuid,
    ) -> Result<OwnershipRow, AppError> {
        let row = sqlx::query_as::<_, OwnershipRow>(
            r#"
            SELECT thread_id, sender_id
            FROM thread_messages
            WHERE id = $1 AND deleted_at IS NULL
            FOR UPDATE
            "#,
        )
        .bind(message_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| AppError::NotFound("message".into()))?;

        if row.sender_id != user_id {
            return Err(AppError::Forbidden("only the author can change a message".into()));
        }
        Ok(row)
    }
}

fn parse_id(kind: &str, value: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(value).map_err(|_| AppError::NotFound(kind.to_string()))
}

fn check_content(content: &str) -> Result<(), AppError> {
    let length = content.chars().count();
    if content.trim().is_empty() || length > MAX_MESSAGE_LENGTH {
        return Err(AppError::BadRequest(format!(
            "message content must be 1-{} characters",
            MAX_MESSAGE_LENGTH
        )));
    }
    Ok(())
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn can_access_thread(&self, user_id: &str, thread_id: &str) -> Result<bool, AppError> {
        let (Ok(user_id), Ok(thread_id)) = (Uuid::parse_str(user_id), Uuid::parse_str(thread_id))
        else {
            return Ok(false);
        };

        let mut tx = self.pool.begin().await?;
        let allowed = Self::is_participant(&mut tx, user_id, thread_id).await?;
        tx.commit().await?;
        Ok(allowed)
    }

    async fn create_message(
        &self,
        user_id: &str,
        message: NewThreadMessage,
    ) -> Result<ThreadMessage, AppError> {
        check_content(&message.content)?;
        let user_id = parse_id("user", user_id)?;
        let thread_id = parse_id("thread", &message.thread_id)?;
        let reply_to_id = message
            .reply_to_id
            .as_deref()
            .map(|id| parse_id("message", id))
            .transpose()?;

        let mut tx = self.pool.begin().await?;

        if !Self::is_participant(&mut tx, user_id, thread_id).await? {
            return Err(AppError::Forbidden("not a participant of this thread".into()));
        }

        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            INSERT INTO thread_messages (id, thread_id, sender_id, content, reply_to_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, thread_id, sender_id, content, reply_to_id, created_at, edited_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(thread_id)
        .bind(user_id)
        .bind(&message.content)
        .bind(reply_to_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
                AppError::NotFound("reply target".into())
            }
            _ => AppError::Database(e),
        })?;

        sqlx::query("UPDATE message_threads SET last_message_at = $2 WHERE id = $1")
            .bind(thread_id)
            .bind(row.created_at)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(row.into_message())
    }

    async fn edit_message(
        &self,
        user_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<ThreadMessage, AppError> {
        check_content(content)?;
        let user_id = parse_id("user", user_id)?;
        let message_id = parse_id("message", message_id)?;

        let mut tx = self.pool.begin().await?;
        Self::authored_by(&mut tx, message_id, user_id).await?;

        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            UPDATE thread_messages
            SET content = $2, edited_at = NOW()
            WHERE id = $1
            RETURNING id, thread_id, sender_id, content, reply_to_id, created_at, edited_at
            "#,
        )
        .bind(message_id)
        .bind(content)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(row.into_message())
    }

    async fn delete_message(
        &self,
        user_id: &str,
        message_id: &str,
    ) -> Result<DeletedMessage, AppError> {
        let user_id = parse_id("user", user_id)?;
        let message_id = parse_id("message", message_id)?;

        let mut tx = self.pool.begin().await?;
        let owner = Self::authored_by(&mut tx, message_id, user_id).await?;

        sqlx::query("UPDATE thread_messages SET deleted_at = NOW() WHERE id = $1")
            .bind(message_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(DeletedMessage {
            id: message_id.to_string(),
            thread_id: owner.thread_id.to_string(),
        })
    }

    async fn mark_read(
        &self,
        user_id: &str,
        thread_id: &str,
        message_id: &str,
    ) -> Result<ReadMarker, AppError> {
        let user_uuid = parse_id("user", user_id)?;
        let thread_uuid = parse_id("thread", thread_id)?;
        let message_uuid = parse_id("message", message_id)?;

        let mut tx = self.pool.begin().await?;

        if !Self::is_participant(&mut tx, user_uuid, thread_uuid).await? {
            return Err(AppError::Forbidden("not a participant of this thread".into()));
        }

        let in_thread: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM thread_messages WHERE id = $1 AND thread_id = $2)",
        )
        .bind(message_uuid)
        .bind(thread_uuid)
        .fetch_one(&mut *tx)
        .await?;
        if !in_thread {
            return Err(AppError::NotFound("message".into()));
        }

        let read_at: DateTime<Utc> = sqlx::query_scalar(
            r#"
            INSERT INTO thread_reads (thread_id, user_id, last_read_message_id, read_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (thread_id, user_id)
            DO UPDATE SET last_read_message_id = EXCLUDED.last_read_message_id,
                          read_at = EXCLUDED.read_at
            RETURNING read_at
            "#,
        )
        .bind(thread_uuid)
        .bind(user_uuid)
        .bind(message_uuid)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(ReadMarker {
            thread_id: thread_uuid.to_string(),
            message_id: message_uuid.to_string(),
            user_id: user_uuid.to_string(),
            read_at,
        })
    }
}
