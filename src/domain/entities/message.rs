//! Thread message entity and the message-store collaborator trait.
//!
//! Chat content is persisted by the message store. The gateway calls it
//! from event handlers and only fans out after the store reports success.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shared::error::AppError;

/// Maximum message length in characters.
pub const MAX_MESSAGE_LENGTH: usize = 4000;

/// A message posted in a thread.
///
/// Maps to the `thread_messages` table:
/// - id: UUID PRIMARY KEY
/// - thread_id: UUID NOT NULL REFERENCES message_threads(id)
/// - sender_id: UUID NOT NULL REFERENCES users(id)
/// - content: TEXT NOT NULL (max 4000 characters)
/// - reply_to_id: UUID NULL REFERENCES thread_messages(id)
/// - created_at: TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// - edited_at: TIMESTAMPTZ NULL
/// - deleted_at: TIMESTAMPTZ NULL (soft delete)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadMessage {
    pub id: String,
    pub thread_id: String,
    pub sender_id: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
}

impl ThreadMessage {
    pub fn is_edited(&self) -> bool {
        self.edited_at.is_some()
    }
}

/// Data required to post a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewThreadMessage {
    pub thread_id: String,
    pub content: String,
    pub reply_to_id: Option<String>,
}

/// Identifies a message removed from a thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedMessage {
    pub id: String,
    pub thread_id: String,
}

/// A user's read marker in a thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadMarker {
    pub thread_id: String,
    pub message_id: String,
    pub user_id: String,
    pub read_at: DateTime<Utc>,
}

/// Message-store collaborator.
///
/// Implementations enforce thread participation and authorship; failures
/// are reported as `AppError::Forbidden` / `AppError::NotFound`.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Whether the user participates in the thread.
    async fn can_access_thread(&self, user_id: &str, thread_id: &str) -> Result<bool, AppError>;

    /// Persist a new message authored by `user_id`.
    async fn create_message(
        &self,
        user_id: &str,
        message: NewThreadMessage,
    ) -> Result<ThreadMessage, AppError>;

    /// Replace the content of a message authored by `user_id`.
    async fn edit_message(
        &self,
        user_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<ThreadMessage, AppError>;

    /// Delete a message authored by `user_id`.
    async fn delete_message(&self, user_id: &str, message_id: &str)
        -> Result<DeletedMessage, AppError>;

    /// Record that `user_id` has read the thread up to `message_id`.
    async fn mark_read(
        &self,
        user_id: &str,
        thread_id: &str,
        message_id: &str,
    ) -> Result<ReadMarker, AppError>;
}
