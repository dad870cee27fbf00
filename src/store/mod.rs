//! Remote conversation store.
//!
//! Every operation is scoped by the owning [`UserId`]; a conversation owned by
//! another identity behaves exactly like a missing one.

pub mod sqlite;

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::ids::{ConversationId, RemoteMessageId, UserId};
use crate::core::message::ChatMessage;

pub use sqlite::SqliteConversationStore;

/// Boxed future type for store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Error type for conversation store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The conversation does not exist or belongs to another identity.
    #[error("conversation {0} not found")]
    NotFound(ConversationId),
    /// A stored row could not be decoded.
    #[error("invalid stored record: {0}")]
    InvalidRecord(String),
    /// The backing service failed.
    #[error("store backend error: {0}")]
    Backend(String),
    /// `SQLite` storage error (sync).
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// `SQLite` storage error (async).
    #[error("tokio-rusqlite error: {0}")]
    TokioSqlite(#[from] tokio_rusqlite::Error),
}

/// Result type for conversation store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Conversation row shown in the sidebar.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMeta {
    /// Stable identifier.
    pub id: ConversationId,
    /// Display title.
    pub title: String,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
    /// Last append or rename.
    pub updated_at: DateTime<Utc>,
    /// Number of persisted messages.
    pub message_count: u32,
}

/// A conversation together with its full transcript in creation order.
#[derive(Clone, Debug, PartialEq)]
pub struct ConversationRecord {
    /// Conversation metadata.
    pub meta: ConversationMeta,
    /// Persisted messages, oldest first. Every message carries a remote id.
    pub messages: Vec<ChatMessage>,
}

/// Persistence service for conversations and their messages.
pub trait ConversationStore: Send + Sync {
    /// List the owner's conversations, most recently updated first.
    fn list_conversations(
        &self,
        owner: UserId,
    ) -> StoreFuture<'_, StoreResult<Vec<ConversationMeta>>>;

    /// Load a conversation and its transcript.
    ///
    /// Fails with [`StoreError::NotFound`] if `id` is missing or not owned by `owner`.
    fn get_conversation(
        &self,
        owner: UserId,
        id: ConversationId,
    ) -> StoreFuture<'_, StoreResult<ConversationRecord>>;

    /// Create an empty conversation.
    fn create_conversation(
        &self,
        owner: UserId,
        title: &str,
    ) -> StoreFuture<'_, StoreResult<ConversationMeta>>;

    /// Append one message and return its durable id. Refreshes `updated_at`.
    fn append_message(
        &self,
        owner: UserId,
        id: ConversationId,
        message: &ChatMessage,
    ) -> StoreFuture<'_, StoreResult<RemoteMessageId>>;

    /// Refresh `updated_at`.
    fn touch_conversation(&self, owner: UserId, id: ConversationId)
    -> StoreFuture<'_, StoreResult<()>>;

    /// Replace the title.
    fn rename_conversation(
        &self,
        owner: UserId,
        id: ConversationId,
        title: &str,
    ) -> StoreFuture<'_, StoreResult<()>>;

    /// Delete a conversation and all of its messages.
    fn delete_conversation(
        &self,
        owner: UserId,
        id: ConversationId,
    ) -> StoreFuture<'_, StoreResult<()>>;
}
