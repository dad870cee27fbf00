//! SQLite-backed conversation store.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;

use crate::core::config::StorageConfig;
use crate::core::ids::{ConversationId, RemoteMessageId, UserId};
use crate::core::message::{ChatMessage, Priority, Role};

use super::{
    ConversationMeta, ConversationRecord, ConversationStore, StoreError, StoreFuture, StoreResult,
};

/// Raw conversation row: id, title, `created_at`, `updated_at`, `message_count`.
type MetaRow = (ConversationId, String, i64, i64, i64);

/// Raw message row: id, role, content, model, priority, `is_error`, `created_at`.
type MessageRow = (
    RemoteMessageId,
    String,
    String,
    Option<String>,
    Option<String>,
    bool,
    i64,
);

/// `SQLite` implementation of the conversation store.
pub struct SqliteConversationStore {
    conn: Arc<Connection>,
    conversations: String,
    messages: String,
}

impl SqliteConversationStore {
    /// Open the database at `config.sqlite_path` and create the tables if needed.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or initialized.
    pub async fn open(config: &StorageConfig) -> StoreResult<Self> {
        let conn = Connection::open(&config.sqlite_path).await?;
        Self::with_connection(Arc::new(conn), config).await
    }

    /// Initialize the store on an existing connection.
    ///
    /// # Errors
    /// Returns an error if database operations fail.
    pub async fn with_connection(conn: Arc<Connection>, config: &StorageConfig) -> StoreResult<Self> {
        let conversations = config.conversations_table.clone();
        let messages = config.messages_table.clone();
        let (conv_table, msg_table) = (conversations.clone(), messages.clone());

        conn.call(move |conn| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {conv_table} (
                    id TEXT PRIMARY KEY,
                    owner_id TEXT NOT NULL,
                    title TEXT NOT NULL DEFAULT '',
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL,
                    message_count INTEGER NOT NULL DEFAULT 0
                );
                CREATE INDEX IF NOT EXISTS idx_{conv_table}_owner_updated
                    ON {conv_table} (owner_id, updated_at DESC);
                CREATE TABLE IF NOT EXISTS {msg_table} (
                    seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    id TEXT NOT NULL UNIQUE,
                    conversation_id TEXT NOT NULL,
                    role TEXT NOT NULL,
                    content TEXT NOT NULL,
                    model TEXT,
                    priority TEXT,
                    is_error INTEGER NOT NULL DEFAULT 0,
                    created_at INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_{msg_table}_conversation_created
                    ON {msg_table} (conversation_id, created_at, seq);"
            ))?;
            Ok(())
        })
        .await?;

        Ok(Self {
            conn,
            conversations,
            messages,
        })
    }
}

fn from_millis(ms: i64) -> StoreResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| StoreError::InvalidRecord(format!("invalid timestamp {ms}")))
}

fn meta_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MetaRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn into_meta((id, title, created_at, updated_at, message_count): MetaRow) -> StoreResult<ConversationMeta> {
    Ok(ConversationMeta {
        id,
        title,
        created_at: from_millis(created_at)?,
        updated_at: from_millis(updated_at)?,
        message_count: u32::try_from(message_count)
            .map_err(|_| StoreError::InvalidRecord("invalid message count".to_string()))?,
    })
}

fn into_message(
    (id, role, content, model, priority, is_error, created_at): MessageRow,
) -> StoreResult<ChatMessage> {
    let role = Role::from_str(&role)
        .map_err(|err| StoreError::InvalidRecord(format!("invalid role: {err}")))?;
    let priority = priority
        .map(|p| Priority::from_str(&p))
        .transpose()
        .map_err(|err| StoreError::InvalidRecord(format!("invalid priority: {err}")))?;
    Ok(ChatMessage::persisted(
        id,
        role,
        content,
        model,
        priority,
        from_millis(created_at)?,
        is_error,
    ))
}

impl ConversationStore for SqliteConversationStore {
    fn list_conversations(
        &self,
        owner: UserId,
    ) -> StoreFuture<'_, StoreResult<Vec<ConversationMeta>>> {
        Box::pin(async move {
            let table = self.conversations.clone();
            let rows = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT id, title, created_at, updated_at, message_count
                         FROM {table}
                         WHERE owner_id = ?1
                         ORDER BY updated_at DESC, created_at DESC"
                    ))?;
                    let rows = stmt
                        .query_map([owner], meta_from_row)?
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(rows)
                })
                .await?;
            rows.into_iter().map(into_meta).collect()
        })
    }

    fn get_conversation(
        &self,
        owner: UserId,
        id: ConversationId,
    ) -> StoreFuture<'_, StoreResult<ConversationRecord>> {
        Box::pin(async move {
            let conv_table = self.conversations.clone();
            let msg_table = self.messages.clone();
            let found = self
                .conn
                .call(move |conn| {
                    let meta = conn
                        .query_row(
                            &format!(
                                "SELECT id, title, created_at, updated_at, message_count
                                 FROM {conv_table}
                                 WHERE id = ?1 AND owner_id = ?2"
                            ),
                            rusqlite::params![id, owner],
                            meta_from_row,
                        )
                        .optional()?;
                    let Some(meta) = meta else {
                        return Ok(None);
                    };

                    let mut stmt = conn.prepare(&format!(
                        "SELECT id, role, content, model, priority, is_error, created_at
                         FROM {msg_table}
                         WHERE conversation_id = ?1
                         ORDER BY created_at ASC, seq ASC"
                    ))?;
                    let rows = stmt
                        .query_map([id], |row| {
                            Ok((
                                row.get(0)?,
                                row.get(1)?,
                                row.get(2)?,
                                row.get(3)?,
                                row.get(4)?,
                                row.get(5)?,
                                row.get(6)?,
                            ))
                        })?
                        .collect::<Result<Vec<MessageRow>, _>>()?;
                    Ok(Some((meta, rows)))
                })
                .await?;

            let (meta, rows) = found.ok_or(StoreError::NotFound(id))?;
            let messages = rows
                .into_iter()
                .map(into_message)
                .collect::<StoreResult<Vec<_>>>()?;
            Ok(ConversationRecord {
                meta: into_meta(meta)?,
                messages,
            })
        })
    }

    fn create_conversation(
        &self,
        owner: UserId,
        title: &str,
    ) -> StoreFuture<'_, StoreResult<ConversationMeta>> {
        let title = title.to_string();
        Box::pin(async move {
            let table = self.conversations.clone();
            let id = ConversationId::new();
            let now_ms = Utc::now().timestamp_millis();
            let stored_title = title.clone();

            self.conn
                .call(move |conn| {
                    conn.execute(
                        &format!(
                            "INSERT INTO {table} (id, owner_id, title, created_at, updated_at, message_count)
                             VALUES (?1, ?2, ?3, ?4, ?5, 0)"
                        ),
                        rusqlite::params![id, owner, stored_title, now_ms, now_ms],
                    )?;
                    Ok(())
                })
                .await?;

            let created_at = from_millis(now_ms)?;
            Ok(ConversationMeta {
                id,
                title,
                created_at,
                updated_at: created_at,
                message_count: 0,
            })
        })
    }

    fn append_message(
        &self,
        owner: UserId,
        id: ConversationId,
        message: &ChatMessage,
    ) -> StoreFuture<'_, StoreResult<RemoteMessageId>> {
        let role = message.role.as_str();
        let content = message.content.clone();
        let model = message.model.clone();
        let priority = message.priority.map(Priority::as_str);
        let is_error = message.is_error;
        let created_at = message.timestamp.timestamp_millis();
        Box::pin(async move {
            let conv_table = self.conversations.clone();
            let msg_table = self.messages.clone();
            let message_id = RemoteMessageId::new();
            let now_ms = Utc::now().timestamp_millis();

            let appended = self
                .conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    let matching: i64 = tx.query_row(
                        &format!("SELECT COUNT(*) FROM {conv_table} WHERE id = ?1 AND owner_id = ?2"),
                        rusqlite::params![id, owner],
                        |row| row.get(0),
                    )?;
                    if matching == 0 {
                        return Ok(false);
                    }

                    tx.execute(
                        &format!(
                            "INSERT INTO {msg_table}
                             (id, conversation_id, role, content, model, priority, is_error, created_at)
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
                        ),
                        rusqlite::params![
                            message_id, id, role, content, model, priority, is_error, created_at
                        ],
                    )?;
                    tx.execute(
                        &format!(
                            "UPDATE {conv_table}
                             SET updated_at = MAX(updated_at, ?1), message_count = message_count + 1
                             WHERE id = ?2"
                        ),
                        rusqlite::params![now_ms, id],
                    )?;
                    tx.commit()?;
                    Ok(true)
                })
                .await?;

            if appended {
                Ok(message_id)
            } else {
                Err(StoreError::NotFound(id))
            }
        })
    }

    fn touch_conversation(
        &self,
        owner: UserId,
        id: ConversationId,
    ) -> StoreFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            let table = self.conversations.clone();
            let now_ms = Utc::now().timestamp_millis();
            let changed = self
                .conn
                .call(move |conn| {
                    let changed = conn.execute(
                        &format!(
                            "UPDATE {table} SET updated_at = MAX(updated_at, ?1)
                             WHERE id = ?2 AND owner_id = ?3"
                        ),
                        rusqlite::params![now_ms, id, owner],
                    )?;
                    Ok(changed)
                })
                .await?;
            if changed == 0 {
                return Err(StoreError::NotFound(id));
            }
            Ok(())
        })
    }

    fn rename_conversation(
        &self,
        owner: UserId,
        id: ConversationId,
        title: &str,
    ) -> StoreFuture<'_, StoreResult<()>> {
        let title = title.to_string();
        Box::pin(async move {
            let table = self.conversations.clone();
            let now_ms = Utc::now().timestamp_millis();
            let changed = self
                .conn
                .call(move |conn| {
                    let changed = conn.execute(
                        &format!(
                            "UPDATE {table} SET title = ?1, updated_at = MAX(updated_at, ?2)
                             WHERE id = ?3 AND owner_id = ?4"
                        ),
                        rusqlite::params![title, now_ms, id, owner],
                    )?;
                    Ok(changed)
                })
                .await?;
            if changed == 0 {
                return Err(StoreError::NotFound(id));
            }
            Ok(())
        })
    }

    fn delete_conversation(
        &self,
        owner: UserId,
        id: ConversationId,
    ) -> StoreFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            let conv_table = self.conversations.clone();
            let msg_table = self.messages.clone();
            let deleted = self
                .conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    let matching: i64 = tx.query_row(
                        &format!("SELECT COUNT(*) FROM {conv_table} WHERE id = ?1 AND owner_id = ?2"),
                        rusqlite::params![id, owner],
                        |row| row.get(0),
                    )?;
                    if matching == 0 {
                        return Ok(false);
                    }

                    // Messages first, then the conversation row, in one transaction.
                    tx.execute(
                        &format!("DELETE FROM {msg_table} WHERE conversation_id = ?1"),
                        [id],
                    )?;
                    tx.execute(&format!("DELETE FROM {conv_table} WHERE id = ?1"), [id])?;
                    tx.commit()?;
                    Ok(true)
                })
                .await?;

            if deleted {
                Ok(())
            } else {
                Err(StoreError::NotFound(id))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_store() -> SqliteConversationStore {
        let conn = Connection::open_in_memory().await.unwrap();
        SqliteConversationStore::with_connection(Arc::new(conn), &StorageConfig::default())
            .await
            .unwrap()
    }

    async fn count_messages(store: &SqliteConversationStore, id: ConversationId) -> i64 {
        let table = store.messages.clone();
        store
            .conn
            .call(move |conn| {
                let count = conn.query_row(
                    &format!("SELECT COUNT(*) FROM {table} WHERE conversation_id = ?1"),
                    [id],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_append_and_get_in_order() {
        let store = open_store().await;
        let owner = UserId::new();
        let meta = store.create_conversation(owner, "Greetings").await.unwrap();

        let user = ChatMessage::user("Hello");
        let reply = ChatMessage::assistant("Hi there", "4o", Priority::Medium);
        let first = store.append_message(owner, meta.id, &user).await.unwrap();
        let second = store.append_message(owner, meta.id, &reply).await.unwrap();
        assert_ne!(first, second);

        let record = store.get_conversation(owner, meta.id).await.unwrap();
        assert_eq!(record.meta.title, "Greetings");
        assert_eq!(record.meta.message_count, 2);
        assert_eq!(record.messages.len(), 2);
        assert_eq!(record.messages[0].content, "Hello");
        assert_eq!(record.messages[0].remote_id(), Some(first));
        assert_eq!(record.messages[1].role, Role::Assistant);
        assert_eq!(record.messages[1].model.as_deref(), Some("4o"));
        assert_eq!(record.messages[1].priority, Some(Priority::Medium));
        assert_eq!(record.messages[1].remote_id(), Some(second));
    }

    #[tokio::test]
    async fn test_error_flag_survives_round_trip() {
        let store = open_store().await;
        let owner = UserId::new();
        let meta = store.create_conversation(owner, "Oops").await.unwrap();
        let failure = ChatMessage::failure("Sorry", "4o", Priority::High);
        store.append_message(owner, meta.id, &failure).await.unwrap();

        let record = store.get_conversation(owner, meta.id).await.unwrap();
        assert!(record.messages[0].is_error);
    }

    #[tokio::test]
    async fn test_other_owner_sees_not_found() {
        let store = open_store().await;
        let owner = UserId::new();
        let stranger = UserId::new();
        let meta = store.create_conversation(owner, "Private").await.unwrap();

        assert!(matches!(
            store.get_conversation(stranger, meta.id).await,
            Err(StoreError::NotFound(id)) if id == meta.id
        ));
        assert!(matches!(
            store
                .append_message(stranger, meta.id, &ChatMessage::user("sneaky"))
                .await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.delete_conversation(stranger, meta.id).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(store.list_conversations(stranger).await.unwrap().is_empty());
        assert_eq!(count_messages(&store, meta.id).await, 0);
    }

    #[tokio::test]
    async fn test_list_is_ordered_by_recency() {
        let store = open_store().await;
        let owner = UserId::new();
        let older = store.create_conversation(owner, "older").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let newer = store.create_conversation(owner, "newer").await.unwrap();

        let listed = store.list_conversations(owner).await.unwrap();
        assert_eq!(listed[0].id, newer.id);

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store
            .append_message(owner, older.id, &ChatMessage::user("bump"))
            .await
            .unwrap();
        let listed = store.list_conversations(owner).await.unwrap();
        assert_eq!(listed[0].id, older.id);
        assert_eq!(listed.len(), 2);
    }

    #[tokio::test]
    async fn test_rename_and_touch() {
        let store = open_store().await;
        let owner = UserId::new();
        let meta = store.create_conversation(owner, "draft").await.unwrap();

        store
            .rename_conversation(owner, meta.id, "Final title")
            .await
            .unwrap();
        store.touch_conversation(owner, meta.id).await.unwrap();

        let record = store.get_conversation(owner, meta.id).await.unwrap();
        assert_eq!(record.meta.title, "Final title");
        assert!(record.meta.updated_at >= meta.updated_at);

        let missing = ConversationId::new();
        assert!(matches!(
            store.touch_conversation(owner, missing).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_cascades_to_messages() {
        let store = open_store().await;
        let owner = UserId::new();
        let meta = store.create_conversation(owner, "Doomed").await.unwrap();
        store
            .append_message(owner, meta.id, &ChatMessage::user("one"))
            .await
            .unwrap();
        store
            .append_message(owner, meta.id, &ChatMessage::user("two"))
            .await
            .unwrap();
        assert_eq!(count_messages(&store, meta.id).await, 2);

        store.delete_conversation(owner, meta.id).await.unwrap();

        assert!(matches!(
            store.get_conversation(owner, meta.id).await,
            Err(StoreError::NotFound(_))
        ));
        assert_eq!(count_messages(&store, meta.id).await, 0);
        assert!(matches!(
            store.delete_conversation(owner, meta.id).await,
            Err(StoreError::NotFound(_))
        ));
    }
}
