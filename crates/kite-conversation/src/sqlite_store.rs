//! SQLite-backed `ConversationStore` with durable per-record expiry.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use kite_core::{is_expired_unix_ms, SharedClock};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::conversation_store::{next_expiry_unix_ms, ConversationStore, StoreError, StoreResult};
use crate::conversation_types::ConversationState;

/// Persistent conversation store shared by every gateway process pointed at the same file.
///
/// Each record keeps the serialized state blob plus a `ttl` column in epoch seconds.
/// A connection is opened per call, so no conversation data outlives an operation in
/// process memory.
#[derive(Clone)]
pub struct SqliteConversationStore {
    db_path: PathBuf,
    clock: SharedClock,
    ttl_ms: u64,
}

impl SqliteConversationStore {
    /// Creates a store at `path`, creating parent directories and schema if needed.
    pub fn new(path: impl AsRef<Path>, clock: SharedClock, ttl_ms: u64) -> StoreResult<Self> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let store = Self {
            db_path,
            clock,
            ttl_ms,
        };
        let connection = store.open_connection()?;
        initialize_schema(&connection)?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn open_connection(&self) -> StoreResult<Connection> {
        let connection = Connection::open(&self.db_path)?;
        connection.busy_timeout(Duration::from_secs(5))?;
        connection.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            "#,
        )?;
        Ok(connection)
    }
}

fn initialize_schema(connection: &Connection) -> StoreResult<()> {
    connection.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS conversations (
            conversation_id TEXT PRIMARY KEY,
            state_json TEXT NOT NULL,
            ttl INTEGER NOT NULL,
            expires_at_unix_ms INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_conversations_ttl ON conversations (ttl);
        "#,
    )?;
    Ok(())
}

fn to_sql_millis(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_sql_millis(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn decode_state(conversation_id: &str, raw: &str) -> StoreResult<ConversationState> {
    let state: ConversationState = serde_json::from_str(raw)?;
    if state.conversation_id != conversation_id {
        return Err(StoreError::InvalidPersistedValue {
            conversation_id: conversation_id.to_string(),
            reason: format!("record carries id '{}'", state.conversation_id),
        });
    }
    Ok(state)
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn get(&self, conversation_id: &str) -> StoreResult<Option<ConversationState>> {
        let now = self.clock.now_unix_ms();
        let connection = self.open_connection()?;
        let row = connection
            .query_row(
                "SELECT state_json, expires_at_unix_ms FROM conversations WHERE conversation_id = ?1",
                params![conversation_id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;
        let Some((state_json, expires_at)) = row else {
            return Ok(None);
        };
        if is_expired_unix_ms(from_sql_millis(expires_at), now) {
            connection.execute(
                "DELETE FROM conversations WHERE conversation_id = ?1 AND expires_at_unix_ms <= ?2",
                params![conversation_id, to_sql_millis(now)],
            )?;
            tracing::debug!(conversation_id, "dropped expired conversation on read");
            return Ok(None);
        }
        decode_state(conversation_id, &state_json).map(Some)
    }

    async fn put(&self, mut state: ConversationState) -> StoreResult<ConversationState> {
        let now = self.clock.now_unix_ms();
        let mut connection = self.open_connection()?;
        let transaction = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let stored_expiry = transaction
            .query_row(
                "SELECT expires_at_unix_ms FROM conversations WHERE conversation_id = ?1",
                params![state.conversation_id],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .map(from_sql_millis)
            .unwrap_or(0);
        let previous = stored_expiry.max(state.expires_at_unix_ms);
        state.expires_at_unix_ms = next_expiry_unix_ms(previous, now, self.ttl_ms);
        let state_json = serde_json::to_string(&state)?;
        transaction.execute(
            r#"
            INSERT INTO conversations (conversation_id, state_json, ttl, expires_at_unix_ms)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(conversation_id) DO UPDATE SET
                state_json = excluded.state_json,
                ttl = excluded.ttl,
                expires_at_unix_ms = excluded.expires_at_unix_ms
            "#,
            params![
                state.conversation_id,
                state_json,
                to_sql_millis(state.ttl_epoch_seconds()),
                to_sql_millis(state.expires_at_unix_ms),
            ],
        )?;
        transaction.commit()?;
        Ok(state)
    }

    async fn delete(&self, conversation_id: &str) -> StoreResult<bool> {
        let connection = self.open_connection()?;
        let removed = connection.execute(
            "DELETE FROM conversations WHERE conversation_id = ?1",
            params![conversation_id],
        )?;
        Ok(removed > 0)
    }

    async fn purge_expired(&self) -> StoreResult<usize> {
        let now = self.clock.now_unix_ms();
        let connection = self.open_connection()?;
        let removed = connection.execute(
            "DELETE FROM conversations WHERE expires_at_unix_ms <= ?1",
            params![to_sql_millis(now)],
        )?;
        if removed > 0 {
            tracing::info!(removed, "purged expired conversations");
        }
        Ok(removed)
    }
}
