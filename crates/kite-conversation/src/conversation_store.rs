//! Durable conversation storage contract and the in-memory backend.

use std::collections::HashMap;

use async_trait::async_trait;
use kite_core::{is_expired_unix_ms, SharedClock};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::conversation_types::ConversationState;

pub const DEFAULT_CONVERSATION_TTL_MS: u64 = 60 * 60 * 1_000;

/// Result type for conversation store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid persisted conversation '{conversation_id}': {reason}")]
    InvalidPersistedValue {
        conversation_id: String,
        reason: String,
    },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Expiry written by a `put`: a full TTL from `now`, and always strictly after the
/// expiry it replaces.
pub fn next_expiry_unix_ms(previous_expires_at_unix_ms: u64, now_unix_ms: u64, ttl_ms: u64) -> u64 {
    now_unix_ms
        .saturating_add(ttl_ms)
        .max(previous_expires_at_unix_ms.saturating_add(1))
}

/// Keyed conversation persistence with per-record expiry.
///
/// Expired records are indistinguishable from absent ones: `get` returns `None` for both.
/// `put` replaces the whole record and refreshes its expiry; concurrent writers resolve
/// last-write-wins.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn get(&self, conversation_id: &str) -> StoreResult<Option<ConversationState>>;
    /// Writes `state` as a full record and returns it with the refreshed expiry.
    async fn put(&self, state: ConversationState) -> StoreResult<ConversationState>;
    /// Returns whether a live or expired record was removed.
    async fn delete(&self, conversation_id: &str) -> StoreResult<bool>;
    /// Drops every expired record and returns how many were removed.
    async fn purge_expired(&self) -> StoreResult<usize>;
}

/// Process-local backend for tests and single-process local runs.
///
/// Not suitable for deployments where turns land on different processes.
pub struct InMemoryConversationStore {
    clock: SharedClock,
    ttl_ms: u64,
    records: RwLock<HashMap<String, ConversationState>>,
}

impl InMemoryConversationStore {
    pub fn new(clock: SharedClock, ttl_ms: u64) -> Self {
        Self {
            clock,
            ttl_ms,
            records: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn get(&self, conversation_id: &str) -> StoreResult<Option<ConversationState>> {
        let now = self.clock.now_unix_ms();
        let mut records = self.records.write().await;
        match records.get(conversation_id) {
            Some(state) if is_expired_unix_ms(state.expires_at_unix_ms, now) => {
                records.remove(conversation_id);
                Ok(None)
            }
            Some(state) => Ok(Some(state.clone())),
            None => Ok(None),
        }
    }

    async fn put(&self, mut state: ConversationState) -> StoreResult<ConversationState> {
        let now = self.clock.now_unix_ms();
        let mut records = self.records.write().await;
        let stored_expiry = records
            .get(&state.conversation_id)
            .map(|existing| existing.expires_at_unix_ms)
            .unwrap_or(0);
        let previous = stored_expiry.max(state.expires_at_unix_ms);
        state.expires_at_unix_ms = next_expiry_unix_ms(previous, now, self.ttl_ms);
        records.insert(state.conversation_id.clone(), state.clone());
        Ok(state)
    }

    async fn delete(&self, conversation_id: &str) -> StoreResult<bool> {
        Ok(self.records.write().await.remove(conversation_id).is_some())
    }

    async fn purge_expired(&self) -> StoreResult<usize> {
        let now = self.clock.now_unix_ms();
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, state| !is_expired_unix_ms(state.expires_at_unix_ms, now));
        Ok(before - records.len())
    }
}
