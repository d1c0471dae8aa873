//! Multi-turn profile editing driven entirely through a `ConversationStore`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use kite_core::SharedClock;
use sha2::{Digest, Sha256};

use crate::conversation_store::ConversationStore;
use crate::conversation_types::{
    AttachmentRef, ConversationError, ConversationPhase, ConversationState, TargetSection,
};
use crate::intent_parser::{describe_intent, parse_turn, render_preview};
use crate::profile_surface::{ProfileSurface, ProfileUpdateRequest};

static CONVERSATION_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn new_conversation_id(user_id: &str, section: TargetSection, now_unix_ms: u64) -> String {
    let sequence = CONVERSATION_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update(section.as_str().as_bytes());
    hasher.update(now_unix_ms.to_le_bytes());
    hasher.update(std::process::id().to_le_bytes());
    hasher.update(sequence.to_le_bytes());
    let digest = hasher.finalize();
    let suffix = digest[..8]
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<String>();
    format!("conv_{suffix}")
}

/// Finite-state dialogue driver. Holds no conversation data itself; every call
/// reloads from and writes back to the store.
#[derive(Clone)]
pub struct ConversationAgent {
    store: Arc<dyn ConversationStore>,
    surface: Arc<dyn ProfileSurface>,
    clock: SharedClock,
}

impl ConversationAgent {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        surface: Arc<dyn ProfileSurface>,
        clock: SharedClock,
    ) -> Self {
        Self {
            store,
            surface,
            clock,
        }
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    pub async fn start_conversation(
        &self,
        user_id: &str,
        section: TargetSection,
    ) -> Result<ConversationState, ConversationError> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(ConversationError::InvalidInput(
                "user id must not be empty".to_string(),
            ));
        }
        let now = self.clock.now_unix_ms();
        let state = ConversationState::new(
            new_conversation_id(user_id, section, now),
            user_id,
            section,
            now,
        );
        let stored = self.store.put(state).await?;
        tracing::info!(
            conversation_id = %stored.conversation_id,
            section = %section,
            "conversation started"
        );
        Ok(stored)
    }

    /// Loads a live conversation, treating one owned by another user as absent.
    pub async fn load_for_user(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<ConversationState, ConversationError> {
        match self.store.get(conversation_id).await? {
            Some(state) if state.user_id == user_id => Ok(state),
            Some(_) => {
                tracing::warn!(conversation_id, "conversation accessed by a different user");
                Err(ConversationError::ConversationNotFound(
                    conversation_id.to_string(),
                ))
            }
            None => Err(ConversationError::ConversationNotFound(
                conversation_id.to_string(),
            )),
        }
    }

    /// Merges one turn into the conversation and persists the result.
    ///
    /// The returned state is either `Clarifying` with questions or `PreviewReady`
    /// with a preview. A missing or expired conversation fails without writing.
    pub async fn submit_turn(
        &self,
        conversation_id: &str,
        utterance: &str,
        attachments: &[AttachmentRef],
    ) -> Result<ConversationState, ConversationError> {
        let mut state = self
            .store
            .get(conversation_id)
            .await?
            .ok_or_else(|| ConversationError::ConversationNotFound(conversation_id.to_string()))?;
        if state.phase.is_terminal() {
            return Err(ConversationError::ConversationNotFound(
                conversation_id.to_string(),
            ));
        }

        let parsed = parse_turn(state.target_section, utterance, attachments);
        state.pending_updates.extend(parsed.updates);
        for attachment in parsed.attachments {
            if !state.attachments.iter().any(|known| known.id == attachment.id) {
                state.attachments.push(attachment);
            }
        }
        if !state.pending_updates.is_empty() {
            state.parsed_intent = Some(describe_intent(
                state.target_section,
                &state.pending_updates,
            ));
        }

        if parsed.clarification_questions.is_empty() {
            state.needs_clarification = false;
            state.clarification_questions.clear();
            state.preview_text = Some(render_preview(
                state.target_section,
                &state.pending_updates,
                &state.attachments,
            ));
            state.phase = ConversationPhase::PreviewReady;
        } else {
            state.needs_clarification = true;
            state.clarification_questions = parsed.clarification_questions;
            state.preview_text = None;
            state.phase = ConversationPhase::Clarifying;
        }

        let stored = self.store.put(state).await?;
        tracing::info!(
            conversation_id = %stored.conversation_id,
            phase = stored.phase.as_str(),
            pending_fields = stored.pending_updates.len(),
            "conversation turn stored"
        );
        Ok(stored)
    }

    /// Applies the previewed updates to the profile surface and ends the conversation.
    pub async fn confirm(
        &self,
        conversation_id: &str,
    ) -> Result<ConversationState, ConversationError> {
        let mut state = self
            .store
            .get(conversation_id)
            .await?
            .ok_or_else(|| ConversationError::ConversationNotFound(conversation_id.to_string()))?;
        if state.phase != ConversationPhase::PreviewReady {
            return Err(ConversationError::ConversationNotReady {
                conversation_id: conversation_id.to_string(),
                phase: state.phase.as_str(),
            });
        }

        let referenced = state
            .attachments
            .iter()
            .filter(|attachment| state.pending_updates.values().any(|value| value == &attachment.url))
            .cloned()
            .collect::<Vec<_>>();
        let request = ProfileUpdateRequest {
            user_id: state.user_id.clone(),
            section: state.target_section,
            updates: state.pending_updates.clone(),
            attachments: referenced,
        };

        // Claimed before the write: a retried or abandoned confirm finds nothing to apply.
        if !self.store.delete(conversation_id).await? {
            return Err(ConversationError::ConversationNotFound(
                conversation_id.to_string(),
            ));
        }
        if let Err(error) = self.surface.apply_updates(&request).await {
            if let Err(restore_error) = self.store.put(state).await {
                tracing::warn!(
                    conversation_id,
                    error = %restore_error,
                    "failed to restore conversation after surface error"
                );
            }
            return Err(error.into());
        }

        state.confirmed = true;
        state.phase = ConversationPhase::Confirmed;
        tracing::info!(
            conversation_id,
            section = %state.target_section,
            fields = state.pending_updates.len(),
            "conversation confirmed and applied"
        );
        Ok(state)
    }

    /// Discards the conversation. Returns whether a record existed.
    pub async fn cancel(&self, conversation_id: &str) -> Result<bool, ConversationError> {
        let removed = self.store.delete(conversation_id).await?;
        tracing::info!(conversation_id, removed, "conversation cancelled");
        Ok(removed)
    }
}
