//! Multi-turn profile-editing conversations that survive stateless invocations.
//!
//! Every turn loads the [`ConversationState`] from a [`ConversationStore`], mutates it,
//! and writes the full record back with a refreshed expiry. Nothing is cached in
//! process memory between turns, so consecutive turns may run in different processes.

pub mod chat_agents;
pub mod conversation_agent;
pub mod conversation_store;
pub mod conversation_types;
pub mod intent_parser;
pub mod profile_surface;
pub mod sqlite_store;

pub use chat_agents::{
    conversation_custom_id, handle_conversation_component, parse_conversation_custom_id,
    register_conversation_agents, render_state_reply, CancelEditAgent, ComponentAction,
    EditProfileAgent, ReplyAgent, CONVERSATION_EXPIRED_MESSAGE, CONVERSATION_NOT_READY_MESSAGE,
};
pub use conversation_agent::ConversationAgent;
pub use conversation_store::{
    next_expiry_unix_ms, ConversationStore, InMemoryConversationStore, StoreError, StoreResult,
    DEFAULT_CONVERSATION_TTL_MS,
};
pub use conversation_types::{
    AttachmentRef, ConversationError, ConversationPhase, ConversationState, TargetSection,
};
pub use intent_parser::{describe_intent, field_label, parse_turn, render_preview, ParsedTurn};
pub use profile_surface::{HttpProfileSurface, ProfileSurface, ProfileUpdateRequest, SurfaceError};
pub use sqlite_store::SqliteConversationStore;
