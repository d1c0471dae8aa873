use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::conversation_store::StoreError;
use crate::profile_surface::SurfaceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Editable surface areas of a user profile.
pub enum TargetSection {
    Profile,
    About,
    Links,
    Media,
    Skills,
}

impl TargetSection {
    pub const ALL: [TargetSection; 5] = [
        TargetSection::Profile,
        TargetSection::About,
        TargetSection::Links,
        TargetSection::Media,
        TargetSection::Skills,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::About => "about",
            Self::Links => "links",
            Self::Media => "media",
            Self::Skills => "skills",
        }
    }
}

impl fmt::Display for TargetSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetSection {
    type Err = ConversationError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|section| section.as_str() == normalized)
            .ok_or_else(|| {
                ConversationError::InvalidInput(format!(
                    "unknown section '{}', expected one of: {}",
                    raw.trim(),
                    Self::ALL.map(TargetSection::as_str).join(", ")
                ))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationPhase {
    AwaitingInput,
    Clarifying,
    PreviewReady,
    Confirmed,
    Cancelled,
}

impl ConversationPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AwaitingInput => "awaiting_input",
            Self::Clarifying => "clarifying",
            Self::PreviewReady => "preview_ready",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Confirmed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Reference to platform-hosted content attached during a turn.
pub struct AttachmentRef {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Durable multi-turn memory for one conversation. Always written as a whole record.
pub struct ConversationState {
    pub conversation_id: String,
    pub user_id: String,
    pub target_section: TargetSection,
    pub phase: ConversationPhase,
    #[serde(default)]
    pub pending_updates: BTreeMap<String, String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
    #[serde(default)]
    pub parsed_intent: Option<String>,
    #[serde(default)]
    pub preview_text: Option<String>,
    #[serde(default)]
    pub confirmed: bool,
    #[serde(default)]
    pub needs_clarification: bool,
    #[serde(default)]
    pub clarification_questions: Vec<String>,
    pub created_at_unix_ms: u64,
    pub expires_at_unix_ms: u64,
}

impl ConversationState {
    pub fn new(
        conversation_id: impl Into<String>,
        user_id: impl Into<String>,
        target_section: TargetSection,
        now_unix_ms: u64,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            user_id: user_id.into(),
            target_section,
            phase: ConversationPhase::AwaitingInput,
            pending_updates: BTreeMap::new(),
            attachments: Vec::new(),
            parsed_intent: None,
            preview_text: None,
            confirmed: false,
            needs_clarification: false,
            clarification_questions: Vec::new(),
            created_at_unix_ms: now_unix_ms,
            expires_at_unix_ms: now_unix_ms,
        }
    }

    /// Expiry in epoch seconds, the unit the durable record's `ttl` attribute uses.
    pub fn ttl_epoch_seconds(&self) -> u64 {
        self.expires_at_unix_ms.div_ceil(1_000)
    }
}

#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("conversation '{0}' was not found or has expired")]
    ConversationNotFound(String),
    #[error("conversation '{conversation_id}' is not ready to confirm (phase {phase})")]
    ConversationNotReady {
        conversation_id: String,
        phase: &'static str,
    },
    #[error("invalid conversation input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Surface(#[from] SurfaceError),
}
