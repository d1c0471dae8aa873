//! Chat-facing agents that drive `ConversationAgent` from slash commands and buttons.

use std::sync::Arc;

use async_trait::async_trait;
use kite_agents::{
    AgentDescriptor, AgentError, AgentInvocation, AgentInvoker, AgentRegistry, AgentReply,
    ButtonStyle, InvocationAttachment,
};

use crate::conversation_agent::ConversationAgent;
use crate::conversation_types::{
    AttachmentRef, ConversationError, ConversationPhase, ConversationState, TargetSection,
};

pub const CONVERSATION_EXPIRED_MESSAGE: &str =
    "This conversation was not found or has expired. Please start again with /edit-profile.";
pub const CONVERSATION_NOT_READY_MESSAGE: &str =
    "There's nothing to confirm yet. Answer the open questions first.";
const SURFACE_FAILURE_MESSAGE: &str =
    "We couldn't save your changes right now. Press Confirm again in a moment.";
const CUSTOM_ID_PREFIX: &str = "conversation";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentAction {
    Confirm,
    Cancel,
}

impl ComponentAction {
    fn as_str(self) -> &'static str {
        match self {
            Self::Confirm => "confirm",
            Self::Cancel => "cancel",
        }
    }
}

pub fn conversation_custom_id(conversation_id: &str, action: ComponentAction) -> String {
    format!("{CUSTOM_ID_PREFIX}:{conversation_id}:{}", action.as_str())
}

/// Parses `conversation:<id>:<confirm|cancel>`.
pub fn parse_conversation_custom_id(custom_id: &str) -> Option<(String, ComponentAction)> {
    let mut parts = custom_id.trim().splitn(3, ':');
    if parts.next()? != CUSTOM_ID_PREFIX {
        return None;
    }
    let conversation_id = parts.next()?.trim();
    let action = match parts.next()?.trim() {
        "confirm" => ComponentAction::Confirm,
        "cancel" => ComponentAction::Cancel,
        _ => return None,
    };
    if conversation_id.is_empty() {
        return None;
    }
    Some((conversation_id.to_string(), action))
}

fn to_attachment_refs(attachments: &[InvocationAttachment]) -> Vec<AttachmentRef> {
    attachments
        .iter()
        .map(|attachment| AttachmentRef {
            id: attachment.id.clone(),
            url: attachment.url.clone(),
            filename: attachment.filename.clone(),
            content_type: attachment.content_type.clone(),
        })
        .collect()
}

fn reply_hint(conversation_id: &str) -> String {
    format!("Reply with `/reply conversation:{conversation_id} message:<your answer>`.")
}

/// Renders the chat message for the conversation's current phase.
pub fn render_state_reply(state: &ConversationState) -> AgentReply {
    let cancel_id = conversation_custom_id(&state.conversation_id, ComponentAction::Cancel);
    match state.phase {
        ConversationPhase::PreviewReady => {
            let preview = state.preview_text.clone().unwrap_or_default();
            AgentReply::ephemeral(preview)
                .with_button(
                    conversation_custom_id(&state.conversation_id, ComponentAction::Confirm),
                    "Confirm",
                    ButtonStyle::Success,
                )
                .with_button(cancel_id, "Cancel", ButtonStyle::Danger)
        }
        ConversationPhase::Clarifying => {
            let questions = state
                .clarification_questions
                .iter()
                .enumerate()
                .map(|(index, question)| format!("{}. {question}", index + 1))
                .collect::<Vec<_>>()
                .join("\n");
            AgentReply::ephemeral(format!(
                "I need a bit more detail:\n{questions}\n{}",
                reply_hint(&state.conversation_id)
            ))
            .with_button(cancel_id, "Cancel", ButtonStyle::Secondary)
        }
        ConversationPhase::AwaitingInput => AgentReply::ephemeral(format!(
            "Editing your {} section. What would you like to change? {}",
            state.target_section,
            reply_hint(&state.conversation_id)
        ))
        .with_button(cancel_id, "Cancel", ButtonStyle::Secondary),
        ConversationPhase::Confirmed => AgentReply::ephemeral(format!(
            "Done! Your {} section has been updated.",
            state.target_section
        )),
        ConversationPhase::Cancelled => AgentReply::ephemeral("Profile edit discarded."),
    }
}

/// Maps conversation failures to the short chat messages users see.
fn reply_for_error(error: ConversationError) -> Result<AgentReply, AgentError> {
    match error {
        ConversationError::ConversationNotFound(_) => {
            Ok(AgentReply::ephemeral(CONVERSATION_EXPIRED_MESSAGE))
        }
        ConversationError::ConversationNotReady { .. } => {
            Ok(AgentReply::ephemeral(CONVERSATION_NOT_READY_MESSAGE))
        }
        ConversationError::InvalidInput(detail) => Err(AgentError::InvalidOptions(detail)),
        ConversationError::Surface(error) => {
            tracing::warn!(error = %error, "profile surface update failed");
            Ok(AgentReply::ephemeral(SURFACE_FAILURE_MESSAGE))
        }
        ConversationError::Store(error) => {
            tracing::error!(error = %error, "conversation store unavailable");
            Err(AgentError::Unavailable(error.to_string()))
        }
    }
}

fn required_option<'a>(invocation: &'a AgentInvocation, name: &str) -> Result<&'a str, AgentError> {
    invocation
        .option_str(name)
        .ok_or_else(|| AgentError::InvalidOptions(format!("`{name}` is required")))
}

/// `/edit-profile section:<section> [request:<text>]`
pub struct EditProfileAgent {
    conversations: ConversationAgent,
}

impl EditProfileAgent {
    pub fn new(conversations: ConversationAgent) -> Self {
        Self { conversations }
    }

    async fn run(&self, invocation: &AgentInvocation) -> Result<ConversationState, ConversationError> {
        let section = invocation
            .option_str("section")
            .map(str::parse::<TargetSection>)
            .transpose()?
            .unwrap_or(TargetSection::Profile);
        let state = self
            .conversations
            .start_conversation(&invocation.invoker_id, section)
            .await?;
        let request = invocation.option_str("request").unwrap_or_default();
        if request.is_empty() && invocation.attachments.is_empty() {
            return Ok(state);
        }
        self.conversations
            .submit_turn(
                &state.conversation_id,
                request,
                &to_attachment_refs(&invocation.attachments),
            )
            .await
    }
}

#[async_trait]
impl AgentInvoker for EditProfileAgent {
    async fn invoke(&self, invocation: AgentInvocation) -> Result<AgentReply, AgentError> {
        match self.run(&invocation).await {
            Ok(state) => Ok(render_state_reply(&state)),
            Err(error) => reply_for_error(error),
        }
    }
}

/// `/reply conversation:<id> [message:<text>]` with optional attachments.
pub struct ReplyAgent {
    conversations: ConversationAgent,
}

impl ReplyAgent {
    pub fn new(conversations: ConversationAgent) -> Self {
        Self { conversations }
    }
}

#[async_trait]
impl AgentInvoker for ReplyAgent {
    async fn invoke(&self, invocation: AgentInvocation) -> Result<AgentReply, AgentError> {
        let conversation_id = required_option(&invocation, "conversation")?;
        let message = invocation.option_str("message").unwrap_or_default();
        let outcome = async {
            self.conversations
                .load_for_user(conversation_id, &invocation.invoker_id)
                .await?;
            self.conversations
                .submit_turn(
                    conversation_id,
                    message,
                    &to_attachment_refs(&invocation.attachments),
                )
                .await
        }
        .await;
        match outcome {
            Ok(state) => Ok(render_state_reply(&state)),
            Err(error) => reply_for_error(error),
        }
    }
}

/// `/cancel-edit conversation:<id>`
pub struct CancelEditAgent {
    conversations: ConversationAgent,
}

impl CancelEditAgent {
    pub fn new(conversations: ConversationAgent) -> Self {
        Self { conversations }
    }
}

#[async_trait]
impl AgentInvoker for CancelEditAgent {
    async fn invoke(&self, invocation: AgentInvocation) -> Result<AgentReply, AgentError> {
        let conversation_id = required_option(&invocation, "conversation")?;
        cancel_owned(&self.conversations, conversation_id, &invocation.invoker_id).await
    }
}

async fn cancel_owned(
    conversations: &ConversationAgent,
    conversation_id: &str,
    user_id: &str,
) -> Result<AgentReply, AgentError> {
    let outcome = async {
        let mut state = conversations.load_for_user(conversation_id, user_id).await?;
        conversations.cancel(conversation_id).await?;
        state.phase = ConversationPhase::Cancelled;
        Ok::<_, ConversationError>(state)
    }
    .await;
    match outcome {
        Ok(state) => Ok(render_state_reply(&state)),
        Err(error) => reply_for_error(error),
    }
}

/// Resolves a button click on a conversation message.
pub async fn handle_conversation_component(
    conversations: &ConversationAgent,
    custom_id: &str,
    user_id: &str,
) -> Result<AgentReply, AgentError> {
    let Some((conversation_id, action)) = parse_conversation_custom_id(custom_id) else {
        tracing::debug!("component custom id does not reference a conversation");
        return Ok(AgentReply::ephemeral(CONVERSATION_EXPIRED_MESSAGE));
    };
    match action {
        ComponentAction::Cancel => cancel_owned(conversations, &conversation_id, user_id).await,
        ComponentAction::Confirm => {
            let outcome = async {
                conversations.load_for_user(&conversation_id, user_id).await?;
                conversations.confirm(&conversation_id).await
            }
            .await;
            match outcome {
                Ok(state) => Ok(render_state_reply(&state)),
                Err(error) => reply_for_error(error),
            }
        }
    }
}

/// Registers `edit-profile`, `reply` and `cancel-edit` against one conversation agent.
pub fn register_conversation_agents(registry: &mut AgentRegistry, conversations: &ConversationAgent) {
    registry.register(
        AgentDescriptor::new(
            "edit-profile",
            "Start editing a section of your profile",
            Arc::new(EditProfileAgent::new(conversations.clone())),
        )
        .with_usage("/edit-profile section:<profile|about|links|media|skills> [request:<text>]"),
    );
    registry.register(
        AgentDescriptor::new(
            "reply",
            "Answer a question in an ongoing profile edit",
            Arc::new(ReplyAgent::new(conversations.clone())),
        )
        .with_usage("/reply conversation:<id> message:<text>"),
    );
    registry.register(
        AgentDescriptor::new(
            "cancel-edit",
            "Discard an ongoing profile edit",
            Arc::new(CancelEditAgent::new(conversations.clone())),
        )
        .with_usage("/cancel-edit conversation:<id>"),
    );
}
