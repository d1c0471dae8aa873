//! Verify, parse, and dispatch one inbound interaction.
//!
//! `RECEIVED -> VERIFIED -> {PING -> PONG, COMMAND -> DISPATCHED, COMPONENT -> DISPATCHED} -> RESPONDED`.
//! Nothing here outlives the request except deferred follow-ups.

use std::sync::Arc;
use std::time::Duration;

use kite_access::InteractionSignatureVerifier;
use kite_agents::{AgentDescriptor, AgentInvocation, AgentRegistry, AgentReply};
use kite_conversation::{handle_conversation_component, ConversationAgent, CONVERSATION_EXPIRED_MESSAGE};
use serde_json::Value;
use thiserror::Error;

use crate::followup_sink::FollowupSink;
use crate::interaction_payload::{
    deferred_response, message_response, parse_interaction, pong_response,
    update_message_response, Interaction, InteractionMeta,
};

pub const DEFAULT_RESPONSE_BUDGET_MS: u64 = 2_500;
pub const SLOW_AGENT_MESSAGE: &str = "That took too long. Please try again in a moment.";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouterError {
    #[error("interaction authentication failed")]
    AuthenticationFailure,
    #[error("malformed interaction: {0}")]
    MalformedInteraction(String),
}

#[derive(Debug, Clone, Copy)]
pub struct InboundInteraction<'a> {
    pub raw_body: &'a [u8],
    pub signature_hex: &'a str,
    pub timestamp: &'a str,
}

pub fn unknown_command_message(name: &str) -> String {
    format!("I don't know the command `/{name}`. Try `/help` to see what I can do.")
}

#[derive(Clone)]
pub struct InteractionRouter {
    verifier: InteractionSignatureVerifier,
    registry: Arc<AgentRegistry>,
    conversations: Option<ConversationAgent>,
    followups: Option<Arc<dyn FollowupSink>>,
    response_budget: Duration,
}

impl InteractionRouter {
    pub fn new(verifier: InteractionSignatureVerifier, registry: AgentRegistry) -> Self {
        Self {
            verifier,
            registry: Arc::new(registry),
            conversations: None,
            followups: None,
            response_budget: Duration::from_millis(DEFAULT_RESPONSE_BUDGET_MS),
        }
    }

    /// Conversation agent that resolves button clicks.
    pub fn with_conversations(mut self, conversations: ConversationAgent) -> Self {
        self.conversations = Some(conversations);
        self
    }

    pub fn with_followups(mut self, followups: Arc<dyn FollowupSink>) -> Self {
        self.followups = Some(followups);
        self
    }

    pub fn with_response_budget_ms(mut self, budget_ms: u64) -> Self {
        self.response_budget = Duration::from_millis(budget_ms.max(1));
        self
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Returns the JSON response body. Verification runs before anything reads the body.
    pub async fn route(&self, inbound: InboundInteraction<'_>) -> Result<Value, RouterError> {
        if !self
            .verifier
            .verify(inbound.raw_body, inbound.signature_hex, inbound.timestamp)
        {
            tracing::warn!(body_bytes = inbound.raw_body.len(), "rejected unsigned interaction");
            return Err(RouterError::AuthenticationFailure);
        }
        let interaction =
            parse_interaction(inbound.raw_body).map_err(RouterError::MalformedInteraction)?;
        tracing::debug!(kind = interaction.kind(), "interaction verified");
        match interaction {
            Interaction::Ping => Ok(pong_response()),
            Interaction::Command { meta, invocation } => {
                Ok(self.dispatch_command(meta, invocation).await)
            }
            Interaction::Component { meta, custom_id } => {
                let reply = self.handle_component(&meta, &custom_id).await;
                Ok(update_message_response(&reply))
            }
        }
    }

    async fn dispatch_command(&self, meta: InteractionMeta, invocation: AgentInvocation) -> Value {
        let descriptor = match self.registry.resolve(&invocation.command) {
            Ok(descriptor) => descriptor.clone(),
            Err(error) => {
                tracing::warn!(
                    interaction_id = %meta.id,
                    command = %invocation.command,
                    error = %error,
                    "unknown command"
                );
                return message_response(&AgentReply::ephemeral(unknown_command_message(
                    &invocation.command,
                )));
            }
        };
        tracing::info!(
            interaction_id = %meta.id,
            agent = %descriptor.name,
            deferred = descriptor.deferred,
            "dispatching command"
        );

        if descriptor.deferred {
            if let Some(followups) = self.followups.clone() {
                tokio::spawn(async move {
                    let reply = invoke_agent(&descriptor, invocation).await;
                    if let Err(error) = followups
                        .send_followup(&meta.application_id, &meta.token, &reply)
                        .await
                    {
                        tracing::warn!(
                            interaction_id = %meta.id,
                            agent = %descriptor.name,
                            error = %error,
                            "follow-up delivery failed"
                        );
                    }
                });
                return deferred_response();
            }
            tracing::debug!(agent = %descriptor.name, "no follow-up sink; answering inline");
        }

        let reply = match tokio::time::timeout(
            self.response_budget,
            invoke_agent(&descriptor, invocation),
        )
        .await
        {
            Ok(reply) => reply,
            Err(_) => {
                tracing::warn!(
                    interaction_id = %meta.id,
                    agent = %descriptor.name,
                    budget_ms = self.response_budget.as_millis() as u64,
                    "agent exceeded response budget"
                );
                AgentReply::ephemeral(SLOW_AGENT_MESSAGE)
            }
        };
        message_response(&reply)
    }

    /// Clicks run on their own task: the response budget only bounds how long the click
    /// waits for a reply, and a confirm that outlives it still finishes.
    async fn handle_component(&self, meta: &InteractionMeta, custom_id: &str) -> AgentReply {
        let Some(conversations) = self.conversations.clone() else {
            return AgentReply::ephemeral(CONVERSATION_EXPIRED_MESSAGE);
        };
        let custom_id = custom_id.to_string();
        let invoker_id = meta.invoker_id.clone();
        let work = tokio::spawn(async move {
            handle_conversation_component(&conversations, &custom_id, &invoker_id).await
        });
        match tokio::time::timeout(self.response_budget, work).await {
            Ok(Ok(Ok(reply))) => reply,
            Ok(Ok(Err(error))) => {
                tracing::warn!(interaction_id = %meta.id, error = %error, "component handling failed");
                AgentReply::ephemeral(error.user_message())
            }
            Ok(Err(error)) => {
                tracing::warn!(interaction_id = %meta.id, error = %error, "component task failed");
                AgentReply::ephemeral(CONVERSATION_EXPIRED_MESSAGE)
            }
            Err(_) => {
                tracing::warn!(
                    interaction_id = %meta.id,
                    "component exceeded response budget; finishing in the background"
                );
                AgentReply::ephemeral(SLOW_AGENT_MESSAGE)
            }
        }
    }
}

async fn invoke_agent(descriptor: &AgentDescriptor, invocation: AgentInvocation) -> AgentReply {
    match descriptor.invoker.invoke(invocation).await {
        Ok(reply) => reply,
        Err(error) => {
            tracing::warn!(agent = %descriptor.name, error = %error, "agent invocation failed");
            AgentReply::ephemeral(error.user_message())
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use ed25519_dalek::{Signer, SigningKey};

    pub(crate) const TEST_TIMESTAMP: &str = "1730000000";

    pub(crate) fn signing_key() -> SigningKey {
        SigningKey::from_bytes(&[7u8; 32])
    }

    pub(crate) fn to_hex(bytes: &[u8]) -> String {
        bytes.iter().map(|byte| format!("{byte:02x}")).collect()
    }

    pub(crate) fn public_key_hex() -> String {
        to_hex(signing_key().verifying_key().as_bytes())
    }

    pub(crate) fn sign(timestamp: &str, body: &[u8]) -> String {
        let mut message = timestamp.as_bytes().to_vec();
        message.extend_from_slice(body);
        to_hex(&signing_key().sign(&message).to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use kite_access::InteractionSignatureVerifier;
    use kite_agents::{AgentDescriptor, AgentInvokerFn, AgentRegistry, AgentReply};
    use kite_conversation::{
        conversation_custom_id, ComponentAction, ConversationAgent, ConversationStore,
        InMemoryConversationStore, ProfileSurface, ProfileUpdateRequest, SurfaceError,
        TargetSection, CONVERSATION_EXPIRED_MESSAGE,
    };
    use kite_core::SystemClock;
    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    use super::test_support::{public_key_hex, sign, TEST_TIMESTAMP};
    use super::{
        unknown_command_message, InboundInteraction, InteractionRouter, RouterError,
        SLOW_AGENT_MESSAGE,
    };
    use crate::followup_sink::{FollowupError, FollowupSink};

    struct ChannelSink(mpsc::UnboundedSender<(String, AgentReply)>);

    #[async_trait]
    impl FollowupSink for ChannelSink {
        async fn send_followup(
            &self,
            application_id: &str,
            _token: &str,
            reply: &AgentReply,
        ) -> Result<(), FollowupError> {
            let _ = self.0.send((application_id.to_string(), reply.clone()));
            Ok(())
        }
    }

    fn router(registry: AgentRegistry) -> InteractionRouter {
        let verifier =
            InteractionSignatureVerifier::from_public_key_hex(&public_key_hex()).expect("verifier");
        InteractionRouter::new(verifier, registry)
    }

    fn echo_registry() -> AgentRegistry {
        let mut registry = AgentRegistry::new();
        registry.register(AgentDescriptor::new(
            "echo",
            "Echo the text option",
            Arc::new(AgentInvokerFn::new(|invocation| async move {
                Ok(AgentReply::text(
                    invocation.option_str("text").unwrap_or_default().to_string(),
                ))
            })),
        ));
        registry
    }

    async fn route_signed(router: &InteractionRouter, body: &Value) -> Result<Value, RouterError> {
        let raw = body.to_string();
        let signature = sign(TEST_TIMESTAMP, raw.as_bytes());
        router
            .route(InboundInteraction {
                raw_body: raw.as_bytes(),
                signature_hex: &signature,
                timestamp: TEST_TIMESTAMP,
            })
            .await
    }

    fn command(name: &str, options: Value) -> Value {
        json!({
            "type": 2,
            "id": "int-1",
            "application_id": "app-1",
            "token": "interaction-token",
            "member": {"user": {"id": "user-1"}},
            "data": {"name": name, "options": options}
        })
    }

    #[tokio::test]
    async fn functional_signed_ping_returns_pong() {
        let response = route_signed(&router(AgentRegistry::new()), &json!({"type": 1}))
            .await
            .expect("pong");
        assert_eq!(response, json!({"type": 1}));
    }

    #[tokio::test]
    async fn regression_mutated_signature_body_or_timestamp_is_rejected() {
        let router = router(echo_registry());
        let raw = json!({"type": 1}).to_string();
        let signature = sign(TEST_TIMESTAMP, raw.as_bytes());
        let mut flipped = signature.clone().into_bytes();
        flipped[0] = if flipped[0] == b'0' { b'1' } else { b'0' };
        let flipped = String::from_utf8(flipped).expect("hex");

        let cases = [
            (raw.clone(), flipped.as_str(), TEST_TIMESTAMP),
            (raw.replace('1', "2"), signature.as_str(), TEST_TIMESTAMP),
            (raw.clone(), signature.as_str(), "1730000001"),
            (raw.clone(), "", TEST_TIMESTAMP),
            (raw.clone(), "zz", TEST_TIMESTAMP),
        ];
        for (body, signature_hex, timestamp) in cases {
            let outcome = router
                .route(InboundInteraction {
                    raw_body: body.as_bytes(),
                    signature_hex,
                    timestamp,
                })
                .await;
            assert_eq!(outcome, Err(RouterError::AuthenticationFailure));
        }
    }

    #[tokio::test]
    async fn functional_registered_command_replies_inline() {
        let response = route_signed(
            &router(echo_registry()),
            &command("echo", json!([{"name": "text", "type": 3, "value": "hello"}])),
        )
        .await
        .expect("reply");
        assert_eq!(response["type"], 4);
        assert_eq!(response["data"]["content"], "hello");
    }

    #[tokio::test]
    async fn functional_unknown_command_gets_friendly_message() {
        let response = route_signed(&router(echo_registry()), &command("deploy", json!([])))
            .await
            .expect("reply");
        assert_eq!(response["type"], 4);
        assert_eq!(response["data"]["content"], unknown_command_message("deploy"));
        assert_eq!(response["data"]["flags"], 64);
    }

    #[tokio::test]
    async fn integration_deferred_agent_acknowledges_then_follows_up() {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let mut registry = echo_registry();
        registry.register(
            AgentDescriptor::new(
                "report",
                "Slow report",
                Arc::new(AgentInvokerFn::new(|_invocation| async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(AgentReply::ephemeral("report ready"))
                })),
            )
            .deferred(true),
        );
        let router = router(registry).with_followups(Arc::new(ChannelSink(sender)));

        let response = route_signed(&router, &command("report", json!([])))
            .await
            .expect("ack");
        assert_eq!(response["type"], 5);
        let (application_id, reply) = tokio::time::timeout(Duration::from_secs(2), receiver.recv())
            .await
            .expect("follow-up in time")
            .expect("follow-up");
        assert_eq!(application_id, "app-1");
        assert_eq!(reply.content, "report ready");
    }

    #[tokio::test]
    async fn regression_agent_over_budget_gets_short_message() {
        let mut registry = AgentRegistry::new();
        registry.register(AgentDescriptor::new(
            "slow",
            "Never finishes in time",
            Arc::new(AgentInvokerFn::new(|_invocation| async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(AgentReply::text("late"))
            })),
        ));
        let router = router(registry).with_response_budget_ms(20);
        let response = route_signed(&router, &command("slow", json!([])))
            .await
            .expect("reply");
        assert_eq!(response["data"]["content"], SLOW_AGENT_MESSAGE);
    }

    #[tokio::test]
    async fn functional_component_without_conversation_reports_expiry() {
        let body = json!({
            "type": 3,
            "id": "int-2",
            "user": {"id": "user-1"},
            "data": {"custom_id": "conversation:conv_missing:confirm", "component_type": 2}
        });
        let response = route_signed(&router(echo_registry()), &body)
            .await
            .expect("reply");
        assert_eq!(response["type"], 7);
        assert_eq!(response["data"]["content"], CONVERSATION_EXPIRED_MESSAGE);
    }

    struct CountingSurface {
        applied: std::sync::Mutex<usize>,
    }

    #[async_trait]
    impl ProfileSurface for CountingSurface {
        async fn apply_updates(&self, _request: &ProfileUpdateRequest) -> Result<(), SurfaceError> {
            tokio::time::sleep(Duration::from_millis(150)).await;
            *self.applied.lock().expect("surface lock") += 1;
            Ok(())
        }
    }

    #[tokio::test]
    async fn regression_confirm_over_budget_finishes_once_and_retry_reports_expiry() {
        let surface = Arc::new(CountingSurface {
            applied: std::sync::Mutex::new(0),
        });
        let store = Arc::new(InMemoryConversationStore::new(
            Arc::new(SystemClock),
            60 * 60 * 1_000,
        ));
        let agent = ConversationAgent::new(store.clone(), surface.clone(), Arc::new(SystemClock));
        let started = agent
            .start_conversation("user-1", TargetSection::Profile)
            .await
            .expect("start");
        agent
            .submit_turn(&started.conversation_id, "headline: Staff engineer", &[])
            .await
            .expect("turn");
        let router = router(echo_registry())
            .with_conversations(agent)
            .with_response_budget_ms(20);
        let click = json!({
            "type": 3,
            "id": "int-3",
            "user": {"id": "user-1"},
            "data": {
                "custom_id": conversation_custom_id(&started.conversation_id, ComponentAction::Confirm),
                "component_type": 2
            }
        });

        let first = route_signed(&router, &click).await.expect("reply");
        assert_eq!(first["data"]["content"], SLOW_AGENT_MESSAGE);
        let retry = route_signed(&router, &click).await.expect("reply");
        assert_eq!(retry["data"]["content"], CONVERSATION_EXPIRED_MESSAGE);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(*surface.applied.lock().expect("lock"), 1);
        assert!(store
            .get(&started.conversation_id)
            .await
            .expect("get")
            .is_none());
    }

    #[tokio::test]
    async fn regression_signed_garbage_is_malformed_not_a_crash() {
        let router = router(echo_registry());
        let raw = b"{\"type\":2}";
        let signature = sign(TEST_TIMESTAMP, raw);
        let outcome = router
            .route(InboundInteraction {
                raw_body: raw,
                signature_hex: &signature,
                timestamp: TEST_TIMESTAMP,
            })
            .await;
        assert!(matches!(outcome, Err(RouterError::MalformedInteraction(_))));
    }
}
