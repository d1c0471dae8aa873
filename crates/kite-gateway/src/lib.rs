//! Signed chat-platform interaction endpoint: verification, parsing, and agent dispatch.

pub mod followup_sink;
pub mod gateway_server;
pub mod interaction_payload;
pub mod interaction_router;

pub use followup_sink::{FollowupError, FollowupSink, WebhookFollowupSink, DEFAULT_FOLLOWUP_API_BASE};
pub use gateway_server::{
    build_gateway_router, run_gateway_server, DEFAULT_GATEWAY_BIND, HEALTH_ENDPOINT,
    INTERACTIONS_ENDPOINT,
};
pub use interaction_payload::{parse_interaction, Interaction, InteractionMeta};
pub use interaction_router::{
    unknown_command_message, InboundInteraction, InteractionRouter, RouterError,
    DEFAULT_RESPONSE_BUDGET_MS,
};
