use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use kite_access::InteractionSignatureVerifier;
use kite_agents::AgentRegistry;
use kite_cli::GatewayCli;
use kite_conversation::{
    register_conversation_agents, ConversationAgent, ConversationStore, HttpProfileSurface,
    SqliteConversationStore,
};
use kite_core::{SharedClock, SystemClock};
use kite_gateway::{run_gateway_server, InteractionRouter, WebhookFollowupSink};

const PURGE_INTERVAL: Duration = Duration::from_secs(5 * 60);

fn open_store(cli: &GatewayCli, clock: SharedClock) -> Result<Arc<dyn ConversationStore>> {
    let ttl_ms = cli.conversation_ttl_seconds.saturating_mul(1_000);
    let store = SqliteConversationStore::new(&cli.conversation_db, clock, ttl_ms)
        .with_context(|| {
            format!(
                "failed to open conversation store {}",
                cli.conversation_db.display()
            )
        })?;
    Ok(Arc::new(store))
}

/// Builds the router with the conversation agents and `help` registered.
pub fn build_interaction_router(cli: &GatewayCli) -> Result<InteractionRouter> {
    let verifier = InteractionSignatureVerifier::from_public_key_hex(cli.public_key.trim())
        .context("invalid --public-key")?;
    let clock: SharedClock = Arc::new(SystemClock);
    let store = open_store(cli, clock.clone())?;
    let surface = HttpProfileSurface::new(
        &cli.profile_api_base,
        cli.profile_api_token.clone(),
        cli.request_timeout_ms,
    )?;
    let conversations = ConversationAgent::new(store, Arc::new(surface), clock);

    let mut registry = AgentRegistry::new();
    register_conversation_agents(&mut registry, &conversations);
    registry.register_help();

    let followups = WebhookFollowupSink::new(&cli.followup_api_base, cli.request_timeout_ms)?;
    Ok(InteractionRouter::new(verifier, registry)
        .with_conversations(conversations)
        .with_followups(Arc::new(followups))
        .with_response_budget_ms(cli.response_budget_ms))
}

fn spawn_purge_sweep(store: Arc<dyn ConversationStore>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            interval.tick().await;
            match store.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => tracing::debug!(purged, "purged expired conversations"),
                Err(error) => tracing::warn!(error = %error, "conversation purge failed"),
            }
        }
    })
}

pub async fn run_gateway(cli: GatewayCli) -> Result<()> {
    let router = build_interaction_router(&cli)?;
    let sweep = spawn_purge_sweep(open_store(&cli, Arc::new(SystemClock))?);
    let served = run_gateway_server(&cli.bind, router).await;
    sweep.abort();
    served
}
