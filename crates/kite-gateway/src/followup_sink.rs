//! Delivery of agent replies for interactions answered with a deferred acknowledgement.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use kite_agents::AgentReply;
use thiserror::Error;

use crate::interaction_payload::render_message_data;

pub const DEFAULT_FOLLOWUP_API_BASE: &str = "https://discord.com/api/v10";

#[derive(Debug, Error)]
pub enum FollowupError {
    #[error("follow-up rejected with status {status}")]
    Rejected { status: u16 },
    #[error("follow-up request failed: {0}")]
    Transport(String),
}

#[async_trait]
pub trait FollowupSink: Send + Sync {
    async fn send_followup(
        &self,
        application_id: &str,
        token: &str,
        reply: &AgentReply,
    ) -> Result<(), FollowupError>;
}

/// Posts follow-up messages to `{api_base}/webhooks/{application_id}/{token}`.
#[derive(Clone)]
pub struct WebhookFollowupSink {
    http: reqwest::Client,
    api_base: String,
}

impl WebhookFollowupSink {
    pub fn new(api_base: &str, request_timeout_ms: u64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("kite-gateway")
            .timeout(Duration::from_millis(request_timeout_ms.max(1)))
            .build()
            .context("failed to create follow-up webhook client")?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl FollowupSink for WebhookFollowupSink {
    async fn send_followup(
        &self,
        application_id: &str,
        token: &str,
        reply: &AgentReply,
    ) -> Result<(), FollowupError> {
        let url = format!("{}/webhooks/{application_id}/{token}", self.api_base);
        let response = self
            .http
            .post(url)
            .json(&render_message_data(reply))
            .send()
            .await
            // The URL carries the interaction token.
            .map_err(|error| FollowupError::Transport(error.without_url().to_string()))?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(FollowupError::Rejected {
                status: status.as_u16(),
            })
        }
    }
}
