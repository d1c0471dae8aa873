use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Default)]
/// One command invocation as seen by an agent. Built per request and never persisted.
pub struct AgentInvocation {
    pub interaction_id: String,
    pub invoker_id: String,
    pub command: String,
    pub options: BTreeMap<String, Value>,
    pub attachments: Vec<InvocationAttachment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
/// Uploaded file referenced by an invocation; only the platform-hosted reference is carried.
pub struct InvocationAttachment {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

impl AgentInvocation {
    pub fn option_str(&self, name: &str) -> Option<&str> {
        self.options
            .get(name)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonStyle {
    Primary,
    Secondary,
    Success,
    Danger,
}

impl ButtonStyle {
    /// Numeric style code of the chat platform's component model.
    pub fn code(self) -> u8 {
        match self {
            Self::Primary => 1,
            Self::Secondary => 2,
            Self::Success => 3,
            Self::Danger => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyButton {
    pub custom_id: String,
    pub label: String,
    pub style: ButtonStyle,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AgentReply {
    pub content: String,
    #[serde(default)]
    pub ephemeral: bool,
    #[serde(default)]
    pub buttons: Vec<ReplyButton>,
}

impl AgentReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ephemeral: false,
            buttons: Vec::new(),
        }
    }

    pub fn ephemeral(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ephemeral: true,
            buttons: Vec::new(),
        }
    }

    pub fn with_button(
        mut self,
        custom_id: impl Into<String>,
        label: impl Into<String>,
        style: ButtonStyle,
    ) -> Self {
        self.buttons.push(ReplyButton {
            custom_id: custom_id.into(),
            label: label.into(),
            style,
        });
        self
    }
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("invalid command options: {0}")]
    InvalidOptions(String),
    #[error("agent backend unavailable: {0}")]
    Unavailable(String),
}

impl AgentError {
    /// Short, non-technical text safe to show in chat.
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidOptions(detail) => format!("That command is missing something: {detail}"),
            Self::Unavailable(_) => "Something went wrong on our side. Please try again.".to_string(),
        }
    }
}

/// Entry point of one agent.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    async fn invoke(&self, invocation: AgentInvocation) -> Result<AgentReply, AgentError>;
}

type InvokerFuture = Pin<Box<dyn Future<Output = Result<AgentReply, AgentError>> + Send>>;

#[derive(Clone)]
/// Closure-backed invoker used for small built-ins and test substitutes.
pub struct AgentInvokerFn {
    inner: Arc<dyn Fn(AgentInvocation) -> InvokerFuture + Send + Sync>,
}

impl AgentInvokerFn {
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(AgentInvocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<AgentReply, AgentError>> + Send + 'static,
    {
        Self {
            inner: Arc::new(move |invocation| Box::pin(handler(invocation))),
        }
    }
}

#[async_trait]
impl AgentInvoker for AgentInvokerFn {
    async fn invoke(&self, invocation: AgentInvocation) -> Result<AgentReply, AgentError> {
        (self.inner)(invocation).await
    }
}
