use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::agent_types::{AgentInvoker, AgentInvokerFn, AgentReply};

pub const HELP_AGENT_NAME: &str = "help";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown command '{0}'")]
    NotFound(String),
}

#[derive(Clone)]
pub struct AgentDescriptor {
    pub name: String,
    pub description: String,
    pub usage: String,
    /// Answer with a deferred acknowledgement and deliver the reply as a follow-up.
    pub deferred: bool,
    pub invoker: Arc<dyn AgentInvoker>,
}

impl AgentDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        invoker: Arc<dyn AgentInvoker>,
    ) -> Self {
        let name = normalize_agent_name(&name.into());
        Self {
            usage: format!("/{name}"),
            name,
            description: description.into(),
            deferred: false,
            invoker,
        }
    }

    pub fn with_usage(mut self, usage: impl Into<String>) -> Self {
        self.usage = usage.into();
        self
    }

    pub fn deferred(mut self, deferred: bool) -> Self {
        self.deferred = deferred;
        self
    }
}

impl fmt::Debug for AgentDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentDescriptor")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("usage", &self.usage)
            .field("deferred", &self.deferred)
            .finish_non_exhaustive()
    }
}

/// Lowercases and strips a leading `/` so `/Help` and `help` resolve to one entry.
pub fn normalize_agent_name(raw: &str) -> String {
    raw.trim().trim_start_matches('/').trim().to_ascii_lowercase()
}

#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    agents: BTreeMap<String, AgentDescriptor>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the descriptor registered under the same name.
    pub fn register(&mut self, descriptor: AgentDescriptor) {
        let name = normalize_agent_name(&descriptor.name);
        if self.agents.contains_key(&name) {
            tracing::debug!(agent = %name, "replacing registered agent descriptor");
        }
        self.agents.insert(
            name.clone(),
            AgentDescriptor {
                name,
                ..descriptor
            },
        );
    }

    pub fn resolve(&self, name: &str) -> Result<&AgentDescriptor, RegistryError> {
        let normalized = normalize_agent_name(name);
        self.agents
            .get(&normalized)
            .ok_or(RegistryError::NotFound(normalized))
    }

    pub fn list(&self) -> Vec<&AgentDescriptor> {
        self.agents.values().collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Registers a `help` agent listing every descriptor present at call time plus itself.
    pub fn register_help(&mut self) {
        let mut rows = self
            .agents
            .values()
            .filter(|descriptor| descriptor.name != HELP_AGENT_NAME)
            .map(|descriptor| format!("- `{}`: {}", descriptor.usage, descriptor.description))
            .collect::<Vec<_>>();
        rows.push(format!("- `/{HELP_AGENT_NAME}`: List available commands"));
        let content = format!("Available commands:\n{}", rows.join("\n"));
        let invoker = AgentInvokerFn::new(move |_invocation| {
            let content = content.clone();
            async move { Ok(AgentReply::ephemeral(content)) }
        });
        self.register(AgentDescriptor::new(
            HELP_AGENT_NAME,
            "List available commands",
            Arc::new(invoker),
        ));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{normalize_agent_name, AgentDescriptor, AgentRegistry, RegistryError};
    use crate::agent_types::{AgentInvocation, AgentInvokerFn, AgentReply};

    fn fixed_reply_descriptor(name: &str, reply: &'static str) -> AgentDescriptor {
        AgentDescriptor::new(
            name,
            format!("fixture {reply}"),
            Arc::new(AgentInvokerFn::new(move |_| async move {
                Ok(AgentReply::text(reply))
            })),
        )
    }

    #[test]
    fn unit_normalize_agent_name_strips_slash_and_case() {
        assert_eq!(normalize_agent_name(" /Edit-Profile "), "edit-profile");
        assert_eq!(normalize_agent_name("help"), "help");
    }

    #[test]
    fn unit_resolve_reports_not_found_for_unknown_name() {
        let registry = AgentRegistry::new();
        assert_eq!(
            registry.resolve("/nope").expect_err("unknown"),
            RegistryError::NotFound("nope".to_string())
        );
    }

    #[tokio::test]
    async fn functional_register_same_name_twice_keeps_latest_descriptor() {
        let mut registry = AgentRegistry::new();
        registry.register(fixed_reply_descriptor("ping", "first"));
        registry.register(fixed_reply_descriptor("/PING", "second"));

        assert_eq!(registry.len(), 1);
        let descriptor = registry.resolve("ping").expect("resolve");
        assert_eq!(descriptor.description, "fixture second");
        let reply = descriptor
            .invoker
            .invoke(AgentInvocation::default())
            .await
            .expect("invoke");
        assert_eq!(reply.content, "second");
    }

    #[tokio::test]
    async fn functional_register_help_lists_registered_agents() {
        let mut registry = AgentRegistry::new();
        registry.register(fixed_reply_descriptor("alpha", "a").with_usage("/alpha <x>"));
        registry.register_help();

        let names = registry
            .list()
            .iter()
            .map(|descriptor| descriptor.name.clone())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["alpha".to_string(), "help".to_string()]);

        let reply = registry
            .resolve("help")
            .expect("help")
            .invoker
            .invoke(AgentInvocation::default())
            .await
            .expect("invoke help");
        assert!(reply.ephemeral);
        assert!(reply.content.contains("`/alpha <x>`: fixture a"));
        assert!(reply.content.contains("`/help`"));
    }
}
