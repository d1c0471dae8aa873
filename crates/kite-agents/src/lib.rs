//! Named-agent dispatch table for chat commands.
//!
//! Agents are registered once at startup as [`AgentDescriptor`] values and resolved
//! by command name at request time, so the interaction router never needs to know
//! the concrete agent types.

pub mod agent_registry;
pub mod agent_types;

pub use agent_registry::{
    normalize_agent_name, AgentDescriptor, AgentRegistry, RegistryError, HELP_AGENT_NAME,
};
pub use agent_types::{
    AgentError, AgentInvocation, AgentInvoker, AgentInvokerFn, AgentReply, ButtonStyle,
    InvocationAttachment, ReplyButton,
};
