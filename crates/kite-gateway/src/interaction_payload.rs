//! Wire format of chat-platform interactions and interaction responses.

use std::collections::{BTreeMap, HashMap};

use kite_agents::{AgentInvocation, AgentReply, InvocationAttachment};
use serde::Deserialize;
use serde_json::{json, Map, Value};

pub const INTERACTION_TYPE_PING: u8 = 1;
pub const INTERACTION_TYPE_COMMAND: u8 = 2;
pub const INTERACTION_TYPE_COMPONENT: u8 = 3;

pub const RESPONSE_TYPE_PONG: u8 = 1;
pub const RESPONSE_TYPE_CHANNEL_MESSAGE: u8 = 4;
pub const RESPONSE_TYPE_DEFERRED_CHANNEL_MESSAGE: u8 = 5;
pub const RESPONSE_TYPE_UPDATE_MESSAGE: u8 = 7;

pub const EPHEMERAL_FLAG: u64 = 1 << 6;

const OPTION_TYPE_SUB_COMMAND: u8 = 1;
const OPTION_TYPE_SUB_COMMAND_GROUP: u8 = 2;
const OPTION_TYPE_ATTACHMENT: u8 = 11;
const COMPONENT_TYPE_ACTION_ROW: u8 = 1;
const COMPONENT_TYPE_BUTTON: u8 = 2;
const MAX_BUTTONS_PER_ROW: usize = 5;

#[derive(Debug, Deserialize)]
struct RawInteraction {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    id: String,
    #[serde(default)]
    application_id: String,
    #[serde(default)]
    token: String,
    #[serde(default)]
    data: Option<RawInteractionData>,
    #[serde(default)]
    member: Option<RawMember>,
    #[serde(default)]
    user: Option<RawUser>,
}

#[derive(Debug, Deserialize)]
struct RawMember {
    user: Option<RawUser>,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawInteractionData {
    #[serde(default)]
    name: String,
    #[serde(default)]
    options: Vec<RawOption>,
    #[serde(default)]
    custom_id: Option<String>,
    #[serde(default)]
    resolved: Option<RawResolved>,
}

#[derive(Debug, Deserialize)]
struct RawOption {
    name: String,
    #[serde(rename = "type", default)]
    kind: u8,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    options: Vec<RawOption>,
}

#[derive(Debug, Default, Deserialize)]
struct RawResolved {
    #[serde(default)]
    attachments: HashMap<String, InvocationAttachment>,
}

/// Routing handle shared by commands and component clicks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractionMeta {
    pub id: String,
    pub application_id: String,
    /// Follow-up credential; never logged.
    pub token: String,
    pub invoker_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Interaction {
    Ping,
    Command {
        meta: InteractionMeta,
        invocation: AgentInvocation,
    },
    Component {
        meta: InteractionMeta,
        custom_id: String,
    },
}

impl Interaction {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Command { .. } => "command",
            Self::Component { .. } => "component",
        }
    }
}

/// Parses a verified raw body. Errors are short and safe to return to the caller.
pub fn parse_interaction(raw_body: &[u8]) -> Result<Interaction, String> {
    let raw: RawInteraction = serde_json::from_slice(raw_body)
        .map_err(|error| format!("interaction body is not valid JSON: {error}"))?;
    if raw.kind == INTERACTION_TYPE_PING {
        return Ok(Interaction::Ping);
    }
    let invoker_id = raw
        .member
        .and_then(|member| member.user)
        .or(raw.user)
        .map(|user| user.id)
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| "interaction has no invoking user".to_string())?;
    let meta = InteractionMeta {
        id: raw.id,
        application_id: raw.application_id,
        token: raw.token,
        invoker_id,
    };
    let data = raw.data.unwrap_or_default();
    match raw.kind {
        INTERACTION_TYPE_COMMAND => {
            if data.name.trim().is_empty() {
                return Err("command interaction has no command name".to_string());
            }
            let resolved = data.resolved.unwrap_or_default();
            let mut options = BTreeMap::new();
            let mut attachments = Vec::new();
            flatten_options(&data.options, &resolved, &mut options, &mut attachments);
            Ok(Interaction::Command {
                invocation: AgentInvocation {
                    interaction_id: meta.id.clone(),
                    invoker_id: meta.invoker_id.clone(),
                    command: data.name,
                    options,
                    attachments,
                },
                meta,
            })
        }
        INTERACTION_TYPE_COMPONENT => {
            let custom_id = data
                .custom_id
                .filter(|custom_id| !custom_id.trim().is_empty())
                .ok_or_else(|| "component interaction has no custom_id".to_string())?;
            Ok(Interaction::Component { meta, custom_id })
        }
        other => Err(format!("unsupported interaction type {other}")),
    }
}

/// Subcommand names land under `subcommand`; their options are merged into the flat map.
fn flatten_options(
    raw_options: &[RawOption],
    resolved: &RawResolved,
    options: &mut BTreeMap<String, Value>,
    attachments: &mut Vec<InvocationAttachment>,
) {
    for option in raw_options {
        match option.kind {
            OPTION_TYPE_SUB_COMMAND | OPTION_TYPE_SUB_COMMAND_GROUP => {
                let path = match options.get("subcommand").and_then(Value::as_str) {
                    Some(parent) => format!("{parent} {}", option.name),
                    None => option.name.clone(),
                };
                options.insert("subcommand".to_string(), Value::String(path));
                flatten_options(&option.options, resolved, options, attachments);
            }
            OPTION_TYPE_ATTACHMENT => {
                let Some(id) = option.value.as_ref().and_then(Value::as_str) else {
                    continue;
                };
                if let Some(attachment) = resolved.attachments.get(id) {
                    attachments.push(attachment.clone());
                }
                options.insert(option.name.clone(), Value::String(id.to_string()));
            }
            _ => {
                if let Some(value) = &option.value {
                    options.insert(option.name.clone(), value.clone());
                }
            }
        }
    }
}

pub fn pong_response() -> Value {
    json!({ "type": RESPONSE_TYPE_PONG })
}

/// Message body shared by immediate responses and follow-up webhooks.
pub fn render_message_data(reply: &AgentReply) -> Value {
    let mut data = Map::new();
    data.insert("content".to_string(), Value::String(reply.content.clone()));
    data.insert("allowed_mentions".to_string(), json!({ "parse": [] }));
    if reply.ephemeral {
        data.insert("flags".to_string(), json!(EPHEMERAL_FLAG));
    }
    let rows = reply
        .buttons
        .chunks(MAX_BUTTONS_PER_ROW)
        .map(|row| {
            json!({
                "type": COMPONENT_TYPE_ACTION_ROW,
                "components": row
                    .iter()
                    .map(|button| json!({
                        "type": COMPONENT_TYPE_BUTTON,
                        "style": button.style.code(),
                        "label": button.label,
                        "custom_id": button.custom_id,
                    }))
                    .collect::<Vec<_>>(),
            })
        })
        .collect::<Vec<_>>();
    data.insert("components".to_string(), Value::Array(rows));
    Value::Object(data)
}

pub fn message_response(reply: &AgentReply) -> Value {
    json!({ "type": RESPONSE_TYPE_CHANNEL_MESSAGE, "data": render_message_data(reply) })
}

/// Replaces the message the clicked component belongs to.
pub fn update_message_response(reply: &AgentReply) -> Value {
    json!({ "type": RESPONSE_TYPE_UPDATE_MESSAGE, "data": render_message_data(reply) })
}

pub fn deferred_response() -> Value {
    json!({
        "type": RESPONSE_TYPE_DEFERRED_CHANNEL_MESSAGE,
        "data": { "flags": EPHEMERAL_FLAG },
    })
}
