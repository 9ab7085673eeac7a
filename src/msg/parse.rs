use std::collections::HashMap;

use serde_json::Value;

use crate::shelley::models::{ConversationDetail, Message};

use super::slug::sanitize;

/// Message kinds the slug and waiting rules single out.
pub const KIND_USER: &str = "user";
pub const KIND_AGENT: &str = "shelley/agent";
pub const KIND_GITINFO: &str = "gitinfo";

/// One message with its `*_data` payloads decoded and its directory slug
/// computed against the conversation's tool map.
#[derive(Debug, Clone)]
pub struct ParsedMessage {
    pub raw: Message,
    pub llm_value: Option<Value>,
    pub user_value: Option<Value>,
    pub usage_value: Option<Value>,
    pub slug: String,
}

impl ParsedMessage {
    /// Zero-based directory index. Sequence ids are one-based.
    pub fn index(&self) -> u64 {
        self.raw.sequence_id.saturating_sub(1)
    }

    pub fn is_user(&self) -> bool {
        self.raw.kind == KIND_USER
    }

    /// Agent turns are everything that is neither user input nor git metadata.
    pub fn is_agent(&self) -> bool {
        self.raw.kind != KIND_USER && self.raw.kind != KIND_GITINFO
    }
}

/// A fully decoded conversation: ordered messages, tool map, and the largest
/// sequence id (drives zero-pad width).
#[derive(Debug, Clone)]
pub struct ParsedConversation {
    pub conversation_id: String,
    pub slug: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub messages: Vec<ParsedMessage>,
    pub tool_map: HashMap<String, String>,
    pub max_sequence_id: u64,
}

impl ParsedConversation {
    pub fn message_by_sequence(&self, sequence_id: u64) -> Option<&ParsedMessage> {
        self.messages.iter().find(|m| m.raw.sequence_id == sequence_id)
    }
}

/// Decode `*_data`: the wire carries JSON-serialized strings, so a payload
/// only counts as structured when the string itself parses.
fn decode_data(data: Option<&str>) -> Option<Value> {
    data.and_then(|s| serde_json::from_str(s).ok())
}

/// Walk a decoded payload in document order, calling `visit` on every object.
fn walk_objects<'a>(value: &'a Value, visit: &mut impl FnMut(&'a serde_json::Map<String, Value>)) {
    match value {
        Value::Object(map) => {
            visit(map);
            for child in map.values() {
                walk_objects(child, visit);
            }
        }
        Value::Array(items) => {
            for item in items {
                walk_objects(item, visit);
            }
        }
        _ => {}
    }
}

/// Tool-call items inside an agent payload: `{"type": "tool_use", id, name}`.
pub fn tool_uses(value: &Value) -> Vec<(String, String)> {
    let mut out = Vec::new();
    walk_objects(value, &mut |map| {
        if map.get("type").and_then(Value::as_str) == Some("tool_use")
            && let (Some(id), Some(name)) = (
                map.get("id").and_then(Value::as_str),
                map.get("name").and_then(Value::as_str),
            )
        {
            out.push((id.to_string(), name.to_string()));
        }
    });
    out
}

/// Tool-result items inside a user payload: `{"type": "tool_result", tool_use_id}`.
pub fn tool_results(value: &Value) -> Vec<String> {
    let mut out = Vec::new();
    walk_objects(value, &mut |map| {
        if map.get("type").and_then(Value::as_str) == Some("tool_result")
            && let Some(id) = map.get("tool_use_id").and_then(Value::as_str)
        {
            out.push(id.to_string());
        }
    });
    out
}

/// Directory slug for one message, per the naming rules:
/// user → `user` (or `{tool}-result` when it only ferries a tool result),
/// agent with a tool call → `{tool}-tool`, gitinfo → `gitinfo`, rest → `agent`.
fn derive_slug(
    message: &Message,
    llm_value: Option<&Value>,
    user_value: Option<&Value>,
    tool_map: &HashMap<String, String>,
) -> String {
    match message.kind.as_str() {
        KIND_USER => {
            if let Some(value) = user_value {
                let results = tool_results(value);
                if let Some(id) = results.first() {
                    let name = tool_map.get(id).map(String::as_str).unwrap_or("unknown");
                    return sanitize(&format!("{name}-result"));
                }
            }
            "user".to_string()
        }
        KIND_GITINFO => "gitinfo".to_string(),
        KIND_AGENT => {
            if let Some(value) = llm_value
                && let Some((_, name)) = tool_uses(value).into_iter().next()
            {
                return sanitize(&format!("{name}-tool"));
            }
            "agent".to_string()
        }
        _ => "agent".to_string(),
    }
}

/// Decode raw conversation-detail bytes into a [`ParsedConversation`].
///
/// Messages are ordered by sequence id; the tool map is built over the whole
/// sequence before slugs are derived, since a result's name lives on the
/// call that preceded it.
pub fn parse_conversation(bytes: &[u8]) -> serde_json::Result<ParsedConversation> {
    let detail: ConversationDetail = serde_json::from_slice(bytes)?;

    let mut raw_messages = detail.messages;
    raw_messages.sort_by_key(|m| m.sequence_id);

    let decoded: Vec<(Option<Value>, Option<Value>, Option<Value>)> = raw_messages
        .iter()
        .map(|m| {
            (
                decode_data(m.llm_data.as_deref()),
                decode_data(m.user_data.as_deref()),
                decode_data(m.usage_data.as_deref()),
            )
        })
        .collect();

    let mut tool_map = HashMap::new();
    for (llm_value, _, _) in &decoded {
        if let Some(value) = llm_value {
            for (id, name) in tool_uses(value) {
                tool_map.insert(id, name);
            }
        }
    }

    let max_sequence_id = raw_messages.iter().map(|m| m.sequence_id).max().unwrap_or(0);

    let messages = raw_messages
        .into_iter()
        .zip(decoded)
        .map(|(raw, (llm_value, user_value, usage_value))| {
            let slug = derive_slug(&raw, llm_value.as_ref(), user_value.as_ref(), &tool_map);
            ParsedMessage {
                raw,
                llm_value,
                user_value,
                usage_value,
                slug,
            }
        })
        .collect();

    Ok(ParsedConversation {
        conversation_id: detail.conversation_id,
        slug: detail.slug,
        created_at: detail.created_at,
        updated_at: detail.updated_at,
        messages,
        tool_map,
        max_sequence_id,
    })
}
