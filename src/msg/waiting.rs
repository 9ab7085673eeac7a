use std::collections::HashSet;

use serde_json::Value;

use super::parse::{ParsedMessage, tool_results, tool_uses};

/// Outcome of the waiting-for-input analysis.
#[derive(Debug, Clone, Default)]
pub struct WaitingStatus {
    pub waiting: bool,
    pub last_agent_index: Option<usize>,
    pub last_agent_sequence_id: u64,
    pub last_agent_slug: String,
}

/// Whether a user payload carries nothing but tool-result items.
fn solely_tool_results(value: &Value) -> bool {
    match value {
        Value::Array(items) => {
            !items.is_empty()
                && items.iter().all(|item| {
                    item.as_object()
                        .and_then(|m| m.get("type"))
                        .and_then(Value::as_str)
                        == Some("tool_result")
                })
        }
        Value::Object(map) => map.get("type").and_then(Value::as_str) == Some("tool_result"),
        _ => false,
    }
}

/// Decide whether the conversation's last agent turn is complete and the
/// user is expected to speak next.
///
/// Not waiting when: no agent message exists; a real (non-tool-result) user
/// message follows the last agent message; or any agent tool call is still
/// missing its result.
pub fn analyze(messages: &[ParsedMessage]) -> WaitingStatus {
    let Some(last_agent) = messages.iter().rposition(|m| m.is_agent()) else {
        return WaitingStatus::default();
    };

    let mut calls: HashSet<String> = HashSet::new();
    for m in messages[..=last_agent].iter().filter(|m| m.is_agent()) {
        if let Some(value) = &m.llm_value {
            for (id, _) in tool_uses(value) {
                calls.insert(id);
            }
        }
    }

    let mut resolved: HashSet<String> = HashSet::new();
    for m in messages {
        if let Some(value) = &m.user_value {
            for id in tool_results(value) {
                resolved.insert(id);
            }
        }
    }

    for m in &messages[last_agent + 1..] {
        if !m.is_user() {
            continue;
        }
        let is_pure_result = m
            .user_value
            .as_ref()
            .is_some_and(|v| solely_tool_results(v) && tool_results(v).iter().all(|id| calls.contains(id)));
        if !is_pure_result {
            return WaitingStatus::default();
        }
    }

    if calls.iter().any(|id| !resolved.contains(id)) {
        return WaitingStatus::default();
    }

    let agent = &messages[last_agent];
    WaitingStatus {
        waiting: true,
        last_agent_index: Some(last_agent),
        last_agent_sequence_id: agent.raw.sequence_id,
        last_agent_slug: agent.slug.clone(),
    }
}
