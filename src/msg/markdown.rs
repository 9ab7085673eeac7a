use serde_json::Value;

use super::parse::{ParsedConversation, ParsedMessage};
use super::slug::{message_dir_name, pad_width};

/// Flatten a decoded message payload into markdown text.
///
/// Known item shapes (text, tool_use, tool_result) render specifically;
/// anything else falls back to a fenced JSON dump so no content is dropped.
fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(render_value).filter(|s| !s.is_empty()).collect();
            parts.join("\n\n")
        }
        Value::Object(map) => match map.get("type").and_then(Value::as_str) {
            Some("text") => map
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            Some("tool_use") => {
                let name = map.get("name").and_then(Value::as_str).unwrap_or("unknown");
                let input = map
                    .get("input")
                    .map(|v| serde_json::to_string_pretty(v).unwrap_or_default())
                    .unwrap_or_default();
                format!("**tool call: {name}**\n\n```json\n{input}\n```")
            }
            Some("tool_result") => {
                let content = map.get("content").map(render_value).unwrap_or_default();
                format!("**tool result**\n\n{content}")
            }
            _ => {
                let dump = serde_json::to_string_pretty(value).unwrap_or_default();
                format!("```json\n{dump}\n```")
            }
        },
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Markdown body of a single message, without a trailing newline.
pub fn render_message(message: &ParsedMessage) -> String {
    let body = if let Some(value) = &message.user_value {
        render_value(value)
    } else if let Some(value) = &message.llm_value {
        render_value(value)
    } else if let Some(raw) = message
        .raw
        .user_data
        .as_deref()
        .or(message.raw.llm_data.as_deref())
    {
        raw.to_string()
    } else {
        String::new()
    };
    body.trim_end().to_string()
}

/// Render a whole conversation as one markdown document (`all.md`).
pub fn render_conversation(parsed: &ParsedConversation) -> String {
    let title = parsed
        .slug
        .as_deref()
        .filter(|s| !s.is_empty())
        .unwrap_or(&parsed.conversation_id);

    let mut out = format!("# {title}\n");
    let width = pad_width(parsed.max_sequence_id.saturating_sub(1));
    for message in &parsed.messages {
        let name = message_dir_name(message.index(), &message.slug, width);
        out.push_str(&format!("\n## {name}\n"));
        if let Some(created_at) = &message.raw.created_at {
            out.push_str(&format!("\n_{created_at}_\n"));
        }
        let body = render_message(message);
        if !body.is_empty() {
            out.push('\n');
            out.push_str(&body);
            out.push('\n');
        }
    }
    out
}
