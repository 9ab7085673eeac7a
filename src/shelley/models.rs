use serde::{Deserialize, Serialize};

/// One entry of the backend conversation list (active or archived).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation_id: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Full conversation detail with embedded messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationDetail {
    pub conversation_id: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// A single conversation message as the backend serializes it.
///
/// The `*_data` fields, when present, are themselves JSON-serialized strings;
/// decoding them is the message layer's concern, not the wire layer's.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: String,
    pub conversation_id: String,
    pub sequence_id: u64,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub user_data: Option<String>,
    #[serde(default)]
    pub llm_data: Option<String>,
    #[serde(default)]
    pub usage_data: Option<String>,
}

/// Response of a successful conversation start.
#[derive(Debug, Clone, Deserialize)]
pub struct StartResponse {
    pub conversation_id: String,
    #[serde(default)]
    pub slug: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub id: String,
    #[serde(default)]
    pub ready: bool,
}

impl ModelEntry {
    /// The name shown in the filesystem (directory name, `model` symlink target).
    pub fn display(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelList {
    #[serde(default)]
    pub models: Vec<ModelEntry>,
    #[serde(default)]
    pub default_model: Option<String>,
}

impl ModelList {
    /// Resolve a user-supplied model name against the list. Matches the
    /// backend name first, then the display name.
    pub fn find_by_name(&self, name: &str) -> Option<&ModelEntry> {
        self.models
            .iter()
            .find(|m| m.name == name)
            .or_else(|| self.models.iter().find(|m| m.display() == name))
    }

    /// The entry the backend designates as default, if any.
    pub fn default_entry(&self) -> Option<&ModelEntry> {
        self.default_model
            .as_deref()
            .and_then(|name| self.find_by_name(name))
    }
}

/// Decode a conversation list body (active or archived).
pub fn parse_summaries(bytes: &[u8]) -> serde_json::Result<Vec<ConversationSummary>> {
    serde_json::from_slice(bytes)
}
