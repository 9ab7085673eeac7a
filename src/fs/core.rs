use std::sync::Arc;
use std::sync::RwLock;
use std::time::{Duration, SystemTime};

use serde_json::Value;

use crate::msg::markdown::{render_conversation, render_message};
use crate::msg::parse::{KIND_GITINFO, ParsedConversation, ParsedMessage};
use crate::msg::slug::{message_dir_name, pad_width};
use crate::msg::waiting::analyze;
use crate::msg::ParsedCache;
use crate::shelley::{ModelEntry, ModelList, ShelleyClient};
use crate::state::{ConversationState, StateStore};

use super::attr::{
    conversation_times, message_times, static_times, NodeAttr, NodeKind, Times, TTL_CONV_STRUCT,
    TTL_IMMUTABLE, TTL_MODELS, TTL_STATIC, TTL_VOLATILE,
};
use super::error::FsError;
use super::handle::HandleTable;
use super::node::{ConvField, DataField, Node, Registry};
use super::static_content::{README, START_SCRIPT};

/// Hook for kernel entry invalidation, installed after the session exists.
/// Implementations must be callable from any thread.
pub trait EntryInvalidator: Send + Sync {
    fn inval_entry(&self, parent: u64, name: &str);
}

/// The per-mount filesystem core: every VFS operation lands here as a typed
/// method returning `Result<_, FsError>`; the fuser glue owns errno
/// translation and nothing else.
pub struct FsCore {
    pub store: StateStore,
    pub client: Arc<dyn ShelleyClient>,
    pub cache: ParsedCache,
    pub registry: Registry,
    pub handles: HandleTable,
    pub start_time: SystemTime,
    pub clone_timeout: Duration,
    invalidator: RwLock<Option<Arc<dyn EntryInvalidator>>>,
}

/// One readdir row, pre-errno translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub ino: u64,
    pub kind: NodeKind,
    pub name: String,
}

impl FsCore {
    pub fn new(
        store: StateStore,
        client: Arc<dyn ShelleyClient>,
        cache_capacity: usize,
        clone_timeout: Duration,
    ) -> Self {
        Self {
            store,
            client,
            cache: ParsedCache::new(cache_capacity),
            registry: Registry::new(),
            handles: HandleTable::new(),
            start_time: SystemTime::now(),
            clone_timeout,
            invalidator: RwLock::new(None),
        }
    }

    pub fn set_invalidator(&self, invalidator: Arc<dyn EntryInvalidator>) {
        *self.invalidator.write().unwrap_or_else(|e| e.into_inner()) = Some(invalidator);
    }

    pub(super) fn invalidator(&self) -> Option<Arc<dyn EntryInvalidator>> {
        self.invalidator
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    // ------------------------------------------------------------------
    // Shared resolution helpers
    // ------------------------------------------------------------------

    pub fn resolve(&self, ino: u64) -> Result<Node, FsError> {
        self.registry.resolve(ino).ok_or(FsError::NotFound)
    }

    pub(super) async fn state_of(&self, local_id: &str) -> Result<ConversationState, FsError> {
        self.store.get(local_id).await.ok_or(FsError::NotFound)
    }

    pub(super) async fn models(&self) -> Result<ModelList, FsError> {
        self.client.list_models().await.map_err(FsError::backend)
    }

    pub(super) async fn model_by_dir(&self, name: &str) -> Result<ModelEntry, FsError> {
        let models = self.models().await?;
        models
            .models
            .iter()
            .find(|m| m.display() == name)
            .cloned()
            .ok_or(FsError::NotFound)
    }

    /// Raw detail bytes plus the (cached) parse for a created conversation.
    pub(super) async fn fetch_conversation(
        &self,
        state: &ConversationState,
    ) -> Result<(Vec<u8>, Arc<ParsedConversation>), FsError> {
        if !state.created {
            return Err(FsError::PresenceAbsent);
        }
        let bytes = self
            .client
            .get_conversation(&state.remote_id)
            .await
            .map_err(FsError::backend)?;
        let parsed = self.cache.get_or_parse(&state.remote_id, &bytes).await?;
        Ok((bytes, parsed))
    }

    pub(super) async fn parsed(
        &self,
        state: &ConversationState,
    ) -> Result<Arc<ParsedConversation>, FsError> {
        Ok(self.fetch_conversation(state).await?.1)
    }

    // ------------------------------------------------------------------
    // Message naming
    // ------------------------------------------------------------------

    pub(super) fn msg_width(parsed: &ParsedConversation) -> usize {
        pad_width(parsed.max_sequence_id.saturating_sub(1))
    }

    pub(super) fn msg_name(parsed: &ParsedConversation, message: &ParsedMessage) -> String {
        message_dir_name(message.index(), &message.slug, Self::msg_width(parsed))
    }

    /// Find the message whose computed directory name is exactly `name`.
    pub(super) fn msg_by_name<'a>(
        parsed: &'a ParsedConversation,
        name: &str,
    ) -> Option<&'a ParsedMessage> {
        parsed
            .messages
            .iter()
            .find(|m| Self::msg_name(parsed, m) == name)
    }

    pub(super) fn msg_by_seq(
        parsed: &ParsedConversation,
        seq: u64,
    ) -> Result<&ParsedMessage, FsError> {
        parsed.message_by_sequence(seq).ok_or(FsError::NotFound)
    }

    /// `waiting_for_input` symlink target, when the analyzer says we wait.
    pub(super) fn waiting_target(parsed: &ParsedConversation) -> Option<String> {
        let status = analyze(&parsed.messages);
        if !status.waiting {
            return None;
        }
        let message = parsed.message_by_sequence(status.last_agent_sequence_id)?;
        Some(format!(
            "messages/{}/llm_data/EndOfTurn",
            Self::msg_name(parsed, message)
        ))
    }

    /// Whether `speaker` selects this message in `since/{speaker}/` terms.
    pub(super) fn speaker_matches(speaker: &str, message: &ParsedMessage) -> bool {
        match speaker {
            "user" => message.is_user(),
            "agent" => message.is_agent(),
            "gitinfo" => message.raw.kind == KIND_GITINFO,
            _ => false,
        }
    }

    /// Messages strictly after the k-th-to-last message of `speaker` kind.
    pub(super) fn since_window<'a>(
        parsed: &'a ParsedConversation,
        speaker: &str,
        k: u64,
    ) -> Result<&'a [ParsedMessage], FsError> {
        let positions: Vec<usize> = parsed
            .messages
            .iter()
            .enumerate()
            .filter(|(_, m)| Self::speaker_matches(speaker, m))
            .map(|(i, _)| i)
            .collect();
        let k = k as usize;
        if k == 0 || positions.len() < k {
            return Err(FsError::NotFound);
        }
        let anchor = positions[positions.len() - k];
        Ok(&parsed.messages[anchor + 1..])
    }

    /// The `last/{n}` window: message for slot `k`, `0` oldest, `n-1` newest.
    pub(super) fn last_slot<'a>(
        parsed: &'a ParsedConversation,
        n: u64,
        k: u64,
    ) -> Result<&'a ParsedMessage, FsError> {
        let total = parsed.messages.len() as u64;
        let count = n.min(total);
        if k >= count {
            return Err(FsError::NotFound);
        }
        let index = (total - count + k) as usize;
        Ok(&parsed.messages[index])
    }

    pub(super) fn data_value<'a>(
        message: &'a ParsedMessage,
        field: DataField,
    ) -> Option<&'a Value> {
        match field {
            DataField::LlmData => message.llm_value.as_ref(),
            DataField::UsageData => message.usage_value.as_ref(),
        }
    }

    pub(super) fn json_at<'a>(root: &'a Value, path: &[String]) -> Option<&'a Value> {
        path.iter().try_fold(root, |value, key| match value {
            Value::Object(map) => map.get(key),
            Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
    }

    // ------------------------------------------------------------------
    // File content
    // ------------------------------------------------------------------

    pub(super) fn ctl_content(state: &ConversationState) -> String {
        let mut pairs = Vec::new();
        if !state.model_display.is_empty() {
            pairs.push(format!("model={}", state.model_display));
        }
        if !state.cwd.is_empty() {
            pairs.push(format!("cwd={}", state.cwd));
        }
        format!("{}\n", pairs.join(" "))
    }

    fn conv_meta_value(state: &ConversationState, field: ConvField) -> String {
        match field {
            ConvField::Id => state.remote_id.clone(),
            ConvField::Slug => state.slug.clone(),
            ConvField::CreatedAt => state.remote_created_at.clone().unwrap_or_default(),
            ConvField::UpdatedAt => state.remote_updated_at.clone().unwrap_or_default(),
        }
    }

    fn scalar_content(value: &Value) -> Vec<u8> {
        let mut out = match value {
            Value::String(s) => s.clone().into_bytes(),
            other => other.to_string().into_bytes(),
        };
        out.push(b'\n');
        out
    }

    fn msg_field_content(message: &ParsedMessage, field: &str) -> Result<Vec<u8>, FsError> {
        let text = match field {
            "message_id" => format!("{}\n", message.raw.message_id),
            "conversation_id" => format!("{}\n", message.raw.conversation_id),
            "sequence_id" => format!("{}\n", message.raw.sequence_id),
            "type" => format!("{}\n", message.raw.kind),
            "created_at" => format!("{}\n", message.raw.created_at.as_deref().unwrap_or_default()),
            "content.md" => render_message(message),
            "llm_data" => message
                .raw
                .llm_data
                .clone()
                .ok_or(FsError::PresenceAbsent)?,
            "usage_data" => message
                .raw
                .usage_data
                .clone()
                .ok_or(FsError::PresenceAbsent)?,
            _ => return Err(FsError::NotFound),
        };
        Ok(text.into_bytes())
    }

    /// Current byte content of a regular-file node. Used for open snapshots
    /// and for size reporting in attributes.
    pub(super) async fn content_of(&self, node: &Node) -> Result<Vec<u8>, FsError> {
        match node {
            Node::Readme => Ok(README.as_bytes().to_vec()),
            Node::StartFile { .. } => Ok(START_SCRIPT.as_bytes().to_vec()),
            Node::ModelId { model } => {
                let entry = self.model_by_dir(model).await?;
                Ok(format!("{}\n", entry.id).into_bytes())
            }
            Node::ModelReady { .. } | Node::CreatedFlag { .. } | Node::ArchivedFlag { .. } => {
                Ok(Vec::new())
            }
            Node::Ctl { local_id } => {
                let state = self.state_of(local_id).await?;
                Ok(Self::ctl_content(&state).into_bytes())
            }
            Node::Send { .. } => Ok(Vec::new()),
            Node::FuseId { local_id } => Ok(format!("{local_id}\n").into_bytes()),
            Node::ConvMeta { local_id, field } => {
                let state = self.state_of(local_id).await?;
                Ok(format!("{}\n", Self::conv_meta_value(&state, *field)).into_bytes())
            }
            Node::AllJson { local_id } => {
                let state = self.state_of(local_id).await?;
                if !state.created {
                    return Ok(b"{}\n".to_vec());
                }
                Ok(self.fetch_conversation(&state).await?.0)
            }
            Node::AllMd { local_id } => {
                let state = self.state_of(local_id).await?;
                if !state.created {
                    return Ok(Vec::new());
                }
                let parsed = self.parsed(&state).await?;
                Ok(render_conversation(&parsed).into_bytes())
            }
            Node::CountFile { local_id } => {
                let state = self.state_of(local_id).await?;
                if !state.created {
                    return Ok(b"0\n".to_vec());
                }
                let parsed = self.parsed(&state).await?;
                Ok(format!("{}\n", parsed.messages.len()).into_bytes())
            }
            Node::MsgField { local_id, seq, field, .. } => {
                let state = self.state_of(local_id).await?;
                let parsed = self.parsed(&state).await?;
                let message = Self::msg_by_seq(&parsed, *seq)?;
                Self::msg_field_content(message, field)
            }
            Node::MsgDataFile { local_id, seq, field, path, .. } => {
                let state = self.state_of(local_id).await?;
                let parsed = self.parsed(&state).await?;
                let message = Self::msg_by_seq(&parsed, *seq)?;
                let root = Self::data_value(message, *field).ok_or(FsError::PresenceAbsent)?;
                let value = Self::json_at(root, path).ok_or(FsError::NotFound)?;
                Ok(Self::scalar_content(value))
            }
            _ => Err(FsError::Unsupported),
        }
    }

    // ------------------------------------------------------------------
    // Attributes
    // ------------------------------------------------------------------

    async fn conv_times_of(&self, local_id: &str) -> Result<Times, FsError> {
        let state = self.state_of(local_id).await?;
        Ok(conversation_times(&state, self.start_time))
    }

    async fn msg_times_of(&self, local_id: &str, seq: u64) -> Result<Times, FsError> {
        let state = self.state_of(local_id).await?;
        let parsed = self.parsed(&state).await?;
        let message = Self::msg_by_seq(&parsed, seq)?;
        Ok(message_times(
            message.raw.created_at.as_deref(),
            self.start_time,
        ))
    }

    fn attr(
        ino: u64,
        kind: NodeKind,
        perm: u16,
        size: u64,
        times: Times,
        entry_ttl: Duration,
        attr_ttl: Duration,
    ) -> NodeAttr {
        NodeAttr {
            ino,
            kind,
            perm,
            size,
            atime: times.atime,
            mtime: times.mtime,
            ctime: times.ctime,
            entry_ttl,
            attr_ttl,
        }
    }

    /// Full attributes for a node, including its cache-tier TTLs.
    pub async fn attr_for(&self, node: &Node) -> Result<NodeAttr, FsError> {
        use NodeKind::{Directory, File, Symlink};

        let ino = self.registry.register(node);
        let stat = static_times(self.start_time);

        let attr = match node {
            Node::Root => Self::attr(ino, Directory, 0o755, 0, stat, TTL_STATIC, TTL_STATIC),
            Node::Readme => {
                let size = README.len() as u64;
                Self::attr(ino, File, 0o444, size, stat, TTL_STATIC, TTL_STATIC)
            }
            Node::NewLink => Self::attr(ino, Symlink, 0o777, 0, stat, TTL_STATIC, TTL_STATIC),
            Node::ModelList | Node::ModelDir { .. } | Node::ModelNew { .. } => {
                Self::attr(ino, Directory, 0o755, 0, stat, TTL_MODELS, TTL_MODELS)
            }
            Node::DefaultModelLink => {
                Self::attr(ino, Symlink, 0o777, 0, stat, TTL_MODELS, TTL_MODELS)
            }
            Node::ModelId { .. } => {
                let size = self.content_of(node).await?.len() as u64;
                Self::attr(ino, File, 0o444, size, stat, TTL_MODELS, TTL_MODELS)
            }
            Node::ModelReady { .. } => {
                Self::attr(ino, File, 0o444, 0, stat, TTL_VOLATILE, TTL_VOLATILE)
            }
            Node::CloneFile { .. } => {
                // 8 hex chars + newline, fixed by construction.
                Self::attr(ino, File, 0o444, 9, stat, TTL_MODELS, TTL_VOLATILE)
            }
            Node::StartFile { .. } => {
                let size = START_SCRIPT.len() as u64;
                Self::attr(ino, File, 0o755, size, stat, TTL_MODELS, TTL_MODELS)
            }
            Node::ConversationList => {
                Self::attr(ino, Directory, 0o755, 0, stat, TTL_CONV_STRUCT, TTL_CONV_STRUCT)
            }
            Node::AliasLink { local_id, .. } => {
                let times = self.conv_times_of(local_id).await?;
                Self::attr(ino, Symlink, 0o777, 0, times, TTL_CONV_STRUCT, TTL_CONV_STRUCT)
            }
            Node::ConversationDir { local_id } | Node::MessagesDir { local_id } => {
                let times = self.conv_times_of(local_id).await?;
                Self::attr(ino, Directory, 0o755, 0, times, TTL_CONV_STRUCT, TTL_CONV_STRUCT)
            }
            Node::Ctl { local_id } => {
                let state = self.state_of(local_id).await?;
                let times = conversation_times(&state, self.start_time);
                let perm = if state.created { 0o444 } else { 0o644 };
                let size = Self::ctl_content(&state).len() as u64;
                Self::attr(ino, File, perm, size, times, TTL_CONV_STRUCT, TTL_VOLATILE)
            }
            Node::Send { local_id } => {
                let times = self.conv_times_of(local_id).await?;
                Self::attr(ino, File, 0o222, 0, times, TTL_CONV_STRUCT, TTL_CONV_STRUCT)
            }
            Node::FuseId { local_id } => {
                let times = self.conv_times_of(local_id).await?;
                let size = local_id.len() as u64 + 1;
                Self::attr(ino, File, 0o444, size, times, TTL_IMMUTABLE, TTL_IMMUTABLE)
            }
            Node::CreatedFlag { local_id } => {
                let times = self.conv_times_of(local_id).await?;
                Self::attr(ino, File, 0o444, 0, times, TTL_IMMUTABLE, TTL_IMMUTABLE)
            }
            Node::ArchivedFlag { local_id } => {
                let times = self.conv_times_of(local_id).await?;
                Self::attr(ino, File, 0o444, 0, times, TTL_VOLATILE, TTL_VOLATILE)
            }
            Node::ModelLink { local_id } | Node::CwdLink { local_id } => {
                let times = self.conv_times_of(local_id).await?;
                Self::attr(ino, Symlink, 0o777, 0, times, TTL_IMMUTABLE, TTL_IMMUTABLE)
            }
            Node::WaitingLink { local_id } => {
                let times = self.conv_times_of(local_id).await?;
                Self::attr(ino, Symlink, 0o777, 0, times, TTL_VOLATILE, TTL_VOLATILE)
            }
            Node::ConvMeta { local_id, .. } => {
                let times = self.conv_times_of(local_id).await?;
                let size = self.content_of(node).await?.len() as u64;
                Self::attr(ino, File, 0o444, size, times, TTL_CONV_STRUCT, TTL_VOLATILE)
            }
            Node::AllJson { local_id } | Node::AllMd { local_id } | Node::CountFile { local_id } => {
                let times = self.conv_times_of(local_id).await?;
                let size = self.content_of(node).await?.len() as u64;
                Self::attr(ino, File, 0o444, size, times, TTL_CONV_STRUCT, TTL_VOLATILE)
            }
            Node::LastRoot { local_id }
            | Node::LastDir { local_id, .. }
            | Node::SinceRoot { local_id }
            | Node::SinceSpeaker { local_id, .. }
            | Node::SinceDir { local_id, .. } => {
                let times = self.conv_times_of(local_id).await?;
                Self::attr(ino, Directory, 0o755, 0, times, TTL_CONV_STRUCT, TTL_CONV_STRUCT)
            }
            Node::LastEntry { local_id, .. } | Node::SinceEntry { local_id, .. } => {
                let times = self.conv_times_of(local_id).await?;
                Self::attr(ino, Symlink, 0o777, 0, times, TTL_VOLATILE, TTL_VOLATILE)
            }
            Node::MsgDir { local_id, seq, .. } => {
                let times = self.msg_times_of(local_id, *seq).await?;
                Self::attr(ino, Directory, 0o755, 0, times, TTL_IMMUTABLE, TTL_IMMUTABLE)
            }
            Node::MsgField { local_id, seq, .. } | Node::MsgDataFile { local_id, seq, .. } => {
                let times = self.msg_times_of(local_id, *seq).await?;
                let size = self.content_of(node).await?.len() as u64;
                Self::attr(ino, File, 0o444, size, times, TTL_IMMUTABLE, TTL_IMMUTABLE)
            }
            Node::MsgDataDir { local_id, seq, .. } => {
                let times = self.msg_times_of(local_id, *seq).await?;
                Self::attr(ino, Directory, 0o755, 0, times, TTL_IMMUTABLE, TTL_IMMUTABLE)
            }
        };
        Ok(attr)
    }

    /// getattr entry point; an open snapshot handle overrides the size so a
    /// just-opened file stats consistently with what read will deliver.
    pub async fn getattr(&self, ino: u64, fh: Option<u64>) -> Result<NodeAttr, FsError> {
        let node = self.resolve(ino)?;
        let mut attr = self.attr_for(&node).await?;
        if let Some(fh) = fh
            && let Some(handle) = self.handles.get(fh)
            && let super::handle::Handle::Snapshot(content) = handle.as_ref()
        {
            attr.size = content.len() as u64;
        }
        Ok(attr)
    }
}
