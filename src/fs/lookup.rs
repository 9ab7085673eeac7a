use serde_json::Value;

use crate::shelley::parse_summaries;

use super::attr::NodeAttr;
use super::core::FsCore;
use super::error::FsError;
use super::node::{ConvField, DataField, Node};

/// Canonical decimal: digits only, no leading zeros (except `"0"` itself).
/// Query-directory names that fail this simply do not exist.
fn parse_decimal(name: &str) -> Option<u64> {
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if name.len() > 1 && name.starts_with('0') {
        return None;
    }
    name.parse().ok()
}

impl FsCore {
    /// Resolve `name` under `parent_ino`, registering the child inode and
    /// computing its attributes.
    pub async fn lookup(&self, parent_ino: u64, name: &str) -> Result<(Node, NodeAttr), FsError> {
        let parent = self.resolve(parent_ino)?;
        let node = self.lookup_child(&parent, name).await?;
        let attr = self.attr_for(&node).await?;
        Ok((node, attr))
    }

    async fn lookup_child(&self, parent: &Node, name: &str) -> Result<Node, FsError> {
        match parent {
            Node::Root => match name {
                "README.md" => Ok(Node::Readme),
                "model" => Ok(Node::ModelList),
                "new" => Ok(Node::NewLink),
                "conversation" => Ok(Node::ConversationList),
                _ => Err(FsError::NotFound),
            },

            Node::ModelList => {
                if name == "default" {
                    let models = self.models().await?;
                    if models.default_entry().is_none() {
                        return Err(FsError::PresenceAbsent);
                    }
                    return Ok(Node::DefaultModelLink);
                }
                let entry = self.model_by_dir(name).await?;
                Ok(Node::ModelDir { model: entry.display().to_string() })
            }

            Node::ModelDir { model } => match name {
                "id" => Ok(Node::ModelId { model: model.clone() }),
                "ready" => {
                    let entry = self.model_by_dir(model).await?;
                    if !entry.ready {
                        return Err(FsError::PresenceAbsent);
                    }
                    Ok(Node::ModelReady { model: model.clone() })
                }
                "new" => Ok(Node::ModelNew { model: model.clone() }),
                _ => Err(FsError::NotFound),
            },

            Node::ModelNew { model } => match name {
                "clone" => Ok(Node::CloneFile { model: model.clone() }),
                "start" => Ok(Node::StartFile { model: model.clone() }),
                _ => Err(FsError::NotFound),
            },

            Node::ConversationList => self.lookup_conversation(name).await,

            Node::ConversationDir { local_id } => {
                self.lookup_conversation_entry(local_id, name).await
            }

            Node::MessagesDir { local_id } => match name {
                "all.json" => Ok(Node::AllJson { local_id: local_id.clone() }),
                "all.md" => Ok(Node::AllMd { local_id: local_id.clone() }),
                "count" => Ok(Node::CountFile { local_id: local_id.clone() }),
                "last" => Ok(Node::LastRoot { local_id: local_id.clone() }),
                "since" => Ok(Node::SinceRoot { local_id: local_id.clone() }),
                _ => {
                    let state = self.state_of(local_id).await?;
                    if !state.created {
                        return Err(FsError::NotFound);
                    }
                    let parsed = self.parsed(&state).await?;
                    let message = Self::msg_by_name(&parsed, name).ok_or(FsError::NotFound)?;
                    Ok(Node::MsgDir {
                        local_id: local_id.clone(),
                        conv: parsed.conversation_id.clone(),
                        seq: message.raw.sequence_id,
                    })
                }
            },

            Node::MsgDir { local_id, conv, seq } => {
                self.lookup_message_entry(local_id, conv, *seq, name).await
            }

            Node::MsgDataDir { local_id, conv, seq, field, path } => {
                let state = self.state_of(local_id).await?;
                let parsed = self.parsed(&state).await?;
                let message = Self::msg_by_seq(&parsed, *seq)?;
                let root = Self::data_value(message, *field).ok_or(FsError::PresenceAbsent)?;
                let here = Self::json_at(root, path).ok_or(FsError::NotFound)?;
                let child = match here {
                    Value::Object(map) => map.get(name),
                    Value::Array(items) => {
                        parse_decimal(name).and_then(|i| items.get(i as usize))
                    }
                    _ => None,
                }
                .ok_or(FsError::NotFound)?;
                let mut child_path = path.clone();
                child_path.push(name.to_string());
                let node = if matches!(child, Value::Object(_) | Value::Array(_)) {
                    Node::MsgDataDir {
                        local_id: local_id.clone(),
                        conv: conv.clone(),
                        seq: *seq,
                        field: *field,
                        path: child_path,
                    }
                } else {
                    Node::MsgDataFile {
                        local_id: local_id.clone(),
                        conv: conv.clone(),
                        seq: *seq,
                        field: *field,
                        path: child_path,
                    }
                };
                Ok(node)
            }

            Node::LastRoot { local_id } => {
                let n = parse_decimal(name).filter(|n| *n > 0).ok_or(FsError::NotFound)?;
                Ok(Node::LastDir { local_id: local_id.clone(), n })
            }

            Node::LastDir { local_id, n } => {
                let k = parse_decimal(name).ok_or(FsError::NotFound)?;
                let state = self.state_of(local_id).await?;
                let parsed = self.parsed(&state).await?;
                Self::last_slot(&parsed, *n, k)?;
                Ok(Node::LastEntry { local_id: local_id.clone(), n: *n, k })
            }

            Node::SinceRoot { local_id } => {
                if !matches!(name, "user" | "agent" | "gitinfo") {
                    return Err(FsError::NotFound);
                }
                Ok(Node::SinceSpeaker {
                    local_id: local_id.clone(),
                    speaker: name.to_string(),
                })
            }

            Node::SinceSpeaker { local_id, speaker } => {
                let k = parse_decimal(name).filter(|k| *k > 0).ok_or(FsError::NotFound)?;
                let state = self.state_of(local_id).await?;
                let parsed = self.parsed(&state).await?;
                Self::since_window(&parsed, speaker, k)?;
                Ok(Node::SinceDir {
                    local_id: local_id.clone(),
                    speaker: speaker.clone(),
                    k,
                })
            }

            Node::SinceDir { local_id, speaker, k } => {
                let state = self.state_of(local_id).await?;
                let parsed = self.parsed(&state).await?;
                let window = Self::since_window(&parsed, speaker, *k)?;
                let message = window
                    .iter()
                    .find(|m| Self::msg_name(&parsed, m) == name)
                    .ok_or(FsError::NotFound)?;
                Ok(Node::SinceEntry {
                    local_id: local_id.clone(),
                    speaker: speaker.clone(),
                    k: *k,
                    seq: message.raw.sequence_id,
                })
            }

            _ => Err(FsError::NotFound),
        }
    }

    /// Conversation list lookup order: local id, remote id, slug, then a
    /// remote probe that adopts on match.
    async fn lookup_conversation(&self, name: &str) -> Result<Node, FsError> {
        if self.store.get(name).await.is_some() {
            return Ok(Node::ConversationDir { local_id: name.to_string() });
        }
        if let Some(local_id) = self.store.get_by_remote_id(name).await {
            return Ok(Node::AliasLink { name: name.to_string(), local_id });
        }
        if let Some(local_id) = self.store.get_by_slug(name).await {
            return Ok(Node::AliasLink { name: name.to_string(), local_id });
        }

        let active = self.client.list_conversations().await.map_err(FsError::backend)?;
        if let Some(node) = self.adopt_match(&active, name).await? {
            return Ok(node);
        }
        let archived = self
            .client
            .list_archived_conversations()
            .await
            .map_err(FsError::backend)?;
        if let Some(node) = self.adopt_match(&archived, name).await? {
            return Ok(node);
        }
        Err(FsError::NotFound)
    }

    async fn adopt_match(&self, bytes: &[u8], name: &str) -> Result<Option<Node>, FsError> {
        let summaries = parse_summaries(bytes)?;
        let Some(summary) = summaries
            .iter()
            .find(|s| s.conversation_id == name || s.slug.as_deref() == Some(name))
        else {
            return Ok(None);
        };
        let local_id = self
            .store
            .adopt_with_metadata(
                &summary.conversation_id,
                summary.slug.as_deref().unwrap_or_default(),
                summary.created_at.as_deref(),
                summary.updated_at.as_deref(),
            )
            .await?;
        Ok(Some(Node::AliasLink { name: name.to_string(), local_id }))
    }

    async fn lookup_conversation_entry(
        &self,
        local_id: &str,
        name: &str,
    ) -> Result<Node, FsError> {
        let state = self.state_of(local_id).await?;
        let local_id = local_id.to_string();
        match name {
            "ctl" => Ok(Node::Ctl { local_id }),
            "send" => Ok(Node::Send { local_id }),
            "fuse_id" => Ok(Node::FuseId { local_id }),
            "messages" => Ok(Node::MessagesDir { local_id }),
            "created" => {
                if !state.created {
                    return Err(FsError::PresenceAbsent);
                }
                Ok(Node::CreatedFlag { local_id })
            }
            "model" => {
                if state.model_display.is_empty() {
                    return Err(FsError::PresenceAbsent);
                }
                Ok(Node::ModelLink { local_id })
            }
            "cwd" => {
                if state.cwd.is_empty() {
                    return Err(FsError::PresenceAbsent);
                }
                Ok(Node::CwdLink { local_id })
            }
            "archived" => {
                if !state.created {
                    return Err(FsError::PresenceAbsent);
                }
                let archived = self
                    .client
                    .is_conversation_archived(&state.remote_id)
                    .await
                    .map_err(FsError::backend)?;
                if !archived {
                    return Err(FsError::PresenceAbsent);
                }
                Ok(Node::ArchivedFlag { local_id })
            }
            "waiting_for_input" => {
                if !state.created {
                    return Err(FsError::PresenceAbsent);
                }
                let parsed = self.parsed(&state).await?;
                if Self::waiting_target(&parsed).is_none() {
                    return Err(FsError::PresenceAbsent);
                }
                Ok(Node::WaitingLink { local_id })
            }
            "id" | "slug" | "created_at" | "updated_at" => {
                if !state.created {
                    return Err(FsError::PresenceAbsent);
                }
                let field = ConvField::ALL
                    .into_iter()
                    .find(|f| f.name() == name)
                    .ok_or(FsError::NotFound)?;
                let present = match field {
                    ConvField::Id => !state.remote_id.is_empty(),
                    ConvField::Slug => !state.slug.is_empty(),
                    ConvField::CreatedAt => state.remote_created_at.is_some(),
                    ConvField::UpdatedAt => state.remote_updated_at.is_some(),
                };
                if !present {
                    return Err(FsError::PresenceAbsent);
                }
                Ok(Node::ConvMeta { local_id, field })
            }
            _ => Err(FsError::NotFound),
        }
    }

    async fn lookup_message_entry(
        &self,
        local_id: &str,
        conv: &str,
        seq: u64,
        name: &str,
    ) -> Result<Node, FsError> {
        let field_node = |field: &str| Node::MsgField {
            local_id: local_id.to_string(),
            conv: conv.to_string(),
            seq,
            field: field.to_string(),
        };
        match name {
            "message_id" | "conversation_id" | "sequence_id" | "type" | "created_at"
            | "content.md" => Ok(field_node(name)),
            "llm_data" | "usage_data" => {
                let state = self.state_of(local_id).await?;
                let parsed = self.parsed(&state).await?;
                let message = Self::msg_by_seq(&parsed, seq)?;
                let field = if name == "llm_data" {
                    DataField::LlmData
                } else {
                    DataField::UsageData
                };
                let raw = match field {
                    DataField::LlmData => message.raw.llm_data.as_deref(),
                    DataField::UsageData => message.raw.usage_data.as_deref(),
                };
                if raw.is_none() {
                    return Err(FsError::PresenceAbsent);
                }
                match Self::data_value(message, field) {
                    Some(Value::Object(_)) | Some(Value::Array(_)) => Ok(Node::MsgDataDir {
                        local_id: local_id.to_string(),
                        conv: conv.to_string(),
                        seq,
                        field,
                        path: Vec::new(),
                    }),
                    // Decodes to a scalar or not JSON at all: a plain file
                    // carrying the raw string.
                    _ => Ok(field_node(name)),
                }
            }
            _ => Err(FsError::NotFound),
        }
    }
}
