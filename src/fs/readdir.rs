use std::collections::HashSet;

use chrono::Utc;
use serde_json::Value;

use crate::msg::slug::valid_filename;
use crate::shelley::parse_summaries;

use super::attr::NodeKind;
use super::core::{DirEntry, FsCore};
use super::error::FsError;
use super::node::{ConvField, DataField, Node};

fn kind_of(node: &Node) -> NodeKind {
    match node {
        Node::Root
        | Node::ModelList
        | Node::ModelDir { .. }
        | Node::ModelNew { .. }
        | Node::ConversationList
        | Node::ConversationDir { .. }
        | Node::MessagesDir { .. }
        | Node::LastRoot { .. }
        | Node::LastDir { .. }
        | Node::SinceRoot { .. }
        | Node::SinceSpeaker { .. }
        | Node::SinceDir { .. }
        | Node::MsgDir { .. }
        | Node::MsgDataDir { .. } => NodeKind::Directory,
        Node::NewLink
        | Node::DefaultModelLink
        | Node::AliasLink { .. }
        | Node::ModelLink { .. }
        | Node::CwdLink { .. }
        | Node::WaitingLink { .. }
        | Node::LastEntry { .. }
        | Node::SinceEntry { .. } => NodeKind::Symlink,
        _ => NodeKind::File,
    }
}

impl FsCore {
    fn dir_entry(&self, node: Node, name: impl Into<String>) -> DirEntry {
        DirEntry {
            ino: self.registry.register(&node),
            kind: kind_of(&node),
            name: name.into(),
        }
    }

    /// List a directory. Entries do not include `.`/`..`; the dispatch layer
    /// synthesizes those.
    pub async fn readdir(&self, ino: u64) -> Result<Vec<DirEntry>, FsError> {
        let node = self.resolve(ino)?;
        match &node {
            Node::Root => Ok(vec![
                self.dir_entry(Node::Readme, "README.md"),
                self.dir_entry(Node::ModelList, "model"),
                self.dir_entry(Node::NewLink, "new"),
                self.dir_entry(Node::ConversationList, "conversation"),
            ]),

            Node::ModelList => {
                let models = self.models().await?;
                let mut entries = Vec::new();
                for entry in &models.models {
                    let name = entry.display().to_string();
                    if !valid_filename(&name) {
                        continue;
                    }
                    entries.push(self.dir_entry(Node::ModelDir { model: name.clone() }, name));
                }
                if models.default_entry().is_some() {
                    entries.push(self.dir_entry(Node::DefaultModelLink, "default"));
                }
                Ok(entries)
            }

            Node::ModelDir { model } => {
                let entry = self.model_by_dir(model).await?;
                let mut entries = vec![
                    self.dir_entry(Node::ModelId { model: model.clone() }, "id"),
                    self.dir_entry(Node::ModelNew { model: model.clone() }, "new"),
                ];
                if entry.ready {
                    entries.push(self.dir_entry(Node::ModelReady { model: model.clone() }, "ready"));
                }
                Ok(entries)
            }

            Node::ModelNew { model } => Ok(vec![
                self.dir_entry(Node::CloneFile { model: model.clone() }, "clone"),
                self.dir_entry(Node::StartFile { model: model.clone() }, "start"),
            ]),

            Node::ConversationList => self.conversation_list_entries().await,

            Node::ConversationDir { local_id } => self.conversation_dir_entries(local_id).await,

            Node::MessagesDir { local_id } => {
                let id = local_id.clone();
                let mut entries = vec![
                    self.dir_entry(Node::AllJson { local_id: id.clone() }, "all.json"),
                    self.dir_entry(Node::AllMd { local_id: id.clone() }, "all.md"),
                    self.dir_entry(Node::CountFile { local_id: id.clone() }, "count"),
                    self.dir_entry(Node::LastRoot { local_id: id.clone() }, "last"),
                    self.dir_entry(Node::SinceRoot { local_id: id.clone() }, "since"),
                ];
                let state = self.state_of(local_id).await?;
                if state.created {
                    let parsed = self.parsed(&state).await?;
                    for message in &parsed.messages {
                        let name = Self::msg_name(&parsed, message);
                        entries.push(self.dir_entry(
                            Node::MsgDir {
                                local_id: id.clone(),
                                conv: parsed.conversation_id.clone(),
                                seq: message.raw.sequence_id,
                            },
                            name,
                        ));
                    }
                }
                Ok(entries)
            }

            Node::MsgDir { local_id, conv, seq } => {
                let state = self.state_of(local_id).await?;
                let parsed = self.parsed(&state).await?;
                let message = Self::msg_by_seq(&parsed, *seq)?;
                let field = |field: &str| Node::MsgField {
                    local_id: local_id.clone(),
                    conv: conv.clone(),
                    seq: *seq,
                    field: field.to_string(),
                };
                let mut entries = vec![
                    self.dir_entry(field("message_id"), "message_id"),
                    self.dir_entry(field("conversation_id"), "conversation_id"),
                    self.dir_entry(field("sequence_id"), "sequence_id"),
                    self.dir_entry(field("type"), "type"),
                    self.dir_entry(field("created_at"), "created_at"),
                    self.dir_entry(field("content.md"), "content.md"),
                ];
                for (data_field, raw) in [
                    (DataField::LlmData, message.raw.llm_data.as_deref()),
                    (DataField::UsageData, message.raw.usage_data.as_deref()),
                ] {
                    if raw.is_none() {
                        continue;
                    }
                    let name = data_field.name();
                    let node = match Self::data_value(message, data_field) {
                        Some(Value::Object(_)) | Some(Value::Array(_)) => Node::MsgDataDir {
                            local_id: local_id.clone(),
                            conv: conv.clone(),
                            seq: *seq,
                            field: data_field,
                            path: Vec::new(),
                        },
                        _ => field(name),
                    };
                    entries.push(self.dir_entry(node, name));
                }
                Ok(entries)
            }

            Node::MsgDataDir { local_id, conv, seq, field, path } => {
                let state = self.state_of(local_id).await?;
                let parsed = self.parsed(&state).await?;
                let message = Self::msg_by_seq(&parsed, *seq)?;
                let root = Self::data_value(message, *field).ok_or(FsError::PresenceAbsent)?;
                let here = Self::json_at(root, path).ok_or(FsError::NotFound)?;
                let children: Vec<(String, &Value)> = match here {
                    Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v)).collect(),
                    Value::Array(items) => items
                        .iter()
                        .enumerate()
                        .map(|(i, v)| (i.to_string(), v))
                        .collect(),
                    _ => return Err(FsError::NotFound),
                };
                let mut entries = Vec::new();
                for (name, value) in children {
                    if !valid_filename(&name) {
                        continue;
                    }
                    let mut child_path = path.clone();
                    child_path.push(name.clone());
                    let child = if matches!(value, Value::Object(_) | Value::Array(_)) {
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
                    entries.push(self.dir_entry(child, name));
                }
                Ok(entries)
            }

            // The numbered children are virtual; they materialize on lookup.
            Node::LastRoot { .. } | Node::SinceSpeaker { .. } => Ok(Vec::new()),

            Node::SinceRoot { local_id } => Ok(["user", "agent", "gitinfo"]
                .into_iter()
                .map(|speaker| {
                    self.dir_entry(
                        Node::SinceSpeaker {
                            local_id: local_id.clone(),
                            speaker: speaker.to_string(),
                        },
                        speaker,
                    )
                })
                .collect()),

            Node::LastDir { local_id, n } => {
                let state = self.state_of(local_id).await?;
                if !state.created {
                    return Ok(Vec::new());
                }
                let parsed = self.parsed(&state).await?;
                let count = (*n).min(parsed.messages.len() as u64);
                Ok((0..count)
                    .map(|k| {
                        self.dir_entry(
                            Node::LastEntry { local_id: local_id.clone(), n: *n, k },
                            k.to_string(),
                        )
                    })
                    .collect())
            }

            Node::SinceDir { local_id, speaker, k } => {
                let state = self.state_of(local_id).await?;
                let parsed = self.parsed(&state).await?;
                let window = Self::since_window(&parsed, speaker, *k)?;
                Ok(window
                    .iter()
                    .map(|message| {
                        let name = Self::msg_name(&parsed, message);
                        self.dir_entry(
                            Node::SinceEntry {
                                local_id: local_id.clone(),
                                speaker: speaker.clone(),
                                k: *k,
                                seq: message.raw.sequence_id,
                            },
                            name,
                        )
                    })
                    .collect())
            }

            _ => Err(FsError::NotFound),
        }
    }

    /// The conversation listing: adopt everything the backend reports,
    /// expire dead clones, filter out conversations the backend no longer
    /// lists, then emit local-id directories plus remote-id and slug
    /// symlinks, deduplicated in that priority order.
    async fn conversation_list_entries(&self) -> Result<Vec<DirEntry>, FsError> {
        let mut remote_ids: HashSet<String> = HashSet::new();
        let mut fetch_ok = true;

        for (label, result) in [
            ("active", self.client.list_conversations().await),
            ("archived", self.client.list_archived_conversations().await),
        ] {
            let bytes = match result {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(list = label, error = %e, "failed to fetch conversation list");
                    fetch_ok = false;
                    continue;
                }
            };
            let summaries = match parse_summaries(&bytes) {
                Ok(summaries) => summaries,
                Err(e) => {
                    tracing::warn!(list = label, error = %e, "failed to parse conversation list");
                    fetch_ok = false;
                    continue;
                }
            };
            for summary in summaries {
                remote_ids.insert(summary.conversation_id.clone());
                // Best effort per entry: one bad adoption must not abort
                // the listing.
                if let Err(e) = self
                    .store
                    .adopt_with_metadata(
                        &summary.conversation_id,
                        summary.slug.as_deref().unwrap_or_default(),
                        summary.created_at.as_deref(),
                        summary.updated_at.as_deref(),
                    )
                    .await
                {
                    tracing::warn!(remote_id = %summary.conversation_id, error = %e, "failed to adopt remote conversation");
                }
            }
        }

        let now = Utc::now();
        let mut snapshot = self.store.list_mappings().await;
        snapshot.sort_by(|a, b| a.local_id.cmp(&b.local_id));

        let mut included = Vec::new();
        for state in snapshot {
            if !state.created {
                let expired = now
                    .signed_duration_since(state.local_created_at)
                    .to_std()
                    .map(|age| age > self.clone_timeout)
                    .unwrap_or(false);
                if expired {
                    if let Err(e) = self.store.delete(&state.local_id).await {
                        tracing::warn!(local_id = %state.local_id, error = %e, "failed to expire stale clone");
                    }
                }
                // Unexpired clones stay reachable by direct lookup but are
                // hidden from the listing.
                continue;
            }
            // Fail open when the remote lists could not be fetched, so a
            // degraded backend never makes conversations vanish.
            if fetch_ok && !remote_ids.contains(&state.remote_id) {
                continue;
            }
            included.push(state);
        }

        let mut names: HashSet<String> = HashSet::new();
        let mut entries = Vec::new();
        for state in &included {
            names.insert(state.local_id.clone());
            entries.push(self.dir_entry(
                Node::ConversationDir { local_id: state.local_id.clone() },
                state.local_id.clone(),
            ));
        }
        for state in &included {
            if !state.remote_id.is_empty()
                && valid_filename(&state.remote_id)
                && names.insert(state.remote_id.clone())
            {
                entries.push(self.dir_entry(
                    Node::AliasLink {
                        name: state.remote_id.clone(),
                        local_id: state.local_id.clone(),
                    },
                    state.remote_id.clone(),
                ));
            }
        }
        for state in &included {
            if !state.slug.is_empty()
                && valid_filename(&state.slug)
                && names.insert(state.slug.clone())
            {
                entries.push(self.dir_entry(
                    Node::AliasLink {
                        name: state.slug.clone(),
                        local_id: state.local_id.clone(),
                    },
                    state.slug.clone(),
                ));
            }
        }
        Ok(entries)
    }

    async fn conversation_dir_entries(&self, local_id: &str) -> Result<Vec<DirEntry>, FsError> {
        let state = self.state_of(local_id).await?;
        let id = local_id.to_string();
        let mut entries = vec![
            self.dir_entry(Node::Ctl { local_id: id.clone() }, "ctl"),
            self.dir_entry(Node::Send { local_id: id.clone() }, "send"),
            self.dir_entry(Node::MessagesDir { local_id: id.clone() }, "messages"),
            self.dir_entry(Node::FuseId { local_id: id.clone() }, "fuse_id"),
        ];
        if !state.model_display.is_empty() {
            entries.push(self.dir_entry(Node::ModelLink { local_id: id.clone() }, "model"));
        }
        if !state.cwd.is_empty() {
            entries.push(self.dir_entry(Node::CwdLink { local_id: id.clone() }, "cwd"));
        }
        if !state.created {
            return Ok(entries);
        }

        entries.push(self.dir_entry(Node::CreatedFlag { local_id: id.clone() }, "created"));
        for field in ConvField::ALL {
            let present = match field {
                ConvField::Id => !state.remote_id.is_empty(),
                ConvField::Slug => !state.slug.is_empty(),
                ConvField::CreatedAt => state.remote_created_at.is_some(),
                ConvField::UpdatedAt => state.remote_updated_at.is_some(),
            };
            if present {
                entries.push(self.dir_entry(
                    Node::ConvMeta { local_id: id.clone(), field },
                    field.name(),
                ));
            }
        }

        // Both checks below are best effort: a degraded backend degrades the
        // listing instead of failing it.
        match self.client.is_conversation_archived(&state.remote_id).await {
            Ok(true) => {
                entries.push(self.dir_entry(Node::ArchivedFlag { local_id: id.clone() }, "archived"));
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(remote_id = %state.remote_id, error = %e, "failed to query archived status");
            }
        }
        match self.parsed(&state).await {
            Ok(parsed) => {
                if Self::waiting_target(&parsed).is_some() {
                    entries.push(
                        self.dir_entry(Node::WaitingLink { local_id: id.clone() }, "waiting_for_input"),
                    );
                }
            }
            Err(e) => {
                tracing::warn!(remote_id = %state.remote_id, error = %e, "failed to analyze waiting state");
            }
        }
        Ok(entries)
    }
}
