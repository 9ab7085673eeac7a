use super::core::FsCore;
use super::error::FsError;
use super::handle::{Handle, SendBuffer};
use super::node::Node;

impl FsCore {
    pub(super) fn wants_direct_io(node: &Node) -> bool {
        matches!(
            node,
            Node::CloneFile { .. }
                | Node::Ctl { .. }
                | Node::Send { .. }
                | Node::ConvMeta { .. }
                | Node::AllJson { .. }
                | Node::AllMd { .. }
                | Node::CountFile { .. }
        )
    }

    /// Open a regular file. Returns the handle plus whether the kernel
    /// should bypass its page cache for it.
    pub async fn open(&self, ino: u64) -> Result<(u64, bool), FsError> {
        let node = self.resolve(ino)?;
        let direct_io = Self::wants_direct_io(&node);
        let handle = match &node {
            Node::Send { .. } => Handle::Send(tokio::sync::Mutex::new(SendBuffer::default())),
            Node::CloneFile { model } => {
                // Every open is a fresh allocation bound to this model.
                let entry = self.model_by_dir(model).await?;
                let local_id = self.store.clone_conversation().await?;
                self.store
                    .set_model(&local_id, entry.display(), &entry.id)
                    .await?;
                tracing::info!(local_id = %local_id, model = %entry.display(), "cloned conversation");
                Handle::Snapshot(format!("{local_id}\n").into_bytes())
            }
            _ => Handle::Snapshot(self.content_of(&node).await?),
        };
        Ok((self.handles.insert(handle), direct_io))
    }

    pub async fn read(&self, fh: u64, offset: u64, size: u32) -> Result<Vec<u8>, FsError> {
        let handle = self.handles.get(fh).ok_or(FsError::NotFound)?;
        match handle.as_ref() {
            Handle::Snapshot(content) => {
                let start = (offset as usize).min(content.len());
                let end = (start + size as usize).min(content.len());
                Ok(content[start..end].to_vec())
            }
            Handle::Send(_) => Ok(Vec::new()),
        }
    }

    pub async fn write(&self, ino: u64, fh: u64, data: &[u8]) -> Result<u32, FsError> {
        let node = self.resolve(ino)?;
        match &node {
            Node::Send { .. } => {
                let handle = self.handles.get(fh).ok_or(FsError::NotFound)?;
                let Handle::Send(buffer) = handle.as_ref() else {
                    return Err(FsError::NotFound);
                };
                buffer.lock().await.buf.extend_from_slice(data);
                Ok(data.len() as u32)
            }
            Node::Ctl { local_id } => {
                self.ctl_write(local_id, data).await?;
                Ok(data.len() as u32)
            }
            _ => Err(FsError::Unsupported),
        }
    }

    /// Apply one write to `ctl`: whitespace-separated `key=value` tokens,
    /// rejected wholesale once the conversation is created.
    async fn ctl_write(&self, local_id: &str, data: &[u8]) -> Result<(), FsError> {
        let state = self.state_of(local_id).await?;
        if state.created {
            return Err(FsError::WriteAfterCommit);
        }
        let text = String::from_utf8_lossy(data);
        for token in text.split_whitespace() {
            let Some((key, value)) = token.split_once('=') else {
                return Err(FsError::BadRequest(format!("malformed ctl token: {token}")));
            };
            match key {
                "model" => {
                    let models = self.models().await?;
                    let entry = models.find_by_name(value).ok_or_else(|| {
                        FsError::BadRequest(format!("unknown model: {value}"))
                    })?;
                    self.store
                        .set_model(local_id, entry.display(), &entry.id)
                        .await?;
                }
                _ => self.store.set_ctl(local_id, key, value).await?,
            }
        }
        Ok(())
    }

    /// Commit a buffered `send` handle. At most one network call per handle:
    /// the flushed flag is set before the call and stays set on failure, so
    /// kernel-level retries of the same close cannot double-send.
    pub async fn flush(&self, ino: u64, fh: u64) -> Result<(), FsError> {
        let node = self.resolve(ino)?;
        let Node::Send { local_id } = &node else {
            return Ok(());
        };
        let Some(handle) = self.handles.get(fh) else {
            return Ok(());
        };
        let Handle::Send(buffer) = handle.as_ref() else {
            return Ok(());
        };

        let mut buffer = buffer.lock().await;
        if buffer.flushed {
            return Ok(());
        }
        let text = String::from_utf8_lossy(&buffer.buf).into_owned();
        let message = text.trim_end_matches('\n');
        if message.is_empty() {
            // Nothing to commit; leave the flag clear so the handle can
            // still send if more bytes arrive before the final close.
            return Ok(());
        }
        buffer.flushed = true;

        let state = self.state_of(local_id).await?;
        if !state.created {
            let cwd = (!state.cwd.is_empty()).then_some(state.cwd.as_str());
            let resp = self
                .client
                .start_conversation(message, &state.model_internal, cwd)
                .await
                .map_err(FsError::backend)?;
            self.store
                .mark_created(local_id, &resp.conversation_id, &resp.slug)
                .await?;
            self.cache.invalidate(&resp.conversation_id).await;
            tracing::info!(local_id = %local_id, remote_id = %resp.conversation_id, "conversation started");
        } else {
            self.client
                .send_message(&state.remote_id, message, &state.model_internal)
                .await
                .map_err(FsError::backend)?;
            self.cache.invalidate(&state.remote_id).await;
            tracing::debug!(local_id = %local_id, remote_id = %state.remote_id, "message sent");
        }
        Ok(())
    }

    pub fn release(&self, fh: u64) {
        self.handles.remove(fh);
    }

    /// `create`/`touch` support: only `archived` under a conversation.
    pub async fn create(&self, parent_ino: u64, name: &str) -> Result<(u64, u64), FsError> {
        let parent = self.resolve(parent_ino)?;
        let Node::ConversationDir { local_id } = &parent else {
            return Err(FsError::Unsupported);
        };
        if name != "archived" {
            return Err(FsError::Unsupported);
        }
        let state = self.state_of(local_id).await?;
        if !state.created {
            return Err(FsError::PresenceAbsent);
        }
        self.client
            .archive_conversation(&state.remote_id)
            .await
            .map_err(FsError::backend)?;
        tracing::info!(local_id = %local_id, remote_id = %state.remote_id, "archived conversation");
        let node = Node::ArchivedFlag { local_id: local_id.clone() };
        let ino = self.registry.register(&node);
        let fh = self.handles.insert(Handle::Snapshot(Vec::new()));
        Ok((ino, fh))
    }

    /// `unlink` support: only `archived` under a conversation. The kernel's
    /// positive dentry for the name is invalidated out-of-band, since the
    /// next lookup must miss immediately.
    pub async fn unlink(&self, parent_ino: u64, name: &str) -> Result<(), FsError> {
        let parent = self.resolve(parent_ino)?;
        let Node::ConversationDir { local_id } = &parent else {
            return Err(FsError::Unsupported);
        };
        if name != "archived" {
            return Err(FsError::Unsupported);
        }
        let state = self.state_of(local_id).await?;
        if !state.created {
            return Err(FsError::PresenceAbsent);
        }
        self.client
            .unarchive_conversation(&state.remote_id)
            .await
            .map_err(FsError::backend)?;
        tracing::info!(local_id = %local_id, remote_id = %state.remote_id, "unarchived conversation");

        if let Some(invalidator) = self.invalidator() {
            // Deferred: notifying from inside the unlink callback would
            // deadlock against the kernel lock this request holds.
            std::thread::spawn(move || {
                invalidator.inval_entry(parent_ino, "archived");
            });
        }
        Ok(())
    }

    /// Truncation is tolerated on the writable files so `>` redirection
    /// works; timestamp updates are accepted silently everywhere (`touch`
    /// on presence files must succeed).
    pub async fn setattr(&self, ino: u64, size: Option<u64>) -> Result<(), FsError> {
        let node = self.resolve(ino)?;
        if size.is_some() && !matches!(node, Node::Ctl { .. } | Node::Send { .. }) {
            return Err(FsError::Unsupported);
        }
        Ok(())
    }

    pub async fn readlink(&self, ino: u64) -> Result<String, FsError> {
        let node = self.resolve(ino)?;
        match &node {
            Node::NewLink => Ok("model/default/new".to_string()),
            Node::DefaultModelLink => {
                let models = self.models().await?;
                let entry = models.default_entry().ok_or(FsError::PresenceAbsent)?;
                Ok(entry.display().to_string())
            }
            Node::AliasLink { local_id, .. } => Ok(local_id.clone()),
            Node::ModelLink { local_id } => {
                let state = self.state_of(local_id).await?;
                if state.model_display.is_empty() {
                    return Err(FsError::PresenceAbsent);
                }
                Ok(format!("../../model/{}", state.model_display))
            }
            Node::CwdLink { local_id } => {
                let state = self.state_of(local_id).await?;
                if state.cwd.is_empty() {
                    return Err(FsError::PresenceAbsent);
                }
                Ok(state.cwd)
            }
            Node::WaitingLink { local_id } => {
                let state = self.state_of(local_id).await?;
                let parsed = self.parsed(&state).await?;
                Self::waiting_target(&parsed).ok_or(FsError::PresenceAbsent)
            }
            Node::LastEntry { local_id, n, k } => {
                let state = self.state_of(local_id).await?;
                let parsed = self.parsed(&state).await?;
                let message = Self::last_slot(&parsed, *n, *k)?;
                Ok(format!("../../{}", Self::msg_name(&parsed, message)))
            }
            Node::SinceEntry { local_id, seq, .. } => {
                let state = self.state_of(local_id).await?;
                let parsed = self.parsed(&state).await?;
                let message = Self::msg_by_seq(&parsed, *seq)?;
                Ok(format!("../../../{}", Self::msg_name(&parsed, message)))
            }
            _ => Err(FsError::BadRequest("not a symlink".to_string())),
        }
    }
}
