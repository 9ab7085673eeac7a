use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Errors from state-store operations.
#[derive(thiserror::Error, Debug)]
pub enum StateError {
    #[error("conversation not found: {0}")]
    NotFound(String),

    #[error("conversation {0} is already created; {1} is read-only")]
    ReadOnly(String, &'static str),

    #[error("conversation {local_id} already created with remote id {existing}")]
    RemoteIdMismatch { local_id: String, existing: String },

    #[error("unknown ctl key: {0}")]
    UnknownKey(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Everything the filesystem tracks about one conversation.
///
/// `local_id` is the stable 8-hex identity; `remote_id` stays empty until the
/// first successful send commits the conversation to the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    pub local_id: String,
    #[serde(default)]
    pub remote_id: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub model_display: String,
    #[serde(default)]
    pub model_internal: String,
    #[serde(default)]
    pub cwd: String,
    #[serde(default)]
    pub created: bool,
    pub local_created_at: DateTime<Utc>,
    #[serde(default)]
    pub remote_created_at: Option<String>,
    #[serde(default)]
    pub remote_updated_at: Option<String>,
}

#[derive(Default)]
struct Maps {
    conversations: HashMap<String, ConversationState>,
    by_remote: HashMap<String, String>,
    by_slug: HashMap<String, String>,
}

/// Authoritative local mapping of local-id, remote-id and slug, persisted as
/// one JSON document per conversation under `<dir>/conversations/`.
///
/// All operations take the single internal lock, so each appears atomic to
/// concurrent FUSE callbacks. Disk writes happen inside the lock; the store
/// is the only writer of its directory.
pub struct StateStore {
    maps: RwLock<Maps>,
    dir: PathBuf,
}

impl StateStore {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            maps: RwLock::new(Maps::default()),
            dir: base_dir.as_ref().join("conversations"),
        }
    }

    /// Load every persisted conversation from disk into the in-memory maps.
    /// Unparseable files are logged and skipped.
    pub async fn load_all(&self) -> Result<usize, StateError> {
        if !self.dir.exists() {
            std::fs::create_dir_all(&self.dir)?;
            return Ok(0);
        }

        let mut maps = Maps::default();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match std::fs::read_to_string(&path) {
                Ok(content) => match serde_json::from_str::<ConversationState>(&content) {
                    Ok(state) => {
                        if !state.remote_id.is_empty() {
                            maps.by_remote
                                .insert(state.remote_id.clone(), state.local_id.clone());
                        }
                        if !state.slug.is_empty() {
                            maps.by_slug.insert(state.slug.clone(), state.local_id.clone());
                        }
                        maps.conversations.insert(state.local_id.clone(), state);
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "failed to parse conversation state file");
                    }
                },
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to read conversation state file");
                }
            }
        }

        let count = maps.conversations.len();
        *self.maps.write().await = maps;
        Ok(count)
    }

    /// Allocate a fresh local conversation: unique 8-hex id, `created=false`,
    /// persisted before the id is handed out.
    pub async fn clone_conversation(&self) -> Result<String, StateError> {
        let mut maps = self.maps.write().await;
        let local_id = loop {
            let candidate = Uuid::new_v4().simple().to_string()[..8].to_string();
            if !maps.conversations.contains_key(&candidate) {
                break candidate;
            }
        };
        let state = ConversationState {
            local_id: local_id.clone(),
            remote_id: String::new(),
            slug: String::new(),
            model_display: String::new(),
            model_internal: String::new(),
            cwd: String::new(),
            created: false,
            local_created_at: Utc::now(),
            remote_created_at: None,
            remote_updated_at: None,
        };
        self.persist(&state)?;
        maps.conversations.insert(local_id.clone(), state);
        Ok(local_id)
    }

    pub async fn get(&self, local_id: &str) -> Option<ConversationState> {
        self.maps.read().await.conversations.get(local_id).cloned()
    }

    pub async fn get_by_remote_id(&self, remote_id: &str) -> Option<String> {
        self.maps.read().await.by_remote.get(remote_id).cloned()
    }

    pub async fn get_by_slug(&self, slug: &str) -> Option<String> {
        self.maps.read().await.by_slug.get(slug).cloned()
    }

    /// Set a pre-creation control key. `model` is resolved by the caller (it
    /// needs the backend model list) and lands through [`Self::set_model`];
    /// everything else recognized is stored verbatim.
    pub async fn set_ctl(&self, local_id: &str, key: &str, value: &str) -> Result<(), StateError> {
        let mut maps = self.maps.write().await;
        let state = maps
            .conversations
            .get_mut(local_id)
            .ok_or_else(|| StateError::NotFound(local_id.to_string()))?;
        if state.created {
            return Err(StateError::ReadOnly(local_id.to_string(), "ctl"));
        }
        match key {
            "cwd" => state.cwd = value.to_string(),
            other => return Err(StateError::UnknownKey(other.to_string())),
        }
        let snapshot = state.clone();
        self.persist(&snapshot)?;
        Ok(())
    }

    pub async fn set_model(
        &self,
        local_id: &str,
        display: &str,
        internal: &str,
    ) -> Result<(), StateError> {
        let mut maps = self.maps.write().await;
        let state = maps
            .conversations
            .get_mut(local_id)
            .ok_or_else(|| StateError::NotFound(local_id.to_string()))?;
        if state.created {
            return Err(StateError::ReadOnly(local_id.to_string(), "model"));
        }
        state.model_display = display.to_string();
        state.model_internal = internal.to_string();
        let snapshot = state.clone();
        self.persist(&snapshot)?;
        Ok(())
    }

    /// Reconcile one remote-listed conversation into the local store.
    ///
    /// Idempotent: a remote id already tracked resolves to its existing
    /// local id; only its slug (if still empty) and remote timestamps are
    /// refreshed. An unknown remote id gets a fresh local id born `created`.
    /// A slug that would collide with another conversation is dropped.
    pub async fn adopt_with_metadata(
        &self,
        remote_id: &str,
        slug: &str,
        remote_created_at: Option<&str>,
        remote_updated_at: Option<&str>,
    ) -> Result<String, StateError> {
        let mut maps = self.maps.write().await;

        if let Some(local_id) = maps.by_remote.get(remote_id).cloned() {
            let slug_taken = !slug.is_empty()
                && maps
                    .by_slug
                    .get(slug)
                    .is_some_and(|owner| *owner != local_id);
            let state = maps
                .conversations
                .get_mut(&local_id)
                .ok_or_else(|| StateError::NotFound(local_id.clone()))?;
            if state.slug.is_empty() && !slug.is_empty() && !slug_taken {
                state.slug = slug.to_string();
            }
            if state.remote_created_at.is_none() {
                state.remote_created_at = remote_created_at.map(String::from);
            }
            if remote_updated_at.is_some() {
                state.remote_updated_at = remote_updated_at.map(String::from);
            }
            let snapshot = state.clone();
            if !snapshot.slug.is_empty() {
                maps.by_slug.insert(snapshot.slug.clone(), local_id.clone());
            }
            self.persist(&snapshot)?;
            return Ok(local_id);
        }

        let local_id = loop {
            let candidate = Uuid::new_v4().simple().to_string()[..8].to_string();
            if !maps.conversations.contains_key(&candidate) {
                break candidate;
            }
        };
        let slug_taken = !slug.is_empty() && maps.by_slug.contains_key(slug);
        let state = ConversationState {
            local_id: local_id.clone(),
            remote_id: remote_id.to_string(),
            slug: if slug_taken { String::new() } else { slug.to_string() },
            model_display: String::new(),
            model_internal: String::new(),
            cwd: String::new(),
            created: true,
            local_created_at: Utc::now(),
            remote_created_at: remote_created_at.map(String::from),
            remote_updated_at: remote_updated_at.map(String::from),
        };
        self.persist(&state)?;
        maps.by_remote.insert(remote_id.to_string(), local_id.clone());
        if !state.slug.is_empty() {
            maps.by_slug.insert(state.slug.clone(), local_id.clone());
        }
        maps.conversations.insert(local_id.clone(), state);
        Ok(local_id)
    }

    /// Commit a local conversation after its first successful send.
    pub async fn mark_created(
        &self,
        local_id: &str,
        remote_id: &str,
        slug: &str,
    ) -> Result<(), StateError> {
        let mut maps = self.maps.write().await;
        let slug_taken = !slug.is_empty()
            && maps
                .by_slug
                .get(slug)
                .is_some_and(|owner| owner != local_id);
        let state = maps
            .conversations
            .get_mut(local_id)
            .ok_or_else(|| StateError::NotFound(local_id.to_string()))?;
        if state.created && state.remote_id != remote_id {
            return Err(StateError::RemoteIdMismatch {
                local_id: local_id.to_string(),
                existing: state.remote_id.clone(),
            });
        }
        state.created = true;
        state.remote_id = remote_id.to_string();
        if !slug.is_empty() && !slug_taken {
            state.slug = slug.to_string();
        }
        let snapshot = state.clone();
        self.persist(&snapshot)?;
        maps.by_remote.insert(remote_id.to_string(), local_id.to_string());
        if !snapshot.slug.is_empty() {
            maps.by_slug.insert(snapshot.slug, local_id.to_string());
        }
        Ok(())
    }

    /// Independent snapshot of every tracked conversation.
    pub async fn list_mappings(&self) -> Vec<ConversationState> {
        self.maps.read().await.conversations.values().cloned().collect()
    }

    pub async fn delete(&self, local_id: &str) -> Result<(), StateError> {
        let mut maps = self.maps.write().await;
        let Some(state) = maps.conversations.remove(local_id) else {
            return Err(StateError::NotFound(local_id.to_string()));
        };
        if !state.remote_id.is_empty() {
            maps.by_remote.remove(&state.remote_id);
        }
        if !state.slug.is_empty() {
            maps.by_slug.remove(&state.slug);
        }
        let path = self.path_for(local_id);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }

    fn path_for(&self, local_id: &str) -> PathBuf {
        self.dir.join(format!("{local_id}.json"))
    }

    // Atomic write via temp file + rename. Called with the map lock held.
    fn persist(&self, state: &ConversationState) -> Result<(), StateError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&state.local_id);
        let content = serde_json::to_string_pretty(state)?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, content)?;
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clone_allocates_unique_hex_ids() {
        let tmp = tempfile::tempdir().unwrap();
        let store = StateStore::new(tmp.path());
        let a = store.clone_conversation().await.unwrap();
        let b = store.clone_conversation().await.unwrap();
        assert_ne!(a, b);
        assert_eq!(a.len(), 8);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));

        let state = store.get(&a).await.unwrap();
        assert!(!state.created);
        assert!(state.remote_id.is_empty());
    }

    #[tokio::test]
    async fn state_survives_reload() {
        let tmp = tempfile::tempdir().unwrap();
        let local_id = {
            let store = StateStore::new(tmp.path());
            let id = store.clone_conversation().await.unwrap();
            store.set_model(&id, "predictable", "model-pred-1").await.unwrap();
            store.set_ctl(&id, "cwd", "/tmp/work").await.unwrap();
            id
        };

        let store = StateStore::new(tmp.path());
        let count = store.load_all().await.unwrap();
        assert_eq!(count, 1);
        let state = store.get(&local_id).await.unwrap();
        assert_eq!(state.model_display, "predictable");
        assert_eq!(state.model_internal, "model-pred-1");
        assert_eq!(state.cwd, "/tmp/work");
    }

    #[tokio::test]
    async fn ctl_rejects_unknown_keys_and_created_state() {
        let tmp = tempfile::tempdir().unwrap();
        let store = StateStore::new(tmp.path());
        let id = store.clone_conversation().await.unwrap();

        assert!(matches!(
            store.set_ctl(&id, "shape", "round").await,
            Err(StateError::UnknownKey(_))
        ));

        store.mark_created(&id, "server-1", "alpha").await.unwrap();
        assert!(matches!(
            store.set_ctl(&id, "cwd", "/elsewhere").await,
            Err(StateError::ReadOnly(_, _))
        ));
        assert!(matches!(
            store.set_model(&id, "x", "y").await,
            Err(StateError::ReadOnly(_, _))
        ));
    }

    #[tokio::test]
    async fn mark_created_is_idempotent_for_same_remote() {
        let tmp = tempfile::tempdir().unwrap();
        let store = StateStore::new(tmp.path());
        let id = store.clone_conversation().await.unwrap();

        store.mark_created(&id, "server-1", "alpha").await.unwrap();
        store.mark_created(&id, "server-1", "alpha").await.unwrap();
        assert!(matches!(
            store.mark_created(&id, "server-2", "").await,
            Err(StateError::RemoteIdMismatch { .. })
        ));

        assert_eq!(store.get_by_remote_id("server-1").await.unwrap(), id);
        assert_eq!(store.get_by_slug("alpha").await.unwrap(), id);
    }

    #[tokio::test]
    async fn adopt_is_idempotent_and_preserves_created_at() {
        let tmp = tempfile::tempdir().unwrap();
        let store = StateStore::new(tmp.path());

        let first = store
            .adopt_with_metadata(
                "server-A",
                "alpha",
                Some("2024-01-15T10:30:00Z"),
                Some("2024-01-16T14:20:00Z"),
            )
            .await
            .unwrap();
        let second = store
            .adopt_with_metadata("server-A", "", None, Some("2024-01-17T09:00:00Z"))
            .await
            .unwrap();
        assert_eq!(first, second);

        let state = store.get(&first).await.unwrap();
        assert!(state.created);
        assert_eq!(state.slug, "alpha");
        assert_eq!(state.remote_created_at.as_deref(), Some("2024-01-15T10:30:00Z"));
        assert_eq!(state.remote_updated_at.as_deref(), Some("2024-01-17T09:00:00Z"));
    }

    #[tokio::test]
    async fn adopt_drops_colliding_slug_but_keeps_remote_id() {
        let tmp = tempfile::tempdir().unwrap();
        let store = StateStore::new(tmp.path());

        let a = store
            .adopt_with_metadata("server-A", "shared", None, None)
            .await
            .unwrap();
        let b = store
            .adopt_with_metadata("server-B", "shared", None, None)
            .await
            .unwrap();
        assert_ne!(a, b);

        let state_b = store.get(&b).await.unwrap();
        assert_eq!(state_b.remote_id, "server-B");
        assert!(state_b.slug.is_empty());
        assert_eq!(store.get_by_slug("shared").await.unwrap(), a);
    }

    #[tokio::test]
    async fn adopt_never_overwrites_existing_slug_with_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = StateStore::new(tmp.path());

        let id = store
            .adopt_with_metadata("server-A", "alpha", None, None)
            .await
            .unwrap();
        store
            .adopt_with_metadata("server-A", "", None, None)
            .await
            .unwrap();
        assert_eq!(store.get(&id).await.unwrap().slug, "alpha");

        // A different non-empty slug does not displace the recorded one either.
        store
            .adopt_with_metadata("server-A", "beta", None, None)
            .await
            .unwrap();
        assert_eq!(store.get(&id).await.unwrap().slug, "alpha");
    }

    #[tokio::test]
    async fn delete_clears_reverse_indexes_and_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let store = StateStore::new(tmp.path());
        let id = store
            .adopt_with_metadata("server-A", "alpha", None, None)
            .await
            .unwrap();

        store.delete(&id).await.unwrap();
        assert!(store.get(&id).await.is_none());
        assert!(store.get_by_remote_id("server-A").await.is_none());
        assert!(store.get_by_slug("alpha").await.is_none());

        let store2 = StateStore::new(tmp.path());
        assert_eq!(store2.load_all().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reverse_indexes_agree_with_forward_map() {
        let tmp = tempfile::tempdir().unwrap();
        let store = StateStore::new(tmp.path());
        for i in 0..10 {
            store
                .adopt_with_metadata(&format!("server-{i}"), &format!("slug-{i}"), None, None)
                .await
                .unwrap();
        }
        for state in store.list_mappings().await {
            assert_eq!(store.get(&state.local_id).await.unwrap().local_id, state.local_id);
            if !state.remote_id.is_empty() {
                assert_eq!(
                    store.get_by_remote_id(&state.remote_id).await.unwrap(),
                    state.local_id
                );
            }
            if !state.slug.is_empty() {
                assert_eq!(store.get_by_slug(&state.slug).await.unwrap(), state.local_id);
            }
        }
    }
}
