use std::collections::HashMap;
use std::sync::Mutex;

use crate::msg::slug::stable_inode;

/// Which of a message's two JSON payload fields a data node belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataField {
    LlmData,
    UsageData,
}

impl DataField {
    pub fn name(self) -> &'static str {
        match self {
            DataField::LlmData => "llm_data",
            DataField::UsageData => "usage_data",
        }
    }
}

/// Scalar conversation metadata exposed as files once the conversation is
/// created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConvField {
    Id,
    Slug,
    CreatedAt,
    UpdatedAt,
}

impl ConvField {
    pub fn name(self) -> &'static str {
        match self {
            ConvField::Id => "id",
            ConvField::Slug => "slug",
            ConvField::CreatedAt => "created_at",
            ConvField::UpdatedAt => "updated_at",
        }
    }

    pub const ALL: [ConvField; 4] = [
        ConvField::Id,
        ConvField::Slug,
        ConvField::CreatedAt,
        ConvField::UpdatedAt,
    ];
}

/// Every node the filesystem can hand to the kernel. The enum is the whole
/// catalog; dispatch happens by matching on it at each VFS entry point.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Node {
    Root,
    Readme,
    /// `/new` → `model/default/new`.
    NewLink,
    ModelList,
    /// `/model/default` → the backend-designated default model.
    DefaultModelLink,
    ModelDir { model: String },
    ModelId { model: String },
    ModelReady { model: String },
    ModelNew { model: String },
    CloneFile { model: String },
    StartFile { model: String },
    ConversationList,
    /// Remote-id or slug alias under `conversation/`, pointing at a local id.
    AliasLink { name: String, local_id: String },
    ConversationDir { local_id: String },
    Ctl { local_id: String },
    Send { local_id: String },
    FuseId { local_id: String },
    CreatedFlag { local_id: String },
    ArchivedFlag { local_id: String },
    ModelLink { local_id: String },
    CwdLink { local_id: String },
    WaitingLink { local_id: String },
    ConvMeta { local_id: String, field: ConvField },
    MessagesDir { local_id: String },
    AllJson { local_id: String },
    AllMd { local_id: String },
    CountFile { local_id: String },
    LastRoot { local_id: String },
    LastDir { local_id: String, n: u64 },
    /// `last/{n}/{k}` → `../../{index}-{slug}`.
    LastEntry { local_id: String, n: u64, k: u64 },
    SinceRoot { local_id: String },
    SinceSpeaker { local_id: String, speaker: String },
    SinceDir { local_id: String, speaker: String, k: u64 },
    /// `since/{speaker}/{k}/{name}` → `../../../{name}`.
    SinceEntry { local_id: String, speaker: String, k: u64, seq: u64 },
    /// One message directory; `conv` is the remote conversation id (stable
    /// inode hashing is keyed on it).
    MsgDir { local_id: String, conv: String, seq: u64 },
    /// Scalar field file of a message (`message_id`, `type`, `content.md`, …),
    /// including an undecodable `llm_data`/`usage_data` served raw.
    MsgField { local_id: String, conv: String, seq: u64, field: String },
    /// Directory node inside a decoded `llm_data`/`usage_data` JSON tree.
    MsgDataDir { local_id: String, conv: String, seq: u64, field: DataField, path: Vec<String> },
    /// Leaf scalar inside a decoded `llm_data`/`usage_data` JSON tree.
    MsgDataFile { local_id: String, conv: String, seq: u64, field: DataField, path: Vec<String> },
}

impl Node {
    /// Stable, content-derived inode number for message nodes; `None` for
    /// everything dynamically allocated.
    pub fn stable_ino(&self) -> Option<u64> {
        match self {
            Node::Root => Some(fuser::FUSE_ROOT_ID),
            Node::MsgDir { conv, seq, .. } => {
                Some(stable_inode(&["msg-dir", conv, &seq.to_string()]))
            }
            Node::MsgField { conv, seq, field, .. } => {
                Some(stable_inode(&["msg-field", conv, &seq.to_string(), field]))
            }
            Node::MsgDataDir { conv, seq, field, path, .. }
            | Node::MsgDataFile { conv, seq, field, path, .. } => {
                let joined = format!("{}/{}", field.name(), path.join("/"));
                Some(stable_inode(&["msg-field", conv, &seq.to_string(), &joined]))
            }
            _ => None,
        }
    }
}

struct RegistryInner {
    by_ino: HashMap<u64, Node>,
    by_node: HashMap<Node, u64>,
    next_dynamic: u64,
}

/// Bidirectional inode table. The kernel only ever operates on inode numbers
/// it has previously been handed via lookup/readdir, so registering at those
/// two points keeps every reachable ino resolvable.
pub struct Registry {
    inner: Mutex<RegistryInner>,
}

impl Registry {
    pub fn new() -> Self {
        let mut by_ino = HashMap::new();
        let mut by_node = HashMap::new();
        by_ino.insert(fuser::FUSE_ROOT_ID, Node::Root);
        by_node.insert(Node::Root, fuser::FUSE_ROOT_ID);
        Self {
            inner: Mutex::new(RegistryInner {
                by_ino,
                by_node,
                // Dynamic inos live far below the sha-derived space in
                // practice; collisions are still checked on insert.
                next_dynamic: 2,
            }),
        }
    }

    /// Resolve or assign the inode number for a node.
    pub fn register(&self, node: &Node) -> u64 {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(ino) = inner.by_node.get(node) {
            return *ino;
        }
        let mut ino = node.stable_ino().unwrap_or(0);
        if ino == 0 || inner.by_ino.contains_key(&ino) {
            loop {
                ino = inner.next_dynamic;
                inner.next_dynamic += 1;
                if !inner.by_ino.contains_key(&ino) {
                    break;
                }
            }
        }
        inner.by_ino.insert(ino, node.clone());
        inner.by_node.insert(node.clone(), ino);
        ino
    }

    pub fn resolve(&self, ino: u64) -> Option<Node> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .by_ino
            .get(&ino)
            .cloned()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_fuse_root_id() {
        let reg = Registry::new();
        assert_eq!(reg.resolve(fuser::FUSE_ROOT_ID), Some(Node::Root));
        assert_eq!(reg.register(&Node::Root), fuser::FUSE_ROOT_ID);
    }

    #[test]
    fn registration_is_idempotent() {
        let reg = Registry::new();
        let node = Node::ConversationDir { local_id: "ab12cd34".into() };
        let a = reg.register(&node);
        let b = reg.register(&node);
        assert_eq!(a, b);
        assert_eq!(reg.resolve(a), Some(node));
    }

    #[test]
    fn message_nodes_get_stable_hashed_inos() {
        let reg = Registry::new();
        let node = Node::MsgDir { local_id: "ab12cd34".into(), conv: "server-A".into(), seq: 4 };
        let ino = reg.register(&node);
        assert_eq!(Some(ino), node.stable_ino());

        // A second registry derives the same number.
        let reg2 = Registry::new();
        assert_eq!(reg2.register(&node), ino);
    }

    #[test]
    fn distinct_nodes_get_distinct_inos() {
        let reg = Registry::new();
        let a = reg.register(&Node::ConversationList);
        let b = reg.register(&Node::ModelList);
        assert_ne!(a, b);
        assert_ne!(a, fuser::FUSE_ROOT_ID);
    }

    #[test]
    fn data_tree_path_feeds_the_hash() {
        let file = Node::MsgDataFile {
            local_id: "ab12cd34".into(),
            conv: "server-A".into(),
            seq: 2,
            field: DataField::LlmData,
            path: vec!["EndOfTurn".into()],
        };
        let dir = Node::MsgDataDir {
            local_id: "ab12cd34".into(),
            conv: "server-A".into(),
            seq: 2,
            field: DataField::LlmData,
            path: vec![],
        };
        assert_ne!(file.stable_ino(), dir.stable_ino());
    }
}
