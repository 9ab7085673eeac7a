use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Per-open state of a `send` file. Writes append under the handle lock;
/// `flushed` makes the network commit at-most-once per handle.
#[derive(Default)]
pub struct SendBuffer {
    pub buf: Vec<u8>,
    pub flushed: bool,
}

/// State attached to one open file handle.
pub enum Handle {
    /// Content fixed at open so a read sequence sees one consistent view.
    Snapshot(Vec<u8>),
    /// The commit-on-flush path holds this lock across the network call, so
    /// it is an async mutex.
    Send(tokio::sync::Mutex<SendBuffer>),
}

pub struct HandleTable {
    handles: Mutex<HashMap<u64, Arc<Handle>>>,
    next_fh: AtomicU64,
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            handles: Mutex::new(HashMap::new()),
            next_fh: AtomicU64::new(1),
        }
    }

    pub fn insert(&self, handle: Handle) -> u64 {
        let fh = self.next_fh.fetch_add(1, Ordering::Relaxed);
        self.handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(fh, Arc::new(handle));
        fh
    }

    pub fn get(&self, fh: u64) -> Option<Arc<Handle>> {
        self.handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&fh)
            .cloned()
    }

    pub fn remove(&self, fh: u64) -> Option<Arc<Handle>> {
        self.handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&fh)
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_unique_and_removable() {
        let table = HandleTable::new();
        let a = table.insert(Handle::Snapshot(b"one".to_vec()));
        let b = table.insert(Handle::Snapshot(b"two".to_vec()));
        assert_ne!(a, b);

        match table.get(a).as_deref() {
            Some(Handle::Snapshot(content)) => assert_eq!(content, b"one"),
            _ => panic!("expected snapshot handle"),
        }

        table.remove(a);
        assert!(table.get(a).is_none());
        assert!(table.get(b).is_some());
    }
}
