use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use super::parse::{ParsedConversation, parse_conversation};

struct CachedParse {
    checksum: [u8; 32],
    parsed: Arc<ParsedConversation>,
}

struct Slot {
    parse: Mutex<Option<CachedParse>>,
    last_used: AtomicU64,
}

#[derive(Default)]
struct Slots {
    entries: HashMap<String, Arc<Slot>>,
    tick: u64,
}

/// Content-addressed cache of parsed conversations, keyed by remote id.
///
/// A cached parse is reused only while the checksum of the raw bytes
/// matches. Each key has its own parse mutex, so at most one parse per
/// conversation is in flight; concurrent readers of the same key wait on it
/// rather than parsing twice. Eviction is least-recently-used over keys once
/// `capacity` is exceeded.
pub struct ParsedCache {
    slots: Mutex<Slots>,
    capacity: usize,
}

impl ParsedCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(Slots::default()),
            capacity: capacity.max(1),
        }
    }

    pub async fn get_or_parse(
        &self,
        remote_id: &str,
        bytes: &[u8],
    ) -> serde_json::Result<Arc<ParsedConversation>> {
        let slot = {
            let mut slots = self.slots.lock().await;
            slots.tick += 1;
            let tick = slots.tick;
            let slot = slots
                .entries
                .entry(remote_id.to_string())
                .or_insert_with(|| {
                    Arc::new(Slot {
                        parse: Mutex::new(None),
                        last_used: AtomicU64::new(0),
                    })
                })
                .clone();
            slot.last_used.store(tick, Ordering::Relaxed);
            if slots.entries.len() > self.capacity {
                Self::evict_oldest(&mut slots, remote_id);
            }
            slot
        };

        let mut parse = slot.parse.lock().await;
        let checksum: [u8; 32] = Sha256::digest(bytes).into();
        if let Some(cached) = parse.as_ref()
            && cached.checksum == checksum
        {
            return Ok(cached.parsed.clone());
        }

        let parsed = Arc::new(parse_conversation(bytes)?);
        *parse = Some(CachedParse {
            checksum,
            parsed: parsed.clone(),
        });
        Ok(parsed)
    }

    /// Drop the cached parse for one conversation (after a send mutates it).
    pub async fn invalidate(&self, remote_id: &str) {
        self.slots.lock().await.entries.remove(remote_id);
    }

    // Waiters holding the evicted slot's Arc finish their parse unharmed;
    // the slot is simply no longer findable.
    fn evict_oldest(slots: &mut Slots, keep: &str) {
        let oldest = slots
            .entries
            .iter()
            .filter(|(key, _)| key.as_str() != keep)
            .min_by_key(|(_, slot)| slot.last_used.load(Ordering::Relaxed))
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            slots.entries.remove(&key);
        }
    }
}
