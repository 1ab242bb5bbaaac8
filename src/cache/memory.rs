use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use tokio::sync::Mutex;
use tracing::debug;

use super::ByteCache;

struct Entry {
    value: Bytes,
    expires_at: Instant,
}

/// In-process LRU cache bounded by item count, with a fixed TTL.
///
/// Expired entries are dropped lazily when read. `get` promotes the entry,
/// so the bound evicts the least recently *used* key, not the oldest.
pub struct MemoryCache {
    entries: Mutex<LruCache<String, Entry>>,
    ttl: Duration,
}

impl MemoryCache {
    /// Create a cache holding at most `max_items` entries for `ttl` each.
    pub fn new(max_items: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(max_items).unwrap_or(NonZeroUsize::MIN),
            )),
            ttl,
        }
    }

    /// Number of entries currently held, expired ones included.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl ByteCache for MemoryCache {
    async fn get(&self, key: &str) -> Option<Bytes> {
        let mut entries = self.entries.lock().await;

        let expired = match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };

        if expired {
            entries.pop(key);
            debug!(key, "Memory cache entry expired");
        }
        None
    }

    async fn set(&self, key: &str, value: Bytes) {
        let entry = Entry {
            value,
            expires_at: Instant::now() + self.ttl,
        };
        self.entries.lock().await.put(key.to_string(), entry);
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
