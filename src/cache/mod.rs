//! Pluggable byte caches for network-origin fetches.
//!
//! A [`ByteCache`] stores opaque blobs by string key. Every backend follows
//! the same contract:
//!
//! - `get` returns `None` on a miss, an expired entry, or any backend failure
//! - `set` is best-effort: a failed write is logged and forgotten
//! - an empty blob is a value, distinct from a miss
//!
//! # Backends
//!
//! | Backend | Eviction | On failure |
//! |---|---|---|
//! | [`NoneCache`] | always miss | never fails |
//! | [`MemoryCache`] | LRU item bound + TTL | never fails |
//! | [`FileCache`] | TTL by file mtime | miss, entry deleted |
//! | [`ObjectStoreCache`] | bucket lifecycle rule | miss, write dropped |

mod file;
mod memory;
mod object;

pub use file::FileCache;
pub use memory::MemoryCache;
pub use object::{ObjectProvider, ObjectStoreCache};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::info;

use crate::config::{CacheBackend, CacheConfig, StorageConfig};
use crate::error::CacheError;
use crate::io::{create_gcs_client, create_s3_client};

/// Key/value store for opaque byte blobs.
#[async_trait]
pub trait ByteCache: Send + Sync {
    /// Look up `key`. Misses, expiry and backend errors all read as `None`.
    async fn get(&self, key: &str) -> Option<Bytes>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: Bytes);

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}

/// Shared handle to a cache backend.
pub type SharedCache = Arc<dyn ByteCache>;

/// A cache that stores nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoneCache;

#[async_trait]
impl ByteCache for NoneCache {
    async fn get(&self, _key: &str) -> Option<Bytes> {
        None
    }

    async fn set(&self, _key: &str, _value: Bytes) {}

    fn name(&self) -> &'static str {
        "none"
    }
}

/// Turn a URI into a name safe for file systems and object keys.
///
/// `/` becomes `_`; every other reserved character becomes `-`. The mapping
/// is total and deterministic but not injective: `a/b` and `a_b` share a
/// name. Such collisions are rare among real URIs and accepted.
pub fn escape_key(key: &str) -> String {
    key.chars()
        .map(|c| match c {
            '/' => '_',
            '?' | '&' | '=' | '%' | '#' | ':' | '+' | ' ' | '<' | '>' | '*' | '|' | '"' | '\''
            | '.' | ',' | ';' | '\\' => '-',
            other => other,
        })
        .collect()
}

/// Build the cache selected by `config`.
///
/// Only setup can fail: a missing bucket, an unusable directory, or an
/// unreadable GCS HMAC key file.
pub async fn build_cache(
    config: &CacheConfig,
    storage: &StorageConfig,
) -> Result<SharedCache, CacheError> {
    let ttl = Duration::from_secs(config.ttl_secs);

    let cache: SharedCache = match config.backend {
        CacheBackend::None => Arc::new(NoneCache),
        CacheBackend::Memory => Arc::new(MemoryCache::new(config.memory_max_items, ttl)),
        CacheBackend::File => Arc::new(FileCache::open(&config.file_dir, ttl).await?),
        CacheBackend::S3 => {
            let bucket = required_bucket(config.s3_bucket.as_deref(), "s3")?;
            let client = create_s3_client(
                storage.s3_endpoint.as_deref(),
                &storage.s3_region,
                storage.s3_force_path_style,
                storage.timeouts(),
            )
            .await;
            Arc::new(ObjectStoreCache::new(
                client,
                ObjectProvider::S3,
                bucket,
                config.prefix.as_deref(),
            ))
        }
        CacheBackend::Gcs => {
            let bucket = required_bucket(config.gcs_bucket.as_deref(), "gcs")?;
            let client = create_gcs_client(
                &storage.gcs_endpoint,
                storage.gcs_hmac_key_filename.as_deref(),
                storage.timeouts(),
            )
            .await
            .map_err(|e| CacheError::Setup {
                backend: "gcs",
                message: e.to_string(),
            })?;
            Arc::new(ObjectStoreCache::new(
                client,
                ObjectProvider::Gcs,
                bucket,
                config.prefix.as_deref(),
            ))
        }
    };

    info!(backend = cache.name(), ttl_secs = config.ttl_secs, "Byte cache ready");
    Ok(cache)
}

fn required_bucket(bucket: Option<&str>, backend: &'static str) -> Result<String, CacheError> {
    match bucket {
        Some(b) if !b.is_empty() => Ok(b.to_string()),
        _ => Err(CacheError::Setup {
            backend,
            message: "no bucket configured".to_string(),
        }),
    }
}
