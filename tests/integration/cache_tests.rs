//! Byte cache integration tests.
//!
//! These tests verify:
//! - backend selection through `build_cache`
//! - the shared get/set contract across the memory and file backends
//! - TTL expiry and LRU bounds
//! - setup failures for misconfigured backends

use bytes::Bytes;
use std::time::Duration;

use tilesmith::{
    build_cache, ByteCache, CacheBackend, CacheConfig, CacheError, FileCache, MemoryCache,
    SharedCache, StorageConfig,
};

async fn cache_for(backend: CacheBackend, dir: &std::path::Path, ttl_secs: u64) -> SharedCache {
    let config = CacheConfig {
        backend,
        ttl_secs,
        file_dir: dir.to_path_buf(),
        ..CacheConfig::default()
    };
    build_cache(&config, &StorageConfig::default()).await.unwrap()
}

// =============================================================================
// Backend Selection
// =============================================================================

#[tokio::test]
async fn test_build_cache_selects_backend() {
    let dir = tempfile::tempdir().unwrap();

    for (backend, name) in [
        (CacheBackend::None, "none"),
        (CacheBackend::Memory, "memory"),
        (CacheBackend::File, "file"),
    ] {
        let cache = cache_for(backend, dir.path(), 60).await;
        assert_eq!(cache.name(), name);
    }
}

#[tokio::test]
async fn test_object_backends_require_bucket() {
    for backend in [CacheBackend::S3, CacheBackend::Gcs] {
        let config = CacheConfig {
            backend,
            ..CacheConfig::default()
        };
        let result = build_cache(&config, &StorageConfig::default()).await;
        assert!(
            matches!(result, Err(CacheError::Setup { .. })),
            "{} without a bucket should fail setup",
            backend.as_str()
        );
    }
}

#[tokio::test]
async fn test_none_cache_never_stores() {
    let dir = tempfile::tempdir().unwrap();
    let cache = cache_for(CacheBackend::None, dir.path(), 60).await;

    cache.set("https://a.com/style.json", Bytes::from_static(b"{}")).await;
    assert!(cache.get("https://a.com/style.json").await.is_none());
}

// =============================================================================
// Shared Contract
// =============================================================================

async fn check_contract(cache: &dyn ByteCache) {
    let key = "https://tiles.example.com/v1/5/17/11.pbf?key=abc";

    assert!(cache.get(key).await.is_none(), "{}: fresh cache hit", cache.name());

    cache.set(key, Bytes::from_static(b"first")).await;
    assert_eq!(cache.get(key).await, Some(Bytes::from_static(b"first")));

    cache.set(key, Bytes::from_static(b"second")).await;
    assert_eq!(cache.get(key).await, Some(Bytes::from_static(b"second")));

    // An empty blob is a value, not a miss
    cache.set("empty", Bytes::new()).await;
    assert_eq!(cache.get("empty").await, Some(Bytes::new()));

    assert!(cache.get("https://tiles.example.com/v1/5/17/12.pbf").await.is_none());
}

#[tokio::test]
async fn test_memory_cache_contract() {
    let dir = tempfile::tempdir().unwrap();
    let cache = cache_for(CacheBackend::Memory, dir.path(), 60).await;
    check_contract(cache.as_ref()).await;
}

#[tokio::test]
async fn test_file_cache_contract() {
    let dir = tempfile::tempdir().unwrap();
    let cache = cache_for(CacheBackend::File, dir.path(), 60).await;
    check_contract(cache.as_ref()).await;
}

#[tokio::test]
async fn test_file_cache_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let key = "s3://bucket/styles/dark.json";

    {
        let cache = FileCache::open(dir.path(), Duration::from_secs(60)).await.unwrap();
        cache.set(key, Bytes::from_static(b"persisted")).await;
    }

    let reopened = FileCache::open(dir.path(), Duration::from_secs(60)).await.unwrap();
    assert_eq!(reopened.get(key).await, Some(Bytes::from_static(b"persisted")));
}

#[tokio::test]
async fn test_file_cache_long_keys() {
    let dir = tempfile::tempdir().unwrap();
    let cache = FileCache::open(dir.path(), Duration::from_secs(60)).await.unwrap();

    let long_a = format!("https://a.com/{}", "a".repeat(400));
    let long_b = format!("https://a.com/{}b", "a".repeat(399));

    cache.set(&long_a, Bytes::from_static(b"A")).await;
    cache.set(&long_b, Bytes::from_static(b"B")).await;

    assert_eq!(cache.get(&long_a).await, Some(Bytes::from_static(b"A")));
    assert_eq!(cache.get(&long_b).await, Some(Bytes::from_static(b"B")));
    assert_ne!(cache.path_for(&long_a), cache.path_for(&long_b));
}

// =============================================================================
// Expiry and Bounds
// =============================================================================

#[tokio::test]
async fn test_memory_cache_ttl_expiry() {
    let cache = MemoryCache::new(10, Duration::from_secs(1));
    cache.set("k", Bytes::from_static(b"v")).await;
    assert!(cache.get("k").await.is_some());

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(cache.get("k").await.is_none());
}

#[tokio::test]
async fn test_file_cache_ttl_expiry() {
    let dir = tempfile::tempdir().unwrap();
    let cache = FileCache::open(dir.path(), Duration::from_secs(1)).await.unwrap();
    cache.set("k", Bytes::from_static(b"v")).await;
    assert!(cache.get("k").await.is_some());

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(cache.get("k").await.is_none());
    assert!(!cache.path_for("k").exists(), "expired entry should be removed");
}

#[tokio::test]
async fn test_memory_cache_lru_bound() {
    let cache = MemoryCache::new(2, Duration::from_secs(60));

    cache.set("a", Bytes::from_static(b"1")).await;
    cache.set("b", Bytes::from_static(b"2")).await;
    // Touch "a" so "b" is the least recently used
    assert!(cache.get("a").await.is_some());
    cache.set("c", Bytes::from_static(b"3")).await;

    assert_eq!(cache.len().await, 2);
    assert!(cache.get("a").await.is_some());
    assert!(cache.get("b").await.is_none());
    assert!(cache.get("c").await.is_some());
}
