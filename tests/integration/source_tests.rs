//! Source resolver integration tests.
//!
//! These tests verify:
//! - mbtiles lookups map XYZ rows onto TMS rows and inflate gzipped tiles
//! - pmtiles archives resolve from local files and over HTTP range reads
//! - HTTP fetches go through the byte cache, while misses do not
//! - concurrent identical requests share one fetch

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

use tilesmith::{ByteCache, MemoryCache, NetworkTimeouts, SourceError, SourceResolver};

use super::test_utils::{build_pmtiles, write_mbtiles, TestServer};

fn local_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

fn resolver_with(cache: Arc<MemoryCache>) -> SourceResolver {
    SourceResolver::builder()
        .cache(cache)
        .http_client(local_client())
        .build()
}

// =============================================================================
// MBTiles
// =============================================================================

#[tokio::test]
async fn test_mbtiles_resolves_xyz_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("world.mbtiles");
    write_mbtiles(
        &path,
        &[
            ((0, 0, 0), b"world"),
            ((1, 0, 0), b"north-west"),
            ((1, 0, 1), b"south-west"),
        ],
    );

    let resolver = SourceResolver::builder().build();
    let base = format!("mbtiles://{}", path.display());

    assert_eq!(
        resolver.resolve(&format!("{base}/0/0/0")).await.unwrap(),
        Some(Bytes::from_static(b"world"))
    );
    assert_eq!(
        resolver.resolve(&format!("{base}/1/0/0")).await.unwrap(),
        Some(Bytes::from_static(b"north-west"))
    );
    assert_eq!(
        resolver.resolve(&format!("{base}/1/0/1")).await.unwrap(),
        Some(Bytes::from_static(b"south-west"))
    );
    assert_eq!(resolver.resolve(&format!("{base}/1/1/1")).await.unwrap(), None);

    // One handle, opened once
    assert_eq!(resolver.archives().open_counts().await, (1, 0));
}

#[tokio::test]
async fn test_mbtiles_missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let resolver = SourceResolver::builder().build();
    let uri = format!("mbtiles://{}/0/0/0", dir.path().join("absent.mbtiles").display());

    assert!(matches!(
        resolver.resolve(&uri).await,
        Err(SourceError::Archive { .. })
    ));
}

#[tokio::test]
async fn test_mbtiles_tiles_are_not_cached() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("local.mbtiles");
    write_mbtiles(&path, &[((0, 0, 0), b"world")]);

    let cache = Arc::new(MemoryCache::new(10, Duration::from_secs(60)));
    let resolver = resolver_with(cache.clone());

    let uri = format!("mbtiles://{}/0/0/0", path.display());
    assert!(resolver.resolve(&uri).await.unwrap().is_some());
    assert!(cache.is_empty().await);
}

// =============================================================================
// PMTiles
// =============================================================================

#[tokio::test]
async fn test_local_pmtiles() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("world.pmtiles");
    std::fs::write(
        &path,
        build_pmtiles(&[((0, 0, 0), b"zero"), ((5, 17, 11), b"deep")]),
    )
    .unwrap();

    let resolver = SourceResolver::builder().build();
    let base = format!("pmtiles://{}", path.display());

    assert_eq!(
        resolver.resolve(&format!("{base}/5/17/11")).await.unwrap(),
        Some(Bytes::from_static(b"deep"))
    );
    assert_eq!(
        resolver.resolve(&format!("{base}/0/0/0")).await.unwrap(),
        Some(Bytes::from_static(b"zero"))
    );
    assert_eq!(resolver.resolve(&format!("{base}/5/17/12")).await.unwrap(), None);
}

#[tokio::test]
async fn test_remote_pmtiles_concurrent_requests() {
    let server = TestServer::start().await;
    server.put(
        "/tiles/world.pmtiles",
        build_pmtiles(&[((0, 0, 0), b"zero"), ((5, 17, 11), b"deep")]),
    );

    let cache = Arc::new(MemoryCache::new(10, Duration::from_secs(60)));
    let resolver = resolver_with(cache.clone());
    let uri = format!("pmtiles://{}/5/17/11", server.url("/tiles/world.pmtiles"));

    let (a, b) = tokio::join!(resolver.resolve(&uri), resolver.resolve(&uri));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a, Some(Bytes::from_static(b"deep")));
    assert_eq!(a, b);

    // The archive was opened once and both callers shared the lookup
    assert_eq!(server.heads("/tiles/world.pmtiles"), 1);
    assert_eq!(server.gets("/tiles/world.pmtiles"), 1);

    // Remote archive tiles are cached under the full URI
    assert_eq!(cache.get(&uri).await, Some(Bytes::from_static(b"deep")));
}

#[tokio::test]
async fn test_remote_pmtiles_reuses_blocks() {
    let server = TestServer::start().await;
    server.put(
        "/world.pmtiles",
        build_pmtiles(&[((0, 0, 0), b"zero"), ((5, 17, 11), b"deep")]),
    );

    let resolver = SourceResolver::builder().http_client(local_client()).build();
    let base = format!("pmtiles://{}", server.url("/world.pmtiles"));

    assert!(resolver.resolve(&format!("{base}/0/0/0")).await.unwrap().is_some());
    assert!(resolver.resolve(&format!("{base}/5/17/11")).await.unwrap().is_some());
    assert_eq!(resolver.resolve(&format!("{base}/3/1/1")).await.unwrap(), None);

    // The whole fixture fits in one block
    assert_eq!(server.gets("/world.pmtiles"), 1);
}

#[tokio::test]
async fn test_remote_pmtiles_missing_archive() {
    let server = TestServer::start().await;
    let resolver = SourceResolver::builder().http_client(local_client()).build();
    let uri = format!("pmtiles://{}/0/0/0", server.url("/missing.pmtiles"));

    // A missing remote archive is a miss, like any other 404
    assert_eq!(resolver.resolve(&uri).await.unwrap(), None);
    // A failed open is not remembered
    assert_eq!(resolver.resolve(&uri).await.unwrap(), None);
    assert_eq!(server.heads("/missing.pmtiles"), 2);
}

#[tokio::test]
async fn test_unreachable_remote_pmtiles_is_a_miss() {
    let resolver = SourceResolver::builder().http_client(local_client()).build();
    let uri = "pmtiles://http://127.0.0.1:1/world.pmtiles/0/0/0";

    assert_eq!(resolver.resolve(uri).await.unwrap(), None);
    assert_eq!(resolver.archives().open_counts().await, (0, 0));
}

#[tokio::test]
async fn test_corrupt_remote_pmtiles_is_an_error() {
    let server = TestServer::start().await;
    server.put("/garbage.pmtiles", Bytes::from(vec![0u8; 512]));
    let resolver = SourceResolver::builder().http_client(local_client()).build();
    let uri = format!("pmtiles://{}/0/0/0", server.url("/garbage.pmtiles"));

    assert!(matches!(
        resolver.resolve(&uri).await,
        Err(SourceError::Archive { .. })
    ));
}

// =============================================================================
// HTTP
// =============================================================================

#[tokio::test]
async fn test_http_fetches_are_cached() {
    let server = TestServer::start().await;
    server.put("/style.json", Bytes::from_static(br#"{"version":8}"#));

    let cache = Arc::new(MemoryCache::new(10, Duration::from_secs(60)));
    let resolver = resolver_with(cache);
    let url = server.url("/style.json");

    for _ in 0..3 {
        assert_eq!(
            resolver.resolve(&url).await.unwrap(),
            Some(Bytes::from_static(br#"{"version":8}"#))
        );
    }
    assert_eq!(server.gets("/style.json"), 1);
}

#[tokio::test]
async fn test_http_not_found_is_not_cached() {
    let server = TestServer::start().await;
    let cache = Arc::new(MemoryCache::new(10, Duration::from_secs(60)));
    let resolver = resolver_with(cache.clone());
    let url = server.url("/sprite.png");

    assert_eq!(resolver.resolve(&url).await.unwrap(), None);
    assert_eq!(resolver.resolve(&url).await.unwrap(), None);
    assert_eq!(server.gets("/sprite.png"), 2);
    assert!(cache.is_empty().await);

    // Once the resource appears it is served
    server.put("/sprite.png", Bytes::from_static(b"png"));
    assert_eq!(
        resolver.resolve(&url).await.unwrap(),
        Some(Bytes::from_static(b"png"))
    );
}

#[tokio::test]
async fn test_http_concurrent_requests_share_one_fetch() {
    let server = TestServer::start().await;
    server.put("/tiles/1/0/0.pbf", Bytes::from_static(b"tile"));

    let resolver = SourceResolver::builder().http_client(local_client()).build();
    let url = server.url("/tiles/1/0/0.pbf");

    let (a, b, c) = tokio::join!(
        resolver.resolve(&url),
        resolver.resolve(&url),
        resolver.resolve(&url)
    );
    for result in [a, b, c] {
        assert_eq!(result.unwrap(), Some(Bytes::from_static(b"tile")));
    }
    assert_eq!(server.gets("/tiles/1/0/0.pbf"), 1);

    // Without a cache, a later request fetches again
    resolver.resolve(&url).await.unwrap();
    assert_eq!(server.gets("/tiles/1/0/0.pbf"), 2);
}

#[tokio::test]
async fn test_stalled_server_times_out_as_miss() {
    // Accepts connections and never answers
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let timeouts = NetworkTimeouts {
        connect: Duration::from_millis(500),
        request: Duration::from_millis(200),
    };
    let client = timeouts.http_client_builder().no_proxy().build().unwrap();
    let resolver = SourceResolver::builder().http_client(client).build();

    let url = format!("http://{}/style.json", addr);
    let result = tokio::time::timeout(Duration::from_secs(5), resolver.resolve(&url))
        .await
        .expect("request timeout should fire first");
    assert_eq!(result.unwrap(), None);

    let archive = format!("pmtiles://http://{}/world.pmtiles/0/0/0", addr);
    let result = tokio::time::timeout(Duration::from_secs(5), resolver.resolve(&archive))
        .await
        .expect("request timeout should fire first");
    assert_eq!(result.unwrap(), None);
}

// =============================================================================
// URI Errors
// =============================================================================

#[tokio::test]
async fn test_malformed_uris() {
    let resolver = SourceResolver::builder().build();

    assert!(matches!(
        resolver.resolve("ftp://example.com/a").await,
        Err(SourceError::UnsupportedScheme { .. })
    ));
    assert!(matches!(
        resolver.resolve("mbtiles:///data/world.mbtiles/0/0").await,
        Err(SourceError::InvalidUri { .. })
    ));
    assert!(matches!(
        resolver.resolve("pmtiles:///data/world.pmtiles/2/4/0").await,
        Err(SourceError::InvalidUri { .. })
    ));
}
