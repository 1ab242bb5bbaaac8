//! Render pipeline integration tests.
//!
//! These tests drive `RenderService` end to end against the mock engine:
//! - style loading from files, HTTP and inline documents
//! - pool sharing by style fingerprint
//! - instance release on engine failure
//! - asset requests resolved through the resolver, with placeholders
//! - tile, bbox and camera geometry reaching the engine
//! - output encoding

use bytes::Bytes;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use tilesmith::render::{PoolKey, MAX_SCALE};
use tilesmith::{
    ByteCache, Camera, FingerprintAlgorithm, GeometryError, MemoryCache, OutputFormat, PoolConfig,
    PoolError, RenderError, RenderMode, RenderRequest, RenderService, SourceResolver,
    StyleFingerprint, StyleRef,
};

use super::test_utils::{style_with, EngineLog, MockFactory, TestServer};

struct Harness {
    service: RenderService,
    engine: Arc<EngineLog>,
    cache: Arc<MemoryCache>,
}

fn harness(pool: PoolConfig) -> Harness {
    let cache = Arc::new(MemoryCache::new(100, Duration::from_secs(60)));
    let resolver = Arc::new(
        SourceResolver::builder()
            .cache(cache.clone())
            .http_client(reqwest::Client::builder().no_proxy().build().unwrap())
            .build(),
    );
    let factory = MockFactory::new();
    let engine = factory.log.clone();

    let service = RenderService::builder(resolver, Arc::new(factory))
        .pool_config(pool)
        .build();

    Harness {
        service,
        engine,
        cache,
    }
}

fn write_style(dir: &std::path::Path, name: &str, style: &Value) -> String {
    let path = dir.join(name);
    std::fs::write(&path, serde_json::to_vec(style).unwrap()).unwrap();
    format!("file://{}", path.display())
}

fn decode(bytes: &Bytes) -> image::RgbaImage {
    image::load_from_memory(bytes).unwrap().to_rgba8()
}

// =============================================================================
// End-to-End Tile Rendering
// =============================================================================

#[tokio::test]
async fn test_file_style_tile_to_png() {
    let dir = tempfile::tempdir().unwrap();
    let uri = write_style(dir.path(), "style.json", &style_with(json!({})));
    let h = harness(PoolConfig::default());

    let request = RenderRequest::tile(StyleRef::uri(&uri), 0, 0, 0, 512);
    let png = h.service.render_encoded(&request).await.unwrap();

    assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
    let image = decode(&png);
    assert_eq!(image.dimensions(), (512, 512));
    assert_eq!(image.get_pixel(100, 100).0, [255, 0, 0, 255]);

    let params = h.engine.last_params().unwrap();
    assert_eq!(params.zoom, 0.0);
    assert_eq!((params.width, params.height), (512, 512));

    let options = h.engine.options.lock().unwrap()[0];
    assert_eq!(options.mode, RenderMode::Tile);
    assert_eq!(options.pixel_ratio, 1);

    // Local styles never reach the byte cache
    assert!(h.cache.is_empty().await);
}

#[tokio::test]
async fn test_world_tile_at_256_is_downsampled() {
    let h = harness(PoolConfig::default());
    let style = StyleRef::inline(style_with(json!({"test:color": [0, 0, 255, 255]})));

    let image = h
        .service
        .render(&RenderRequest::tile(style, 0, 0, 0, 256))
        .await
        .unwrap();

    assert_eq!((image.width, image.height), (256, 256));
    let params = h.engine.last_params().unwrap();
    assert_eq!((params.width, params.height), (512, 512));
    assert_eq!(params.zoom, 0.0);
}

#[tokio::test]
async fn test_tile_zoom_and_retina_scale() {
    let h = harness(PoolConfig::default());
    let style = StyleRef::inline(style_with(json!({})));

    let image = h
        .service
        .render(&RenderRequest::tile(style, 5, 17, 11, 512).with_scale(2))
        .await
        .unwrap();

    assert_eq!((image.width, image.height), (512, 512));
    let params = h.engine.last_params().unwrap();
    // 5 - 1 + log2(512 / 256) - log2(2)
    assert_eq!(params.zoom, 4.0);
    assert_eq!((params.width, params.height), (256, 256));

    let options = h.engine.options.lock().unwrap()[0];
    assert_eq!(options.pixel_ratio, 2);
}

#[tokio::test]
async fn test_margin_tile_uses_static_mode_and_crops() {
    let h = harness(PoolConfig::default());
    let style = StyleRef::inline(style_with(json!({})));

    let image = h
        .service
        .render(&RenderRequest::tile(style, 3, 2, 4, 256).with_margin(32))
        .await
        .unwrap();

    assert_eq!((image.width, image.height), (256, 256));
    let params = h.engine.last_params().unwrap();
    assert_eq!((params.width, params.height), (288, 288));
    assert_eq!(h.engine.options.lock().unwrap()[0].mode, RenderMode::Static);
}

// =============================================================================
// Style Loading
// =============================================================================

#[tokio::test]
async fn test_http_style_is_fetched_once() {
    let server = TestServer::start().await;
    server.put(
        "/styles/basic.json",
        serde_json::to_vec(&style_with(json!({}))).unwrap(),
    );
    let h = harness(PoolConfig::default());
    let style = StyleRef::uri(server.url("/styles/basic.json"));

    for (z, x, y) in [(1, 0, 0), (1, 1, 0), (2, 3, 3)] {
        h.service
            .render(&RenderRequest::tile(style.clone(), z, x, y, 256))
            .await
            .unwrap();
    }

    assert_eq!(server.gets("/styles/basic.json"), 1);
    assert_eq!(h.service.styles().memoized().await, 1);
    assert_eq!(h.engine.created(), 1);
    assert_eq!(h.engine.renders(), 3);
}

#[tokio::test]
async fn test_style_errors() {
    let dir = tempfile::tempdir().unwrap();
    let server = TestServer::start().await;
    let h = harness(PoolConfig::default());

    let missing = RenderRequest::tile(StyleRef::uri(server.url("/nope.json")), 0, 0, 0, 256);
    let err = h.service.render(&missing).await.unwrap_err();
    assert!(matches!(err, RenderError::StyleFetch { .. }));
    assert!(err.is_style_error());

    std::fs::write(dir.path().join("broken.json"), b"{ not json").unwrap();
    let broken = RenderRequest::tile(
        StyleRef::uri(format!("file://{}", dir.path().join("broken.json").display())),
        0,
        0,
        0,
        256,
    );
    assert!(matches!(
        h.service.render(&broken).await,
        Err(RenderError::StyleParse { .. })
    ));

    let invalid = RenderRequest::tile(StyleRef::inline(json!({"version": 8})), 0, 0, 0, 256);
    assert!(matches!(
        h.service.render(&invalid).await,
        Err(RenderError::StyleInvalid { .. })
    ));

    // Nothing was handed to the engine
    assert_eq!(h.engine.created(), 0);
}

#[tokio::test]
async fn test_engine_rejected_style_is_not_pooled() {
    let h = harness(PoolConfig::default());
    let style = StyleRef::inline(style_with(json!({"test:reject": true})));
    let request = RenderRequest::tile(style, 0, 0, 0, 256);

    assert!(matches!(
        h.service.render(&request).await,
        Err(RenderError::Pool(PoolError::StyleLoad(_)))
    ));
    assert!(h.service.pools().is_empty().await);
}

// =============================================================================
// Pools
// =============================================================================

#[tokio::test]
async fn test_key_order_does_not_split_pools() {
    let h = harness(PoolConfig::default());

    let a: Value = serde_json::from_str(
        r#"{"version":8,"sources":{},"layers":[{"id":"bg","type":"background"}]}"#,
    )
    .unwrap();
    let b: Value = serde_json::from_str(
        r#"{"layers":[{"type":"background","id":"bg"}],"sources":{},"version":8}"#,
    )
    .unwrap();

    for style in [a, b] {
        h.service
            .render(&RenderRequest::tile(StyleRef::inline(style), 0, 0, 0, 512))
            .await
            .unwrap();
    }

    assert_eq!(h.service.pools().len().await, 1);
    assert_eq!(h.engine.created(), 1);
}

#[tokio::test]
async fn test_tile_and_static_requests_use_separate_pools() {
    let h = harness(PoolConfig::default());
    let style = StyleRef::inline(style_with(json!({})));

    h.service
        .render(&RenderRequest::tile(style.clone(), 0, 0, 0, 512))
        .await
        .unwrap();
    h.service
        .render(&RenderRequest::bbox(style, [-10.0, -10.0, 10.0, 10.0], 300))
        .await
        .unwrap();

    assert_eq!(h.service.pools().len().await, 2);
}

#[tokio::test]
async fn test_failed_render_releases_instance() {
    let h = harness(PoolConfig {
        pool_max_instances: 1,
        pool_acquire_timeout_ms: 200,
        ..PoolConfig::default()
    });
    let document = style_with(json!({"test:fail": true}));
    let request = RenderRequest::tile(StyleRef::inline(document.clone()), 0, 0, 0, 512);

    for _ in 0..3 {
        // Exhausted would mean the first failure leaked the only instance
        assert!(matches!(
            h.service.render(&request).await,
            Err(RenderError::Renderer(_))
        ));
    }
    assert_eq!(h.engine.created(), 1);

    let key = PoolKey {
        fingerprint: StyleFingerprint::compute(&document, FingerprintAlgorithm::Sha256),
        mode: RenderMode::Tile,
        pixel_ratio: 1,
    };
    let pool = h.service.pools().get_pool(&key, &Arc::new(document)).await.unwrap();
    assert_eq!(pool.idle_instances(), 1);
    assert_eq!(pool.live_instances(), 1);
}

#[tokio::test]
async fn test_evicted_pool_destroys_instances() {
    let h = harness(PoolConfig {
        pool_max_styles: 1,
        ..PoolConfig::default()
    });

    for color in [[255, 0, 0, 255], [0, 0, 255, 255]] {
        let style = StyleRef::inline(style_with(json!({"test:color": color})));
        h.service
            .render(&RenderRequest::tile(style, 0, 0, 0, 512))
            .await
            .unwrap();
    }

    assert_eq!(h.service.pools().len().await, 1);
    assert_eq!(h.engine.created(), 2);
    assert_eq!(h.engine.dropped(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_renders_respect_instance_bound() {
    let h = Arc::new(harness(PoolConfig {
        pool_max_instances: 2,
        ..PoolConfig::default()
    }));
    let style = StyleRef::inline(style_with(json!({})));

    let mut tasks = Vec::new();
    for i in 0..8u32 {
        let h = h.clone();
        let style = style.clone();
        tasks.push(tokio::spawn(async move {
            h.service
                .render(&RenderRequest::tile(style, 3, i, 0, 256))
                .await
                .is_ok()
        }));
    }
    for task in tasks {
        assert!(task.await.unwrap());
    }

    assert!(h.engine.created() <= 2);
    assert_eq!(h.engine.renders(), 8);
}

// =============================================================================
// Assets
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_assets_resolve_with_placeholders() {
    let server = TestServer::start().await;
    server.put("/sprite.png", Bytes::from_static(b"sprite"));

    let h = harness(PoolConfig::default());
    let sprite = server.url("/sprite.png");
    let missing_png = server.url("/tiles/1/0/0.png");
    let missing_pbf = server.url("/tiles/1/0/0.pbf");
    let style = StyleRef::inline(style_with(json!({
        "test:assets": [sprite, missing_png, missing_pbf]
    })));

    h.service
        .render(&RenderRequest::tile(style, 0, 0, 0, 512))
        .await
        .unwrap();

    let assets = h.engine.assets();
    assert_eq!(assets.len(), 3);
    assert_eq!(assets[0].1, Bytes::from_static(b"sprite"));

    let placeholder = decode(&assets[1].1);
    assert_eq!(placeholder.dimensions(), (1, 1));
    assert_eq!(placeholder.get_pixel(0, 0).0[3], 0);

    assert!(assets[2].1.is_empty());

    // Found assets are cached, missing ones are not
    assert!(h.cache.get(&sprite).await.is_some());
    assert!(h.cache.get(&missing_png).await.is_none());
}

// =============================================================================
// BBox and Camera
// =============================================================================

#[tokio::test]
async fn test_bbox_render_keeps_aspect() {
    let h = harness(PoolConfig::default());
    let style = StyleRef::inline(style_with(json!({})));

    let image = h
        .service
        .render(&RenderRequest::bbox(style, [0.0, 0.0, 40.0, 10.0], 400))
        .await
        .unwrap();

    assert_eq!(image.width, 400);
    assert!(image.height < 400 && image.height > 50);

    let params = h.engine.last_params().unwrap();
    assert!((params.center.0 - 20.0).abs() < 1e-6);
    assert!(params.center.1 > 4.9 && params.center.1 < 5.1);
}

#[tokio::test]
async fn test_camera_render() {
    let h = harness(PoolConfig::default());
    let style = StyleRef::inline(style_with(json!({})));
    let camera = Camera {
        lon: 13.4,
        lat: 52.5,
        zoom: 11.5,
        bearing: -30.0,
        pitch: 45.0,
        width: 400,
        height: 300,
    };

    let image = h
        .service
        .render(&RenderRequest::camera(style, camera).with_scale(2))
        .await
        .unwrap();

    assert_eq!((image.width, image.height), (400, 300));
    let params = h.engine.last_params().unwrap();
    assert_eq!((params.width, params.height), (200, 150));
    assert_eq!(params.bearing, 330.0);
    assert_eq!(params.pitch, 45.0);
    assert_eq!(params.zoom, 11.5);
}

#[tokio::test]
async fn test_invalid_geometry_fails_before_style_load() {
    let server = TestServer::start().await;
    server.put(
        "/style.json",
        serde_json::to_vec(&style_with(json!({}))).unwrap(),
    );
    let h = harness(PoolConfig::default());
    let style = StyleRef::uri(server.url("/style.json"));

    let out_of_range = RenderRequest::tile(style.clone(), 2, 4, 0, 256);
    assert!(matches!(
        h.service.render(&out_of_range).await,
        Err(RenderError::Geometry(GeometryError::TileOutOfRange { .. }))
    ));

    let too_sharp = RenderRequest::tile(style, 2, 0, 0, 256).with_scale(MAX_SCALE + 1);
    assert!(matches!(
        h.service.render(&too_sharp).await,
        Err(RenderError::Geometry(GeometryError::InvalidScale(_)))
    ));

    assert_eq!(server.gets("/style.json"), 0);
}

// =============================================================================
// Encoding
// =============================================================================

#[tokio::test]
async fn test_output_formats() {
    let h = harness(PoolConfig::default());
    let style = StyleRef::inline(style_with(json!({"test:color": [0, 128, 0, 255]})));

    let jpeg = h
        .service
        .render_encoded(
            &RenderRequest::tile(style.clone(), 1, 0, 0, 256).with_format(OutputFormat::Jpeg, 80),
        )
        .await
        .unwrap();
    assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    assert_eq!(decode(&jpeg).dimensions(), (256, 256));

    let webp = h
        .service
        .render_encoded(
            &RenderRequest::tile(style, 1, 0, 0, 256).with_format(OutputFormat::Webp, 100),
        )
        .await
        .unwrap();
    assert_eq!(&webp[..4], b"RIFF");
    assert_eq!(&webp[8..12], b"WEBP");
    assert_eq!(decode(&webp).get_pixel(10, 10).0, [0, 128, 0, 255]);
}
