//! # tilesmith
//!
//! The coordination core of a raster map tile server.
//!
//! A vector map style is rendered at a requested viewport by an external
//! engine. This crate does everything around the engine call:
//!
//! - **Sources**: styles, sprites, glyphs and tiles are fetched by URI over
//!   HTTP, the filesystem, S3, GCS, and the mbtiles/pmtiles/COG archive
//!   formats
//! - **Caching**: network fetches go through a pluggable byte cache (none,
//!   memory, file, S3, GCS)
//! - **Render pools**: engine instances are pooled per style fingerprint,
//!   checked out exclusively and released on every path
//! - **Geometry**: tile, bbox and camera requests become engine parameters
//!   plus a crop/resize of the result
//!
//! ## Architecture
//!
//! - [`cache`] - `ByteCache` trait and backends
//! - [`source`] - URI parsing, the `SourceResolver`, archive readers
//! - [`io`] - range readers (local, HTTP, S3) and the block cache
//! - [`render`] - styles, fingerprints, geometry, pools, `RenderService`
//! - [`singleflight`] - in-flight de-duplication used throughout
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tilesmith::{
//!     build_cache, RenderRequest, RenderService, RendererFactory, ServiceConfig, SourceResolver,
//!     StyleRef,
//! };
//!
//! async fn tile_png(
//!     engine: Arc<dyn RendererFactory>,
//! ) -> Result<bytes::Bytes, Box<dyn std::error::Error>> {
//!     let config = ServiceConfig::default();
//!     let cache = build_cache(&config.cache, &config.storage).await?;
//!     let resolver = Arc::new(SourceResolver::from_config(cache, &config.storage).await?);
//!
//!     let service = RenderService::builder(resolver, engine)
//!         .pool_config(config.pool.clone())
//!         .build();
//!
//!     let request = RenderRequest::tile(StyleRef::uri("https://example.com/style.json"), 5, 17, 11, 512);
//!     Ok(service.render_encoded(&request).await?)
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod io;
pub mod render;
pub mod singleflight;
pub mod source;

// Re-export commonly used types
pub use cache::{
    build_cache, escape_key, ByteCache, FileCache, MemoryCache, NoneCache, ObjectProvider,
    ObjectStoreCache, SharedCache,
};
pub use config::{CacheBackend, CacheConfig, Cli, Command, PoolConfig, ServiceConfig, StorageConfig};
pub use error::{
    CacheError, EngineError, GeometryError, IoError, PmtilesError, PoolError, RenderError,
    SourceError,
};
pub use render::{
    AssetSource, Camera, FingerprintAlgorithm, ImageCodec, ImageCrateCodec, MinimalStyleValidator,
    OutputFormat, RawImage, RenderMode, RenderParams, RenderPoolRegistry, RenderRequest,
    RenderService, Renderer, RendererFactory, RendererOptions, StyleFingerprint, StyleRef,
    StyleStore, StyleValidator, Viewport,
};
pub use io::NetworkTimeouts;
pub use singleflight::SingleFlight;
pub use source::{SourceResolver, SourceUri, TileCoord};
