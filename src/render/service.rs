//! Render Service: one request from style reference to pixels.
//!
//! # Pipeline
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          RenderService                           │
//! │  1. Plan viewport (geometry)     4. Acquire pooled instance      │
//! │  2. Load style (memo + resolver) 5. Render, release instance     │
//! │  3. Fingerprint -> pool key      6. Crop / resize raw pixels     │
//! │           │                          │                           │
//! │           ▼                          ▼                           │
//! │     ┌────────────┐        ┌────────────────────┐                 │
//! │     │ StyleStore │        │ RenderPoolRegistry │                 │
//! │     └────────────┘        └────────────────────┘                 │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Geometry is planned first: it is pure, and the pool key needs the
//! render mode and pixel ratio it produces. The style is always loaded
//! before the pool is looked up, and the instance is released by its
//! guard whatever the render outcome.

use std::sync::Arc;

use bytes::Bytes;
use tokio::runtime::Handle;
use tracing::debug;

use super::assets::ResolverAssets;
use super::codec::{ImageCodec, ImageCrateCodec, OutputFormat, DEFAULT_QUALITY};
use super::geometry::{bbox_geometry, camera_geometry, tile_geometry, Camera, ViewportPlan};
use super::image::RawImage;
use super::pool::{PoolKey, PoolSettings, RenderPool};
use super::registry::RenderPoolRegistry;
use super::renderer::{AssetSource, RendererFactory};
use super::style::{LoadedStyle, MinimalStyleValidator, StyleRef, StyleStore, StyleValidator};
use crate::config::{PoolConfig, DEFAULT_POOL_MAX_STYLES, DEFAULT_STYLE_MEMO_CAPACITY};
use crate::error::RenderError;
use crate::source::SourceResolver;

// =============================================================================
// Render Request
// =============================================================================

/// What part of the map to render.
#[derive(Debug, Clone, PartialEq)]
pub enum Viewport {
    /// An XYZ tile, optionally rendered with a seam margin
    Tile {
        z: u8,
        x: u32,
        y: u32,
        tile_size: u32,
        margin: u32,
    },
    /// `[min_lon, min_lat, max_lon, max_lat]` fitted into `size` pixels
    BBox { bbox: [f64; 4], size: u32 },
    /// A free camera
    Camera(Camera),
}

/// A single render request.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub style: StyleRef,
    pub viewport: Viewport,
    /// Pixel ratio
    pub scale: u32,
    pub format: OutputFormat,
    /// Encoder quality (1-100), passed through to the codec
    pub quality: u8,
}

impl RenderRequest {
    /// Request a `tile_size` tile with no margin at scale 1, as PNG.
    pub fn tile(style: StyleRef, z: u8, x: u32, y: u32, tile_size: u32) -> Self {
        Self {
            style,
            viewport: Viewport::Tile {
                z,
                x,
                y,
                tile_size,
                margin: 0,
            },
            scale: 1,
            format: OutputFormat::Png,
            quality: DEFAULT_QUALITY,
        }
    }

    /// Request a bbox render at scale 1, as PNG.
    pub fn bbox(style: StyleRef, bbox: [f64; 4], size: u32) -> Self {
        Self {
            style,
            viewport: Viewport::BBox { bbox, size },
            scale: 1,
            format: OutputFormat::Png,
            quality: DEFAULT_QUALITY,
        }
    }

    /// Request a camera render at scale 1, as PNG.
    pub fn camera(style: StyleRef, camera: Camera) -> Self {
        Self {
            style,
            viewport: Viewport::Camera(camera),
            scale: 1,
            format: OutputFormat::Png,
            quality: DEFAULT_QUALITY,
        }
    }

    pub fn with_margin(mut self, margin: u32) -> Self {
        if let Viewport::Tile { margin: m, .. } = &mut self.viewport {
            *m = margin;
        }
        self
    }

    pub fn with_scale(mut self, scale: u32) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_format(mut self, format: OutputFormat, quality: u8) -> Self {
        self.format = format;
        self.quality = quality;
        self
    }

    fn plan(&self) -> Result<ViewportPlan, RenderError> {
        let plan = match &self.viewport {
            Viewport::Tile {
                z,
                x,
                y,
                tile_size,
                margin,
            } => tile_geometry(*z, *x, *y, *tile_size, self.scale, *margin)?,
            Viewport::BBox { bbox, size } => bbox_geometry(*bbox, *size, self.scale)?,
            Viewport::Camera(camera) => camera_geometry(camera, self.scale)?,
        };
        Ok(plan)
    }
}

// =============================================================================
// Render Service
// =============================================================================

/// Orchestrates style loading, pooled rendering and post-processing.
pub struct RenderService {
    styles: StyleStore,
    pools: RenderPoolRegistry,
    codec: Arc<dyn ImageCodec>,
}

impl RenderService {
    pub fn builder(
        resolver: Arc<SourceResolver>,
        factory: Arc<dyn RendererFactory>,
    ) -> RenderServiceBuilder {
        RenderServiceBuilder {
            resolver,
            factory,
            validator: Arc::new(MinimalStyleValidator),
            codec: Arc::new(ImageCrateCodec),
            assets: None,
            pool: PoolConfig::default(),
        }
    }

    /// Render `request` to post-processed RGBA pixels.
    pub async fn render(&self, request: &RenderRequest) -> Result<RawImage, RenderError> {
        let plan = request.plan()?;
        let style = self.styles.load(&request.style).await?;
        let pool = self.pool_for(&style, &plan).await?;

        let pixels = pool.render(plan.params.clone()).await?;
        let raw = RawImage::new(plan.post.raw_width, plan.post.raw_height, pixels)?;

        debug!(
            pool = %pool.key(),
            zoom = plan.params.zoom,
            width = plan.post.output_width,
            height = plan.post.output_height,
            "Rendered"
        );

        // Lanczos resampling of a large canvas is CPU-heavy
        tokio::task::spawn_blocking(move || raw.finish(&plan.post))
            .await
            .map_err(|e| RenderError::Renderer(format!("post-processing panicked: {e}")))?
    }

    /// Render `request` and encode it in the requested format.
    pub async fn render_encoded(&self, request: &RenderRequest) -> Result<Bytes, RenderError> {
        let image = self.render(request).await?;
        let codec = self.codec.clone();
        let (format, quality) = (request.format, request.quality);

        tokio::task::spawn_blocking(move || codec.encode(&image, format, quality))
            .await
            .map_err(|e| RenderError::Encode(format!("encoder panicked: {e}")))?
            .map_err(|e| RenderError::Encode(e.0))
    }

    pub fn styles(&self) -> &StyleStore {
        &self.styles
    }

    pub fn pools(&self) -> &RenderPoolRegistry {
        &self.pools
    }

    async fn pool_for(
        &self,
        style: &LoadedStyle,
        plan: &ViewportPlan,
    ) -> Result<Arc<RenderPool>, RenderError> {
        let key = PoolKey {
            fingerprint: style.fingerprint.clone(),
            mode: plan.mode,
            pixel_ratio: plan.pixel_ratio,
        };
        Ok(self.pools.get_pool(&key, &style.document).await?)
    }
}

/// Builder for [`RenderService`].
pub struct RenderServiceBuilder {
    resolver: Arc<SourceResolver>,
    factory: Arc<dyn RendererFactory>,
    validator: Arc<dyn StyleValidator>,
    codec: Arc<dyn ImageCodec>,
    assets: Option<Arc<dyn AssetSource>>,
    pool: PoolConfig,
}

impl RenderServiceBuilder {
    pub fn validator(mut self, validator: Arc<dyn StyleValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn codec(mut self, codec: Arc<dyn ImageCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Replace the resolver-backed asset bridge.
    pub fn assets(mut self, assets: Arc<dyn AssetSource>) -> Self {
        self.assets = Some(assets);
        self
    }

    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.pool = config;
        self
    }

    /// Build the service.
    ///
    /// # Panics
    ///
    /// Without an explicit [`assets`](Self::assets) source, this must be
    /// called from within a Tokio runtime: the asset bridge captures the
    /// current runtime handle.
    pub fn build(self) -> RenderService {
        let assets: Arc<dyn AssetSource> = match self.assets {
            Some(assets) => assets,
            None => Arc::new(ResolverAssets::new(self.resolver.clone(), Handle::current())),
        };

        let max_styles = if self.pool.pool_max_styles == 0 {
            DEFAULT_POOL_MAX_STYLES
        } else {
            self.pool.pool_max_styles
        };
        let memo_capacity = if self.pool.style_memo_capacity == 0 {
            DEFAULT_STYLE_MEMO_CAPACITY
        } else {
            self.pool.style_memo_capacity
        };

        RenderService {
            styles: StyleStore::new(
                self.resolver,
                self.validator,
                self.pool.fingerprint,
                memo_capacity,
            ),
            pools: RenderPoolRegistry::new(
                self.factory,
                assets,
                PoolSettings::from(&self.pool),
                max_styles,
            ),
            codec: self.codec,
        }
    }
}
