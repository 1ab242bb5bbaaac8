//! Render coordination.
//!
//! This module turns a [`RenderRequest`] into pixels using an external
//! rendering engine:
//!
//! - [`StyleStore`] loads, validates and fingerprints style documents
//! - [`RenderPoolRegistry`] keeps one [`RenderPool`] of engine instances per
//!   style fingerprint, mode and pixel ratio
//! - the geometry functions compute engine parameters and the crop/resize
//!   that follows
//! - [`ResolverAssets`] answers the engine's asset requests through the
//!   [`SourceResolver`](crate::source::SourceResolver)
//! - [`RenderService`] ties them together
//!
//! The engine is plugged in through [`RendererFactory`].

mod assets;
mod codec;
mod fingerprint;
mod geometry;
mod image;
mod pool;
mod registry;
mod renderer;
mod service;
mod style;

pub use assets::{placeholder_for, ResolverAssets};
pub use codec::{transparent_placeholder, ImageCodec, ImageCrateCodec, OutputFormat, DEFAULT_QUALITY};
pub use fingerprint::{canonical_json, FingerprintAlgorithm, StyleFingerprint};
pub use geometry::{
    bbox_geometry, camera_geometry, tile_center, tile_geometry, top_margin, Camera,
    SphericalMercator, ViewportPlan, MAX_DIMENSION, MAX_SCALE,
};
pub use self::image::{PixelRect, PostProcess, RawImage};
pub use pool::{PoolKey, PoolSettings, PooledRenderer, RenderPool};
pub use registry::RenderPoolRegistry;
pub use renderer::{AssetSource, RenderMode, RenderParams, Renderer, RendererFactory, RendererOptions};
pub use service::{RenderRequest, RenderService, RenderServiceBuilder, Viewport};
pub use style::{LoadedStyle, MinimalStyleValidator, StyleRef, StyleStore, StyleValidator};
