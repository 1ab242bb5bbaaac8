//! Interfaces to the external rendering engine.
//!
//! The engine itself (vector tile rasterization) is not part of this crate.
//! It is plugged in through [`RendererFactory`], which builds one
//! [`Renderer`] per pooled instance. Renderers are blocking and not
//! reentrant: the pool guarantees each instance serves one call at a time
//! and runs it on the blocking thread pool.

use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;

use crate::error::EngineError;

/// How an instance lays out its canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderMode {
    /// Tile-aligned rendering; only for 256/512 tiles without margin
    Tile,
    /// Arbitrary viewport
    Static,
}

impl RenderMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderMode::Tile => "tile",
            RenderMode::Static => "static",
        }
    }
}

/// Parameters of one render call.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderParams {
    /// Fractional engine zoom
    pub zoom: f64,
    /// Logical width; the engine returns `width * pixel_ratio` pixels
    pub width: u32,
    /// Logical height
    pub height: u32,
    /// `(lon, lat)` of the viewport center
    pub center: (f64, f64),
    pub bearing: f64,
    pub pitch: f64,
}

/// Construction options for a renderer instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RendererOptions {
    pub mode: RenderMode,
    pub pixel_ratio: u32,
}

/// Synchronous asset lookup invoked by the engine mid-render.
///
/// Called from the blocking thread running the render; an implementation
/// may block until the bytes are available. It never fails: missing assets
/// are answered with a placeholder.
pub trait AssetSource: Send + Sync {
    fn request(&self, url: &str) -> Bytes;
}

/// One engine instance bound to a style.
///
/// Native resources are released when the instance is dropped.
pub trait Renderer: Send {
    /// Render `params` and return RGBA pixels of
    /// `width * pixel_ratio` by `height * pixel_ratio`.
    fn render(&mut self, params: &RenderParams) -> Result<Vec<u8>, EngineError>;
}

/// Builds renderer instances.
pub trait RendererFactory: Send + Sync {
    /// Create an instance with `style` loaded.
    ///
    /// Fails when the engine rejects the style.
    fn create(
        &self,
        style: &Value,
        options: RendererOptions,
        assets: Arc<dyn AssetSource>,
    ) -> Result<Box<dyn Renderer>, EngineError>;
}
