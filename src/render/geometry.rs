//! Viewport geometry: from a tile, bbox or camera request to engine
//! parameters plus the post-processing that yields the final image.
//!
//! Pure functions, no I/O.
//!
//! # Tile mode
//!
//! The engine zoom is `z - 1 + log2(tile_size / 256) - log2(scale)`. A
//! 256px tile at zoom 0 and scale 1 is the exception: the engine cannot
//! draw zoom 0 below 512px, so the 512px world is rendered and scaled down.
//!
//! With a margin, the engine draws `tile_size + margin` pixels and the
//! centered tile is cut out. The engine draws nothing beyond the
//! projection's latitude limit, so at the top row the whole margin is below
//! the tile and at the bottom row it is all above:
//!
//! ```text
//! y == 0            top margin 0
//! y == 2^z - 1      top margin = margin
//! otherwise         top margin = margin / 2
//! ```

use std::f64::consts::PI;

use super::image::{PixelRect, PostProcess};
use super::renderer::{RenderMode, RenderParams};
use crate::error::GeometryError;
use crate::source::TileCoord;

/// Largest tile size or output edge accepted.
pub const MAX_DIMENSION: u32 = 4096;

/// Largest pixel ratio accepted.
pub const MAX_SCALE: u32 = 8;

/// Latitude limit of the Web Mercator projection.
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

/// Deepest camera zoom accepted.
pub const MAX_CAMERA_ZOOM: f64 = 24.0;

/// Steepest camera pitch accepted, in degrees.
pub const MAX_PITCH: f64 = 85.0;

/// Working zoom for projecting bbox corners.
const BBOX_WORKING_ZOOM: f64 = 25.0;

// =============================================================================
// Spherical Mercator
// =============================================================================

/// Spherical mercator pixel projection for square tiles of `size` pixels.
#[derive(Debug, Clone, Copy)]
pub struct SphericalMercator {
    size: f64,
}

impl SphericalMercator {
    pub fn new(size: u32) -> Self {
        Self { size: size as f64 }
    }

    fn world_size(&self, zoom: f64) -> f64 {
        self.size * zoom.exp2()
    }

    /// Project `(lon, lat)` to pixel space at `zoom`.
    pub fn px(&self, lon: f64, lat: f64, zoom: f64) -> (f64, f64) {
        let world = self.world_size(zoom);
        let half = world / 2.0;
        let sin = lat.to_radians().sin().clamp(-0.9999, 0.9999);
        let x = half + lon * world / 360.0;
        let y = half - 0.5 * ((1.0 + sin) / (1.0 - sin)).ln() * world / (2.0 * PI);
        (x.clamp(0.0, world), y.clamp(0.0, world))
    }

    /// Unproject pixel `(x, y)` at `zoom` to `(lon, lat)`.
    pub fn ll(&self, x: f64, y: f64, zoom: f64) -> (f64, f64) {
        let world = self.world_size(zoom);
        let half = world / 2.0;
        let g = (y - half) / -(world / (2.0 * PI));
        let lon = (x - half) / (world / 360.0);
        let lat = (2.0 * g.exp().atan() - 0.5 * PI).to_degrees();
        (lon, lat)
    }
}

// =============================================================================
// Viewport Plans
// =============================================================================

/// Everything needed to render one request.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewportPlan {
    pub mode: RenderMode,
    pub pixel_ratio: u32,
    pub params: RenderParams,
    pub post: PostProcess,
}

/// A free camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub lon: f64,
    pub lat: f64,
    pub zoom: f64,
    pub bearing: f64,
    pub pitch: f64,
    pub width: u32,
    pub height: u32,
}

/// Top margin kept above the tile when cropping a margin render.
pub fn top_margin(tile: TileCoord, margin: u32) -> u32 {
    let last_row = ((1u64 << tile.z) - 1) as u32;
    if tile.y == 0 {
        0
    } else if tile.y == last_row {
        margin
    } else {
        margin / 2
    }
}

/// Center `(lon, lat)` of a tile in a grid of `tile_size` pixel tiles.
pub fn tile_center(tile: TileCoord, tile_size: u32) -> (f64, f64) {
    let size = tile_size as f64;
    let px = size / 2.0 + tile.x as f64 * size;
    let py = size / 2.0 + tile.y as f64 * size;
    SphericalMercator::new(tile_size).ll(px, py, tile.z as f64)
}

/// Plan a tile render.
pub fn tile_geometry(
    z: u8,
    x: u32,
    y: u32,
    tile_size: u32,
    scale: u32,
    margin: u32,
) -> Result<ViewportPlan, GeometryError> {
    let tile = TileCoord::new(z, x, y).ok_or(GeometryError::TileOutOfRange { z, x, y })?;
    if tile_size == 0 || tile_size > MAX_DIMENSION {
        return Err(GeometryError::InvalidTileSize(tile_size));
    }
    check_scale(scale)?;

    let center = tile_center(tile, tile_size);

    // Zoom 0 is never drawn below 512px; margin is meaningless for the
    // single world tile.
    if tile_size == 256 && z == 0 && scale == 1 {
        return Ok(ViewportPlan {
            mode: RenderMode::Tile,
            pixel_ratio: 1,
            params: RenderParams {
                zoom: 0.0,
                width: 512,
                height: 512,
                center,
                bearing: 0.0,
                pitch: 0.0,
            },
            post: PostProcess {
                raw_width: 512,
                raw_height: 512,
                crop: None,
                output_width: 256,
                output_height: 256,
            },
        });
    }

    let zoom = z as f64 - 1.0 + (tile_size as f64 / 256.0).log2() - (scale as f64).log2();
    let logical = (tile_size + margin) / scale;
    if logical == 0 {
        return Err(GeometryError::InvalidDimensions {
            width: logical,
            height: logical,
        });
    }
    let raw = logical * scale;

    let mode = if margin == 0 && (tile_size == 256 || tile_size == 512) {
        RenderMode::Tile
    } else {
        RenderMode::Static
    };

    let crop = (margin > 0).then(|| PixelRect {
        left: margin / 2,
        top: top_margin(tile, margin),
        width: tile_size,
        height: tile_size,
    });

    Ok(ViewportPlan {
        mode,
        pixel_ratio: scale,
        params: RenderParams {
            zoom,
            width: logical,
            height: logical,
            center,
            bearing: 0.0,
            pitch: 0.0,
        },
        post: PostProcess {
            raw_width: raw,
            raw_height: raw,
            crop,
            output_width: tile_size,
            output_height: tile_size,
        },
    })
}

/// Plan a render fitting `bbox` (`[min_lon, min_lat, max_lon, max_lat]`)
/// into `size` pixels along its longer side.
///
/// The shorter side is scaled to keep the aspect ratio.
pub fn bbox_geometry(bbox: [f64; 4], size: u32, scale: u32) -> Result<ViewportPlan, GeometryError> {
    let [min_lon, min_lat, max_lon, max_lat] = bbox;
    let invalid = || GeometryError::InvalidBbox {
        min_lon,
        min_lat,
        max_lon,
        max_lat,
    };

    if !bbox.iter().all(|v| v.is_finite())
        || min_lon >= max_lon
        || min_lat >= max_lat
        || min_lon < -180.0
        || max_lon > 180.0
        || min_lat < -90.0
        || max_lat > 90.0
    {
        return Err(invalid());
    }
    if size == 0 || size > MAX_DIMENSION {
        return Err(GeometryError::InvalidDimensions {
            width: size,
            height: size,
        });
    }
    check_scale(scale)?;

    let mercator = SphericalMercator::new(256);
    let (left, top) = mercator.px(min_lon, max_lat, BBOX_WORKING_ZOOM);
    let (right, bottom) = mercator.px(max_lon, min_lat, BBOX_WORKING_ZOOM);
    let dx = right - left;
    let dy = bottom - top;
    if dx <= 0.0 || dy <= 0.0 {
        return Err(invalid());
    }

    let size_f = size as f64;
    let mut zoom = BBOX_WORKING_ZOOM - (dx / size_f).log2().max((dy / size_f).log2());
    zoom -= (scale as f64).log2();
    let zoom = (size_f / 256.0).log2().max(zoom.min(BBOX_WORKING_ZOOM)) - 1.0;

    let (width, height) = if dx > dy {
        (size, ((dy / dx) * size_f).ceil() as u32)
    } else {
        (((dx / dy) * size_f).ceil() as u32, size)
    };

    let center = mercator.ll((left + right) / 2.0, (top + bottom) / 2.0, BBOX_WORKING_ZOOM);
    static_plan(center, zoom, 0.0, 0.0, width, height, scale)
}

/// Plan a free-camera render.
pub fn camera_geometry(camera: &Camera, scale: u32) -> Result<ViewportPlan, GeometryError> {
    let Camera {
        lon,
        lat,
        zoom,
        bearing,
        pitch,
        width,
        height,
    } = *camera;

    if !(-180.0..=180.0).contains(&lon) || !(-MAX_LATITUDE..=MAX_LATITUDE).contains(&lat) {
        return Err(GeometryError::InvalidCamera(format!(
            "center ({lon}, {lat}) is outside the map"
        )));
    }
    if !(0.0..=MAX_CAMERA_ZOOM).contains(&zoom) {
        return Err(GeometryError::InvalidCamera(format!(
            "zoom {zoom} is outside 0..={MAX_CAMERA_ZOOM}"
        )));
    }
    if !bearing.is_finite() {
        return Err(GeometryError::InvalidCamera(format!("bearing {bearing}")));
    }
    if !(0.0..=MAX_PITCH).contains(&pitch) {
        return Err(GeometryError::InvalidCamera(format!(
            "pitch {pitch} is outside 0..={MAX_PITCH}"
        )));
    }
    if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(GeometryError::InvalidDimensions { width, height });
    }
    check_scale(scale)?;

    static_plan(
        (lon, lat),
        zoom,
        bearing.rem_euclid(360.0),
        pitch,
        width,
        height,
        scale,
    )
}

fn static_plan(
    center: (f64, f64),
    zoom: f64,
    bearing: f64,
    pitch: f64,
    width: u32,
    height: u32,
    scale: u32,
) -> Result<ViewportPlan, GeometryError> {
    let logical_width = width / scale;
    let logical_height = height / scale;
    if logical_width == 0 || logical_height == 0 {
        return Err(GeometryError::InvalidDimensions {
            width: logical_width,
            height: logical_height,
        });
    }

    Ok(ViewportPlan {
        mode: RenderMode::Static,
        pixel_ratio: scale,
        params: RenderParams {
            zoom,
            width: logical_width,
            height: logical_height,
            center,
            bearing,
            pitch,
        },
        post: PostProcess {
            raw_width: logical_width * scale,
            raw_height: logical_height * scale,
            crop: None,
            output_width: width,
            output_height: height,
        },
    })
}

fn check_scale(scale: u32) -> Result<(), GeometryError> {
    if scale == 0 || scale > MAX_SCALE {
        return Err(GeometryError::InvalidScale(scale));
    }
    Ok(())
}
