//! Raw pixels to PNG, JPEG or WebP.
//!
//! # Format notes
//!
//! - **JPEG** has no alpha channel; alpha is dropped before encoding.
//! - **WebP** is encoded lossless, so `quality` does not apply to it; a
//!   lowered quality is logged at debug level and otherwise ignored.

use std::io::Cursor;
use std::sync::OnceLock;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, RgbaImage};

use tracing::debug;

use super::image::RawImage;
use crate::error::EngineError;

/// Default JPEG quality (1-100).
pub const DEFAULT_QUALITY: u8 = 100;

/// Image formats the pipeline can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Png,
    Jpeg,
    Webp,
}

impl OutputFormat {
    /// Parse a file extension; `jpg` and `jpeg` are the same format.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(OutputFormat::Png),
            "jpg" | "jpeg" => Some(OutputFormat::Jpeg),
            "webp" => Some(OutputFormat::Webp),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Webp => "webp",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Png => "image/png",
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Webp => "image/webp",
        }
    }

    /// Whether the encoder honours a quality setting for this format.
    pub fn uses_quality(&self) -> bool {
        matches!(self, OutputFormat::Jpeg)
    }
}

/// Encoder for finished images.
pub trait ImageCodec: Send + Sync {
    fn encode(&self, image: &RawImage, format: OutputFormat, quality: u8)
        -> Result<Bytes, EngineError>;
}

/// [`ImageCodec`] backed by the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCrateCodec;

impl ImageCodec for ImageCrateCodec {
    fn encode(
        &self,
        image: &RawImage,
        format: OutputFormat,
        quality: u8,
    ) -> Result<Bytes, EngineError> {
        if !format.uses_quality() && quality < DEFAULT_QUALITY {
            debug!(format = format.extension(), quality, "Lossless format; quality ignored");
        }
        encode_rgba(&image.data, image.width, image.height, format, quality)
    }
}

fn encode_rgba(
    rgba: &[u8],
    width: u32,
    height: u32,
    format: OutputFormat,
    quality: u8,
) -> Result<Bytes, EngineError> {
    let mut out = Cursor::new(Vec::new());
    let result = match format {
        OutputFormat::Png => {
            PngEncoder::new(&mut out).write_image(rgba, width, height, ExtendedColorType::Rgba8)
        }
        OutputFormat::Webp => WebPEncoder::new_lossless(&mut out).write_image(
            rgba,
            width,
            height,
            ExtendedColorType::Rgba8,
        ),
        OutputFormat::Jpeg => {
            let img = RgbaImage::from_raw(width, height, rgba.to_vec())
                .ok_or_else(|| EngineError("pixel buffer does not match dimensions".to_string()))?;
            let rgb = DynamicImage::ImageRgba8(img).to_rgb8();
            JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100)).write_image(
                rgb.as_raw(),
                width,
                height,
                ExtendedColorType::Rgb8,
            )
        }
    };
    result.map_err(|e| EngineError(e.to_string()))?;
    Ok(Bytes::from(out.into_inner()))
}

struct Placeholders {
    png: Bytes,
    jpg: Bytes,
    webp: Bytes,
}

fn placeholders() -> &'static Placeholders {
    static PLACEHOLDERS: OnceLock<Placeholders> = OnceLock::new();
    PLACEHOLDERS.get_or_init(|| {
        let transparent = [0u8, 0, 0, 0];
        let white = [255u8, 255, 255, 255];
        let one_pixel = |rgba: &[u8], format| {
            encode_rgba(rgba, 1, 1, format, DEFAULT_QUALITY).unwrap_or_default()
        };
        Placeholders {
            png: one_pixel(&transparent, OutputFormat::Png),
            jpg: one_pixel(&white, OutputFormat::Jpeg),
            webp: one_pixel(&transparent, OutputFormat::Webp),
        }
    })
}

/// 1x1 stand-in for a missing image asset.
///
/// Transparent for PNG and WebP, white for JPEG.
pub fn transparent_placeholder(format: OutputFormat) -> Bytes {
    let p = placeholders();
    match format {
        OutputFormat::Png => p.png.clone(),
        OutputFormat::Jpeg => p.jpg.clone(),
        OutputFormat::Webp => p.webp.clone(),
    }
}
