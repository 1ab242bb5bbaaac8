//! Raw RGBA pixels and the crop/resize step after rendering.

use image::imageops::{self, FilterType};
use image::RgbaImage;

use crate::error::RenderError;

/// Bytes per RGBA pixel.
pub const CHANNELS: usize = 4;

/// A rectangle in pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

/// What to do with the engine's buffer to reach the requested image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostProcess {
    /// Size of the buffer the engine returns
    pub raw_width: u32,
    pub raw_height: u32,
    /// Region to keep; `None` keeps everything
    pub crop: Option<PixelRect>,
    /// Final size
    pub output_width: u32,
    pub output_height: u32,
}

/// An RGBA image straight from the engine or after post-processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl RawImage {
    /// Wrap `data`, checking it holds exactly `width * height` pixels.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, RenderError> {
        let expected = width as usize * height as usize * CHANNELS;
        if data.len() != expected {
            return Err(RenderError::InvalidPixels {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Apply `post`: crop, then resize to the output size.
    ///
    /// The crop is clamped to the buffer. Scale rounding can leave the
    /// buffer a few pixels short of `tile + margin`; the clamped region is
    /// stretched back to the output size.
    pub fn finish(self, post: &PostProcess) -> Result<RawImage, RenderError> {
        let expected = self.data.len();
        let mut img = RgbaImage::from_raw(self.width, self.height, self.data).ok_or(
            RenderError::InvalidPixels {
                expected: self.width as usize * self.height as usize * CHANNELS,
                actual: expected,
            },
        )?;

        if let Some(rect) = post.crop {
            let rect = clamp_rect(rect, img.width(), img.height());
            if (rect.width, rect.height) != img.dimensions() {
                img = imageops::crop_imm(&img, rect.left, rect.top, rect.width, rect.height)
                    .to_image();
            }
        }

        if img.dimensions() != (post.output_width, post.output_height) {
            img = imageops::resize(
                &img,
                post.output_width,
                post.output_height,
                FilterType::Lanczos3,
            );
        }

        let (width, height) = img.dimensions();
        Ok(RawImage {
            width,
            height,
            data: img.into_raw(),
        })
    }
}

fn clamp_rect(rect: PixelRect, width: u32, height: u32) -> PixelRect {
    let rect_width = rect.width.min(width);
    let rect_height = rect.height.min(height);
    PixelRect {
        left: rect.left.min(width - rect_width),
        top: rect.top.min(height - rect_height),
        width: rect_width,
        height: rect_height,
    }
}
