//! Captured frames.
//!
//! A `Frame` is the unit handed from a `FrameSource` to the pipeline: an RGB
//! image plus its capture instant and a per-source sequence number. Frames are
//! consumed by the pipeline; published images are copies wrapped in `Arc`.

use std::time::Instant;

use anyhow::Result;
use image::RgbImage;

use crate::ingest::normalize::{normalize_to_rgb, PixelFormat};

#[derive(Clone, Debug)]
pub struct Frame {
    pub image: RgbImage,
    pub captured_at: Instant,
    pub sequence: u64,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self {
            image,
            captured_at: Instant::now(),
            sequence,
        }
    }

    /// Build a frame from a raw capture buffer in any supported pixel format.
    pub fn from_pixels(
        pixels: &[u8],
        width: u32,
        height: u32,
        format: PixelFormat,
        sequence: u64,
    ) -> Result<Self> {
        let rgb = normalize_to_rgb(pixels, width, height, format)?;
        Ok(Self::new(rgb, sequence))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_from_rgb_pixels() -> Result<()> {
        let frame = Frame::from_pixels(&[10u8; 4 * 2 * 3], 4, 2, PixelFormat::Rgb24, 7)?;
        assert_eq!(frame.dimensions(), (4, 2));
        assert_eq!(frame.sequence, 7);
        assert_eq!(frame.image.get_pixel(3, 1).0, [10, 10, 10]);
        Ok(())
    }

    #[test]
    fn frame_rejects_short_buffers() {
        assert!(Frame::from_pixels(&[0u8; 5], 4, 2, PixelFormat::Rgb24, 0).is_err());
    }
}
