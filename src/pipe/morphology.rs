//! Erosion and dilation with a square structuring element.
//!
//! Masks go through imageproc's binary operators under the L-infinity norm,
//! which is exactly a square kernel. Color frames are split into channels and
//! each channel goes through the grayscale operators with a square mask.

use anyhow::{bail, Result};
use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::morphology::{dilate, erode, grayscale_dilate, grayscale_erode, Mask};

use super::Pipe;

/// Kernel used by detection pipelines.
pub const DETECTION_KERNEL: u32 = 7;
/// Kernel used when cleaning up draw-only masks.
pub const DRAW_KERNEL: u32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MorphologyParams {
    pub erode: bool,
    pub dilate: bool,
    pub kernel_size: u32,
}

impl Default for MorphologyParams {
    fn default() -> Self {
        Self {
            erode: false,
            dilate: false,
            kernel_size: DETECTION_KERNEL,
        }
    }
}

impl MorphologyParams {
    fn is_noop(&self) -> bool {
        !self.erode && !self.dilate
    }

    /// Half-width of the square kernel.
    fn radius(&self) -> Result<u8> {
        if self.kernel_size == 0 {
            bail!("morphology kernel size must be at least 1");
        }
        match u8::try_from(self.kernel_size / 2) {
            Ok(radius) => Ok(radius),
            Err(_) => bail!("morphology kernel size {} is too large", self.kernel_size),
        }
    }
}

#[derive(Debug, Default)]
pub struct MorphologyPipe {
    params: MorphologyParams,
}

impl MorphologyPipe {
    pub fn new(params: MorphologyParams) -> Self {
        Self { params }
    }

    fn apply_mask(&self, mut mask: GrayImage) -> Result<GrayImage> {
        check_not_empty(mask.dimensions())?;
        if self.params.is_noop() {
            return Ok(mask);
        }
        let radius = self.params.radius()?;
        if self.params.erode {
            mask = erode(&mask, Norm::LInf, radius);
        }
        if self.params.dilate {
            mask = dilate(&mask, Norm::LInf, radius);
        }
        Ok(mask)
    }

    fn apply_color(&self, frame: RgbImage) -> Result<RgbImage> {
        let (width, height) = frame.dimensions();
        check_not_empty((width, height))?;
        if self.params.is_noop() {
            return Ok(frame);
        }
        let kernel = Mask::square(self.params.radius()?);
        let channels: [GrayImage; 3] = std::array::from_fn(|c| {
            let mut channel =
                GrayImage::from_fn(width, height, |x, y| Luma([frame.get_pixel(x, y)[c]]));
            if self.params.erode {
                channel = grayscale_erode(&channel, &kernel);
            }
            if self.params.dilate {
                channel = grayscale_dilate(&channel, &kernel);
            }
            channel
        });
        Ok(RgbImage::from_fn(width, height, |x, y| {
            Rgb([
                channels[0].get_pixel(x, y)[0],
                channels[1].get_pixel(x, y)[0],
                channels[2].get_pixel(x, y)[0],
            ])
        }))
    }
}

fn check_not_empty((width, height): (u32, u32)) -> Result<()> {
    if width == 0 || height == 0 {
        bail!("cannot apply morphology to an empty image");
    }
    Ok(())
}

impl Pipe<GrayImage> for MorphologyPipe {
    type Output = GrayImage;
    type Params = MorphologyParams;

    fn name(&self) -> &'static str {
        "morphology"
    }

    fn set_params(&mut self, params: MorphologyParams) {
        self.params = params;
    }

    fn process(&mut self, input: GrayImage) -> Result<GrayImage> {
        self.apply_mask(input)
    }
}

impl Pipe<RgbImage> for MorphologyPipe {
    type Output = RgbImage;
    type Params = MorphologyParams;

    fn name(&self) -> &'static str {
        "morphology"
    }

    fn set_params(&mut self, params: MorphologyParams) {
        self.params = params;
    }

    fn process(&mut self, input: RgbImage) -> Result<RgbImage> {
        self.apply_color(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};

    fn mask_with_block(size: u32, x0: u32, y0: u32, w: u32, h: u32) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            if x >= x0 && x < x0 + w && y >= y0 && y < y0 + h {
                Luma([255])
            } else {
                Luma([0])
            }
        })
    }

    fn lit(mask: &GrayImage) -> usize {
        mask.pixels().filter(|p| p.0[0] > 0).count()
    }

    #[test]
    fn erode_removes_specks_smaller_than_kernel() {
        let mut mask = mask_with_block(40, 10, 10, 12, 12);
        mask.put_pixel(35, 35, Luma([255]));
        let mut pipe = MorphologyPipe::new(MorphologyParams {
            erode: true,
            dilate: false,
            kernel_size: 3,
        });
        let out = Pipe::<GrayImage>::run(&mut pipe, mask).unwrap().value;
        assert_eq!(out.get_pixel(35, 35).0[0], 0);
        assert_eq!(lit(&out), 10 * 10);
    }

    #[test]
    fn open_restores_block_size() {
        let mask = mask_with_block(40, 10, 10, 12, 12);
        let mut pipe = MorphologyPipe::new(MorphologyParams {
            erode: true,
            dilate: true,
            kernel_size: 7,
        });
        let out = Pipe::<GrayImage>::run(&mut pipe, mask).unwrap().value;
        assert_eq!(lit(&out), 12 * 12);
    }

    #[test]
    fn disabled_ops_pass_through() {
        let mask = mask_with_block(16, 2, 2, 3, 3);
        let mut pipe = MorphologyPipe::default();
        let out = Pipe::<GrayImage>::run(&mut pipe, mask.clone()).unwrap().value;
        assert_eq!(out, mask);
    }

    #[test]
    fn erode_on_color_takes_channel_minimum() {
        let mut img = RgbImage::from_pixel(7, 7, Rgb([100, 150, 200]));
        img.put_pixel(3, 3, Rgb([5, 250, 50]));
        let mut pipe = MorphologyPipe::new(MorphologyParams {
            erode: true,
            dilate: false,
            kernel_size: 3,
        });
        let out = Pipe::<RgbImage>::run(&mut pipe, img).unwrap().value;
        assert_eq!(out.get_pixel(2, 4).0, [5, 150, 50]);
        assert_eq!(out.get_pixel(0, 0).0, [100, 150, 200]);
    }

    #[test]
    fn oversized_kernel_is_rejected() {
        let mut pipe = MorphologyPipe::new(MorphologyParams {
            erode: true,
            dilate: false,
            kernel_size: 1024,
        });
        assert!(Pipe::<GrayImage>::run(&mut pipe, GrayImage::new(4, 4)).is_err());
    }

    #[test]
    fn dilate_works_per_channel_on_color() {
        let mut img = RgbImage::new(5, 5);
        img.put_pixel(2, 2, Rgb([10, 200, 30]));
        let mut pipe = MorphologyPipe::new(MorphologyParams {
            erode: false,
            dilate: true,
            kernel_size: 3,
        });
        let out = Pipe::<RgbImage>::run(&mut pipe, img).unwrap().value;
        assert_eq!(out.get_pixel(1, 1).0, [10, 200, 30]);
        assert_eq!(out.get_pixel(0, 0).0, [0, 0, 0]);
    }
}
