//! HSV color segmentation.
//!
//! HSV uses the 8-bit OpenCV convention: hue in `[0, 180)`, saturation and
//! value in `[0, 255]`.

use anyhow::{bail, Result};
use image::{GrayImage, Luma, RgbImage};

use super::Pipe;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HsvThresholdParams {
    pub lower: [u8; 3],
    pub upper: [u8; 3],
    /// Accept hues outside `[lower, upper]` instead of inside (wraps red).
    pub hue_inverted: bool,
}

impl Default for HsvThresholdParams {
    fn default() -> Self {
        Self {
            lower: [0, 0, 0],
            upper: [180, 255, 255],
            hue_inverted: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct HsvThresholdPipe {
    params: HsvThresholdParams,
}

impl HsvThresholdPipe {
    pub fn new(params: HsvThresholdParams) -> Self {
        Self { params }
    }

    fn accepts(&self, hsv: [u8; 3]) -> bool {
        let p = &self.params;
        let hue_in = hsv[0] >= p.lower[0] && hsv[0] <= p.upper[0];
        let hue_ok = if p.hue_inverted { !hue_in } else { hue_in };
        hue_ok
            && hsv[1] >= p.lower[1]
            && hsv[1] <= p.upper[1]
            && hsv[2] >= p.lower[2]
            && hsv[2] <= p.upper[2]
    }
}

impl<'a> Pipe<&'a RgbImage> for HsvThresholdPipe {
    type Output = GrayImage;
    type Params = HsvThresholdParams;

    fn name(&self) -> &'static str {
        "hsv_threshold"
    }

    fn set_params(&mut self, params: HsvThresholdParams) {
        self.params = params;
    }

    fn process(&mut self, input: &'a RgbImage) -> Result<GrayImage> {
        if input.width() == 0 || input.height() == 0 {
            bail!("cannot threshold an empty image");
        }
        let mut mask = GrayImage::new(input.width(), input.height());
        for (src, dst) in input.pixels().zip(mask.pixels_mut()) {
            let hsv = rgb_to_hsv(src.0);
            *dst = Luma([if self.accepts(hsv) { 255 } else { 0 }]);
        }
        Ok(mask)
    }
}

/// 8-bit RGB to 8-bit HSV.
pub fn rgb_to_hsv([r, g, b]: [u8; 3]) -> [u8; 3] {
    let (rf, gf, bf) = (f32::from(r), f32::from(g), f32::from(b));
    let v = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    let diff = v - min;

    let s = if v > 0.0 { 255.0 * diff / v } else { 0.0 };

    let mut h = if diff == 0.0 {
        0.0
    } else if v == rf {
        60.0 * (gf - bf) / diff
    } else if v == gf {
        120.0 + 60.0 * (bf - rf) / diff
    } else {
        240.0 + 60.0 * (rf - gf) / diff
    };
    if h < 0.0 {
        h += 360.0;
    }

    let hue = (h / 2.0).round();
    [
        if hue >= 180.0 { 0 } else { hue as u8 },
        s.round().clamp(0.0, 255.0) as u8,
        v as u8,
    ]
}
