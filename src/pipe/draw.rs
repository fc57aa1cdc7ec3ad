//! Overlays for the operator stream.

use anyhow::Result;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_cross_mut, draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect as DrawRect;

use super::Pipe;
use crate::geometry::Point2;
use crate::target::TrackedTarget;

const BEST_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const OTHER_COLOR: Rgb<u8> = Rgb([255, 160, 0]);
const BOUNDING_COLOR: Rgb<u8> = Rgb([0, 120, 255]);
const CROSSHAIR_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrawTargetsParams {
    pub show_multiple: bool,
    pub draw_bounding_rect: bool,
    /// Calibrated aim point, marked when set.
    pub crosshair: Option<Point2>,
}

impl Default for DrawTargetsParams {
    fn default() -> Self {
        Self {
            show_multiple: false,
            draw_bounding_rect: true,
            crosshair: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct DrawTargetsPipe {
    params: DrawTargetsParams,
}

impl DrawTargetsPipe {
    pub fn new(params: DrawTargetsParams) -> Self {
        Self { params }
    }
}

impl<'a> Pipe<(RgbImage, &'a [TrackedTarget])> for DrawTargetsPipe {
    type Output = RgbImage;
    type Params = DrawTargetsParams;

    fn name(&self) -> &'static str {
        "draw_targets"
    }

    fn set_params(&mut self, params: DrawTargetsParams) {
        self.params = params;
    }

    fn process(&mut self, (mut image, targets): (RgbImage, &'a [TrackedTarget])) -> Result<RgbImage> {
        let shown = if self.params.show_multiple {
            targets.len()
        } else {
            targets.len().min(1)
        };

        for (i, target) in targets.iter().take(shown).enumerate() {
            let color = if i == 0 { BEST_COLOR } else { OTHER_COLOR };
            draw_polygon_outline(&mut image, &target.min_area_rect.corners(), color);

            let b = target.bounding_rect;
            if self.params.draw_bounding_rect && b.width > 0 && b.height > 0 {
                draw_hollow_rect_mut(
                    &mut image,
                    DrawRect::at(b.x, b.y).of_size(b.width as u32, b.height as u32),
                    BOUNDING_COLOR,
                );
            }
            draw_cross_mut(
                &mut image,
                color,
                target.center.x.round() as i32,
                target.center.y.round() as i32,
            );
        }

        if let Some(aim) = self.params.crosshair {
            draw_crosshair(&mut image, aim, CROSSHAIR_COLOR);
        }
        Ok(image)
    }
}

fn draw_polygon_outline(image: &mut RgbImage, corners: &[Point2], color: Rgb<u8>) {
    for (i, a) in corners.iter().enumerate() {
        let b = corners[(i + 1) % corners.len()];
        draw_line_segment_mut(
            image,
            (a.x as f32, a.y as f32),
            (b.x as f32, b.y as f32),
            color,
        );
    }
}

fn draw_crosshair(image: &mut RgbImage, at: Point2, color: Rgb<u8>) {
    let arm = (image.width().min(image.height()) / 20).max(4) as f32;
    let (x, y) = (at.x as f32, at.y as f32);
    draw_line_segment_mut(image, (x - arm, y), (x + arm, y), color);
    draw_line_segment_mut(image, (x, y - arm), (x, y + arm), color);
}

/// Full-frame crosshair for driver mode.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CrosshairParams {
    pub enabled: bool,
    pub at: Option<Point2>,
}

#[derive(Debug, Default)]
pub struct CrosshairPipe {
    params: Option<CrosshairParams>,
}

impl CrosshairPipe {
    pub fn new(params: CrosshairParams) -> Self {
        Self {
            params: Some(params),
        }
    }
}

impl Pipe<RgbImage> for CrosshairPipe {
    type Output = RgbImage;
    type Params = CrosshairParams;

    fn name(&self) -> &'static str {
        "crosshair"
    }

    fn set_params(&mut self, params: CrosshairParams) {
        self.params = Some(params);
    }

    fn process(&mut self, mut image: RgbImage) -> Result<RgbImage> {
        let Some(params) = self.params.filter(|p| p.enabled) else {
            return Ok(image);
        };
        let at = params.at.unwrap_or_else(|| {
            Point2::new(
                f64::from(image.width()) / 2.0,
                f64::from(image.height()) / 2.0,
            )
        });
        draw_crosshair(&mut image, at, CROSSHAIR_COLOR);
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraGeometry;
    use crate::contour::tests::boxed;
    use crate::pipe::{Collect2dTargetsParams, Collect2dTargetsPipe, PotentialTarget};
    use crate::settings::CalibrationMode;

    fn targets() -> Vec<TrackedTarget> {
        let mut collect = Collect2dTargetsPipe::new(Collect2dTargetsParams {
            geometry: CameraGeometry::new(70.0, 100, 100).unwrap(),
            calibration: CalibrationMode::None,
        });
        collect
            .run(vec![
                PotentialTarget::new(boxed(10.0, 10.0, 20.0, 20.0)),
                PotentialTarget::new(boxed(60.0, 60.0, 20.0, 20.0)),
            ])
            .unwrap()
            .value
    }

    fn touched(image: &RgbImage, x0: u32, y0: u32, x1: u32, y1: u32) -> bool {
        (y0..y1).any(|y| (x0..x1).any(|x| image.get_pixel(x, y).0 != [0, 0, 0]))
    }

    #[test]
    fn only_best_target_unless_multiple() {
        let targets = targets();
        let mut pipe = DrawTargetsPipe::default();
        let out = pipe
            .run((RgbImage::new(100, 100), targets.as_slice()))
            .unwrap()
            .value;
        assert!(touched(&out, 5, 5, 35, 35));
        assert!(!touched(&out, 55, 55, 95, 95));

        pipe.set_params(DrawTargetsParams {
            show_multiple: true,
            ..DrawTargetsParams::default()
        });
        let out = pipe
            .run((RgbImage::new(100, 100), targets.as_slice()))
            .unwrap()
            .value;
        assert!(touched(&out, 55, 55, 95, 95));
    }

    #[test]
    fn crosshair_marks_the_center() {
        let mut pipe = CrosshairPipe::new(CrosshairParams {
            enabled: true,
            at: None,
        });
        let out = pipe.run(RgbImage::new(64, 48)).unwrap().value;
        assert_eq!(out.get_pixel(32, 24).0, CROSSHAIR_COLOR.0);

        pipe.set_params(CrosshairParams {
            enabled: false,
            at: None,
        });
        let out = pipe.run(RgbImage::new(64, 48)).unwrap().value;
        assert!(!touched(&out, 0, 0, 64, 48));
    }
}
