//! Pixel candidates to angle-bearing targets.

use anyhow::Result;

use super::group::PotentialTarget;
use super::Pipe;
use crate::camera::CameraGeometry;
use crate::geometry::order_corners;
use crate::settings::CalibrationMode;
use crate::target::TrackedTarget;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Collect2dTargetsParams {
    pub geometry: CameraGeometry,
    pub calibration: CalibrationMode,
}

#[derive(Debug)]
pub struct Collect2dTargetsPipe {
    params: Collect2dTargetsParams,
}

impl Collect2dTargetsPipe {
    pub fn new(params: Collect2dTargetsParams) -> Self {
        Self { params }
    }

    pub fn collect_one(&self, candidate: PotentialTarget) -> TrackedTarget {
        let geometry = &self.params.geometry;
        let rect = *candidate.rect();
        let offset = geometry.calibrated_offset(self.params.calibration, rect.center);

        TrackedTarget {
            offset,
            center: rect.center,
            pitch: geometry.pitch(rect.center.y, offset.y),
            yaw: geometry.yaw(rect.center.x, offset.x),
            area: rect.area() / geometry.image_area * 100.0,
            skew: rect.angle,
            min_area_rect: rect,
            bounding_rect: candidate.contour.bounding_rect(),
            corners: order_corners(rect.corners()),
            pose: None,
            detection: candidate.detection,
        }
    }
}

impl Pipe<Vec<PotentialTarget>> for Collect2dTargetsPipe {
    type Output = Vec<TrackedTarget>;
    type Params = Collect2dTargetsParams;

    fn name(&self) -> &'static str {
        "collect_2d_targets"
    }

    fn set_params(&mut self, params: Collect2dTargetsParams) {
        self.params = params;
    }

    fn process(&mut self, input: Vec<PotentialTarget>) -> Result<Vec<TrackedTarget>> {
        Ok(input.into_iter().map(|c| self.collect_one(c)).collect())
    }
}
