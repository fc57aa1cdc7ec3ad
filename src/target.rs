//! Targets as published to consumers.

use serde::Serialize;

use crate::geometry::{Point2, Rect, RotatedRect};

/// Camera-relative pose of a target, OpenCV convention (x right, y down,
/// z forward). Translation is in the units of the target model.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct TargetPose {
    /// Rodrigues rotation vector in radians.
    pub rotation: [f64; 3],
    pub translation: [f64; 3],
    /// RMS reprojection error in pixels.
    pub reprojection_error: f64,
}

impl TargetPose {
    pub fn distance(&self) -> f64 {
        let [x, y, z] = self.translation;
        (x * x + y * y + z * z).sqrt()
    }
}

/// Class reported by a detector backend for an object-detection target.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetectedClass {
    pub class_id: u32,
    pub label: Option<String>,
    pub confidence: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrackedTarget {
    /// Aim-point origin the angles were measured from.
    pub offset: Point2,
    pub center: Point2,
    pub pitch: f64,
    pub yaw: f64,
    /// Percent of the image area.
    pub area: f64,
    pub skew: f64,
    pub min_area_rect: RotatedRect,
    pub bounding_rect: Rect,
    /// Top-left, top-right, bottom-right, bottom-left.
    pub corners: [Point2; 4],
    pub pose: Option<TargetPose>,
    pub detection: Option<DetectedClass>,
}
