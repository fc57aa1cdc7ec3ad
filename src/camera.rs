//! Camera metadata and the pinhole geometry model.
//!
//! `CameraGeometry` turns a diagonal field of view and a resolution into
//! focal lengths, which the target stage uses to convert pixel offsets into
//! pitch and yaw. It is immutable: a resolution or FOV change builds a new one.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::geometry::Point2;
use crate::settings::CalibrationMode;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraGeometry {
    pub width: u32,
    pub height: u32,
    pub diagonal_fov: f64,
    pub center: Point2,
    pub horizontal_focal_length: f64,
    pub vertical_focal_length: f64,
    pub image_area: f64,
}

impl CameraGeometry {
    pub fn new(diagonal_fov: f64, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("camera resolution must be non-zero ({}x{})", width, height));
        }
        if !(diagonal_fov > 0.0 && diagonal_fov < 180.0) {
            return Err(anyhow!(
                "diagonal field of view must be within (0, 180) degrees, got {}",
                diagonal_fov
            ));
        }

        let diagonal_view = diagonal_fov.to_radians();
        let divisor = gcd(width, height);
        let numerator = f64::from(width / divisor);
        let denominator = f64::from(height / divisor);
        let diagonal_aspect = numerator.hypot(denominator);
        let half_tan = (diagonal_view / 2.0).tan();

        let horizontal_view = 2.0 * (half_tan * numerator / diagonal_aspect).atan();
        let vertical_view = 2.0 * (half_tan * denominator / diagonal_aspect).atan();

        let (w, h) = (f64::from(width), f64::from(height));
        Ok(Self {
            width,
            height,
            diagonal_fov,
            center: Point2::new(w / 2.0 - 0.5, h / 2.0 - 0.5),
            horizontal_focal_length: w / (2.0 * (horizontal_view / 2.0).tan()),
            vertical_focal_length: h / (2.0 * (vertical_view / 2.0).tan()),
            image_area: w * h,
        })
    }

    pub fn horizontal_fov(&self) -> f64 {
        2.0 * (f64::from(self.width) / (2.0 * self.horizontal_focal_length))
            .atan()
            .to_degrees()
    }

    pub fn vertical_fov(&self) -> f64 {
        2.0 * (f64::from(self.height) / (2.0 * self.vertical_focal_length))
            .atan()
            .to_degrees()
    }

    /// Vertical angle in degrees from `offset_y` to `py`; up is positive.
    pub fn pitch(&self, py: f64, offset_y: f64) -> f64 {
        -((py - offset_y) / self.vertical_focal_length).atan().to_degrees()
    }

    /// Horizontal angle in degrees from `offset_x` to `px`; right is positive.
    pub fn yaw(&self, px: f64, offset_x: f64) -> f64 {
        ((px - offset_x) / self.horizontal_focal_length).atan().to_degrees()
    }

    /// Aim-point origin for a target centred at `target`.
    pub fn calibrated_offset(&self, calibration: CalibrationMode, target: Point2) -> Point2 {
        match calibration {
            CalibrationMode::None => self.center,
            CalibrationMode::SinglePoint { x, y } => Point2::new(x, y),
            CalibrationMode::DualPoint { slope, intercept } => {
                if slope.abs() < 1e-12 {
                    log::debug!("dual-point calibration has zero slope; using image center");
                    return self.center;
                }
                Point2::new(
                    (target.y - intercept) / slope,
                    target.x * slope + intercept,
                )
            }
        }
    }

    /// Same FOV at a different resolution.
    pub fn with_resolution(&self, width: u32, height: u32) -> Result<Self> {
        Self::new(self.diagonal_fov, width, height)
    }
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }
    a.max(1)
}

/// Pinhole intrinsics plus Brown-Conrady distortion `[k1, k2, p1, p2, k3]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    #[serde(default)]
    pub distortion: [f64; 5],
}

impl CameraIntrinsics {
    /// Ideal intrinsics implied by a geometry model, without distortion.
    pub fn from_geometry(geometry: &CameraGeometry) -> Self {
        Self {
            fx: geometry.horizontal_focal_length,
            fy: geometry.vertical_focal_length,
            cx: geometry.center.x,
            cy: geometry.center.y,
            distortion: [0.0; 5],
        }
    }

    pub fn is_valid(&self) -> bool {
        [self.fx, self.fy, self.cx, self.cy]
            .iter()
            .all(|v| v.is_finite())
            && self.fx.abs() > 1e-12
            && self.fy.abs() > 1e-12
    }

    /// Apply lens distortion to normalized coordinates.
    pub fn distort(&self, x: f64, y: f64) -> (f64, f64) {
        let [k1, k2, p1, p2, k3] = self.distortion;
        let r2 = x * x + y * y;
        let radial = 1.0 + k1 * r2 + k2 * r2 * r2 + k3 * r2 * r2 * r2;
        (
            x * radial + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x),
            y * radial + p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y,
        )
    }

    /// Pixel to undistorted normalized coordinates (fixed-point iteration).
    pub fn undistort_pixel(&self, pixel: Point2) -> (f64, f64) {
        let xd = (pixel.x - self.cx) / self.fx;
        let yd = (pixel.y - self.cy) / self.fy;
        if self.distortion.iter().all(|k| *k == 0.0) {
            return (xd, yd);
        }
        let (mut x, mut y) = (xd, yd);
        for _ in 0..20 {
            let (dx, dy) = self.distort(x, y);
            x += xd - dx;
            y += yd - dy;
        }
        (x, y)
    }

    pub fn project(&self, x: f64, y: f64) -> Point2 {
        let (xd, yd) = self.distort(x, y);
        Point2::new(self.fx * xd + self.cx, self.fy * yd + self.cy)
    }
}

/// Stable identifier handed out by the `CameraRegistry`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CameraId(String);

impl CameraId {
    /// Id derived from a display name: lowercase ASCII, everything else `_`.
    pub fn new(name: &str) -> Self {
        CameraId(sanitize_id(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CameraId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CameraInfo {
    pub id: CameraId,
    pub name: String,
    pub diagonal_fov: f64,
    pub intrinsics: Option<CameraIntrinsics>,
}

/// Owns camera identities for the process. Built once at startup.
#[derive(Debug, Default)]
pub struct CameraRegistry {
    cameras: Vec<CameraInfo>,
}

impl CameraRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a camera, suffixing its id when the name is already taken.
    pub fn register(
        &mut self,
        name: &str,
        diagonal_fov: f64,
        intrinsics: Option<CameraIntrinsics>,
    ) -> Result<CameraInfo> {
        if name.trim().is_empty() {
            return Err(anyhow!("camera name must not be empty"));
        }
        let base = CameraId::new(name).0;
        let mut candidate = base.clone();
        let mut suffix = 2;
        while self.get(&candidate).is_some() {
            candidate = format!("{}-{}", base, suffix);
            suffix += 1;
        }
        if candidate != base {
            log::warn!("camera name {:?} already registered; using id {}", name, candidate);
        }

        let info = CameraInfo {
            id: CameraId(candidate),
            name: name.to_string(),
            diagonal_fov,
            intrinsics,
        };
        self.cameras.push(info.clone());
        Ok(info)
    }

    pub fn get(&self, id: &str) -> Option<&CameraInfo> {
        self.cameras.iter().find(|c| c.id.as_str() == id)
    }

    pub fn list(&self) -> &[CameraInfo] {
        &self.cameras
    }
}

fn sanitize_id(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn boresight_has_zero_angles() {
        for (fov, w, h) in [(68.5, 960, 720), (70.0, 640, 480), (100.0, 1280, 720), (45.0, 321, 157)] {
            let g = CameraGeometry::new(fov, w, h).unwrap();
            assert_eq!(g.yaw(g.center.x, g.center.x), 0.0);
            assert_eq!(g.pitch(g.center.y, g.center.y), 0.0);
        }
    }

    #[test]
    fn scenario_960x720_center_is_aimed_straight() {
        let g = CameraGeometry::new(68.5, 960, 720).unwrap();
        assert_relative_eq!(g.center.x, 479.5);
        assert_relative_eq!(g.center.y, 359.5);
        let offset = g.calibrated_offset(CalibrationMode::None, Point2::new(480.0, 360.0));
        assert!(g.yaw(480.0, offset.x).abs() < 0.05);
        assert!(g.pitch(360.0, offset.y).abs() < 0.05);
    }

    #[test]
    fn split_fov_matches_diagonal() {
        let g = CameraGeometry::new(68.5, 960, 720).unwrap();
        // 4:3 sensor: tan(h/2)^2 + tan(v/2)^2 == tan(d/2)^2
        let th = (g.horizontal_fov().to_radians() / 2.0).tan();
        let tv = (g.vertical_fov().to_radians() / 2.0).tan();
        let td = (68.5_f64.to_radians() / 2.0).tan();
        assert_relative_eq!(th * th + tv * tv, td * td, epsilon = 1e-9);
        assert!(g.horizontal_fov() > g.vertical_fov());
    }

    #[test]
    fn angles_have_expected_sign() {
        let g = CameraGeometry::new(70.0, 640, 480).unwrap();
        assert!(g.yaw(600.0, g.center.x) > 0.0);
        assert!(g.pitch(10.0, g.center.y) > 0.0);
    }

    #[test]
    fn rejects_invalid_geometry() {
        assert!(CameraGeometry::new(0.0, 640, 480).is_err());
        assert!(CameraGeometry::new(70.0, 0, 480).is_err());
    }

    #[test]
    fn dual_point_calibration_uses_line() {
        let g = CameraGeometry::new(70.0, 640, 480).unwrap();
        let cal = CalibrationMode::DualPoint {
            slope: 2.0,
            intercept: 10.0,
        };
        let offset = g.calibrated_offset(cal, Point2::new(100.0, 50.0));
        assert_relative_eq!(offset.x, 20.0);
        assert_relative_eq!(offset.y, 210.0);

        let flat = CalibrationMode::DualPoint {
            slope: 0.0,
            intercept: 10.0,
        };
        assert_eq!(g.calibrated_offset(flat, Point2::new(1.0, 1.0)), g.center);
    }

    #[test]
    fn undistort_inverts_distort() {
        let k = CameraIntrinsics {
            fx: 600.0,
            fy: 600.0,
            cx: 320.0,
            cy: 240.0,
            distortion: [-0.1, 0.01, 0.001, -0.001, 0.0],
        };
        let pixel = k.project(0.2, -0.1);
        let (x, y) = k.undistort_pixel(pixel);
        assert_relative_eq!(x, 0.2, epsilon = 1e-6);
        assert_relative_eq!(y, -0.1, epsilon = 1e-6);
    }

    #[test]
    fn registry_disambiguates_duplicate_names() {
        let mut registry = CameraRegistry::new();
        let a = registry.register("Front Cam", 70.0, None).unwrap();
        let b = registry.register("Front Cam", 70.0, None).unwrap();
        assert_eq!(a.id.as_str(), "front_cam");
        assert_eq!(b.id.as_str(), "front_cam-2");
        assert_eq!(registry.list().len(), 2);
        assert!(registry.register("  ", 70.0, None).is_err());
    }
}
