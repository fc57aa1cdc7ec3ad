//! Camera-relative pose of planar targets.
//!
//! The four ordered target corners are matched against a planar model. An
//! initial pose comes from decomposing the model-to-image homography in
//! normalized camera coordinates; Levenberg-Marquardt over the rotation vector
//! and translation then minimizes pixel reprojection error, distortion
//! included. Targets whose solve does not converge keep their 2D data only.

use anyhow::Result;
use nalgebra::{Matrix3, Rotation3, SMatrix, SVector, SymmetricEigen, Vector3};

use super::Pipe;
use crate::camera::CameraIntrinsics;
use crate::geometry::Point2;
use crate::settings::TargetModel;
use crate::target::{TargetPose, TrackedTarget};

/// Solves with a larger RMS pixel error are discarded.
pub const MAX_REPROJECTION_ERROR: f64 = 2.0;
const MAX_ITERATIONS: usize = 50;

type PoseVector = SVector<f64, 6>;
type Residuals = SVector<f64, 8>;

#[derive(Clone, Debug, PartialEq)]
pub struct SolvePoseParams {
    pub model: Option<TargetModel>,
    pub intrinsics: CameraIntrinsics,
}

#[derive(Debug)]
pub struct SolvePosePipe {
    params: SolvePoseParams,
}

impl SolvePosePipe {
    pub fn new(params: SolvePoseParams) -> Self {
        Self { params }
    }
}

impl Pipe<Vec<TrackedTarget>> for SolvePosePipe {
    type Output = Vec<TrackedTarget>;
    type Params = SolvePoseParams;

    fn name(&self) -> &'static str {
        "solve_pose"
    }

    fn set_params(&mut self, params: SolvePoseParams) {
        self.params = params;
    }

    fn process(&mut self, mut input: Vec<TrackedTarget>) -> Result<Vec<TrackedTarget>> {
        let Some(model) = &self.params.model else {
            return Ok(input);
        };
        for target in &mut input {
            target.pose = solve_planar_pose(model, &self.params.intrinsics, &target.corners);
            if target.pose.is_none() {
                log::debug!("pose solve did not converge for target at {:?}", target.center);
            }
        }
        Ok(input)
    }
}

/// Pose of `model` given its corners observed at `image` (same order).
pub fn solve_planar_pose(
    model: &TargetModel,
    intrinsics: &CameraIntrinsics,
    image: &[Point2; 4],
) -> Option<TargetPose> {
    if !model.is_planar() || !intrinsics.is_valid() {
        return None;
    }

    let normalized = image.map(|p| intrinsics.undistort_pixel(p));
    let h = homography(&model.corners, &normalized)?;
    let (rotation, translation) = decompose(&h)?;

    let axis = rotation.scaled_axis();
    let initial = PoseVector::from_column_slice(&[
        axis.x,
        axis.y,
        axis.z,
        translation.x,
        translation.y,
        translation.z,
    ]);
    let (pose, cost) = refine(model, intrinsics, image, initial)?;

    let rms = (cost / 4.0).sqrt();
    if !rms.is_finite() || rms > MAX_REPROJECTION_ERROR {
        return None;
    }
    Some(TargetPose {
        rotation: [pose[0], pose[1], pose[2]],
        translation: [pose[3], pose[4], pose[5]],
        reprojection_error: rms,
    })
}

/// Direct linear transform from model plane (x, y) to normalized image points.
fn homography(model: &[[f64; 3]; 4], image: &[(f64, f64); 4]) -> Option<Matrix3<f64>> {
    let mut a = SMatrix::<f64, 8, 9>::zeros();
    for (i, (m, &(x, y))) in model.iter().zip(image).enumerate() {
        let (mx, my) = (m[0], m[1]);
        let rows = [
            [mx, my, 1.0, 0.0, 0.0, 0.0, -x * mx, -x * my, -x],
            [0.0, 0.0, 0.0, mx, my, 1.0, -y * mx, -y * my, -y],
        ];
        for (offset, row) in rows.iter().enumerate() {
            for (col, value) in row.iter().enumerate() {
                a[(2 * i + offset, col)] = *value;
            }
        }
    }

    let eigen = SymmetricEigen::new(a.transpose() * a);
    let (smallest, _) = eigen
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|l, r| l.1.total_cmp(r.1))?;
    let v = eigen.eigenvectors.column(smallest);
    let h = Matrix3::new(v[0], v[1], v[2], v[3], v[4], v[5], v[6], v[7], v[8]);
    h.iter().all(|x| x.is_finite()).then_some(h)
}

/// Split `H ~ [r1 r2 t]` into a proper rotation and a translation in front of
/// the camera.
fn decompose(h: &Matrix3<f64>) -> Option<(Rotation3<f64>, Vector3<f64>)> {
    let h1: Vector3<f64> = h.column(0).into_owned();
    let h2: Vector3<f64> = h.column(1).into_owned();
    let h3: Vector3<f64> = h.column(2).into_owned();

    let norm = (h1.norm() + h2.norm()) / 2.0;
    if norm < 1e-12 {
        return None;
    }
    let scale = if h3.z < 0.0 { -1.0 / norm } else { 1.0 / norm };

    let r1 = h1 * scale;
    let r2 = h2 * scale;
    let r3 = r1.cross(&r2);
    let translation = h3 * scale;

    let svd = Matrix3::from_columns(&[r1, r2, r3]).svd(true, true);
    let mut u = svd.u?;
    let v_t = svd.v_t?;
    if (u * v_t).determinant() < 0.0 {
        u.column_mut(2).neg_mut();
    }
    Some((Rotation3::from_matrix_unchecked(u * v_t), translation))
}

fn residuals(
    model: &TargetModel,
    intrinsics: &CameraIntrinsics,
    image: &[Point2; 4],
    pose: &PoseVector,
) -> Option<Residuals> {
    let rotation = Rotation3::from_scaled_axis(Vector3::new(pose[0], pose[1], pose[2]));
    let translation = Vector3::new(pose[3], pose[4], pose[5]);

    let mut r = Residuals::zeros();
    for (i, (corner, observed)) in model.corners.iter().zip(image).enumerate() {
        let p = rotation * Vector3::new(corner[0], corner[1], corner[2]) + translation;
        if p.z <= 1e-9 {
            return None;
        }
        let projected = intrinsics.project(p.x / p.z, p.y / p.z);
        r[2 * i] = projected.x - observed.x;
        r[2 * i + 1] = projected.y - observed.y;
    }
    Some(r)
}

/// Levenberg-Marquardt with a forward-difference Jacobian. Returns the pose and
/// its summed squared residual.
fn refine(
    model: &TargetModel,
    intrinsics: &CameraIntrinsics,
    image: &[Point2; 4],
    initial: PoseVector,
) -> Option<(PoseVector, f64)> {
    let mut pose = initial;
    let mut r = residuals(model, intrinsics, image, &pose)?;
    let mut cost = r.norm_squared();
    let mut lambda = 1e-3;

    for _ in 0..MAX_ITERATIONS {
        if cost < 1e-18 {
            break;
        }

        let mut jacobian = SMatrix::<f64, 8, 6>::zeros();
        for k in 0..6 {
            let step = 1e-7 * pose[k].abs().max(1.0);
            let mut nudged = pose;
            nudged[k] += step;
            let rk = residuals(model, intrinsics, image, &nudged)?;
            jacobian.set_column(k, &((rk - r) / step));
        }

        let jtj = jacobian.transpose() * jacobian;
        let gradient = jacobian.transpose() * r;
        let mut damped = jtj;
        for d in 0..6 {
            damped[(d, d)] += lambda * jtj[(d, d)].max(1e-9);
        }
        let Some(delta) = damped.lu().solve(&(-gradient)) else {
            break;
        };

        let candidate = pose + delta;
        match residuals(model, intrinsics, image, &candidate) {
            Some(rc) if rc.norm_squared() < cost => {
                pose = candidate;
                r = rc;
                cost = r.norm_squared();
                lambda = (lambda * 0.1).max(1e-12);
                if delta.norm() < 1e-12 {
                    break;
                }
            }
            _ => {
                lambda *= 10.0;
                if lambda > 1e10 {
                    break;
                }
            }
        }
    }
    Some((pose, cost))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraGeometry;
    use approx::assert_abs_diff_eq;

    fn intrinsics() -> CameraIntrinsics {
        CameraIntrinsics::from_geometry(&CameraGeometry::new(75.0, 960, 720).unwrap())
    }

    fn project(
        model: &TargetModel,
        intrinsics: &CameraIntrinsics,
        rvec: [f64; 3],
        t: [f64; 3],
    ) -> [Point2; 4] {
        let rotation = Rotation3::from_scaled_axis(Vector3::from(rvec));
        let t = Vector3::from(t);
        model.corners.map(|c| {
            let p = rotation * Vector3::from(c) + t;
            intrinsics.project(p.x / p.z, p.y / p.z)
        })
    }

    #[test]
    fn recovers_a_known_pose() {
        let model = TargetModel::rectangle(0.4, 0.2);
        let k = intrinsics();
        let (rvec, t) = ([0.1, -0.25, 0.05], [0.15, -0.05, 2.5]);
        let image = project(&model, &k, rvec, t);

        let pose = solve_planar_pose(&model, &k, &image).unwrap();
        for i in 0..3 {
            assert_abs_diff_eq!(pose.rotation[i], rvec[i], epsilon = 1e-4);
            assert_abs_diff_eq!(pose.translation[i], t[i], epsilon = 1e-4);
        }
        assert!(pose.reprojection_error < 1e-3);
        assert_abs_diff_eq!(pose.distance(), 6.275f64.sqrt(), epsilon = 1e-3);
    }

    #[test]
    fn accounts_for_lens_distortion() {
        let model = TargetModel::rectangle(0.5, 0.5);
        let mut k = intrinsics();
        k.distortion = [0.08, -0.02, 0.0, 0.0, 0.0];
        let (rvec, t) = ([0.0, 0.3, 0.0], [-0.3, 0.1, 3.0]);
        let image = project(&model, &k, rvec, t);

        let pose = solve_planar_pose(&model, &k, &image).unwrap();
        for i in 0..3 {
            assert_abs_diff_eq!(pose.translation[i], t[i], epsilon = 1e-3);
        }
    }

    #[test]
    fn non_planar_models_are_not_solved() {
        let mut model = TargetModel::rectangle(0.4, 0.2);
        model.corners[2][2] = 0.1;
        let k = intrinsics();
        let image = project(&TargetModel::rectangle(0.4, 0.2), &k, [0.0; 3], [0.0, 0.0, 2.0]);
        assert!(solve_planar_pose(&model, &k, &image).is_none());
    }

    fn target_with_corners(corners: [Point2; 4]) -> TrackedTarget {
        TrackedTarget {
            offset: Point2::new(479.5, 359.5),
            center: Point2::new(530.0, 330.0),
            pitch: 3.5,
            yaw: 4.25,
            area: 1.5,
            skew: 0.0,
            min_area_rect: Default::default(),
            bounding_rect: Default::default(),
            corners,
            pose: None,
            detection: None,
        }
    }

    #[test]
    fn unsolvable_targets_keep_their_2d_data() {
        let mut pipe = SolvePosePipe::new(SolvePoseParams {
            model: Some(TargetModel::rectangle(0.4, 0.4)),
            intrinsics: intrinsics(),
        });
        // Corners in crossed order cannot be the image of a rectangle in
        // front of the camera.
        let crossed = [
            Point2::new(480.0, 280.0),
            Point2::new(580.0, 280.0),
            Point2::new(480.0, 380.0),
            Point2::new(580.0, 380.0),
        ];
        let good = project(
            &TargetModel::rectangle(0.4, 0.4),
            &intrinsics(),
            [0.0; 3],
            [0.0, 0.0, 2.0],
        );
        let input = vec![target_with_corners(crossed), target_with_corners(good)];

        let out = pipe.run(input.clone()).unwrap().value;
        assert_eq!(out.len(), 2);
        assert!(out[0].pose.is_none());
        assert_eq!(out[0], input[0]);
        assert!(out[1].pose.is_some());
        assert_eq!(out[1].pitch, input[1].pitch);
        assert_eq!(out[1].area, input[1].area);
    }

    #[test]
    fn pipe_without_model_passes_targets_through() {
        let mut pipe = SolvePosePipe::new(SolvePoseParams {
            model: None,
            intrinsics: intrinsics(),
        });
        assert!(pipe.run(Vec::new()).unwrap().value.is_empty());
    }
}
