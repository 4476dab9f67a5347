//! Board pose relative to the camera: linear initialization from a plane
//! homography and Gauss-Newton refinement of the six pose parameters.

use crate::camera::{FisheyeDistortion, Intrinsics};
use crate::error::FisheyeError;
use crate::projection::{condition_number, numeric_jacobian, project_points, stacked, undistort_point};
use fisheye_core::estimate_homography;
use log::trace;
use nalgebra::{DVector, Matrix3, Point2, Point3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

const REFINE_ITERS: usize = 20;
const REFINE_TOL: f64 = 1e-10;

/// Rigid transform from object (board) frame to camera frame.
///
/// `rvec` is an axis-angle rotation vector, `tvec` a translation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub rvec: Vector3<f64>,
    pub tvec: Vector3<f64>,
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

impl Pose {
    pub fn new(rvec: Vector3<f64>, tvec: Vector3<f64>) -> Self {
        Self { rvec, tvec }
    }

    pub fn identity() -> Self {
        Self::new(Vector3::zeros(), Vector3::zeros())
    }

    pub fn from_rotation(rotation: &Rotation3<f64>, tvec: Vector3<f64>) -> Self {
        Self::new(rotation.scaled_axis(), tvec)
    }

    pub fn rotation(&self) -> Rotation3<f64> {
        Rotation3::new(self.rvec)
    }

    #[inline]
    pub fn transform_point(&self, p: &Point3<f64>) -> Point3<f64> {
        self.rotation() * p + self.tvec
    }

    pub(crate) fn to_params(self) -> [f64; 6] {
        [
            self.rvec.x,
            self.rvec.y,
            self.rvec.z,
            self.tvec.x,
            self.tvec.y,
            self.tvec.z,
        ]
    }

    pub(crate) fn from_params(p: &[f64]) -> Self {
        Self::new(Vector3::new(p[0], p[1], p[2]), Vector3::new(p[3], p[4], p[5]))
    }
}

/// Rotation taking centered object points into a frame where they lie in `z = 0`.
fn plane_frame(object: &[Point3<f64>], mean: &Vector3<f64>) -> Matrix3<f64> {
    let mut cov = Matrix3::zeros();
    for p in object {
        let d = p.coords - mean;
        cov += d * d.transpose();
    }
    let eig = cov.symmetric_eigen();
    let values = eig.eigenvalues;
    let imin = values.imin();
    let imax = values.imax();
    let n = eig.eigenvectors.column(imin).into_owned();
    if n.x.hypot(n.y) < 1e-6 || imin == imax {
        return Matrix3::identity();
    }
    let e1 = eig.eigenvectors.column(imax).into_owned();
    let e2 = n.cross(&e1);
    Matrix3::from_rows(&[e1.transpose(), e2.transpose(), n.transpose()])
}

/// Closed-form pose of a planar target from observed pixels.
pub fn init_pose(
    object: &[Point3<f64>],
    pixels: &[Point2<f64>],
    intrinsics: &Intrinsics,
    distortion: &FisheyeDistortion,
) -> Result<Pose, FisheyeError> {
    if object.len() != pixels.len() || object.len() < 4 {
        return Err(FisheyeError::MismatchedInput(format!(
            "pose needs at least 4 matching points (object={}, image={})",
            object.len(),
            pixels.len()
        )));
    }

    let normalized = pixels
        .iter()
        .map(|&p| undistort_point(p, intrinsics, distortion))
        .collect::<Option<Vec<_>>>()
        .ok_or(FisheyeError::NumericalFailure("corner outside the invertible lens domain"))?;

    let mean = object.iter().fold(Vector3::zeros(), |acc, p| acc + p.coords) / object.len() as f64;
    let plane = plane_frame(object, &mean);
    let board: Vec<Point2<f64>> = object
        .iter()
        .map(|p| {
            let q = plane * (p.coords - mean);
            Point2::new(q.x, q.y)
        })
        .collect();

    let mut h = estimate_homography(&board, &normalized)
        .ok_or(FisheyeError::NumericalFailure("degenerate plane homography"))?
        .h;
    let sc = 0.5 * (h.column(0).norm() + h.column(1).norm());
    if sc <= f64::EPSILON {
        return Err(FisheyeError::NumericalFailure("degenerate plane homography"));
    }
    h /= sc;
    // keep the board in front of the camera
    if h[(2, 2)] < 0.0 {
        h = -h;
    }

    let u1 = h.column(0).normalize();
    let h2 = h.column(1).into_owned();
    let u2 = (h2 - u1 * u1.dot(&h2)).normalize();
    let u3 = u1.cross(&u2);
    let r_plane = Matrix3::from_columns(&[u1, u2, u3]);

    let r = r_plane * plane;
    let t = h.column(2) - r * mean;
    Ok(Pose::from_rotation(&Rotation3::from_matrix_unchecked(r), t))
}

/// Gauss-Newton on the pose with fixed intrinsics.
///
/// When `cond_threshold` is set, a pose Jacobian whose condition number
/// exceeds it aborts with [`FisheyeError::IllConditioned`] tagged with `view`.
pub fn refine_pose(
    object: &[Point3<f64>],
    pixels: &[Point2<f64>],
    intrinsics: &Intrinsics,
    distortion: &FisheyeDistortion,
    pose: Pose,
    cond_threshold: Option<f64>,
    view: usize,
) -> Result<Pose, FisheyeError> {
    let observed = stacked(pixels);
    let rows = observed.len();
    let project = |p: &[f64]| stacked(&project_points(object, &Pose::from_params(p), intrinsics, distortion));

    let mut params = DVector::from_row_slice(&pose.to_params());
    for iter in 0..REFINE_ITERS {
        let jac = numeric_jacobian(params.as_slice(), &[0, 1, 2, 3, 4, 5], rows, &project);
        if let Some(threshold) = cond_threshold {
            let condition = condition_number(&jac);
            if condition > threshold {
                return Err(FisheyeError::IllConditioned { view, condition });
            }
        }
        let residual = &observed - project(params.as_slice());
        let jtj = jac.transpose() * &jac;
        let jte = jac.transpose() * residual;
        let delta = jtj
            .cholesky()
            .ok_or(FisheyeError::NumericalFailure("singular pose normal equations"))?
            .solve(&jte);
        params += &delta;

        let change = delta.norm() / params.norm().max(f64::EPSILON);
        if change < REFINE_TOL {
            trace!("view {view}: pose converged after {} iterations", iter + 1);
            break;
        }
    }
    Ok(Pose::from_params(params.as_slice()))
}

/// Ratio of the two principal extents of the object points; infinite when
/// they are collinear.
fn spread_condition(object: &[Point3<f64>]) -> f64 {
    let n = object.len().max(1) as f64;
    let mean = object.iter().fold(Vector3::zeros(), |acc, p| acc + p.coords) / n;
    let mut cov = Matrix3::zeros();
    for p in object {
        let d = p.coords - mean;
        cov += d * d.transpose();
    }
    let mut ev: Vec<f64> = cov.symmetric_eigenvalues().iter().copied().collect();
    ev.sort_by(|a, b| b.total_cmp(a));
    if ev[1] <= ev[0] * 1e-24 {
        f64::INFINITY
    } else {
        (ev[0] / ev[1]).sqrt()
    }
}

/// Initialize and refine the pose of one view.
pub fn estimate_pose(
    object: &[Point3<f64>],
    pixels: &[Point2<f64>],
    intrinsics: &Intrinsics,
    distortion: &FisheyeDistortion,
    cond_threshold: Option<f64>,
    view: usize,
) -> Result<Pose, FisheyeError> {
    if let Some(threshold) = cond_threshold {
        let condition = spread_condition(object);
        if condition > threshold {
            return Err(FisheyeError::IllConditioned { view, condition });
        }
    }
    let init = init_pose(object, pixels, intrinsics, distortion)?;
    refine_pose(object, pixels, intrinsics, distortion, init, cond_threshold, view)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use fisheye_core::GridSize;

    fn camera() -> (Intrinsics, FisheyeDistortion) {
        (
            Intrinsics::new(300.0, 302.0, 320.0, 240.0),
            FisheyeDistortion::new([0.02, -0.005, 0.001, 0.0]),
        )
    }

    #[test]
    fn recovers_tilted_board_pose() {
        let (k, d) = camera();
        let object = GridSize::new(8, 6).object_points();
        let truth = Pose::new(Vector3::new(0.3, -0.2, 0.1), Vector3::new(-3.0, -2.0, 7.0));
        let pixels = project_points(&object, &truth, &k, &d);

        let est = estimate_pose(&object, &pixels, &k, &d, Some(1e6), 0).expect("pose");
        assert_relative_eq!(est.rvec, truth.rvec, epsilon = 1e-8);
        assert_relative_eq!(est.tvec, truth.tvec, epsilon = 1e-7);
    }

    #[test]
    fn linear_init_is_close() {
        let (k, d) = camera();
        let object = GridSize::new(5, 4).object_points();
        let truth = Pose::new(Vector3::new(-0.1, 0.25, 0.0), Vector3::new(-2.0, -1.5, 5.0));
        let pixels = project_points(&object, &truth, &k, &d);

        let init = init_pose(&object, &pixels, &k, &d).expect("init");
        assert_relative_eq!(init.rvec, truth.rvec, epsilon = 1e-6);
        assert_relative_eq!(init.tvec, truth.tvec, epsilon = 1e-6);
    }

    #[test]
    fn too_few_points_are_rejected() {
        let (k, d) = camera();
        let object = vec![Point3::origin(); 3];
        let pixels = vec![Point2::origin(); 3];
        assert!(matches!(
            init_pose(&object, &pixels, &k, &d),
            Err(FisheyeError::MismatchedInput(_))
        ));
    }

    #[test]
    fn collinear_points_are_ill_conditioned() {
        let (k, d) = camera();
        let object: Vec<Point3<f64>> = (0..6).map(|i| Point3::new(i as f64, 0.0, 0.0)).collect();
        let pose = Pose::new(Vector3::zeros(), Vector3::new(-2.5, 0.0, 5.0));
        let pixels = project_points(&object, &pose, &k, &d);
        let err = refine_pose(&object, &pixels, &k, &d, pose, Some(1e6), 3).unwrap_err();
        assert!(matches!(err, FisheyeError::IllConditioned { view: 3, .. }));
    }
}
