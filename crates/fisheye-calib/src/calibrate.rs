//! Joint estimation of fisheye intrinsics, distortion and per-view poses.
//!
//! Each iteration linearizes the reprojection residuals of all views,
//! eliminates the pose blocks from the normal equations (Schur complement)
//! and applies a damped step to the intrinsic parameters. Poses are either
//! re-estimated from scratch with the new intrinsics or updated by
//! back-substitution.

use crate::camera::{FisheyeDistortion, Intrinsics};
use crate::error::FisheyeError;
use crate::pose::{estimate_pose, Pose};
use crate::projection::{condition_number, numeric_jacobian, project_points, stacked};
use log::{debug, info};
use nalgebra::{DMatrix, DVector, Matrix3, Point2, Point3, Vector4};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Layout of the intrinsic parameter vector: `[fx, fy, cx, cy, skew, k1, k2, k3, k4]`.
const N_INTRINSIC: usize = 9;
const POSE_COLUMNS: [usize; 6] = [9, 10, 11, 12, 13, 14];
/// Damping of the intrinsic step: `alpha = 1 - (1 - SMOOTH)^(iter + 1)`.
const SMOOTH: f64 = 0.4;

/// Solver configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub max_iter: usize,
    /// Stop when the relative change of `(fx, fy, cx, cy)` or the change of
    /// the RMS reprojection error drops to this value.
    pub eps: f64,
    /// Keep `skew` at zero (rectangular pixels).
    pub fix_skew: bool,
    pub fix_principal_point: bool,
    /// Keep individual distortion coefficients at their initial value.
    pub fix_k: [bool; 4],
    /// Re-estimate every pose from scratch after each intrinsic update.
    pub recompute_extrinsic: bool,
    /// Reject views whose pose Jacobian is ill-conditioned.
    pub check_cond: bool,
    pub cond_threshold: f64,
    /// Start from the supplied intrinsics instead of the sensor-size guess.
    pub use_intrinsic_guess: bool,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            max_iter: 30,
            eps: 1e-6,
            fix_skew: true,
            fix_principal_point: false,
            fix_k: [false; 4],
            recompute_extrinsic: true,
            check_cond: true,
            cond_threshold: 1e6,
            use_intrinsic_guess: false,
        }
    }
}

impl CalibrationConfig {
    fn free_parameters(&self) -> Vec<usize> {
        let mut free = vec![0, 1];
        if !self.fix_principal_point {
            free.extend([2, 3]);
        }
        if !self.fix_skew {
            free.push(4);
        }
        free.extend((0..4).filter(|&i| !self.fix_k[i]).map(|i| 5 + i));
        free
    }

    fn cond(&self) -> Option<f64> {
        self.check_cond.then_some(self.cond_threshold)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CalibrationResult {
    /// Root mean square reprojection error over all points, pixels.
    pub rms: f64,
    pub intrinsics: Intrinsics,
    pub distortion: FisheyeDistortion,
    /// Board pose of every view, in input order.
    pub poses: Vec<Pose>,
    pub per_view_rms: Vec<f64>,
    pub iterations: usize,
    pub converged: bool,
}

impl CalibrationResult {
    pub fn camera_matrix(&self) -> Matrix3<f64> {
        self.intrinsics.matrix()
    }
}

fn pack(intrinsics: &Intrinsics, distortion: &FisheyeDistortion) -> [f64; N_INTRINSIC] {
    let k = intrinsics.to_array();
    let d = distortion.k;
    [k[0], k[1], k[2], k[3], k[4], d[0], d[1], d[2], d[3]]
}

fn unpack(p: &[f64]) -> (Intrinsics, FisheyeDistortion) {
    (
        Intrinsics::from_array(&p[..5]),
        FisheyeDistortion::new([p[5], p[6], p[7], p[8]]),
    )
}

fn validate(
    object_points: &[Vec<Point3<f64>>],
    image_points: &[Vec<Point2<f64>>],
    image_size: (usize, usize),
) -> Result<(), FisheyeError> {
    if object_points.is_empty() || image_points.is_empty() {
        return Err(FisheyeError::InsufficientData {
            views: object_points.len().min(image_points.len()),
        });
    }
    if object_points.len() != image_points.len() {
        return Err(FisheyeError::MismatchedInput(format!(
            "{} object point sets vs {} image point sets",
            object_points.len(),
            image_points.len()
        )));
    }
    if image_size.0 == 0 || image_size.1 == 0 {
        return Err(FisheyeError::MismatchedInput(format!(
            "image size {}x{}",
            image_size.0, image_size.1
        )));
    }
    for (view, (obj, img)) in object_points.iter().zip(image_points).enumerate() {
        if obj.len() != img.len() || obj.len() < 4 {
            return Err(FisheyeError::MismatchedInput(format!(
                "view {view}: {} object points vs {} image points",
                obj.len(),
                img.len()
            )));
        }
    }
    Ok(())
}

fn estimate_all_poses(
    object_points: &[Vec<Point3<f64>>],
    image_points: &[Vec<Point2<f64>>],
    intrinsics: &Intrinsics,
    distortion: &FisheyeDistortion,
    cond: Option<f64>,
) -> Result<Vec<Pose>, FisheyeError> {
    object_points
        .iter()
        .zip(image_points)
        .enumerate()
        .map(|(view, (obj, img))| estimate_pose(obj, img, intrinsics, distortion, cond, view))
        .collect()
}

/// Sum of squared pixel residuals of one view.
fn view_sse(
    object: &[Point3<f64>],
    pixels: &[Point2<f64>],
    pose: &Pose,
    intrinsics: &Intrinsics,
    distortion: &FisheyeDistortion,
) -> f64 {
    project_points(object, pose, intrinsics, distortion)
        .iter()
        .zip(pixels)
        .map(|(p, o)| (p - o).norm_squared())
        .sum()
}

/// RMS reprojection error over all points of all views.
pub fn reprojection_rms(
    object_points: &[Vec<Point3<f64>>],
    image_points: &[Vec<Point2<f64>>],
    poses: &[Pose],
    intrinsics: &Intrinsics,
    distortion: &FisheyeDistortion,
) -> f64 {
    let mut sse = 0.0;
    let mut n = 0usize;
    for ((obj, img), pose) in object_points.iter().zip(image_points).zip(poses) {
        sse += view_sse(obj, img, pose, intrinsics, distortion);
        n += obj.len();
    }
    if n == 0 {
        return 0.0;
    }
    (sse / n as f64).sqrt()
}

/// Gauss-Newton step of the joint problem: the intrinsic part and the
/// back-substituted pose parts.
struct JointStep {
    intrinsics: DVector<f64>,
    poses: Vec<DVector<f64>>,
}

struct ViewBlock {
    v_inv: DMatrix<f64>,
    w: DMatrix<f64>,
    eb: DVector<f64>,
}

fn joint_step(
    object_points: &[Vec<Point3<f64>>],
    image_points: &[Vec<Point2<f64>>],
    poses: &[Pose],
    intrinsic_params: &[f64; N_INTRINSIC],
    free: &[usize],
    cond: Option<f64>,
) -> Result<JointStep, FisheyeError> {
    let m = free.len();
    let mut s = DMatrix::<f64>::zeros(m, m);
    let mut rhs = DVector::<f64>::zeros(m);
    let mut blocks = Vec::with_capacity(poses.len());

    for (view, ((obj, img), pose)) in object_points.iter().zip(image_points).zip(poses).enumerate() {
        let mut params = intrinsic_params.to_vec();
        params.extend(pose.to_params());

        let project = |p: &[f64]| {
            let (k, d) = unpack(&p[..N_INTRINSIC]);
            stacked(&project_points(obj, &Pose::from_params(&p[N_INTRINSIC..]), &k, &d))
        };
        let observed = stacked(img);
        let rows = observed.len();

        let jc = numeric_jacobian(&params, free, rows, &project);
        let jp = numeric_jacobian(&params, &POSE_COLUMNS, rows, &project);
        if let Some(threshold) = cond {
            let condition = condition_number(&jp);
            if condition > threshold {
                return Err(FisheyeError::IllConditioned { view, condition });
            }
        }
        let e = observed - project(&params);

        s += jc.tr_mul(&jc);
        rhs += jc.tr_mul(&e);

        let v_inv = jp
            .tr_mul(&jp)
            .try_inverse()
            .ok_or(FisheyeError::NumericalFailure("singular pose block"))?;
        let w = jc.tr_mul(&jp);
        let eb = jp.tr_mul(&e);
        let w_vinv = &w * &v_inv;
        s -= &w_vinv * w.transpose();
        rhs -= &w_vinv * &eb;
        blocks.push(ViewBlock { v_inv, w, eb });
    }

    let dc = s
        .cholesky()
        .ok_or(FisheyeError::NumericalFailure("intrinsic normal equations are not positive definite"))?
        .solve(&rhs);
    let dposes = blocks
        .iter()
        .map(|b| &b.v_inv * (&b.eb - b.w.tr_mul(&dc)))
        .collect();
    Ok(JointStep {
        intrinsics: dc,
        poses: dposes,
    })
}

#[inline]
fn focal_center(p: &[f64]) -> Vector4<f64> {
    Vector4::new(p[0], p[1], p[2], p[3])
}

/// Calibrate a fisheye camera from planar-target correspondences.
///
/// `object_points[i]` and `image_points[i]` describe view `i`; both lists and
/// every pair of per-view lists must have matching lengths. `initial` is used
/// only when [`CalibrationConfig::use_intrinsic_guess`] is set and holds
/// valid intrinsics.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip_all, fields(views = object_points.len()))
)]
pub fn calibrate_fisheye(
    object_points: &[Vec<Point3<f64>>],
    image_points: &[Vec<Point2<f64>>],
    image_size: (usize, usize),
    initial: Option<(Intrinsics, FisheyeDistortion)>,
    config: &CalibrationConfig,
) -> Result<CalibrationResult, FisheyeError> {
    validate(object_points, image_points, image_size)?;

    let (mut intrinsics, mut distortion) = match initial {
        Some((k, d)) if config.use_intrinsic_guess && k.is_valid() => (k, d),
        _ => (
            Intrinsics::initial_guess(image_size.0, image_size.1),
            FisheyeDistortion::default(),
        ),
    };
    if config.fix_skew {
        intrinsics.skew = 0.0;
    }

    let free = config.free_parameters();
    let cond = config.cond();
    let mut poses = estimate_all_poses(object_points, image_points, &intrinsics, &distortion, cond)?;
    let mut rms = reprojection_rms(object_points, image_points, &poses, &intrinsics, &distortion);
    debug!(
        "fisheye calibration: {} views, {} free parameters, initial rms {rms:.6}",
        object_points.len(),
        free.len()
    );

    let mut iterations = 0;
    let mut converged = false;
    for iter in 0..config.max_iter {
        iterations = iter + 1;
        let alpha = 1.0 - (1.0 - SMOOTH).powi(iter as i32 + 1);

        let mut params = pack(&intrinsics, &distortion);
        let step = joint_step(object_points, image_points, &poses, &params, &free, cond)?;
        let before = focal_center(&params);
        for (k, &idx) in free.iter().enumerate() {
            params[idx] += alpha * step.intrinsics[k];
        }
        (intrinsics, distortion) = unpack(&params);
        if !intrinsics.is_valid() || distortion.k.iter().any(|k| !k.is_finite()) {
            return Err(FisheyeError::NumericalFailure("calibration diverged"));
        }

        if config.recompute_extrinsic {
            poses = estimate_all_poses(object_points, image_points, &intrinsics, &distortion, cond)?;
        } else {
            for (pose, dp) in poses.iter_mut().zip(&step.poses) {
                let mut p = pose.to_params();
                for (v, d) in p.iter_mut().zip(dp.iter()) {
                    *v += alpha * d;
                }
                *pose = Pose::from_params(&p);
            }
        }

        let after = focal_center(&params);
        let change = (after - before).norm() / after.norm();
        let new_rms = reprojection_rms(object_points, image_points, &poses, &intrinsics, &distortion);
        let rms_change = (new_rms - rms).abs();
        rms = new_rms;
        debug!("iteration {iterations}: rms={rms:.6} change={change:.3e}");

        if change <= config.eps || rms_change < config.eps {
            converged = true;
            break;
        }
    }

    if !rms.is_finite() {
        return Err(FisheyeError::NumericalFailure("non-finite reprojection error"));
    }

    let per_view_rms = object_points
        .iter()
        .zip(image_points)
        .zip(&poses)
        .map(|((obj, img), pose)| (view_sse(obj, img, pose, &intrinsics, &distortion) / obj.len() as f64).sqrt())
        .collect();

    info!(
        "fisheye calibration finished: rms={rms:.4}px, {iterations} iterations{}",
        if converged { "" } else { " (not converged)" }
    );

    Ok(CalibrationResult {
        rms,
        intrinsics,
        distortion,
        poses,
        per_view_rms,
        iterations,
        converged,
    })
}
