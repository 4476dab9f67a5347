//! Forward and inverse mapping through the equidistant fisheye model.
//!
//! Camera frame point `X` -> pinhole coordinates `a = X.x / X.z`,
//! `b = X.y / X.z` -> `r = |(a, b)|`, `theta = atan(r)` -> distorted
//! normalized point `(a, b) * theta_d / r` -> pixel through [`Intrinsics`].

use crate::camera::{FisheyeDistortion, Intrinsics};
use crate::pose::Pose;
use nalgebra::{DMatrix, DVector, Matrix3, Point2, Point3, Vector3};

const SMALL_RADIUS: f64 = 1e-8;

/// Distort a normalized pinhole point and map it to pixels.
#[inline]
pub fn distort_point(p: Point2<f64>, intrinsics: &Intrinsics, distortion: &FisheyeDistortion) -> Point2<f64> {
    let r = p.coords.norm();
    let scale = if r > SMALL_RADIUS {
        distortion.distort_theta(r.atan()) / r
    } else {
        1.0
    };
    intrinsics.to_pixel(Point2::from(p.coords * scale))
}

pub fn distort_points(
    normalized: &[Point2<f64>],
    intrinsics: &Intrinsics,
    distortion: &FisheyeDistortion,
) -> Vec<Point2<f64>> {
    normalized
        .iter()
        .map(|&p| distort_point(p, intrinsics, distortion))
        .collect()
}

#[inline]
pub fn project_point(
    point: &Point3<f64>,
    pose: &Pose,
    intrinsics: &Intrinsics,
    distortion: &FisheyeDistortion,
) -> Point2<f64> {
    let pc = pose.transform_point(point);
    distort_point(Point2::new(pc.x / pc.z, pc.y / pc.z), intrinsics, distortion)
}

/// Project object points seen from `pose` to pixels.
///
/// Points behind or on the camera plane (`z <= 0` after the pose) have no
/// meaningful image; their output is not finite or mirrored.
pub fn project_points(
    points: &[Point3<f64>],
    pose: &Pose,
    intrinsics: &Intrinsics,
    distortion: &FisheyeDistortion,
) -> Vec<Point2<f64>> {
    points
        .iter()
        .map(|p| project_point(p, pose, intrinsics, distortion))
        .collect()
}

/// Pixel -> undistorted normalized pinhole coordinates.
///
/// `None` when the distortion polynomial cannot be inverted at that radius.
pub fn undistort_point(
    pixel: Point2<f64>,
    intrinsics: &Intrinsics,
    distortion: &FisheyeDistortion,
) -> Option<Point2<f64>> {
    let pw = intrinsics.to_normalized(pixel);
    let theta_d = pw.coords.norm();
    if theta_d <= SMALL_RADIUS {
        return Some(pw);
    }
    let theta = distortion.undistort_theta(theta_d)?;
    let scale = theta.tan() / theta_d;
    Some(Point2::from(pw.coords * scale))
}

/// Undistort pixels, rotate them by `rectification` and re-project with `new_camera`.
///
/// With identity matrices the result is the normalized pinhole coordinates.
/// Entries are `None` where the inversion fails or the rectified ray points
/// away from the new camera.
pub fn undistort_points(
    pixels: &[Point2<f64>],
    intrinsics: &Intrinsics,
    distortion: &FisheyeDistortion,
    rectification: &Matrix3<f64>,
    new_camera: &Matrix3<f64>,
) -> Vec<Option<Point2<f64>>> {
    let pr = new_camera * rectification;
    pixels
        .iter()
        .map(|&px| {
            let pu = undistort_point(px, intrinsics, distortion)?;
            let v = pr * Vector3::new(pu.x, pu.y, 1.0);
            (v.z > 0.0).then(|| Point2::new(v.x / v.z, v.y / v.z))
        })
        .collect()
}

/// Stack pixel coordinates as `[u0, v0, u1, v1, ...]`.
pub(crate) fn stacked(points: &[Point2<f64>]) -> DVector<f64> {
    DVector::from_iterator(points.len() * 2, points.iter().flat_map(|p| [p.x, p.y]))
}

/// Central-difference Jacobian of `f` with respect to `params[free]`.
pub(crate) fn numeric_jacobian(
    params: &[f64],
    free: &[usize],
    rows: usize,
    f: impl Fn(&[f64]) -> DVector<f64>,
) -> DMatrix<f64> {
    let mut jac = DMatrix::zeros(rows, free.len());
    let mut p = params.to_vec();
    for (col, &idx) in free.iter().enumerate() {
        let x = params[idx];
        let h = 1e-6 * (1.0 + x.abs());
        p[idx] = x + h;
        let plus = f(&p);
        p[idx] = x - h;
        let minus = f(&p);
        p[idx] = x;
        jac.set_column(col, &((plus - minus) / (2.0 * h)));
    }
    jac
}

/// Ratio of the largest to the smallest singular value; infinite when rank deficient.
pub(crate) fn condition_number(m: &DMatrix<f64>) -> f64 {
    let sv = m.clone().svd(false, false).singular_values;
    let max = sv.max();
    let min = sv.min();
    if min <= 0.0 || !min.is_finite() {
        f64::INFINITY
    } else {
        max / min
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn camera() -> (Intrinsics, FisheyeDistortion) {
        (
            Intrinsics {
                fx: 380.0,
                fy: 378.0,
                cx: 639.5,
                cy: 399.5,
                skew: 0.001,
            },
            FisheyeDistortion::new([0.03, -0.01, 0.004, -0.0008]),
        )
    }

    #[test]
    fn principal_ray_hits_principal_point() {
        let (k, d) = camera();
        let px = project_point(&Point3::new(0.0, 0.0, 3.0), &Pose::identity(), &k, &d);
        assert_relative_eq!(px, Point2::new(639.5, 399.5), epsilon = 1e-12);
    }

    #[test]
    fn equidistant_radius_without_distortion() {
        let k = Intrinsics::new(100.0, 100.0, 0.0, 0.0);
        let d = FisheyeDistortion::default();
        // 45 degree ray lands at f * pi / 4
        let px = project_point(&Point3::new(1.0, 0.0, 1.0), &Pose::identity(), &k, &d);
        assert_relative_eq!(px.x, 100.0 * std::f64::consts::FRAC_PI_4, epsilon = 1e-12);
        assert_relative_eq!(px.y, 0.0);
    }

    #[test]
    fn undistort_inverts_distort() {
        let (k, d) = camera();
        for &(x, y) in &[(0.0, 0.0), (0.2, -0.1), (-1.2, 0.7), (2.5, 1.5)] {
            let p = Point2::new(x, y);
            let px = distort_point(p, &k, &d);
            let back = undistort_point(px, &k, &d).expect("invertible");
            assert_relative_eq!(back, p, epsilon = 1e-9);
        }
    }

    #[test]
    fn undistort_points_applies_new_camera() {
        let (k, d) = camera();
        let p = Point2::new(0.25, 0.1);
        let px = distort_point(p, &k, &d);
        let kn = k.matrix();
        let out = undistort_points(&[px], &k, &d, &Matrix3::identity(), &kn);
        let expected = k.to_pixel(p);
        assert_relative_eq!(out[0].expect("valid"), expected, epsilon = 1e-7);
    }

    #[test]
    fn numeric_jacobian_of_linear_map() {
        let f = |p: &[f64]| DVector::from_vec(vec![2.0 * p[0] + p[1], -p[1]]);
        let jac = numeric_jacobian(&[1.0, 3.0], &[0, 1], 2, f);
        assert_relative_eq!(jac, DMatrix::from_row_slice(2, 2, &[2.0, 1.0, 0.0, -1.0]), epsilon = 1e-8);
        assert!(condition_number(&DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 0.0])).is_infinite());
    }
}
