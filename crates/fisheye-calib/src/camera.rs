use nalgebra::{Matrix3, Point2, Vector4};
use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, PI};

/// Pinhole intrinsics of the fisheye model.
///
/// `skew` is the dimensionless shear `alpha`: `u = fx * (x + alpha * y) + cx`,
/// so the matrix entry `K[0, 1]` equals `fx * alpha`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub skew: f64,
}

impl Intrinsics {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            skew: 0.0,
        }
    }

    /// Starting point of the calibration for a `width x height` sensor.
    pub fn initial_guess(width: usize, height: usize) -> Self {
        let f = width.max(height) as f64 / PI;
        Self::new(f, f, width as f64 / 2.0 - 0.5, height as f64 / 2.0 - 0.5)
    }

    pub fn from_matrix(k: &Matrix3<f64>) -> Self {
        let fx = k[(0, 0)];
        Self {
            fx,
            fy: k[(1, 1)],
            cx: k[(0, 2)],
            cy: k[(1, 2)],
            skew: if fx != 0.0 { k[(0, 1)] / fx } else { 0.0 },
        }
    }

    /// Build the 3×3 calibration matrix `K`.
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx,
            self.fx * self.skew,
            self.cx,
            0.0,
            self.fy,
            self.cy,
            0.0,
            0.0,
            1.0,
        )
    }

    /// Positive, finite focal lengths and a finite principal point.
    pub fn is_valid(&self) -> bool {
        self.fx > 0.0
            && self.fy > 0.0
            && [self.fx, self.fy, self.cx, self.cy, self.skew]
                .iter()
                .all(|v| v.is_finite())
    }

    #[inline]
    pub fn to_pixel(&self, p: Point2<f64>) -> Point2<f64> {
        Point2::new(
            self.fx * (p.x + self.skew * p.y) + self.cx,
            self.fy * p.y + self.cy,
        )
    }

    #[inline]
    pub fn to_normalized(&self, px: Point2<f64>) -> Point2<f64> {
        let y = (px.y - self.cy) / self.fy;
        Point2::new((px.x - self.cx) / self.fx - self.skew * y, y)
    }

    pub(crate) fn to_array(self) -> [f64; 5] {
        [self.fx, self.fy, self.cx, self.cy, self.skew]
    }

    pub(crate) fn from_array(a: &[f64]) -> Self {
        Self {
            fx: a[0],
            fy: a[1],
            cx: a[2],
            cy: a[3],
            skew: a[4],
        }
    }
}

/// Equidistant fisheye distortion `theta_d = theta (1 + k1 θ² + k2 θ⁴ + k3 θ⁶ + k4 θ⁸)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FisheyeDistortion {
    pub k: [f64; 4],
}

const UNDISTORT_ITERS: usize = 10;

impl FisheyeDistortion {
    pub fn new(k: [f64; 4]) -> Self {
        Self { k }
    }

    pub fn from_vector(v: &Vector4<f64>) -> Self {
        Self {
            k: [v[0], v[1], v[2], v[3]],
        }
    }

    pub fn vector(&self) -> Vector4<f64> {
        Vector4::from(self.k)
    }

    #[inline]
    pub fn distort_theta(&self, theta: f64) -> f64 {
        let t2 = theta * theta;
        let [k1, k2, k3, k4] = self.k;
        theta * (1.0 + t2 * (k1 + t2 * (k2 + t2 * (k3 + t2 * k4))))
    }

    /// Invert [`Self::distort_theta`] by Newton iteration.
    ///
    /// `theta_d` is clamped to `[-π/2, π/2]`. Returns `None` when the
    /// iteration flips the sign of the angle, i.e. the polynomial is not
    /// invertible there.
    pub fn undistort_theta(&self, theta_d: f64) -> Option<f64> {
        let theta_d = theta_d.clamp(-FRAC_PI_2, FRAC_PI_2);
        let [k1, k2, k3, k4] = self.k;
        let mut theta = theta_d;
        for _ in 0..UNDISTORT_ITERS {
            let t2 = theta * theta;
            let t4 = t2 * t2;
            let t6 = t4 * t2;
            let t8 = t4 * t4;
            let f = theta * (1.0 + k1 * t2 + k2 * t4 + k3 * t6 + k4 * t8) - theta_d;
            let df = 1.0 + 3.0 * k1 * t2 + 5.0 * k2 * t4 + 7.0 * k3 * t6 + 9.0 * k4 * t8;
            let fix = f / df;
            theta -= fix;
            if fix.abs() < 1e-14 {
                break;
            }
        }
        let flipped = (theta_d < 0.0 && theta > 0.0) || (theta_d > 0.0 && theta < 0.0);
        if flipped || !theta.is_finite() {
            None
        } else {
            Some(theta)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn matrix_round_trip_keeps_skew() {
        let k = Intrinsics {
            fx: 400.0,
            fy: 390.0,
            cx: 320.5,
            cy: 240.25,
            skew: 0.002,
        };
        let m = k.matrix();
        assert_relative_eq!(m[(0, 1)], 0.8, epsilon = 1e-12);
        let back = Intrinsics::from_matrix(&m);
        assert_eq!((back.fx, back.fy, back.cx, back.cy), (k.fx, k.fy, k.cx, k.cy));
        assert_relative_eq!(back.skew, k.skew, epsilon = 1e-15);
    }

    #[test]
    fn initial_guess_follows_sensor_size() {
        let k = Intrinsics::initial_guess(1280, 800);
        assert_relative_eq!(k.fx, 1280.0 / PI);
        assert_eq!(k.fx, k.fy);
        assert_eq!((k.cx, k.cy), (639.5, 399.5));
    }

    #[test]
    fn pixel_normalized_are_inverse() {
        let k = Intrinsics {
            fx: 300.0,
            fy: 310.0,
            cx: 100.0,
            cy: 80.0,
            skew: 0.01,
        };
        let p = Point2::new(0.3, -0.2);
        let back = k.to_normalized(k.to_pixel(p));
        assert_relative_eq!(back, p, epsilon = 1e-12);
    }

    #[test]
    fn theta_inversion() {
        let d = FisheyeDistortion::new([-0.02, 0.01, -0.003, 0.0005]);
        for &theta in &[0.0, 0.1, 0.5, 1.0, 1.3] {
            let td = d.distort_theta(theta);
            let back = d.undistort_theta(td).expect("invertible");
            assert_relative_eq!(back, theta, epsilon = 1e-10);
        }
    }

    #[test]
    fn zero_distortion_is_identity() {
        let d = FisheyeDistortion::default();
        assert_eq!(d.distort_theta(0.7), 0.7);
        assert_eq!(d.undistort_theta(0.7), Some(0.7));
        assert!(!Intrinsics::new(0.0, 0.0, 0.0, 0.0).is_valid());
    }
}
