//! Iterative sub-pixel corner refinement.
//!
//! For a saddle point `q`, every image gradient `g(p)` in a small window is
//! orthogonal to `p - q`. Minimizing `Σ w(p) (g(p)ᵀ (p - q))²` over `q` gives
//! a 2x2 linear system; the window is re-centered on the solution until the
//! step falls under `eps` or `max_iter` is reached.

use crate::params::SubPixParams;
use fisheye_core::{sample_bilinear, GrayImageView};
use log::trace;
use nalgebra::Point2;

/// Gaussian weights over the `(2h+1) x (2h+1)` window, zeroed in the dead zone.
fn window_mask(half: usize, zero_zone: Option<usize>) -> Vec<f64> {
    let side = 2 * half + 1;
    let coeff = 1.0 / (half * half) as f64;
    let profile: Vec<f64> = (0..side)
        .map(|i| {
            let d = i as f64 - half as f64;
            (-d * d * coeff).exp()
        })
        .collect();

    let mut mask = vec![0.0; side * side];
    for y in 0..side {
        for x in 0..side {
            mask[y * side + x] = profile[y] * profile[x];
        }
    }
    if let Some(z) = zero_zone {
        let z = z.min(half);
        for y in half - z..=half + z {
            for x in half - z..=half + z {
                mask[y * side + x] = 0.0;
            }
        }
    }
    mask
}

/// Bilinear sample with coordinates clamped to the image (replicated border).
#[inline]
fn sample_clamped(img: &GrayImageView<'_>, x: f64, y: f64) -> f64 {
    let xc = x.clamp(0.0, (img.width - 1) as f64) as f32;
    let yc = y.clamp(0.0, (img.height - 1) as f64) as f32;
    sample_bilinear(img, xc, yc) as f64
}

fn refine_one(
    img: &GrayImageView<'_>,
    start: Point2<f32>,
    params: &SubPixParams,
    mask: &[f64],
) -> Point2<f32> {
    let half = params.half_window as isize;
    let side = 2 * params.half_window + 1;
    // patch with a one pixel apron for central differences
    let pside = side + 2;
    let eps2 = (params.eps as f64) * (params.eps as f64);

    let (x0, y0) = (start.x as f64, start.y as f64);
    let (mut cx, mut cy) = (x0, y0);
    let mut patch = vec![0.0f64; pside * pside];

    for iter in 0..params.max_iter.max(1) {
        for py in 0..pside {
            for px in 0..pside {
                let dx = px as f64 - (half + 1) as f64;
                let dy = py as f64 - (half + 1) as f64;
                patch[py * pside + px] = sample_clamped(img, cx + dx, cy + dy);
            }
        }

        let (mut a, mut b, mut c, mut bb1, mut bb2) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for i in 0..side {
            let py = i as f64 - half as f64;
            for j in 0..side {
                let px = j as f64 - half as f64;
                let m = mask[i * side + j];
                let tgx = patch[(i + 1) * pside + j + 2] - patch[(i + 1) * pside + j];
                let tgy = patch[(i + 2) * pside + j + 1] - patch[i * pside + j + 1];
                let gxx = tgx * tgx * m;
                let gxy = tgx * tgy * m;
                let gyy = tgy * tgy * m;
                a += gxx;
                b += gxy;
                c += gyy;
                bb1 += gxx * px + gxy * py;
                bb2 += gxy * px + gyy * py;
            }
        }

        let det = a * c - b * b;
        if det.abs() <= f64::EPSILON * f64::EPSILON {
            break;
        }
        let inv = 1.0 / det;
        let nx = cx + c * inv * bb1 - b * inv * bb2;
        let ny = cy - b * inv * bb1 + a * inv * bb2;
        let err = (nx - cx).powi(2) + (ny - cy).powi(2);
        cx = nx;
        cy = ny;

        if cx < 0.0 || cy < 0.0 || cx >= img.width as f64 || cy >= img.height as f64 {
            break;
        }
        if err <= eps2 {
            trace!("corner converged after {} iterations", iter + 1);
            break;
        }
    }

    // A corner that wandered out of its window is not trusted.
    let h = params.half_window as f64;
    if (cx - x0).abs() > h || (cy - y0).abs() > h {
        return start;
    }
    Point2::new(cx as f32, cy as f32)
}

/// Refine `corners` in place of their initial estimates.
///
/// The output has the same length and order as the input. Corners whose
/// refinement diverges keep their initial position.
pub fn refine_corners(
    img: &GrayImageView<'_>,
    corners: &[Point2<f32>],
    params: &SubPixParams,
) -> Vec<Point2<f32>> {
    if params.half_window == 0 || img.width == 0 || img.height == 0 {
        return corners.to_vec();
    }
    let mask = window_mask(params.half_window, params.zero_zone);
    corners
        .iter()
        .map(|&p| refine_one(img, p, params, &mask))
        .collect()
}
