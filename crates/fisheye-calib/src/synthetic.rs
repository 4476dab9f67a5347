//! Synthetic chessboard views for tests, benchmarks and demos.
//!
//! Boards use the same object frame as [`GridSize::object_points`]: inner
//! corner `(i, j)` sits at `(i, j, 0)`, squares have unit size and the board
//! carries one extra square around the inner corners.

use crate::accumulator::CalibrationSet;
use crate::camera::{FisheyeDistortion, Intrinsics};
use crate::pose::Pose;
use crate::projection::{project_points, undistort_point};
use crate::undistort::{remap, UndistortMap};
use fisheye_core::{GrayImage, GridSize, Image, ImageView};
use nalgebra::{Point2, Rotation3, Vector3};
use std::f64::consts::TAU;

const DARK: f64 = 30.0;
const LIGHT: f64 = 225.0;
const VOID: f64 = 128.0;

/// `n` board poses orbiting the optical axis at roughly `distance`.
///
/// Views alternate tilt direction, roll slightly and shift the board center
/// around the image center so that the set constrains all intrinsics.
pub fn orbit_poses(grid: GridSize, n: usize, distance: f64) -> Vec<Pose> {
    let center = Vector3::new((grid.nx - 1) as f64 / 2.0, (grid.ny - 1) as f64 / 2.0, 0.0);
    (0..n)
        .map(|i| {
            let a = TAU * i as f64 / n.max(1) as f64;
            let rotation = Rotation3::new(Vector3::new(0.35 * a.cos(), 0.35 * a.sin(), 0.15 * (2.0 * a).sin()));
            let z = distance * (1.0 + 0.12 * ((i % 3) as f64 - 1.0));
            let shift = 0.12 * distance;
            let target = Vector3::new(shift * (a + 0.7).cos(), shift * (a + 0.7).sin(), z);
            Pose::from_rotation(&rotation, target - rotation * center)
        })
        .collect()
}

/// Exact correspondences of `grid` seen from every pose.
pub fn synthetic_set(
    grid: GridSize,
    image_size: (usize, usize),
    intrinsics: &Intrinsics,
    distortion: &FisheyeDistortion,
    poses: &[Pose],
) -> CalibrationSet {
    let board = grid.object_points();
    CalibrationSet {
        image_size: Some(image_size),
        object_points: vec![board.clone(); poses.len()],
        image_points: poses
            .iter()
            .map(|pose| project_points(&board, pose, intrinsics, distortion))
            .collect(),
    }
}

fn board_shade(grid: GridSize, u: f64, v: f64) -> f64 {
    let inside = u >= -1.0 && v >= -1.0 && u < grid.nx as f64 && v < grid.ny as f64;
    if !inside {
        return LIGHT;
    }
    if (u.floor() as i64 + v.floor() as i64).rem_euclid(2) == 0 {
        DARK
    } else {
        LIGHT
    }
}

/// Ray-trace the board through the fisheye lens, 4x4 supersampled.
pub fn render_board(
    grid: GridSize,
    pose: &Pose,
    intrinsics: &Intrinsics,
    distortion: &FisheyeDistortion,
    size: (usize, usize),
) -> GrayImage {
    const SS: usize = 4;
    let (width, height) = size;
    let rt = pose.rotation().inverse();
    let t_board = rt * pose.tvec;
    let mut img = GrayImage::new(width, height);

    for y in 0..height {
        for x in 0..width {
            let mut acc = 0.0;
            for sy in 0..SS {
                for sx in 0..SS {
                    let px = Point2::new(
                        x as f64 - 0.5 + (sx as f64 + 0.5) / SS as f64,
                        y as f64 - 0.5 + (sy as f64 + 0.5) / SS as f64,
                    );
                    acc += match undistort_point(px, intrinsics, distortion) {
                        Some(n) => {
                            // intersect the ray with the board plane z = 0 in board coordinates
                            let d = rt * Vector3::new(n.x, n.y, 1.0);
                            let s = t_board.z / d.z;
                            if d.z.abs() < 1e-12 || s <= 0.0 {
                                VOID
                            } else {
                                let p = d * s - t_board;
                                board_shade(grid, p.x, p.y)
                            }
                        }
                        None => VOID,
                    };
                }
            }
            img.data[y * width + x] = (acc / (SS * SS) as f64).round() as u8;
        }
    }
    img
}

/// What the fisheye camera sees of a pinhole image `src` taken with camera matrix `K`.
///
/// The inverse of [`crate::FisheyeModel::undistort`] with default options.
pub fn distort_image(src: &ImageView<'_>, intrinsics: &Intrinsics, distortion: &FisheyeDistortion) -> Image {
    let (width, height) = (src.width, src.height);
    let mut map = UndistortMap {
        width,
        height,
        map_x: Vec::with_capacity(width * height),
        map_y: Vec::with_capacity(width * height),
    };
    for y in 0..height {
        for x in 0..width {
            let (sx, sy) = match undistort_point(Point2::new(x as f64, y as f64), intrinsics, distortion) {
                Some(n) => {
                    let q = intrinsics.to_pixel(n);
                    (q.x as f32, q.y as f32)
                }
                None => (f32::NAN, f32::NAN),
            };
            map.map_x.push(sx);
            map.map_y.push(sy);
        }
    }
    remap(src, &map, 0)
}
