//! Undistortion lookup tables and bilinear remapping.

use crate::camera::{FisheyeDistortion, Intrinsics};
use crate::error::FisheyeError;
use crate::projection::distort_point;
use fisheye_core::{sample_bilinear_channel, Image, ImageView};
use nalgebra::{Matrix3, Point2, Vector3};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Optional parameters of an undistort call, resolved against the model and
/// the input image once at call entry.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UndistortOptions {
    /// `(width, height)` of the output; defaults to the input size.
    pub output_size: Option<(usize, usize)>,
    /// Rectification rotation; defaults to identity.
    pub rotation: Option<Matrix3<f64>>,
    /// Camera matrix of the undistorted image; defaults to the model's `K`.
    pub new_camera_matrix: Option<Matrix3<f64>>,
    /// Fill value for pixels that map outside the source.
    pub border_value: u8,
}

/// Per-pixel source coordinates of an undistorted image.
///
/// Pixel `(x, y)` of the output samples the distorted source at
/// `(map_x[y * width + x], map_y[y * width + x])`. Entries that have no
/// source location are NaN.
#[derive(Clone, Debug, PartialEq)]
pub struct UndistortMap {
    pub width: usize,
    pub height: usize,
    pub map_x: Vec<f32>,
    pub map_y: Vec<f32>,
}

impl UndistortMap {
    /// Build the map for output camera `new_camera` rotated by `rotation`.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(intrinsics, distortion, rotation, new_camera))
    )]
    pub fn new(
        intrinsics: &Intrinsics,
        distortion: &FisheyeDistortion,
        rotation: &Matrix3<f64>,
        new_camera: &Matrix3<f64>,
        size: (usize, usize),
    ) -> Result<Self, FisheyeError> {
        let (width, height) = size;
        if width == 0 || height == 0 {
            return Err(FisheyeError::MismatchedInput(format!(
                "undistort output size {width}x{height}"
            )));
        }
        let ir = (new_camera * rotation)
            .try_inverse()
            .ok_or(FisheyeError::NumericalFailure("new camera matrix times rotation is singular"))?;

        let mut map_x = Vec::with_capacity(width * height);
        let mut map_y = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                let ray = ir * Vector3::new(x as f64, y as f64, 1.0);
                if ray.z <= 0.0 {
                    map_x.push(f32::NAN);
                    map_y.push(f32::NAN);
                    continue;
                }
                let p = distort_point(Point2::new(ray.x / ray.z, ray.y / ray.z), intrinsics, distortion);
                map_x.push(p.x as f32);
                map_y.push(p.y as f32);
            }
        }
        Ok(Self {
            width,
            height,
            map_x,
            map_y,
        })
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> (f32, f32) {
        let i = y * self.width + x;
        (self.map_x[i], self.map_y[i])
    }
}

/// Resample `src` through `map` with bilinear interpolation.
///
/// Taps outside the source blend with `border`; non-finite map entries
/// produce `border` outright.
pub fn remap(src: &ImageView<'_>, map: &UndistortMap, border: u8) -> Image {
    let c = src.channels;
    let mut out = Image::new(map.width, map.height, c);
    for (i, px) in out.data.chunks_exact_mut(c).enumerate() {
        let (sx, sy) = (map.map_x[i], map.map_y[i]);
        if !sx.is_finite() || !sy.is_finite() || sx < -1.0 || sy < -1.0 || sx > src.width as f32 || sy > src.height as f32
        {
            px.fill(border);
            continue;
        }
        for (ch, v) in px.iter_mut().enumerate() {
            *v = sample_bilinear_channel(src, sx, sy, ch, border).round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}
