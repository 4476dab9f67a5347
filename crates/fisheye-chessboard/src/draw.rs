//! Debug overlay of detected corners.

use fisheye_core::{GridSize, Image, ImageError, ImageView};
use nalgebra::Point2;

type Bgr = [u8; 3];

const ROW_COLORS: [Bgr; 7] = [
    [0, 0, 255],
    [0, 128, 255],
    [0, 200, 200],
    [0, 255, 0],
    [200, 200, 0],
    [255, 0, 0],
    [255, 0, 255],
];
const NOT_FOUND: Bgr = [0, 0, 255];

fn to_bgr(src: &ImageView<'_>) -> Result<Image, ImageError> {
    src.validate()?;
    let mut out = Image::new(src.width, src.height, 3);
    for (dst, px) in out
        .data
        .chunks_exact_mut(3)
        .zip(src.data.chunks_exact(src.channels))
    {
        match src.channels {
            1 => dst.copy_from_slice(&[px[0]; 3]),
            _ => dst.copy_from_slice(&px[..3]),
        }
    }
    Ok(out)
}

fn put(img: &mut Image, x: i32, y: i32, color: Bgr) {
    if x < 0 || y < 0 || x >= img.width as i32 || y >= img.height as i32 {
        return;
    }
    let o = (y as usize * img.width + x as usize) * 3;
    img.data[o..o + 3].copy_from_slice(&color);
}

fn line(img: &mut Image, a: Point2<f32>, b: Point2<f32>, color: Bgr) {
    let steps = (b - a).abs().max().ceil().max(1.0) as usize;
    for s in 0..=steps {
        let p = a + (b - a) * (s as f32 / steps as f32);
        put(img, p.x.round() as i32, p.y.round() as i32, color);
    }
}

fn circle(img: &mut Image, c: Point2<f32>, r: f32, color: Bgr) {
    let n = (r * 8.0).ceil().max(8.0) as usize;
    for k in 0..n {
        let t = k as f32 / n as f32 * std::f32::consts::TAU;
        put(
            img,
            (c.x + r * t.cos()).round() as i32,
            (c.y + r * t.sin()).round() as i32,
            color,
        );
    }
}

fn cross(img: &mut Image, c: Point2<f32>, r: f32, color: Bgr) {
    line(img, c - nalgebra::Vector2::new(r, r), c + nalgebra::Vector2::new(r, r), color);
    line(img, c + nalgebra::Vector2::new(-r, r), c + nalgebra::Vector2::new(r, -r), color);
}

/// Render corners onto a BGR copy of `src`.
///
/// A complete detection is drawn row by row with one color per row and a
/// polyline through the corners in their output order; an incomplete one is
/// drawn as plain red circles.
pub fn draw_corners(
    src: &ImageView<'_>,
    corners: &[Point2<f32>],
    grid: GridSize,
    found: bool,
) -> Result<Image, ImageError> {
    let mut out = to_bgr(src)?;
    let r = 3.0;

    if !found || corners.len() != grid.corner_count() {
        for &c in corners {
            circle(&mut out, c, r, NOT_FOUND);
        }
        return Ok(out);
    }

    let mut prev: Option<Point2<f32>> = None;
    for (k, &c) in corners.iter().enumerate() {
        let color = ROW_COLORS[(k / grid.nx) % ROW_COLORS.len()];
        if let Some(p) = prev {
            line(&mut out, p, c, color);
        }
        cross(&mut out, c, r, color);
        circle(&mut out, c, r + 1.0, color);
        prev = Some(c);
    }
    Ok(out)
}
