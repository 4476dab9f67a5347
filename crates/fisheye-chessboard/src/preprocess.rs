//! Image conditioning ahead of the corner search: contrast normalization,
//! adaptive binarization and the cheap "is there a checker pattern at all" test.

use fisheye_core::{GrayImage, GrayImageView};

/// Histogram equalization. Constant images are returned unchanged.
pub fn equalize_histogram(src: &GrayImageView<'_>) -> GrayImage {
    let mut hist = [0u32; 256];
    for &v in src.data {
        hist[v as usize] += 1;
    }

    let mut cdf = [0u32; 256];
    let mut acc = 0u32;
    for (i, &h) in hist.iter().enumerate() {
        acc += h;
        cdf[i] = acc;
    }

    let total = src.data.len() as u32;
    let cdf_min = cdf.iter().copied().find(|&c| c > 0).unwrap_or(0);

    let mut lut = [0u8; 256];
    if total > cdf_min {
        let denom = (total - cdf_min) as f32;
        for (i, l) in lut.iter_mut().enumerate() {
            *l = (cdf[i].saturating_sub(cdf_min) as f32 / denom * 255.0).round() as u8;
        }
    } else {
        for (i, l) in lut.iter_mut().enumerate() {
            *l = i as u8;
        }
    }

    GrayImage {
        width: src.width,
        height: src.height,
        data: src.data.iter().map(|&v| lut[v as usize]).collect(),
    }
}

/// Summed-area table with one row/column of zero padding.
struct Integral {
    stride: usize,
    sums: Vec<u64>,
}

impl Integral {
    fn new(src: &GrayImageView<'_>) -> Self {
        let stride = src.width + 1;
        let mut sums = vec![0u64; stride * (src.height + 1)];
        for y in 0..src.height {
            let mut row = 0u64;
            for x in 0..src.width {
                row += src.get(x, y) as u64;
                sums[(y + 1) * stride + x + 1] = sums[y * stride + x + 1] + row;
            }
        }
        Self { stride, sums }
    }

    /// Sum over the half-open box `[x0, x1) x [y0, y1)`.
    fn box_sum(&self, x0: usize, y0: usize, x1: usize, y1: usize) -> u64 {
        let s = self.stride;
        self.sums[y1 * s + x1] + self.sums[y0 * s + x0] - self.sums[y0 * s + x1] - self.sums[y1 * s + x0]
    }
}

/// Mean-C adaptive threshold: pixels brighter than `local_mean - offset` become 255.
///
/// `block` is the (odd) side of the averaging window; windows are clipped at
/// the image border.
pub fn adaptive_threshold(src: &GrayImageView<'_>, block: usize, offset: f32) -> GrayImage {
    let half = block.max(3) / 2;
    let integral = Integral::new(src);
    let mut out = GrayImage::new(src.width, src.height);

    for y in 0..src.height {
        let y0 = y.saturating_sub(half);
        let y1 = (y + half + 1).min(src.height);
        for x in 0..src.width {
            let x0 = x.saturating_sub(half);
            let x1 = (x + half + 1).min(src.width);
            let count = ((x1 - x0) * (y1 - y0)) as f32;
            let mean = integral.box_sum(x0, y0, x1, y1) as f32 / count;
            if src.get(x, y) as f32 > mean - offset {
                out.data[y * src.width + x] = 255;
            }
        }
    }
    out
}

/// Odd block size derived from the image extent.
pub fn adaptive_block_size(width: usize, height: usize, rel: f32) -> usize {
    let b = (width.min(height) as f32 * rel).round() as usize;
    (b.max(3)) | 1
}

/// Count dark/bright alternations along a line, ignoring runs shorter than `min_run`.
fn count_transitions(values: impl Iterator<Item = u8>, min_run: usize) -> usize {
    let mut transitions = 0;
    let mut accepted: Option<u8> = None;
    let mut current: Option<u8> = None;
    let mut run = 0usize;

    for v in values {
        if Some(v) == current {
            run += 1;
        } else {
            current = Some(v);
            run = 1;
        }
        if run == min_run.max(1) {
            if let Some(prev) = accepted {
                if prev != v {
                    transitions += 1;
                }
            }
            accepted = Some(v);
        }
    }
    transitions
}

/// Cheap rejection test on a binarized image.
///
/// A chessboard crossed by a scan line yields roughly one dark/bright
/// alternation per square; the test passes when some row or column shows at
/// least `min_transitions` of them.
pub fn has_checker_pattern(binary: &GrayImageView<'_>, min_transitions: usize, min_run: usize) -> bool {
    let best_row = (0..binary.height)
        .map(|y| count_transitions((0..binary.width).map(|x| binary.get(x, y)), min_run))
        .max()
        .unwrap_or(0);
    if best_row >= min_transitions {
        return true;
    }

    let best_col = (0..binary.width)
        .map(|x| count_transitions((0..binary.height).map(|y| binary.get(x, y)), min_run))
        .max()
        .unwrap_or(0);
    best_col >= min_transitions
}
