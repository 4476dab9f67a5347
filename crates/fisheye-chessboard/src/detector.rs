use crate::gridgraph::{Corner, GridGraph};
use crate::params::ChessboardParams;
use crate::preprocess::{adaptive_block_size, adaptive_threshold, equalize_histogram, has_checker_pattern};
use chess_corners::{find_chess_corners_image, ChessConfig, CornerDescriptor};
use fisheye_core::{GrayImage, GrayImageView, GridSize};
use log::debug;
use nalgebra::{Point2, Vector2};
use std::collections::{HashMap, HashSet};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Ordered chessboard corners, `grid.nx * grid.ny` of them in row-major order.
///
/// Corner `k` sits at grid cell `(k % nx, k / nx)` and therefore corresponds
/// to object point `k` of [`GridSize::object_points`].
#[derive(Clone, Debug)]
pub struct ChessboardDetection {
    pub grid: GridSize,
    pub corners: Vec<Point2<f32>>,
}

/// Chessboard detector: contrast normalization, adaptive-threshold fast
/// check, ChESS corner candidates and grid graph labelling.
pub struct ChessboardDetector {
    pub params: ChessboardParams,
}

fn adapt_chess_corner(c: &CornerDescriptor) -> Corner {
    Corner {
        position: Point2::new(c.x as f32, c.y as f32),
        orientation: c.orientation as f32,
        strength: c.response as f32,
    }
}

impl ChessboardDetector {
    pub fn new(params: ChessboardParams) -> Self {
        Self { params }
    }

    /// Locate the `grid.nx x grid.ny` inner corners of a chessboard.
    ///
    /// `None` is the regular "not found" outcome.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, img), fields(width = img.width, height = img.height))
    )]
    pub fn detect(&self, img: &GrayImageView<'_>, grid: GridSize) -> Option<ChessboardDetection> {
        if !grid.is_valid() {
            debug!("grid {}x{} is degenerate", grid.nx, grid.ny);
            return None;
        }

        let normalized = if self.params.normalize_image {
            equalize_histogram(img)
        } else {
            img.to_owned()
        };

        if self.params.fast_check {
            let block = adaptive_block_size(img.width, img.height, self.params.adaptive_block_rel);
            let binary = adaptive_threshold(&normalized.view(), block, self.params.adaptive_offset);
            let min_transitions = grid.nx.min(grid.ny);
            if !has_checker_pattern(&binary.view(), min_transitions, self.params.min_run_pix) {
                debug!("fast check: no checker pattern (block={block})");
                return None;
            }
        }

        let candidates = self.detect_candidates(&normalized);
        debug!("{} corner candidates", candidates.len());
        if candidates.len() < grid.corner_count() {
            return None;
        }

        let corners = self.locate(&candidates, grid)?;
        Some(ChessboardDetection { grid, corners })
    }

    /// Grid search over precomputed candidates.
    fn locate(&self, candidates: &[Corner], grid: GridSize) -> Option<Vec<Point2<f32>>> {
        let graph = GridGraph::new(candidates, &self.params.graph);
        let mut components = graph.connected_components();
        components.retain(|c| c.len() >= grid.corner_count());

        for component in &components {
            let Some(labels) = graph.assign_grid_coordinates(component) else {
                continue;
            };
            let Some(board) = board_window(&labels, grid) else {
                continue;
            };
            if !graph.labels_consistent(&board) {
                debug!("board window has inconsistent edges");
                continue;
            }
            if let Some(corners) = order_corners(&board, candidates, grid) {
                return Some(corners);
            }
        }

        debug!(
            "no component matches a {}x{} grid ({} components checked)",
            grid.nx,
            grid.ny,
            components.len()
        );
        None
    }

    fn detect_candidates(&self, img: &GrayImage) -> Vec<Corner> {
        let Some(buf) = image::GrayImage::from_raw(img.width as u32, img.height as u32, img.data.clone())
        else {
            return Vec::new();
        };

        let mut cfg = ChessConfig::single_scale();
        cfg.params.threshold_rel = self.params.threshold_rel as _;
        cfg.params.nms_radius = self.params.nms_radius as _;

        find_chess_corners_image(&buf, &cfg)
            .iter()
            .map(adapt_chess_corner)
            .filter(|c| c.strength >= self.params.min_strength)
            .collect()
    }
}

/// Restrict labels to the one `nx x ny` (or `ny x nx`) window they fill
/// completely.
///
/// Labels outside the window are stray candidates linked to the board.
/// Several filled windows mean the component is larger than the requested
/// board, which is rejected rather than guessed.
fn board_window(labels: &HashMap<usize, (i32, i32)>, grid: GridSize) -> Option<HashMap<usize, (i32, i32)>> {
    let taken: HashSet<(i32, i32)> = labels.values().copied().collect();
    let min_i = labels.values().map(|l| l.0).min()?;
    let min_j = labels.values().map(|l| l.1).min()?;
    let max_i = labels.values().map(|l| l.0).max()?;
    let max_j = labels.values().map(|l| l.1).max()?;

    let (nx, ny) = (grid.nx as i32, grid.ny as i32);
    let mut shapes = vec![(nx, ny)];
    if nx != ny {
        shapes.push((ny, nx));
    }

    let mut windows = Vec::new();
    for (w, h) in shapes {
        for j0 in min_j..=max_j - h + 1 {
            for i0 in min_i..=max_i - w + 1 {
                let filled = (j0..j0 + h).all(|j| (i0..i0 + w).all(|i| taken.contains(&(i, j))));
                if filled {
                    windows.push((i0, j0, w, h));
                }
            }
        }
    }

    let [(i0, j0, w, h)] = windows[..] else {
        if windows.len() > 1 {
            debug!("{} candidate board windows, refusing to pick one", windows.len());
        }
        return None;
    };
    if labels.len() > (w * h) as usize {
        debug!("dropping {} stray candidates", labels.len() - (w * h) as usize);
    }
    Some(
        labels
            .iter()
            .filter(|(_, &(i, j))| i >= i0 && i < i0 + w && j >= j0 && j < j0 + h)
            .map(|(&n, &l)| (n, l))
            .collect(),
    )
}

/// Turn integer labels into the canonical row-major corner order.
///
/// The labelling is transposed when its extents are swapped relative to
/// `grid`, mirrored when it is left-handed in the image (the board would be
/// seen from behind), and finally rotated so that corner 0 is the one closest
/// to the image origin among the rotations the grid shape allows.
fn order_corners(
    labels: &HashMap<usize, (i32, i32)>,
    candidates: &[Corner],
    grid: GridSize,
) -> Option<Vec<Point2<f32>>> {
    if labels.len() != grid.corner_count() {
        return None;
    }

    let min_i = labels.values().map(|l| l.0).min()?;
    let min_j = labels.values().map(|l| l.1).min()?;
    let span_i = (labels.values().map(|l| l.0).max()? - min_i + 1) as usize;
    let span_j = (labels.values().map(|l| l.1).max()? - min_j + 1) as usize;

    let transpose = if (span_i, span_j) == (grid.nx, grid.ny) {
        false
    } else if (span_i, span_j) == (grid.ny, grid.nx) {
        true
    } else {
        return None;
    };

    let mut cells: Vec<Option<Point2<f32>>> = vec![None; grid.corner_count()];
    for (&node, &(i, j)) in labels {
        let (i, j) = ((i - min_i) as usize, (j - min_j) as usize);
        let (i, j) = if transpose { (j, i) } else { (i, j) };
        cells[grid.index(i, j)] = Some(candidates[node].position);
    }
    let mut ordered: Vec<Point2<f32>> = cells.into_iter().collect::<Option<Vec<_>>>()?;

    let (di, dj) = mean_axes(&ordered, grid);
    if di.x * dj.y - di.y * dj.x < 0.0 {
        ordered = remap(&ordered, grid, |i, j| (grid.nx - 1 - i, j));
    }

    let mut variants = vec![
        ordered.clone(),
        remap(&ordered, grid, |i, j| (grid.nx - 1 - i, grid.ny - 1 - j)),
    ];
    if grid.nx == grid.ny {
        let n = grid.nx;
        variants.push(remap(&ordered, grid, |i, j| (n - 1 - j, i)));
        variants.push(remap(&ordered, grid, |i, j| (j, n - 1 - i)));
    }
    variants
        .into_iter()
        .min_by(|a, b| (a[0].x + a[0].y).total_cmp(&(b[0].x + b[0].y)))
}

/// `out(i, j) = src(f(i, j))`.
fn remap(
    src: &[Point2<f32>],
    grid: GridSize,
    f: impl Fn(usize, usize) -> (usize, usize),
) -> Vec<Point2<f32>> {
    let mut out = Vec::with_capacity(src.len());
    for j in 0..grid.ny {
        for i in 0..grid.nx {
            let (si, sj) = f(i, j);
            out.push(src[grid.index(si, sj)]);
        }
    }
    out
}

fn mean_axes(corners: &[Point2<f32>], grid: GridSize) -> (Vector2<f32>, Vector2<f32>) {
    let mut di = Vector2::zeros();
    let mut dj = Vector2::zeros();
    for j in 0..grid.ny {
        for i in 0..grid.nx {
            let p = corners[grid.index(i, j)];
            if i + 1 < grid.nx {
                di += corners[grid.index(i + 1, j)] - p;
            }
            if j + 1 < grid.ny {
                dj += corners[grid.index(i, j + 1)] - p;
            }
        }
    }
    (di, dj)
}
