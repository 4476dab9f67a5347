use serde::{Deserialize, Serialize};

/// Neighbor search parameters for the corner grid graph.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GridGraphParams {
    /// Minimal distance between neighboring corners, in pixels.
    pub min_spacing_pix: f32,
    /// Maximal distance between neighboring corners, in pixels.
    pub max_spacing_pix: f32,
    /// Nearest neighbors examined per corner.
    pub k_neighbors: usize,
    /// Angular tolerance for the orientation checks.
    pub orientation_tolerance_deg: f32,
}

impl Default for GridGraphParams {
    fn default() -> Self {
        Self {
            min_spacing_pix: 5.0,
            max_spacing_pix: 250.0,
            k_neighbors: 8,
            orientation_tolerance_deg: 22.5,
        }
    }
}

/// Parameters of the chessboard corner detector.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ChessboardParams {
    /// Equalize the histogram before searching for corners.
    pub normalize_image: bool,

    /// Reject images without a checker pattern before the corner search.
    pub fast_check: bool,

    /// Adaptive threshold block size relative to `min(width, height)`.
    /// Rounded to the nearest odd pixel count (at least 3).
    pub adaptive_block_rel: f32,

    /// Offset subtracted from the local mean in the adaptive threshold.
    pub adaptive_offset: f32,

    /// Minimal run length (pixels) for a dark/bright run to count in the fast check.
    pub min_run_pix: usize,

    /// Relative ChESS response threshold for corner candidates.
    pub threshold_rel: f32,

    /// Non-maximum suppression radius of the candidate search.
    pub nms_radius: u32,

    /// Minimal candidate response kept for the grid search.
    pub min_strength: f32,

    pub graph: GridGraphParams,
}

impl Default for ChessboardParams {
    fn default() -> Self {
        Self {
            normalize_image: true,
            fast_check: true,
            adaptive_block_rel: 0.2,
            adaptive_offset: 5.0,
            min_run_pix: 2,
            threshold_rel: 0.2,
            nms_radius: 2,
            min_strength: 0.0,
            graph: GridGraphParams::default(),
        }
    }
}

/// Termination criteria and window of the sub-pixel corner refiner.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SubPixParams {
    /// Half size of the search window; the window spans `2 * half_window + 1` pixels.
    pub half_window: usize,
    /// Half size of the dead zone in the middle of the window (`None` disables it).
    pub zero_zone: Option<usize>,
    /// Maximal number of iterations per corner.
    pub max_iter: usize,
    /// Stop once a corner moves less than this many pixels in one iteration.
    pub eps: f32,
}

impl Default for SubPixParams {
    fn default() -> Self {
        Self {
            half_window: 5,
            zero_zone: None,
            max_iter: 30,
            eps: 0.1,
        }
    }
}
