//! Chessboard corner detection and sub-pixel refinement built on top of
//! `fisheye-core`.
//!
//! ## Quickstart
//!
//! ```
//! use fisheye_chessboard::{refine_corners, ChessboardDetector, ChessboardParams, SubPixParams};
//! use fisheye_core::{GrayImage, GridSize};
//!
//! let img = GrayImage::new(64, 48);
//! let detector = ChessboardDetector::new(ChessboardParams::default());
//! if let Some(det) = detector.detect(&img.view(), GridSize::new(9, 6)) {
//!     let refined = refine_corners(&img.view(), &det.corners, &SubPixParams::default());
//!     assert_eq!(refined.len(), 54);
//! }
//! ```
//!
//! Pipeline:
//! 1. Equalize the histogram.
//! 2. Adaptive-threshold the image and require a row or column with enough
//!    dark/bright alternations (fast rejection of board-free frames).
//! 3. Collect ChESS corner candidates with their saddle orientation.
//! 4. Link candidates into a 4-connected graph (KD-tree neighbors, swapped
//!    diagonals, edges at 45° to both).
//! 5. BFS each component to integer `(i, j)` labels.
//! 6. Keep a component whose extents match the requested grid (up to a swap)
//!    and emit its corners in canonical row-major order.

mod detector;
mod draw;
mod gridgraph;
mod params;
mod preprocess;
mod subpix;

pub use detector::{ChessboardDetection, ChessboardDetector};
pub use draw::draw_corners;
pub use gridgraph::{Corner, GridGraph, NodeNeighbor};
pub use params::{ChessboardParams, GridGraphParams, SubPixParams};
pub use preprocess::{adaptive_block_size, adaptive_threshold, equalize_histogram, has_checker_pattern};
pub use subpix::refine_corners;
