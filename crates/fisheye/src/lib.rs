//! High-level facade crate for the `fisheye-*` workspace.
//!
//! This crate provides:
//! - stable re-exports of the underlying crates (core types, chessboard
//!   detection, the fisheye model and calibrator)
//! - (feature `image`) file helpers that decode images with the `image`
//!   crate and run the whole calibration pipeline on paths
//! - (feature `cli`) the `fisheye` command-line tool
//!
//! ## Quickstart
//!
//! ```no_run
//! use fisheye::io::{calibrate_from_paths, load_image, save_image};
//! use fisheye::{CalibrateOptions, FisheyeModel, GridSize, UndistortOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut model = FisheyeModel::new(GridSize::new(9, 6))?;
//! let paths = ["calib/000.png", "calib/001.png", "calib/002.png"];
//! let outcome = calibrate_from_paths(&mut model, &paths, &CalibrateOptions::default())?;
//! println!("rms = {:.3}px", outcome.rms());
//! model.save("camera.json")?;
//!
//! let frame = load_image("scene.png")?;
//! let flat = model.undistort(&frame.view(), &UndistortOptions::default())?;
//! save_image(&flat.view(), "scene_undistorted.png")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `fisheye::core`: images, grid geometry, homographies, logger.
//! - `fisheye::chessboard`: chessboard corner detection and sub-pixel refinement.
//! - `fisheye::calib`: lens model, calibrator, undistortion, persistence.
//! - `fisheye::io` (feature `image`): decode/encode image files.

pub use fisheye_calib as calib;
pub use fisheye_chessboard as chessboard;
pub use fisheye_core as core;

pub use fisheye_calib::{
    load_model, CalibrateOptions, CalibrationConfig, CalibrationOutcome, CalibrationResult,
    FisheyeDistortion, FisheyeError, FisheyeModel, Intrinsics, ObjectPoints, Pose, ProjectOptions,
    ProjectedPoints, UndistortOptions,
};
pub use fisheye_chessboard::{ChessboardDetector, ChessboardParams, SubPixParams};
pub use fisheye_core::{GrayImage, GridSize, Image, ImageView};

#[cfg(feature = "image")]
pub mod io;
