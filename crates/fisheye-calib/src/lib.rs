//! Fisheye camera calibration from chessboard images.
//!
//! The lens follows the equidistant fisheye model with four distortion
//! coefficients. [`FisheyeModel`] ties a chessboard geometry to the fitted
//! `K`/`D` pair and exposes calibration, undistortion, projection and
//! persistence:
//!
//! ```no_run
//! use fisheye_calib::{CalibrateOptions, FisheyeModel, UndistortOptions};
//! use fisheye_core::{GridSize, Image};
//!
//! # fn images() -> Vec<Image> { Vec::new() }
//! let frames = images();
//! let mut model = FisheyeModel::new(GridSize::new(9, 6))?;
//! let outcome = model.calibrate(frames.iter().map(|f| f.view()), &CalibrateOptions::default())?;
//! println!("rms = {:.3}px", outcome.rms());
//!
//! let undistorted = model.undistort(&frames[0].view(), &UndistortOptions::default())?;
//! model.save("camera.json")?;
//! # Ok::<(), fisheye_calib::FisheyeError>(())
//! ```
//!
//! The lower-level pieces ([`calibrate_fisheye`], [`UndistortMap`],
//! [`project_points`], ...) are usable without a model.

mod accumulator;
mod calibrate;
mod camera;
mod error;
mod model;
mod pose;
mod projection;
mod snapshot;
mod undistort;

pub mod synthetic;

pub use accumulator::{Accumulated, CalibrationAccumulator, CalibrationSet, ViewReport};
pub use calibrate::{calibrate_fisheye, reprojection_rms, CalibrationConfig, CalibrationResult};
pub use camera::{FisheyeDistortion, Intrinsics};
pub use error::FisheyeError;
pub use model::{
    load_model, CalibrateOptions, CalibrationOutcome, FisheyeModel, ObjectPoints, ProjectOptions,
    ProjectedPoints,
};
pub use pose::{estimate_pose, init_pose, refine_pose, Pose};
pub use projection::{
    distort_point, distort_points, project_point, project_points, undistort_point, undistort_points,
};
pub use snapshot::{ModelSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use undistort::{remap, UndistortMap, UndistortOptions};
