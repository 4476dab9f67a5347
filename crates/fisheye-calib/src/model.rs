use crate::accumulator::{Accumulated, CalibrationAccumulator, CalibrationSet, ViewReport};
use crate::calibrate::{calibrate_fisheye, CalibrationConfig, CalibrationResult};
use crate::camera::{FisheyeDistortion, Intrinsics};
use crate::error::FisheyeError;
use crate::pose::Pose;
use crate::projection::{project_points, undistort_points};
use crate::snapshot::{ModelSnapshot, SNAPSHOT_FORMAT_VERSION};
use crate::undistort::{remap, UndistortMap, UndistortOptions};
use fisheye_chessboard::{ChessboardParams, SubPixParams};
use fisheye_core::{GridSize, Image, ImageView};
use log::info;
use nalgebra::{Matrix3, Point2, Point3, Vector4};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Options of [`FisheyeModel::calibrate`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrateOptions {
    /// Store the fitted `K`/`D` in the model. When off the model is left
    /// untouched and the fit is only returned.
    pub update_model: bool,
    /// Keep a corner overlay per input image in the outcome.
    pub debug_display: bool,
    pub detector: ChessboardParams,
    pub subpix: SubPixParams,
    pub solver: CalibrationConfig,
}

impl Default for CalibrateOptions {
    fn default() -> Self {
        Self {
            update_model: true,
            debug_display: false,
            detector: ChessboardParams::default(),
            subpix: SubPixParams::default(),
            solver: CalibrationConfig::default(),
        }
    }
}

/// Result of a calibration run on a [`FisheyeModel`].
#[derive(Clone, Debug)]
pub struct CalibrationOutcome {
    pub result: CalibrationResult,
    pub reports: Vec<ViewReport>,
    pub overlays: Vec<Image>,
}

impl CalibrationOutcome {
    pub fn rms(&self) -> f64 {
        self.result.rms
    }

    pub fn camera_matrix(&self) -> Matrix3<f64> {
        self.result.camera_matrix()
    }

    pub fn distortion(&self) -> Vector4<f64> {
        self.result.distortion.vector()
    }

    pub fn poses(&self) -> &[Pose] {
        &self.result.poses
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct ProjectOptions {
    pub skew: f64,
}

/// Input of [`FisheyeModel::project`]: one list, or several lists projected independently.
#[derive(Clone, Debug, PartialEq)]
pub enum ObjectPoints {
    Flat(Vec<Point3<f64>>),
    Batched(Vec<Vec<Point3<f64>>>),
}

impl From<Vec<Point3<f64>>> for ObjectPoints {
    fn from(v: Vec<Point3<f64>>) -> Self {
        Self::Flat(v)
    }
}

impl From<Vec<Vec<Point3<f64>>>> for ObjectPoints {
    fn from(v: Vec<Vec<Point3<f64>>>) -> Self {
        Self::Batched(v)
    }
}

impl ObjectPoints {
    fn into_batched(self) -> Vec<Vec<Point3<f64>>> {
        match self {
            Self::Flat(v) => vec![v],
            Self::Batched(b) => b,
        }
    }
}

/// Projected pixels with singleton dimensions collapsed.
#[derive(Clone, Debug, PartialEq)]
pub enum ProjectedPoints {
    Single(Point2<f64>),
    Flat(Vec<Point2<f64>>),
    Batched(Vec<Vec<Point2<f64>>>),
}

impl ProjectedPoints {
    fn squeeze(mut batched: Vec<Vec<Point2<f64>>>) -> Self {
        match (batched.len(), batched.first().map(Vec::len)) {
            (1, Some(1)) => Self::Single(batched[0][0]),
            (1, _) => Self::Flat(batched.swap_remove(0)),
            _ if batched.iter().all(|b| b.len() == 1) => {
                Self::Flat(batched.into_iter().map(|b| b[0]).collect())
            }
            _ => Self::Batched(batched),
        }
    }

    /// All pixels in input order.
    pub fn into_flat(self) -> Vec<Point2<f64>> {
        match self {
            Self::Single(p) => vec![p],
            Self::Flat(v) => v,
            Self::Batched(b) => b.into_iter().flatten().collect(),
        }
    }
}

/// A fisheye camera model bound to one chessboard geometry.
///
/// `K` and `D` start at zero and are filled by [`FisheyeModel::calibrate`]
/// (or [`FisheyeModel::set_calibration`]).
#[derive(Clone, Debug, PartialEq)]
pub struct FisheyeModel {
    grid: GridSize,
    camera_matrix: Matrix3<f64>,
    distortion: Vector4<f64>,
    verbose: bool,
}

impl FisheyeModel {
    pub fn new(grid: GridSize) -> Result<Self, FisheyeError> {
        if !grid.is_valid() {
            return Err(FisheyeError::InvalidGeometry {
                nx: grid.nx,
                ny: grid.ny,
            });
        }
        Ok(Self {
            grid,
            camera_matrix: Matrix3::zeros(),
            distortion: Vector4::zeros(),
            verbose: false,
        })
    }

    /// Textual progress reporting only; no effect on results.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn grid(&self) -> GridSize {
        self.grid
    }

    pub fn camera_matrix(&self) -> &Matrix3<f64> {
        &self.camera_matrix
    }

    pub fn distortion(&self) -> &Vector4<f64> {
        &self.distortion
    }

    pub fn intrinsics(&self) -> Intrinsics {
        Intrinsics::from_matrix(&self.camera_matrix)
    }

    pub fn fisheye_distortion(&self) -> FisheyeDistortion {
        FisheyeDistortion::from_vector(&self.distortion)
    }

    pub fn is_calibrated(&self) -> bool {
        self.intrinsics().is_valid()
    }

    pub fn set_calibration(&mut self, camera_matrix: Matrix3<f64>, distortion: Vector4<f64>) {
        self.camera_matrix = camera_matrix;
        self.distortion = distortion;
    }

    fn calibrated(&self) -> Result<(Intrinsics, FisheyeDistortion), FisheyeError> {
        if !self.is_calibrated() {
            return Err(FisheyeError::NotCalibrated);
        }
        Ok((self.intrinsics(), self.fisheye_distortion()))
    }

    /// Detect the board in every image, then fit `K`, `D` and the poses.
    ///
    /// Images without a detectable board are skipped. Fails with
    /// [`FisheyeError::InsufficientData`] when no image is usable.
    pub fn calibrate<'a, I>(&mut self, images: I, options: &CalibrateOptions) -> Result<CalibrationOutcome, FisheyeError>
    where
        I: IntoIterator<Item = ImageView<'a>>,
    {
        let mut acc = CalibrationAccumulator::new(self.grid, options.detector.clone(), options.subpix.clone())?
            .with_overlays(options.debug_display)
            .with_verbose(self.verbose);
        for image in images {
            acc.add_image(&image)?;
        }
        let Accumulated { set, reports, overlays } = acc.finish();
        let result = self.calibrate_set(&set, options)?;
        Ok(CalibrationOutcome {
            result,
            reports,
            overlays,
        })
    }

    /// Fit from already accumulated correspondences.
    pub fn calibrate_from_set(
        &mut self,
        set: &CalibrationSet,
        options: &CalibrateOptions,
    ) -> Result<CalibrationOutcome, FisheyeError> {
        let result = self.calibrate_set(set, options)?;
        let reports = (0..set.len()).map(|index| ViewReport { index, found: true }).collect();
        Ok(CalibrationOutcome {
            result,
            reports,
            overlays: Vec::new(),
        })
    }

    fn calibrate_set(&mut self, set: &CalibrationSet, options: &CalibrateOptions) -> Result<CalibrationResult, FisheyeError> {
        let image_size = match set.image_size {
            Some(size) if !set.is_empty() => size,
            _ => return Err(FisheyeError::InsufficientData { views: set.len() }),
        };
        let guess = self
            .is_calibrated()
            .then(|| (self.intrinsics(), self.fisheye_distortion()));
        let result = calibrate_fisheye(&set.object_points, &set.image_points, image_size, guess, &options.solver)?;

        if self.verbose {
            info!(
                "calibrated from {} views: rms={:.4}px K=[{:.3}, {:.3}, {:.3}, {:.3}] D={:?}",
                set.len(),
                result.rms,
                result.intrinsics.fx,
                result.intrinsics.fy,
                result.intrinsics.cx,
                result.intrinsics.cy,
                result.distortion.k
            );
        }
        if options.update_model {
            self.set_calibration(result.camera_matrix(), result.distortion.vector());
        }
        Ok(result)
    }

    /// The map [`FisheyeModel::undistort`] resamples through, for an input of `input_size`.
    pub fn undistort_map(
        &self,
        input_size: (usize, usize),
        options: &UndistortOptions,
    ) -> Result<UndistortMap, FisheyeError> {
        let (k, d) = self.calibrated()?;
        let size = options.output_size.unwrap_or(input_size);
        let rotation = options.rotation.unwrap_or_else(Matrix3::identity);
        let new_camera = options.new_camera_matrix.unwrap_or(self.camera_matrix);
        UndistortMap::new(&k, &d, &rotation, &new_camera, size)
    }

    /// Undistorted copy of `image`. Does not modify the model.
    pub fn undistort(&self, image: &ImageView<'_>, options: &UndistortOptions) -> Result<Image, FisheyeError> {
        let map = self.undistort_map((image.width, image.height), options)?;
        Ok(remap(image, &map, options.border_value))
    }

    /// Undistort pixel coordinates into the image [`FisheyeModel::undistort`] would produce.
    pub fn undistort_pixels(
        &self,
        pixels: &[Point2<f64>],
        options: &UndistortOptions,
    ) -> Result<Vec<Option<Point2<f64>>>, FisheyeError> {
        let (k, d) = self.calibrated()?;
        let rotation = options.rotation.unwrap_or_else(Matrix3::identity);
        let new_camera = options.new_camera_matrix.unwrap_or(self.camera_matrix);
        Ok(undistort_points(pixels, &k, &d, &rotation, &new_camera))
    }

    /// Project camera-frame points to pixels (identity pose).
    ///
    /// `options.skew` replaces the model's own skew.
    pub fn project(&self, points: impl Into<ObjectPoints>, options: &ProjectOptions) -> Result<ProjectedPoints, FisheyeError> {
        let (mut k, d) = self.calibrated()?;
        k.skew = options.skew;
        let pose = Pose::identity();
        let batched = points
            .into()
            .into_batched()
            .iter()
            .map(|batch| project_points(batch, &pose, &k, &d))
            .collect();
        Ok(ProjectedPoints::squeeze(batched))
    }

    pub fn to_snapshot(&self) -> ModelSnapshot {
        let m = &self.camera_matrix;
        ModelSnapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            nx: self.grid.nx,
            ny: self.grid.ny,
            k: [
                [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
                [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
                [m[(2, 0)], m[(2, 1)], m[(2, 2)]],
            ],
            d: self.distortion.into(),
        }
    }

    pub fn from_snapshot(snapshot: &ModelSnapshot) -> Result<Self, FisheyeError> {
        if snapshot.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(FisheyeError::UnsupportedSnapshotVersion(snapshot.format_version));
        }
        let mut model = Self::new(GridSize::new(snapshot.nx, snapshot.ny))?;
        let k = &snapshot.k;
        model.camera_matrix = Matrix3::new(
            k[0][0], k[0][1], k[0][2], k[1][0], k[1][1], k[1][2], k[2][0], k[2][1], k[2][2],
        );
        model.distortion = Vector4::from(snapshot.d);
        Ok(model)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, FisheyeError> {
        self.to_snapshot().to_json_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FisheyeError> {
        Self::from_snapshot(&ModelSnapshot::from_json_bytes(bytes)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), FisheyeError> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, FisheyeError> {
        Self::from_bytes(&std::fs::read(path)?)
    }
}

/// Load a model saved with [`FisheyeModel::save`].
pub fn load_model(path: impl AsRef<Path>) -> Result<FisheyeModel, FisheyeError> {
    FisheyeModel::load(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calibrated_model() -> FisheyeModel {
        let mut model = FisheyeModel::new(GridSize::new(9, 6)).unwrap();
        model.set_calibration(
            Matrix3::new(300.0, 0.0, 320.0, 0.0, 300.0, 240.0, 0.0, 0.0, 1.0),
            Vector4::new(0.01, -0.002, 0.0, 0.0),
        );
        model
    }

    #[test]
    fn fresh_model_is_not_calibrated() {
        let model = FisheyeModel::new(GridSize::new(9, 6)).unwrap();
        assert!(!model.is_calibrated());
        assert!(matches!(
            model.project(vec![Point3::new(0.0, 0.0, 1.0)], &ProjectOptions::default()),
            Err(FisheyeError::NotCalibrated)
        ));
        assert!(matches!(FisheyeModel::new(GridSize::new(0, 6)), Err(FisheyeError::InvalidGeometry { .. })));
    }

    #[test]
    fn project_collapses_singletons() {
        let model = calibrated_model();
        let opts = ProjectOptions::default();

        let single = model.project(vec![Point3::new(0.0, 0.0, 2.0)], &opts).unwrap();
        assert_eq!(single, ProjectedPoints::Single(Point2::new(320.0, 240.0)));

        let flat = model
            .project(vec![Point3::new(0.0, 0.0, 2.0), Point3::new(0.1, 0.0, 1.0)], &opts)
            .unwrap();
        assert!(matches!(flat, ProjectedPoints::Flat(ref v) if v.len() == 2));

        let per_batch = model
            .project(vec![vec![Point3::new(0.0, 0.0, 1.0)], vec![Point3::new(0.0, 0.1, 1.0)]], &opts)
            .unwrap();
        assert!(matches!(per_batch, ProjectedPoints::Flat(ref v) if v.len() == 2));

        let batched = model
            .project(
                vec![vec![Point3::new(0.0, 0.0, 1.0); 2], vec![Point3::new(0.0, 0.1, 1.0); 3]],
                &opts,
            )
            .unwrap();
        assert_eq!(batched.into_flat().len(), 5);
    }

    #[test]
    fn skew_option_shears_u() {
        let model = calibrated_model();
        let p = vec![Point3::new(0.0, 0.2, 1.0)];
        let plain = model.project(p.clone(), &ProjectOptions::default()).unwrap().into_flat()[0];
        let sheared = model.project(p, &ProjectOptions { skew: 0.1 }).unwrap().into_flat()[0];
        assert_eq!(plain.y, sheared.y);
        assert!(sheared.x > plain.x);
    }

    #[test]
    fn empty_set_is_insufficient_data() {
        let mut model = FisheyeModel::new(GridSize::new(9, 6)).unwrap();
        let err = model
            .calibrate_from_set(&CalibrationSet::default(), &CalibrateOptions::default())
            .unwrap_err();
        assert!(matches!(err, FisheyeError::InsufficientData { views: 0 }));
    }

    #[test]
    fn snapshot_round_trip_is_exact() {
        let model = calibrated_model();
        let back = FisheyeModel::from_bytes(&model.to_bytes().unwrap()).unwrap();
        assert_eq!(back, model);
    }
}
