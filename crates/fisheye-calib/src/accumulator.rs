//! Per-image detection and refinement, collected into aligned
//! object/image point lists for the calibrator.

use crate::error::FisheyeError;
use fisheye_chessboard::{draw_corners, refine_corners, ChessboardDetector, ChessboardParams, SubPixParams};
use fisheye_core::{GridSize, Image, ImageView};
use log::{debug, info};
use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};

/// Outcome of one candidate image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewReport {
    /// Position of the image in the input sequence.
    pub index: usize,
    pub found: bool,
}

/// Positionally aligned correspondences: `object_points[i]` belongs to `image_points[i]`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CalibrationSet {
    /// Size shared by every image seen, `(width, height)`.
    pub image_size: Option<(usize, usize)>,
    pub object_points: Vec<Vec<Point3<f64>>>,
    pub image_points: Vec<Vec<Point2<f64>>>,
}

impl CalibrationSet {
    pub fn len(&self) -> usize {
        self.image_points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.image_points.is_empty()
    }
}

/// Everything an accumulation run produced.
#[derive(Clone, Debug, Default)]
pub struct Accumulated {
    pub set: CalibrationSet,
    pub reports: Vec<ViewReport>,
    /// Corner overlays in input order, only when requested.
    pub overlays: Vec<Image>,
}

pub struct CalibrationAccumulator {
    grid: GridSize,
    detector: ChessboardDetector,
    subpix: SubPixParams,
    board: Vec<Point3<f64>>,
    keep_overlays: bool,
    verbose: bool,
    acc: Accumulated,
}

impl CalibrationAccumulator {
    pub fn new(grid: GridSize, detector: ChessboardParams, subpix: SubPixParams) -> Result<Self, FisheyeError> {
        if !grid.is_valid() {
            return Err(FisheyeError::InvalidGeometry {
                nx: grid.nx,
                ny: grid.ny,
            });
        }
        Ok(Self {
            grid,
            detector: ChessboardDetector::new(detector),
            subpix,
            board: grid.object_points(),
            keep_overlays: false,
            verbose: false,
            acc: Accumulated::default(),
        })
    }

    /// Keep a corner overlay per image (operator feedback).
    pub fn with_overlays(mut self, keep: bool) -> Self {
        self.keep_overlays = keep;
        self
    }

    /// Report per-image outcomes at `info` instead of `debug`.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn grid(&self) -> GridSize {
        self.grid
    }

    pub fn set(&self) -> &CalibrationSet {
        &self.acc.set
    }

    pub fn reports(&self) -> &[ViewReport] {
        &self.acc.reports
    }

    fn check_size(&mut self, size: (usize, usize)) -> Result<(), FisheyeError> {
        match self.acc.set.image_size {
            Some(expected) if expected != size => Err(FisheyeError::ImageSizeMismatch { expected, found: size }),
            Some(_) => Ok(()),
            None => {
                self.acc.set.image_size = Some(size);
                Ok(())
            }
        }
    }

    /// Detect, refine and record one gray or BGR(A) image.
    ///
    /// Returns whether the board was found. A miss is not an error; the image
    /// simply contributes nothing.
    pub fn add_image(&mut self, image: &ImageView<'_>) -> Result<bool, FisheyeError> {
        image.validate()?;
        self.check_size((image.width, image.height))?;
        let index = self.acc.reports.len();
        let gray = image.to_gray()?;

        let detection = self.detector.detect(&gray.view(), self.grid);
        let corners = detection
            .map(|det| refine_corners(&gray.view(), &det.corners, &self.subpix))
            .unwrap_or_default();
        let found = !corners.is_empty();

        if self.verbose {
            info!("image {index}: chessboard {}", if found { "found" } else { "not found" });
        } else {
            debug!("image {index}: chessboard {}", if found { "found" } else { "not found" });
        }

        if self.keep_overlays {
            self.acc.overlays.push(draw_corners(image, &corners, self.grid, found)?);
        }
        if found {
            self.push_view(corners.iter().map(|p| Point2::new(p.x as f64, p.y as f64)).collect());
        }
        self.acc.reports.push(ViewReport { index, found });
        Ok(found)
    }

    /// Record corners detected elsewhere; they must follow the row-major board order.
    pub fn add_corners(&mut self, image_size: (usize, usize), corners: Vec<Point2<f64>>) -> Result<(), FisheyeError> {
        if corners.len() != self.grid.corner_count() {
            return Err(FisheyeError::MismatchedInput(format!(
                "expected {} corners, got {}",
                self.grid.corner_count(),
                corners.len()
            )));
        }
        self.check_size(image_size)?;
        let index = self.acc.reports.len();
        self.push_view(corners);
        self.acc.reports.push(ViewReport { index, found: true });
        Ok(())
    }

    fn push_view(&mut self, corners: Vec<Point2<f64>>) {
        self.acc.set.object_points.push(self.board.clone());
        self.acc.set.image_points.push(corners);
    }

    pub fn finish(self) -> Accumulated {
        let found = self.acc.reports.iter().filter(|r| r.found).count();
        info!("chessboard found in {found} of {} images", self.acc.reports.len());
        self.acc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fisheye_core::GrayImage;

    fn accumulator() -> CalibrationAccumulator {
        CalibrationAccumulator::new(GridSize::new(4, 3), ChessboardParams::default(), SubPixParams::default())
            .unwrap()
    }

    #[test]
    fn black_image_contributes_nothing() {
        let mut acc = accumulator().with_overlays(true);
        let img = GrayImage::new(64, 48);
        assert!(!acc.add_image(&img.view().into()).unwrap());
        let out = acc.finish();
        assert!(out.set.is_empty());
        assert_eq!(out.reports, vec![ViewReport { index: 0, found: false }]);
        assert_eq!(out.overlays.len(), 1);
        assert_eq!(out.set.image_size, Some((64, 48)));
    }

    #[test]
    fn malformed_view_is_rejected_before_recording() {
        let mut acc = accumulator();
        let data = vec![0u8; 64 * 48 * 2];
        let view = ImageView {
            width: 64,
            height: 48,
            channels: 2,
            data: &data,
        };
        let err = acc.add_image(&view).unwrap_err();
        assert!(matches!(
            err,
            FisheyeError::Image(fisheye_core::ImageError::UnsupportedChannels(2))
        ));
        let out = acc.finish();
        assert!(out.reports.is_empty());
        assert_eq!(out.set.image_size, None);
    }

    #[test]
    fn size_change_is_rejected() {
        let mut acc = accumulator();
        acc.add_image(&GrayImage::new(64, 48).view().into()).unwrap();
        let err = acc.add_image(&GrayImage::new(48, 64).view().into()).unwrap_err();
        assert!(matches!(err, FisheyeError::ImageSizeMismatch { .. }));
    }

    #[test]
    fn external_corners_are_aligned_with_board() {
        let mut acc = accumulator();
        let corners: Vec<Point2<f64>> = (0..12).map(|k| Point2::new(k as f64, 0.0)).collect();
        acc.add_corners((640, 480), corners).unwrap();
        assert!(acc.add_corners((640, 480), vec![Point2::origin(); 3]).is_err());

        let set = acc.finish().set;
        assert_eq!(set.len(), 1);
        assert_eq!(set.object_points[0].len(), 12);
        assert_eq!(set.object_points[0][5], Point3::new(1.0, 1.0, 0.0));
    }

    #[test]
    fn invalid_grid_is_rejected() {
        assert!(matches!(
            CalibrationAccumulator::new(GridSize::new(1, 5), ChessboardParams::default(), SubPixParams::default()),
            Err(FisheyeError::InvalidGeometry { nx: 1, ny: 5 })
        ));
    }
}
