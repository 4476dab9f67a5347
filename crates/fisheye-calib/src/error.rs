use fisheye_core::ImageError;

/// Errors returned by calibration, undistortion, projection and persistence.
#[derive(thiserror::Error, Debug)]
pub enum FisheyeError {
    #[error("invalid chessboard geometry {nx}x{ny} (need at least 2x2 inner corners)")]
    InvalidGeometry { nx: usize, ny: usize },

    #[error("no usable calibration views (got {views})")]
    InsufficientData { views: usize },

    #[error("mismatched input: {0}")]
    MismatchedInput(String),

    #[error("image size {found:?} differs from the calibration size {expected:?}")]
    ImageSizeMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("view {view} is ill-conditioned (condition number {condition:.3e})")]
    IllConditioned { view: usize, condition: f64 },

    #[error("numerical failure: {0}")]
    NumericalFailure(&'static str),

    #[error("model is not calibrated")]
    NotCalibrated,

    #[error("unsupported model snapshot version {0}")]
    UnsupportedSnapshotVersion(u32),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
