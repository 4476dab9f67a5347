//! Core types and utilities shared by the fisheye calibration crates.
//!
//! This crate is intentionally small: image buffers with bilinear sampling,
//! plane homographies, chessboard grid geometry and a tiny logger. It does
//! not know anything about lens models.

mod grid;
mod homography;
mod image;
mod logger;

pub use grid::GridSize;
pub use homography::{estimate_homography, Homography};
pub use image::{
    sample_bilinear, sample_bilinear_channel, sample_bilinear_u8, GrayImage, GrayImageView, Image,
    ImageError, ImageView,
};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_with_level;
