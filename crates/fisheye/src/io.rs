//! Image file helpers built on the `image` crate.
//!
//! Decoded color images are handed to the rest of the workspace in BGR
//! channel order; gray images stay single channel.

use crate::core::{GrayImage, GrayImageView, Image, ImageView};
use fisheye_calib::{CalibrateOptions, CalibrationOutcome, FisheyeError, FisheyeModel};
use log::debug;
use std::path::Path;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Errors produced by the file helpers.
#[derive(thiserror::Error, Debug)]
pub enum IoError {
    #[error(transparent)]
    Codec(#[from] ::image::ImageError),

    #[error(transparent)]
    Buffer(#[from] crate::core::ImageError),

    #[error(transparent)]
    Fisheye(#[from] FisheyeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Borrow an `image::GrayImage` as a workspace view.
pub fn gray_view(img: &::image::GrayImage) -> GrayImageView<'_> {
    GrayImageView {
        width: img.width() as usize,
        height: img.height() as usize,
        data: img.as_raw(),
    }
}

fn swap_rb(data: &mut [u8], channels: usize) {
    for px in data.chunks_exact_mut(channels) {
        px.swap(0, 2);
    }
}

/// Decode any supported file to 8-bit gray.
pub fn load_gray(path: impl AsRef<Path>) -> Result<GrayImage, IoError> {
    let img = ::image::open(path)?.to_luma8();
    let (w, h) = (img.width() as usize, img.height() as usize);
    Ok(GrayImage::from_raw(w, h, img.into_raw())?)
}

/// Decode any supported file to 8-bit BGR.
pub fn load_color(path: impl AsRef<Path>) -> Result<Image, IoError> {
    let img = ::image::open(path)?.to_rgb8();
    let (w, h) = (img.width() as usize, img.height() as usize);
    let mut data = img.into_raw();
    swap_rb(&mut data, 3);
    Ok(Image::from_raw(w, h, 3, data)?)
}

/// Decode a file keeping it gray when it has no color, BGR otherwise.
pub fn load_image(path: impl AsRef<Path>) -> Result<Image, IoError> {
    let path = path.as_ref();
    let dynamic = ::image::open(path)?;
    let (w, h) = (dynamic.width() as usize, dynamic.height() as usize);
    debug!("loaded {} ({w}x{h}, {:?})", path.display(), dynamic.color());
    if dynamic.color().has_color() {
        let mut data = dynamic.to_rgb8().into_raw();
        swap_rb(&mut data, 3);
        Ok(Image::from_raw(w, h, 3, data)?)
    } else {
        Ok(Image::from_raw(w, h, 1, dynamic.to_luma8().into_raw())?)
    }
}

/// Encode a gray, BGR or BGRA image; the format follows the file extension.
pub fn save_image(img: &ImageView<'_>, path: impl AsRef<Path>) -> Result<(), IoError> {
    let (w, h) = (img.width as u32, img.height as u32);
    let bad_buffer = || crate::core::ImageError::InvalidBuffer {
        expected: img.width * img.height * img.channels,
        got: img.data.len(),
    };
    match img.channels {
        1 => {
            let out = ::image::GrayImage::from_raw(w, h, img.data.to_vec()).ok_or_else(bad_buffer)?;
            out.save(path)?;
        }
        3 => {
            let mut data = img.data.to_vec();
            swap_rb(&mut data, 3);
            let out = ::image::RgbImage::from_raw(w, h, data).ok_or_else(bad_buffer)?;
            out.save(path)?;
        }
        4 => {
            let mut data = img.data.to_vec();
            swap_rb(&mut data, 4);
            let out = ::image::RgbaImage::from_raw(w, h, data).ok_or_else(bad_buffer)?;
            out.save(path)?;
        }
        n => return Err(crate::core::ImageError::UnsupportedChannels(n).into()),
    }
    Ok(())
}

/// Load every path and calibrate `model` from the decoded images.
#[cfg_attr(feature = "tracing", instrument(level = "info", skip_all, fields(images = paths.len())))]
pub fn calibrate_from_paths<P: AsRef<Path>>(
    model: &mut FisheyeModel,
    paths: &[P],
    options: &CalibrateOptions,
) -> Result<CalibrationOutcome, IoError> {
    let images = paths.iter().map(load_image).collect::<Result<Vec<_>, _>>()?;
    Ok(model.calibrate(images.iter().map(Image::view), options)?)
}

/// Write overlays as `overlay_000.png`, `overlay_001.png`, ... into `dir`.
pub fn save_overlays(overlays: &[Image], dir: impl AsRef<Path>) -> Result<(), IoError> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;
    for (i, overlay) in overlays.iter().enumerate() {
        save_image(&overlay.view(), dir.join(format!("overlay_{i:03}.png")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_round_trip_keeps_bgr_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("px.png");
        // one blue pixel, one red pixel
        let img = Image::from_raw(2, 1, 3, vec![255, 0, 0, 0, 0, 255]).unwrap();
        save_image(&img.view(), &path).unwrap();

        let back = load_image(&path).unwrap();
        assert_eq!(back, img);
        let rgb = ::image::open(&path).unwrap().to_rgb8();
        assert_eq!(rgb.get_pixel(0, 0).0, [0, 0, 255]);
    }

    #[test]
    fn gray_files_stay_single_channel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("g.png");
        let gray = GrayImage::from_raw(3, 2, vec![0, 50, 100, 150, 200, 250]).unwrap();
        save_image(&gray.view().into(), &path).unwrap();

        let back = load_image(&path).unwrap();
        assert_eq!(back.channels, 1);
        assert_eq!(back.data, gray.data);
        assert_eq!(load_gray(&path).unwrap(), gray);
        assert_eq!(load_color(&path).unwrap().channels, 3);
    }

    #[test]
    fn two_channel_images_are_rejected() {
        let img = Image::new(2, 2, 2);
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            save_image(&img.view(), dir.path().join("x.png")),
            Err(IoError::Buffer(crate::core::ImageError::UnsupportedChannels(2)))
        ));
    }

    #[test]
    fn gray_view_borrows_pixels() {
        let img = ::image::GrayImage::from_raw(2, 2, vec![1, 2, 3, 4]).unwrap();
        let view = gray_view(&img);
        assert_eq!((view.width, view.height), (2, 2));
        assert_eq!(view.get(1, 1), 4);
    }
}
