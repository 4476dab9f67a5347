/// Errors raised when wrapping raw pixel buffers.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    #[error("invalid image buffer length (expected {expected} bytes, got {got})")]
    InvalidBuffer { expected: usize, got: usize },

    #[error("invalid image dimensions (width={width}, height={height})")]
    InvalidDimensions { width: usize, height: usize },

    #[error("unsupported channel count {0} (expected 1, 3 or 4)")]
    UnsupportedChannels(usize),
}

#[derive(Clone, Copy, Debug)]
pub struct GrayImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub data: &'a [u8], // row-major, len = w*h
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrayImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl<'a> GrayImageView<'a> {
    pub fn new(width: usize, height: usize, data: &'a [u8]) -> Result<Self, ImageError> {
        check_buffer(width, height, 1, data.len())?;
        Ok(Self {
            width,
            height,
            data,
        })
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }

    pub fn to_owned(&self) -> GrayImage {
        GrayImage {
            width: self.width,
            height: self.height,
            data: self.data.to_vec(),
        }
    }
}

impl GrayImage {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0; width * height],
        }
    }

    pub fn from_raw(width: usize, height: usize, data: Vec<u8>) -> Result<Self, ImageError> {
        check_buffer(width, height, 1, data.len())?;
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn view(&self) -> GrayImageView<'_> {
        GrayImageView {
            width: self.width,
            height: self.height,
            data: &self.data,
        }
    }
}

/// Borrowed interleaved image with 1, 3 (BGR) or 4 (BGRA) channels.
#[derive(Clone, Copy, Debug)]
pub struct ImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub data: &'a [u8], // row-major, interleaved, len = w*h*channels
}

/// Owned interleaved image. Color images use BGR(A) channel order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Image {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub data: Vec<u8>,
}

impl<'a> ImageView<'a> {
    pub fn new(
        width: usize,
        height: usize,
        channels: usize,
        data: &'a [u8],
    ) -> Result<Self, ImageError> {
        check_buffer(width, height, channels, data.len())?;
        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    /// Check the public fields against each other.
    pub fn validate(&self) -> Result<(), ImageError> {
        check_buffer(self.width, self.height, self.channels, self.data.len())
    }

    /// Convert to grayscale with the usual luma weights (BGR order).
    pub fn to_gray(&self) -> Result<GrayImage, ImageError> {
        self.validate()?;
        let data = match self.channels {
            1 => self.data.to_vec(),
            _ => self
                .data
                .chunks_exact(self.channels)
                .map(|px| {
                    let l = 0.114 * px[0] as f32 + 0.587 * px[1] as f32 + 0.299 * px[2] as f32;
                    l.round().clamp(0.0, 255.0) as u8
                })
                .collect(),
        };
        Ok(GrayImage {
            width: self.width,
            height: self.height,
            data,
        })
    }

    pub fn to_owned(&self) -> Image {
        Image {
            width: self.width,
            height: self.height,
            channels: self.channels,
            data: self.data.to_vec(),
        }
    }
}

impl<'a> From<GrayImageView<'a>> for ImageView<'a> {
    fn from(v: GrayImageView<'a>) -> Self {
        Self {
            width: v.width,
            height: v.height,
            channels: 1,
            data: v.data,
        }
    }
}

impl Image {
    pub fn new(width: usize, height: usize, channels: usize) -> Self {
        Self {
            width,
            height,
            channels,
            data: vec![0; width * height * channels],
        }
    }

    pub fn from_raw(
        width: usize,
        height: usize,
        channels: usize,
        data: Vec<u8>,
    ) -> Result<Self, ImageError> {
        check_buffer(width, height, channels, data.len())?;
        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    pub fn view(&self) -> ImageView<'_> {
        ImageView {
            width: self.width,
            height: self.height,
            channels: self.channels,
            data: &self.data,
        }
    }
}

impl From<GrayImage> for Image {
    fn from(g: GrayImage) -> Self {
        Self {
            width: g.width,
            height: g.height,
            channels: 1,
            data: g.data,
        }
    }
}

fn check_buffer(width: usize, height: usize, channels: usize, len: usize) -> Result<(), ImageError> {
    if width == 0 || height == 0 {
        return Err(ImageError::InvalidDimensions { width, height });
    }
    if !matches!(channels, 1 | 3 | 4) {
        return Err(ImageError::UnsupportedChannels(channels));
    }
    let expected = width * height * channels;
    if expected != len {
        return Err(ImageError::InvalidBuffer { expected, got: len });
    }
    Ok(())
}

#[inline]
fn get_gray(src: &GrayImageView<'_>, x: i32, y: i32) -> u8 {
    if x < 0 || y < 0 || x >= src.width as i32 || y >= src.height as i32 {
        return 0;
    }
    src.data[y as usize * src.width + x as usize]
}

/// Bilinear sample with pixel centers at integer coordinates; outside pixels read as 0.
#[inline]
pub fn sample_bilinear(src: &GrayImageView<'_>, x: f32, y: f32) -> f32 {
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = get_gray(src, x0, y0) as f32;
    let p10 = get_gray(src, x0 + 1, y0) as f32;
    let p01 = get_gray(src, x0, y0 + 1) as f32;
    let p11 = get_gray(src, x0 + 1, y0 + 1) as f32;

    let a = p00 + fx * (p10 - p00);
    let b = p01 + fx * (p11 - p01);
    a + fy * (b - a)
}

#[inline]
pub fn sample_bilinear_u8(src: &GrayImageView<'_>, x: f32, y: f32) -> u8 {
    sample_bilinear(src, x, y).round().clamp(0.0, 255.0) as u8
}

#[inline]
fn get_channel(src: &ImageView<'_>, x: i32, y: i32, c: usize, border: u8) -> f32 {
    if x < 0 || y < 0 || x >= src.width as i32 || y >= src.height as i32 {
        return border as f32;
    }
    src.data[(y as usize * src.width + x as usize) * src.channels + c] as f32
}

/// Bilinear sample of channel `c`; taps outside the image take the `border` value.
#[inline]
pub fn sample_bilinear_channel(src: &ImageView<'_>, x: f32, y: f32, c: usize, border: u8) -> f32 {
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = get_channel(src, x0, y0, c, border);
    let p10 = get_channel(src, x0 + 1, y0, c, border);
    let p01 = get_channel(src, x0, y0 + 1, c, border);
    let p11 = get_channel(src, x0 + 1, y0 + 1, c, border);

    let a = p00 + fx * (p10 - p00);
    let b = p01 + fx * (p11 - p01);
    a + fy * (b - a)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_buffers() {
        let data = vec![0u8; 10];
        assert_eq!(
            GrayImageView::new(4, 3, &data).unwrap_err(),
            ImageError::InvalidBuffer {
                expected: 12,
                got: 10
            }
        );
        assert!(matches!(
            ImageView::new(2, 1, 2, &data[..4]),
            Err(ImageError::UnsupportedChannels(2))
        ));
        assert!(matches!(
            GrayImage::from_raw(0, 3, Vec::new()),
            Err(ImageError::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn bilinear_interpolates_between_pixels() {
        let img = GrayImage::from_raw(2, 2, vec![0, 100, 100, 200]).unwrap();
        let v = img.view();
        assert_eq!(sample_bilinear(&v, 0.0, 0.0), 0.0);
        assert!((sample_bilinear(&v, 0.5, 0.5) - 100.0).abs() < 1e-4);
        assert!((sample_bilinear(&v, 1.0, 0.5) - 150.0).abs() < 1e-4);
        // outside reads as zero
        assert_eq!(sample_bilinear(&v, -3.0, 0.0), 0.0);
    }

    #[test]
    fn channel_sampling_uses_border_value() {
        let img = Image::from_raw(1, 1, 3, vec![10, 20, 30]).unwrap();
        let v = img.view();
        assert_eq!(sample_bilinear_channel(&v, 0.0, 0.0, 2, 0), 30.0);
        assert_eq!(sample_bilinear_channel(&v, 5.0, 5.0, 1, 77), 77.0);
        assert!((sample_bilinear_channel(&v, 0.5, 0.0, 0, 0) - 5.0).abs() < 1e-4);
    }

    #[test]
    fn bgr_to_gray_uses_luma_weights() {
        let img = Image::from_raw(2, 1, 3, vec![255, 0, 0, 0, 0, 255]).unwrap();
        let gray = img.view().to_gray().unwrap();
        assert_eq!(gray.data, vec![29, 76]);
    }

    #[test]
    fn hand_built_views_are_validated() {
        let data = [1u8, 2, 3, 4];
        let two = ImageView {
            width: 2,
            height: 1,
            channels: 2,
            data: &data,
        };
        assert_eq!(two.to_gray().unwrap_err(), ImageError::UnsupportedChannels(2));

        let short = ImageView {
            width: 2,
            height: 1,
            channels: 3,
            data: &data,
        };
        assert_eq!(
            short.validate().unwrap_err(),
            ImageError::InvalidBuffer { expected: 6, got: 4 }
        );
    }
}
