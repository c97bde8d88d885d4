use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, Rgb, RgbImage};

/// Errors raised while moving frames in and out of their compressed form
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("JPEG decode failed: {0}")]
    Decode(#[source] image::ImageError),
    #[error("JPEG encode failed: {0}")]
    Encode(#[source] image::ImageError),
    #[error("pixel buffer of {actual} bytes does not fit a {width}x{height} RGB frame")]
    BadBuffer {
        width: u32,
        height: u32,
        actual: usize,
    },
}

/// One decoded still image (8-bit RGB).
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    image: RgbImage,
}

impl Frame {
    /// Black frame of the given size
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbImage::new(width, height),
        }
    }

    pub fn filled(width: u32, height: u32, color: Rgb<u8>) -> Self {
        Self {
            image: RgbImage::from_pixel(width, height, color),
        }
    }

    pub fn from_image(image: RgbImage) -> Self {
        Self { image }
    }

    pub fn from_raw(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, MediaError> {
        let actual = pixels.len();
        RgbImage::from_raw(width, height, pixels)
            .map(Self::from_image)
            .ok_or(MediaError::BadBuffer {
                width,
                height,
                actual,
            })
    }

    pub fn decode_jpeg(bytes: &[u8]) -> Result<Self, MediaError> {
        let decoded = image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)
            .map_err(MediaError::Decode)?;
        Ok(Self::from_image(decoded.to_rgb8()))
    }

    /// Compress the frame as a baseline JPEG. `quality` is clamped to 1..=100.
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>, MediaError> {
        let mut out = Vec::new();
        {
            let mut encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
            encoder
                .encode_image(&self.image)
                .map_err(MediaError::Encode)?;
        }
        Ok(out)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbImage {
        &mut self.image
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgb<u8>> {
        self.image.get_pixel_checked(x, y).copied()
    }

    /// Grey level of a pixel (ITU-R 601 weights), 0 outside the frame
    pub fn luma(&self, x: u32, y: u32) -> u8 {
        match self.image.get_pixel_checked(x, y) {
            Some(Rgb([r, g, b])) => {
                let weighted = u32::from(*r) * 299 + u32::from(*g) * 587 + u32::from(*b) * 114;
                u8::try_from(weighted / 1000).unwrap_or(u8::MAX)
            }
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jpeg_roundtrip_keeps_dimensions() {
        let frame = Frame::filled(64, 48, Rgb([200, 30, 30]));
        let jpeg = frame.encode_jpeg(85).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);

        let decoded = Frame::decode_jpeg(&jpeg).unwrap();
        assert_eq!(decoded.width(), 64);
        assert_eq!(decoded.height(), 48);
        let px = decoded.pixel(10, 10).unwrap();
        assert!(px.0[0] > 150 && px.0[1] < 80);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = Frame::decode_jpeg(&[0xFF, 0xD8, 0x00, 0x01, 0xFF, 0xD9]).unwrap_err();
        assert!(matches!(err, MediaError::Decode(_)));
    }

    #[test]
    fn test_from_raw_checks_length() {
        assert!(Frame::from_raw(2, 2, vec![0; 12]).is_ok());
        assert!(matches!(
            Frame::from_raw(2, 2, vec![0; 11]),
            Err(MediaError::BadBuffer { actual: 11, .. })
        ));
    }

    #[test]
    fn test_luma() {
        let white = Frame::filled(1, 1, Rgb([255, 255, 255]));
        assert_eq!(white.luma(0, 0), 255);
        assert_eq!(white.luma(5, 5), 0);
        assert_eq!(Frame::new(1, 1).luma(0, 0), 0);
    }
}
