//! Decoded camera frames.
//!
//! - `Frame`: one RGB8 image pulled from a `FrameSource`, plus its position in
//!   the stream. Frame-scoped: it is dropped once its annotated copy has been
//!   encoded.

use std::time::{Duration, Instant};

use image::RgbImage;

use crate::error::PipelineError;

/// A decoded RGB frame.
pub struct Frame {
    image: RgbImage,
    /// 1-based index of the frame within its stream.
    pub sequence: u64,
    captured_at: Instant,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self {
            image,
            sequence,
            captured_at: Instant::now(),
        }
    }

    /// Wrap tightly packed RGB24 bytes.
    pub fn from_rgb(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        sequence: u64,
    ) -> Result<Self, PipelineError> {
        let len = pixels.len();
        let image = RgbImage::from_raw(width, height, pixels).ok_or_else(|| {
            PipelineError::TransientReadFailure(format!(
                "frame buffer of {} bytes does not hold {}x{} RGB pixels",
                len, width, height
            ))
        })?;
        Ok(Self::new(image, sequence))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Time since the frame was read from its source.
    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_rgb_rejects_short_buffers() {
        let err = Frame::from_rgb(vec![0u8; 10], 4, 4, 1).err().expect("short buffer");
        assert!(matches!(err, PipelineError::TransientReadFailure(_)));
    }

    #[test]
    fn from_rgb_keeps_dimensions() {
        let frame = Frame::from_rgb(vec![7u8; 4 * 2 * 3], 4, 2, 3).unwrap();
        assert_eq!(frame.width(), 4);
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.sequence, 3);
        assert_eq!(frame.image().get_pixel(3, 1).0, [7, 7, 7]);
    }

    #[test]
    fn age_counts_from_capture() {
        let frame = Frame::new(RgbImage::new(1, 1), 1);
        std::thread::sleep(Duration::from_millis(5));
        assert!(frame.age() >= Duration::from_millis(5));
    }
}
