//! Synthetic frame source for `stub://` descriptors.
//!
//! Produces a moving gradient at the configured size and rate, so the
//! whole pipeline can run without a camera attached.

use std::time::{Duration, Instant};

use image::{Rgb, RgbImage};

use super::{FrameSource, SourceStats};
use crate::error::PipelineError;
use crate::frame::Frame;

pub struct SyntheticSource {
    name: String,
    width: u32,
    height: u32,
    frame_interval: Duration,
    frame_limit: Option<u64>,
    frame_count: u64,
    next_frame_at: Option<Instant>,
    released: bool,
    /// Simulated scene state, shifted every 50 frames.
    scene_state: u8,
}

impl SyntheticSource {
    /// `frame_limit` ends the stream cleanly after that many frames.
    pub fn new(
        name: impl Into<String>,
        width: u32,
        height: u32,
        fps: u32,
        frame_limit: Option<u64>,
    ) -> Self {
        let frame_interval = if fps == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(1) / fps
        };
        Self {
            name: name.into(),
            width,
            height,
            frame_interval,
            frame_limit,
            frame_count: 0,
            next_frame_at: None,
            released: false,
            scene_state: 0,
        }
    }

    fn generate_synthetic_image(&mut self) -> RgbImage {
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let shift = self.frame_count + self.scene_state as u64;
        RgbImage::from_fn(self.width, self.height, |x, y| {
            let r = ((x as u64 + shift) % 256) as u8;
            let g = ((y as u64 + shift) % 256) as u8;
            let b = (((x + y) as u64 / 2 + shift) % 256) as u8;
            Rgb([r, g, b])
        })
    }

    fn pace(&mut self) {
        let now = Instant::now();
        if let Some(due) = self.next_frame_at {
            if due > now {
                std::thread::sleep(due - now);
            }
        }
        self.next_frame_at = Some(Instant::now() + self.frame_interval);
    }
}

impl FrameSource for SyntheticSource {
    fn describe(&self) -> String {
        format!("stub://{}", self.name)
    }

    fn read_frame(&mut self) -> Result<Option<Frame>, PipelineError> {
        if self.released {
            return Err(PipelineError::TransientReadFailure(format!(
                "{} already released",
                self.describe()
            )));
        }
        if self.frame_limit.is_some_and(|limit| self.frame_count >= limit) {
            return Ok(None);
        }
        self.pace();
        self.frame_count += 1;
        let image = self.generate_synthetic_image();
        Ok(Some(Frame::new(image, self.frame_count)))
    }

    fn release(&mut self) {
        self.released = true;
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            descriptor: self.describe(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_have_configured_size_and_sequence() {
        let mut source = SyntheticSource::new("test", 64, 48, 0, None);
        let first = source.read_frame().unwrap().unwrap();
        let second = source.read_frame().unwrap().unwrap();
        assert_eq!((first.width(), first.height()), (64, 48));
        assert_eq!((first.sequence, second.sequence), (1, 2));
        assert_ne!(first.image(), second.image());
    }

    #[test]
    fn frame_limit_ends_stream() {
        let mut source = SyntheticSource::new("test", 4, 4, 0, Some(1));
        assert!(source.read_frame().unwrap().is_some());
        assert!(source.read_frame().unwrap().is_none());
        assert_eq!(source.stats().frames_captured, 1);
    }

    #[test]
    fn released_source_refuses_reads() {
        let mut source = SyntheticSource::new("test", 4, 4, 0, None);
        source.release();
        assert!(source.read_frame().is_err());
    }
}
