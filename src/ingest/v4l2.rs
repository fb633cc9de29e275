//! V4L2 frame source.
//!
//! Opens a local capture device (e.g. `/dev/video0`) with memory-mapped
//! buffers and converts each buffer to an RGB `Frame`. The device handle and
//! its stream live together in one self-referencing state, dropped on
//! `release`.

use ouroboros::self_referencing;
use std::time::Duration;

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{FrameSource, SourceStats};
use crate::error::PipelineError;
use crate::frame::Frame;

#[derive(Clone, Debug)]
pub struct V4l2Config {
    /// Device path (e.g., "/dev/video0")
    pub device: String,
    pub target_fps: u32,
    /// Preferred frame width; the driver may pick another.
    pub width: u32,
    pub height: u32,
}

impl Default for V4l2Config {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            target_fps: 30,
            width: 640,
            height: 480,
        }
    }
}

pub struct V4l2Source {
    config: V4l2Config,
    state: Option<DeviceState>,
    format: PixelFormat,
    frame_count: u64,
    active_width: u32,
    active_height: u32,
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    /// Open the device and start streaming.
    pub fn open(config: V4l2Config) -> Result<Self, PipelineError> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let unavailable = |what: &str, err: std::io::Error| {
            PipelineError::ResourceUnavailable(format!("{what} {}: {err}", config.device))
        };

        let mut device =
            v4l::Device::with_path(&config.device).map_err(|e| unavailable("open v4l2 device", e))?;
        let mut format = device.format().map_err(|e| unavailable("read v4l2 format of", e))?;
        format.width = config.width;
        format.height = config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("V4l2Source: failed to set format on {}: {}", config.device, err);
                device
                    .format()
                    .map_err(|e| unavailable("read v4l2 format of", e))?
            }
        };
        let pixel_format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            PipelineError::ResourceUnavailable(format!(
                "{} offers unsupported pixel format {}",
                config.device, format.fourcc
            ))
        })?;

        if config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("V4l2Source: failed to set fps on {}: {}", config.device, err);
            }
        }

        let stall_timeout = stall_timeout(config.target_fps);
        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                let mut stream = v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)?;
                stream.set_timeout(stall_timeout);
                Ok(stream)
            },
        }
        .try_build()
        .map_err(|e| unavailable("create v4l2 buffer stream for", e))?;

        log::info!(
            "V4l2Source: connected to {} ({}x{} {})",
            config.device,
            format.width,
            format.height,
            format.fourcc
        );
        Ok(Self {
            active_width: format.width,
            active_height: format.height,
            config,
            state: Some(state),
            format: pixel_format,
            frame_count: 0,
        })
    }
}

impl FrameSource for V4l2Source {
    fn describe(&self) -> String {
        format!("v4l2:{}", self.config.device)
    }

    fn read_frame(&mut self) -> Result<Option<Frame>, PipelineError> {
        use v4l::io::traits::CaptureStream;

        let Some(state) = self.state.as_mut() else {
            return Ok(None);
        };
        let pixels = state
            .with_mut(|fields| fields.stream.next().map(|(buf, _)| buf.to_vec()))
            .map_err(|err| PipelineError::TransientReadFailure(format!("capture v4l2 frame: {err}")))?;
        let rgb = normalize_to_rgb(&pixels, self.active_width, self.active_height, self.format)?;

        self.frame_count += 1;
        Frame::from_rgb(rgb, self.active_width, self.active_height, self.frame_count).map(Some)
    }

    fn release(&mut self) {
        // Dropping the stream unmaps the buffers before the device closes.
        self.state = None;
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            descriptor: self.describe(),
        }
    }
}

/// How long a dequeue may block before the read counts as failed.
fn stall_timeout(target_fps: u32) -> Duration {
    let base_ms = if target_fps == 0 {
        500
    } else {
        (1000 / target_fps).saturating_mul(4)
    };
    Duration::from_millis(base_ms.max(500) as u64)
}
