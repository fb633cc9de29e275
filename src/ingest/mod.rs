//! Frame ingestion sources.
//!
//! This module provides the camera/video boundary of the pipeline:
//! - Synthetic frames (`stub://` descriptors, demos and tests)
//! - USB/V4L2 devices addressed by index (feature: ingest-v4l2)
//! - Video files and network streams via FFmpeg (feature: ingest-ffmpeg)
//!
//! Every source implements `FrameSource`. Callers hold an opened source
//! through a `SourceGuard`, which releases it exactly once whichever way the
//! holder exits.

#[cfg(feature = "ingest-ffmpeg")]
pub mod ffmpeg;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod stub;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use std::path::PathBuf;
use std::str::FromStr;

use url::Url;

use crate::config::CameraSettings;
use crate::error::PipelineError;
use crate::frame::Frame;

#[cfg(feature = "ingest-ffmpeg")]
pub use ffmpeg::FfmpegSource;
pub use stub::SyntheticSource;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

/// An opened camera or video stream.
pub trait FrameSource: Send {
    /// Human readable identifier for logs.
    fn describe(&self) -> String;

    /// Read the next frame.
    ///
    /// `Ok(None)` is a clean end of stream. Errors are read failures; callers
    /// treat both as the end of the stream.
    fn read_frame(&mut self) -> Result<Option<Frame>, PipelineError>;

    /// Release the underlying handle. Called at most once, by `SourceGuard`.
    fn release(&mut self);

    fn stats(&self) -> SourceStats;
}

/// Statistics for a frame source.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub descriptor: String,
}

/// Acquires a source for a capture loop.
pub trait SourceOpener: Send {
    fn open(&self) -> Result<Box<dyn FrameSource>, PipelineError>;
}

impl SourceOpener for CameraSettings {
    fn open(&self) -> Result<Box<dyn FrameSource>, PipelineError> {
        open_source(self)
    }
}

/// What a camera source string refers to.
#[derive(Clone, Debug, PartialEq)]
pub enum SourceDescriptor {
    /// `stub://name[?frames=N]`
    Stub { name: String, frame_limit: Option<u64> },
    /// Local capture device index, e.g. `0` for `/dev/video0`.
    Device(u32),
    /// `rtsp://`, `http://` and other network streams.
    Url(Url),
    File(PathBuf),
}

impl FromStr for SourceDescriptor {
    type Err = PipelineError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(PipelineError::config("camera source must not be empty"));
        }
        if let Ok(index) = raw.parse::<u32>() {
            return Ok(Self::Device(index));
        }
        if !raw.contains("://") {
            return Ok(Self::File(PathBuf::from(raw)));
        }
        let url = Url::parse(raw)
            .map_err(|e| PipelineError::config(format!("invalid camera source '{raw}': {e}")))?;
        if url.scheme() != "stub" {
            return Ok(Self::Url(url));
        }
        let frame_limit = url
            .query_pairs()
            .find(|(key, _)| key == "frames")
            .map(|(_, value)| {
                value.parse::<u64>().map_err(|_| {
                    PipelineError::config(format!("invalid frames limit in '{raw}'"))
                })
            })
            .transpose()?;
        Ok(Self::Stub {
            name: url.host_str().unwrap_or("camera").to_string(),
            frame_limit,
        })
    }
}

/// Open the source named by `settings.source`.
///
/// Fails with `ResourceUnavailable` when the device or stream cannot be
/// acquired, or when the backend for it was not compiled in.
pub fn open_source(settings: &CameraSettings) -> Result<Box<dyn FrameSource>, PipelineError> {
    let descriptor: SourceDescriptor = settings.source.parse()?;
    let source: Box<dyn FrameSource> = match descriptor {
        SourceDescriptor::Stub { name, frame_limit } => Box::new(SyntheticSource::new(
            name,
            settings.width,
            settings.height,
            settings.fps,
            frame_limit,
        )),
        SourceDescriptor::Device(index) => open_device(settings, index)?,
        SourceDescriptor::Url(url) => open_stream(settings, url.as_str())?,
        SourceDescriptor::File(path) => open_stream(settings, &path.to_string_lossy())?,
    };
    log::info!("source opened: {}", source.describe());
    Ok(source)
}

#[cfg(feature = "ingest-v4l2")]
fn open_device(settings: &CameraSettings, index: u32) -> Result<Box<dyn FrameSource>, PipelineError> {
    let config = v4l2::V4l2Config {
        device: format!("/dev/video{index}"),
        target_fps: settings.fps,
        width: settings.width,
        height: settings.height,
    };
    Ok(Box::new(V4l2Source::open(config)?))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_device(_settings: &CameraSettings, index: u32) -> Result<Box<dyn FrameSource>, PipelineError> {
    Err(PipelineError::ResourceUnavailable(format!(
        "camera device {index} requires the ingest-v4l2 feature"
    )))
}

#[cfg(feature = "ingest-ffmpeg")]
fn open_stream(_settings: &CameraSettings, location: &str) -> Result<Box<dyn FrameSource>, PipelineError> {
    Ok(Box::new(FfmpegSource::open(location)?))
}

#[cfg(not(feature = "ingest-ffmpeg"))]
fn open_stream(_settings: &CameraSettings, location: &str) -> Result<Box<dyn FrameSource>, PipelineError> {
    Err(PipelineError::ResourceUnavailable(format!(
        "video source '{location}' requires the ingest-ffmpeg feature"
    )))
}

/// Scoped ownership of an opened source.
///
/// `release` is idempotent and also runs on drop, so every exit path of the
/// holder releases the handle exactly once.
pub struct SourceGuard {
    source: Option<Box<dyn FrameSource>>,
}

impl SourceGuard {
    pub fn new(source: Box<dyn FrameSource>) -> Self {
        Self {
            source: Some(source),
        }
    }

    pub fn source_mut(&mut self) -> Option<&mut (dyn FrameSource + 'static)> {
        self.source.as_deref_mut()
    }

    pub fn is_held(&self) -> bool {
        self.source.is_some()
    }

    pub fn release(&mut self) {
        if let Some(mut source) = self.source.take() {
            let stats = source.stats();
            source.release();
            log::info!(
                "source released: {} after {} frames",
                stats.descriptor,
                stats.frames_captured
            );
        }
    }
}

impl Drop for SourceGuard {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn descriptors_parse() {
        assert_eq!("0".parse::<SourceDescriptor>().unwrap(), SourceDescriptor::Device(0));
        assert_eq!(
            "stub://gate?frames=3".parse::<SourceDescriptor>().unwrap(),
            SourceDescriptor::Stub {
                name: "gate".into(),
                frame_limit: Some(3)
            }
        );
        assert!(matches!(
            "rtsp://10.0.0.5:554/stream".parse::<SourceDescriptor>().unwrap(),
            SourceDescriptor::Url(url) if url.scheme() == "rtsp"
        ));
        assert_eq!(
            "clips/site.mp4".parse::<SourceDescriptor>().unwrap(),
            SourceDescriptor::File(PathBuf::from("clips/site.mp4"))
        );
        assert!("stub://gate?frames=many".parse::<SourceDescriptor>().is_err());
        assert!("  ".parse::<SourceDescriptor>().is_err());
    }

    #[test]
    fn open_source_builds_synthetic_source() {
        let settings = CameraSettings {
            source: "stub://dock?frames=2".into(),
            width: 32,
            height: 24,
            fps: 1000,
        };
        let mut source = open_source(&settings).unwrap();
        let frame = source.read_frame().unwrap().unwrap();
        assert_eq!((frame.width(), frame.height()), (32, 24));
        assert!(source.read_frame().unwrap().is_some());
        assert!(source.read_frame().unwrap().is_none());
    }

    struct CountingSource {
        releases: Arc<AtomicUsize>,
    }

    impl FrameSource for CountingSource {
        fn describe(&self) -> String {
            "counting".into()
        }
        fn read_frame(&mut self) -> Result<Option<Frame>, PipelineError> {
            Ok(None)
        }
        fn release(&mut self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
        fn stats(&self) -> SourceStats {
            SourceStats {
                frames_captured: 0,
                descriptor: self.describe(),
            }
        }
    }

    #[test]
    fn guard_releases_once() {
        let releases = Arc::new(AtomicUsize::new(0));
        {
            let mut guard = SourceGuard::new(Box::new(CountingSource {
                releases: releases.clone(),
            }));
            guard.release();
            guard.release();
            assert!(!guard.is_held());
        }
        assert_eq!(releases.load(Ordering::SeqCst), 1);

        drop(SourceGuard::new(Box::new(CountingSource {
            releases: releases.clone(),
        })));
        assert_eq!(releases.load(Ordering::SeqCst), 2);
    }
}
