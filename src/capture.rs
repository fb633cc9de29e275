//! Live capture loop.
//!
//! `CaptureLoop` is a pull-driven iterator: each `next()` reads one frame,
//! runs it through detect → aggregate → annotate → encode and yields the
//! multipart chunk. Nothing is read ahead, so at most one frame is in flight.
//!
//! ```text
//! Idle → Opening → Streaming → Closed
//!           │          │
//!           └──────────┴──→ Error
//! ```
//!
//! The source is held in a `SourceGuard` and released exactly once, on
//! whichever of close, failure, cancellation or drop comes first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::annotate::Annotator;
use crate::compliance::{ComplianceAggregator, ComplianceRecord};
use crate::detect::{PpeDetector, SharedDetector};
use crate::encode::MultipartEncoder;
use crate::error::PipelineError;
use crate::frame::Frame;
use crate::ingest::{SourceGuard, SourceOpener};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Opening,
    Streaming,
    Closed,
    Error,
}

impl CaptureState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CaptureState::Closed | CaptureState::Error)
    }
}

/// Per-stream counters, logged when the loop ends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub frames_emitted: u64,
    pub compliant_frames: u64,
}

pub struct CaptureLoop<O: SourceOpener> {
    opener: O,
    detector: Option<SharedDetector>,
    aggregator: ComplianceAggregator,
    annotator: Annotator,
    encoder: MultipartEncoder,
    cancel: Arc<AtomicBool>,
    state: CaptureState,
    guard: Option<SourceGuard>,
    stats: StreamStats,
}

impl<O: SourceOpener> CaptureLoop<O> {
    /// `detector` is `None` when the model failed to load at startup; the
    /// loop then fails in `Opening` without touching the camera.
    pub fn new(
        opener: O,
        detector: Option<SharedDetector>,
        aggregator: ComplianceAggregator,
        annotator: Annotator,
        encoder: MultipartEncoder,
    ) -> Self {
        Self {
            opener,
            detector,
            aggregator,
            annotator,
            encoder,
            cancel: Arc::new(AtomicBool::new(false)),
            state: CaptureState::Idle,
            guard: None,
            stats: StreamStats::default(),
        }
    }

    /// Share an external cancellation flag.
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    pub fn content_type(&self) -> String {
        self.encoder.content_type()
    }

    /// Acquire the source. Called implicitly by the first `next()`.
    ///
    /// Lets callers learn about `ResourceUnavailable` before committing to a
    /// streaming response.
    pub fn open(&mut self) -> Result<(), PipelineError> {
        if self.state != CaptureState::Idle {
            return Ok(());
        }
        self.state = CaptureState::Opening;
        if self.detector.is_none() {
            self.state = CaptureState::Error;
            return Err(PipelineError::ResourceUnavailable(
                "detector not loaded".into(),
            ));
        }
        match self.opener.open() {
            Ok(source) => {
                log::info!("stream started: {}", source.describe());
                self.guard = Some(SourceGuard::new(source));
                self.state = CaptureState::Streaming;
                Ok(())
            }
            Err(err) => {
                log::error!("failed to open camera: {err}");
                self.state = CaptureState::Error;
                Err(err)
            }
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn close(&mut self) {
        if let Some(mut guard) = self.guard.take() {
            guard.release();
        }
        if !self.state.is_terminal() {
            self.state = CaptureState::Closed;
            self.log_summary();
        }
    }

    fn fail(&mut self, err: PipelineError) -> PipelineError {
        log::error!("stream aborted: {err}");
        if let Some(mut guard) = self.guard.take() {
            guard.release();
        }
        self.state = CaptureState::Error;
        self.log_summary();
        err
    }

    fn log_summary(&self) {
        log::info!(
            "stream stopped: {} frames emitted, {} compliant",
            self.stats.frames_emitted,
            self.stats.compliant_frames
        );
    }

    fn read(&mut self) -> Option<Frame> {
        let source = self.guard.as_mut()?.source_mut()?;
        match source.read_frame() {
            Ok(frame) => frame,
            Err(err) => {
                log::warn!("frame read failed, closing stream: {err}");
                None
            }
        }
    }

    fn step(&mut self) -> Option<Result<Vec<u8>, PipelineError>> {
        if self.cancelled() {
            self.close();
            return None;
        }
        let Some(frame) = self.read() else {
            self.close();
            return None;
        };
        if self.cancelled() {
            self.close();
            return None;
        }

        let record = match self.evaluate(&frame) {
            Ok(record) => record,
            Err(err) => return Some(Err(self.fail(err))),
        };
        if self.cancelled() {
            self.close();
            return None;
        }

        let annotated = self.annotator.annotate(frame.image(), &record);
        drop(frame);
        if self.cancelled() {
            self.close();
            return None;
        }

        match self.encoder.encode_frame(&annotated) {
            Ok(chunk) => {
                self.stats.frames_emitted += 1;
                if record.compliant {
                    self.stats.compliant_frames += 1;
                }
                Some(Ok(chunk))
            }
            Err(err) => Some(Err(self.fail(err))),
        }
    }

    fn evaluate(&self, frame: &Frame) -> Result<ComplianceRecord, PipelineError> {
        let shared = self
            .detector
            .as_ref()
            .ok_or_else(|| PipelineError::ResourceUnavailable("detector not loaded".into()))?;
        let mut guard = shared
            .lock()
            .map_err(|_| PipelineError::InferenceFailure("detector lock poisoned".into()))?;
        let detections = guard.infer(frame.image())?;
        log::debug!(
            "frame {}: {} detections, {:?} after capture",
            frame.sequence,
            detections.len(),
            frame.age()
        );
        let detector: &PpeDetector = &guard;
        Ok(self
            .aggregator
            .aggregate(&detections, move |id| detector.class_name(id)))
    }
}

impl<O: SourceOpener> Iterator for CaptureLoop<O> {
    type Item = Result<Vec<u8>, PipelineError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.state {
            CaptureState::Idle => match self.open() {
                Ok(()) => self.step(),
                Err(err) => Some(Err(err)),
            },
            CaptureState::Streaming => self.step(),
            // Opening only lasts for the duration of `open()`.
            CaptureState::Opening | CaptureState::Closed | CaptureState::Error => None,
        }
    }
}

impl<O: SourceOpener> Drop for CaptureLoop<O> {
    fn drop(&mut self) {
        if self.state == CaptureState::Streaming {
            self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CameraSettings;
    use crate::detect::StubBackend;

    fn detector() -> SharedDetector {
        let names = vec!["helmet".into(), "safety glasses".into(), "gloves".into()];
        PpeDetector::with_backend(Box::new(StubBackend::new(names)), 0.5)
            .unwrap()
            .into_shared()
    }

    fn camera(frames: u64) -> CameraSettings {
        CameraSettings {
            source: format!("stub://unit?frames={frames}"),
            width: 32,
            height: 24,
            fps: 0,
        }
    }

    fn capture(settings: CameraSettings, detector: Option<SharedDetector>) -> CaptureLoop<CameraSettings> {
        CaptureLoop::new(
            settings,
            detector,
            ComplianceAggregator::default(),
            Annotator::default(),
            MultipartEncoder::default(),
        )
    }

    #[test]
    fn emits_one_chunk_per_frame_then_closes() {
        let mut capture = capture(camera(3), Some(detector()));
        assert_eq!(capture.state(), CaptureState::Idle);
        let chunks: Vec<_> = capture.by_ref().collect::<Result<_, _>>().unwrap();
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.starts_with(b"--frame\r\n")));
        assert_eq!(capture.state(), CaptureState::Closed);
        assert_eq!(capture.stats().frames_emitted, 3);
        assert!(capture.next().is_none());
    }

    #[test]
    fn missing_detector_fails_in_opening() {
        let mut capture = capture(camera(3), None);
        assert!(matches!(
            capture.next(),
            Some(Err(PipelineError::ResourceUnavailable(_)))
        ));
        assert_eq!(capture.state(), CaptureState::Error);
        assert!(capture.next().is_none());
    }

    #[test]
    fn unopenable_source_fails_in_opening() {
        let settings = CameraSettings {
            source: "stub://unit?frames=oops".into(),
            ..camera(1)
        };
        let mut capture = capture(settings, Some(detector()));
        assert!(capture.open().is_err());
        assert_eq!(capture.state(), CaptureState::Error);
        assert!(capture.next().is_none());
    }

    #[test]
    fn cancellation_closes_between_frames() {
        let mut capture = capture(camera(100), Some(detector()));
        let cancel = capture.cancel_handle();
        assert!(capture.next().unwrap().is_ok());
        cancel.store(true, Ordering::SeqCst);
        assert!(capture.next().is_none());
        assert_eq!(capture.state(), CaptureState::Closed);
        assert_eq!(capture.stats().frames_emitted, 1);
    }
}
