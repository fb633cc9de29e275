//! PPE Compliance Monitor
//!
//! Detects personal protective equipment on camera frames, decides per frame
//! whether every required item is present, and serves annotated results.
//!
//! # Pipeline
//!
//! ```text
//! FrameSource → PpeDetector → ComplianceAggregator → Annotator → MultipartEncoder
//! ```
//!
//! The live path is driven by `capture::CaptureLoop`, a pull-driven iterator
//! that owns one camera and releases it exactly once. The single-shot path
//! (`inspect`) reuses the same detector, aggregator and annotator on one
//! decoded image.
//!
//! # Module Structure
//!
//! - `config`: layered configuration (defaults, JSON file, `PPE_*` env)
//! - `ingest`: frame sources (synthetic, V4L2, FFmpeg) and the release guard
//! - `detect`: detector backends and the shared `PpeDetector`
//! - `compliance`: required categories and per-frame verdicts
//! - `annotate`: boxes, labels and the verdict banner
//! - `encode`: JPEG and multipart framing
//! - `capture`: the live capture state machine
//! - `inspect`: single-shot detection and status reporting
//! - `api`: HTTP server

pub mod annotate;
pub mod api;
pub mod capture;
pub mod compliance;
pub mod config;
pub mod detect;
pub mod encode;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod inspect;

pub use annotate::Annotator;
pub use api::{ApiHandle, ApiServer};
pub use capture::{CaptureLoop, CaptureState, StreamStats};
pub use compliance::{
    CategoryState, ComplianceAggregator, ComplianceRecord, PpeCategory, RequiredSet,
};
pub use config::{ApiSettings, CameraSettings, ModelSettings, MonitorConfig};
pub use detect::{BoundingBox, DetectorBackend, PpeDetector, RawDetection, SharedDetector};
pub use encode::MultipartEncoder;
pub use error::PipelineError;
pub use frame::Frame;
pub use ingest::{open_source, FrameSource, SourceGuard, SourceOpener, SourceStats};
pub use inspect::{Inspection, Inspector, StatusReport};
