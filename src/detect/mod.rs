mod backend;
mod backends;
mod nms;
mod result;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use image::RgbImage;

pub use backend::DetectorBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use nms::non_max_suppression;
pub use result::{BoundingBox, RawDetection};

use crate::config::{validate_threshold, ModelSettings};
use crate::error::PipelineError;

/// Detector shared between the capture loops and single-shot requests.
pub type SharedDetector = Arc<Mutex<PpeDetector>>;

/// Owns the loaded model and its inference settings.
///
/// Constructed once at startup; a missing model artifact fails here rather
/// than on the first frame.
pub struct PpeDetector {
    backend: Box<dyn DetectorBackend>,
    confidence_threshold: f32,
    model_path: PathBuf,
}

impl PpeDetector {
    pub fn load(settings: &ModelSettings) -> Result<Self, PipelineError> {
        let backend = load_backend(settings)?;
        let mut detector = Self::with_backend(backend, settings.confidence_threshold)?;
        detector.model_path = settings.path.clone();
        detector
            .backend
            .warm_up()
            .map_err(|e| PipelineError::ResourceUnavailable(format!("model warm-up failed: {e:#}")))?;
        log::info!(
            "detector ready: backend={} model={} threshold={:.2}",
            detector.backend.name(),
            settings.path.display(),
            settings.confidence_threshold
        );
        Ok(detector)
    }

    pub fn with_backend(
        backend: Box<dyn DetectorBackend>,
        confidence_threshold: f32,
    ) -> Result<Self, PipelineError> {
        validate_threshold(confidence_threshold)?;
        Ok(Self {
            backend,
            confidence_threshold,
            model_path: PathBuf::new(),
        })
    }

    pub fn into_shared(self) -> SharedDetector {
        Arc::new(Mutex::new(self))
    }

    /// Run the model with the configured threshold.
    pub fn infer(&mut self, image: &RgbImage) -> Result<Vec<RawDetection>, PipelineError> {
        self.infer_with_threshold(image, self.confidence_threshold)
    }

    pub fn infer_with_threshold(
        &mut self,
        image: &RgbImage,
        confidence_threshold: f32,
    ) -> Result<Vec<RawDetection>, PipelineError> {
        validate_threshold(confidence_threshold)?;
        self.backend
            .infer(image, confidence_threshold)
            .map_err(|e| PipelineError::InferenceFailure(format!("{e:#}")))
    }

    pub fn class_name(&self, class_id: usize) -> Option<&str> {
        self.backend.class_name(class_id)
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }
}

/// Whether the configured model artifact is present.
pub fn model_artifact_exists(path: &Path) -> bool {
    is_stub_model(path) || path.is_file()
}

fn is_stub_model(path: &Path) -> bool {
    path.to_str().is_some_and(|p| p.starts_with("stub://"))
}

fn load_backend(settings: &ModelSettings) -> Result<Box<dyn DetectorBackend>, PipelineError> {
    if is_stub_model(&settings.path) {
        return Ok(Box::new(StubBackend::new(settings.class_names.clone())));
    }
    if !settings.path.is_file() {
        return Err(PipelineError::ResourceUnavailable(format!(
            "model not found: {}",
            settings.path.display()
        )));
    }
    if settings.device != "cpu" {
        log::warn!(
            "device '{}' requested; inference runs on cpu",
            settings.device
        );
    }

    #[cfg(feature = "backend-tract")]
    {
        let backend = TractBackend::new(
            &settings.path,
            settings.image_size,
            settings.class_names.clone(),
        )
        .map_err(|e| PipelineError::ResourceUnavailable(format!("{e:#}")))?;
        Ok(Box::new(backend))
    }
    #[cfg(not(feature = "backend-tract"))]
    {
        Err(PipelineError::ResourceUnavailable(format!(
            "loading {} requires the backend-tract feature",
            settings.path.display()
        )))
    }
}
