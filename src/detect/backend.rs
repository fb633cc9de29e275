use anyhow::Result;
use image::RgbImage;

use crate::detect::result::RawDetection;

/// Detector backend trait.
///
/// A backend wraps one loaded model. It is owned by a `PpeDetector` and called
/// once per frame; it must not keep pixels beyond the `infer` call.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run the model on a frame and return every box scoring at least
    /// `confidence_threshold`.
    fn infer(&mut self, image: &RgbImage, confidence_threshold: f32) -> Result<Vec<RawDetection>>;

    /// Class-name vocabulary lookup for ids returned by `infer`.
    fn class_name(&self, class_id: usize) -> Option<&str>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
