use anyhow::{anyhow, Result};
use image::RgbImage;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, RawDetection};

/// Stub backend for demos and tests. Selected with a `stub://` model path.
///
/// Without a script it emits one box per vocabulary entry, switching classes
/// on and off every `PATTERN_PERIOD` frames so the compliance verdict flips.
pub struct StubBackend {
    class_names: Vec<String>,
    script: Option<Vec<Vec<RawDetection>>>,
    fail_on_call: Option<u64>,
    calls: u64,
}

const PATTERN_PERIOD: u64 = 10;

impl StubBackend {
    pub fn new(class_names: Vec<String>) -> Self {
        Self {
            class_names,
            script: None,
            fail_on_call: None,
            calls: 0,
        }
    }

    /// Replay fixed detections, one entry per call, cycling.
    pub fn scripted(class_names: Vec<String>, frames: Vec<Vec<RawDetection>>) -> Self {
        Self {
            script: Some(frames),
            ..Self::new(class_names)
        }
    }

    /// Make the `call`-th invocation (1-based) fail.
    pub fn fail_on_call(mut self, call: u64) -> Self {
        self.fail_on_call = Some(call);
        self
    }

    fn pattern(&self, width: u32, height: u32) -> Vec<RawDetection> {
        let n = self.class_names.len() as u64;
        let slot = width as f32 / (n + 1) as f32;
        let phase = self.calls / PATTERN_PERIOD;
        (0..n)
            .filter(|id| (phase + id) % 4 != 3)
            .filter_map(|id| {
                let x1 = slot * id as f32 + slot / 2.0;
                let bbox = BoundingBox::new(
                    x1,
                    height as f32 / 3.0,
                    x1 + slot * 0.8,
                    height as f32 * 2.0 / 3.0,
                )
                .ok()?;
                let confidence = 0.55 + 0.1 * ((self.calls + id) % 4) as f32;
                RawDetection::new(id as usize, confidence, bbox).ok()
            })
            .collect()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn infer(&mut self, image: &RgbImage, confidence_threshold: f32) -> Result<Vec<RawDetection>> {
        self.calls += 1;
        if self.fail_on_call == Some(self.calls) {
            return Err(anyhow!("stub inference failure on call {}", self.calls));
        }
        let detections = match &self.script {
            Some(frames) if !frames.is_empty() => {
                frames[((self.calls - 1) % frames.len() as u64) as usize].clone()
            }
            Some(_) => Vec::new(),
            None => self.pattern(image.width(), image.height()),
        };
        Ok(detections
            .into_iter()
            .filter(|d| d.confidence() >= confidence_threshold)
            .collect())
    }

    fn class_name(&self, class_id: usize) -> Option<&str> {
        self.class_names.get(class_id).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> Vec<String> {
        vec!["helmet".into(), "safety glasses".into(), "gloves".into()]
    }

    #[test]
    fn pattern_boxes_stay_inside_frame() {
        let mut backend = StubBackend::new(names());
        let image = RgbImage::new(640, 480);
        for _ in 0..40 {
            for det in backend.infer(&image, 0.0).unwrap() {
                let bbox = det.bbox();
                assert!(bbox.x1 >= 0.0 && bbox.x2 <= 640.0);
                assert!(bbox.y1 >= 0.0 && bbox.y2 <= 480.0);
                assert!(backend.class_name(det.class_id()).is_some());
            }
        }
    }

    #[test]
    fn pattern_drops_a_class_in_some_phases() {
        let mut backend = StubBackend::new(names());
        let image = RgbImage::new(320, 240);
        let counts: Vec<usize> = (0..40)
            .map(|_| backend.infer(&image, 0.0).unwrap().len())
            .collect();
        assert!(counts.iter().any(|&c| c == 3));
        assert!(counts.iter().any(|&c| c < 3));
    }

    #[test]
    fn threshold_filters_script() {
        let bbox = BoundingBox::new(0.0, 0.0, 4.0, 4.0).unwrap();
        let frames = vec![vec![
            RawDetection::new(0, 0.4, bbox).unwrap(),
            RawDetection::new(1, 0.9, bbox).unwrap(),
        ]];
        let mut backend = StubBackend::scripted(names(), frames);
        let out = backend.infer(&RgbImage::new(8, 8), 0.5).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].class_id(), 1);
    }

    #[test]
    fn fails_on_requested_call() {
        let mut backend = StubBackend::new(names()).fail_on_call(2);
        let image = RgbImage::new(8, 8);
        assert!(backend.infer(&image, 0.5).is_ok());
        assert!(backend.infer(&image, 0.5).is_err());
        assert!(backend.infer(&image, 0.5).is_ok());
    }
}
