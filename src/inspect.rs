//! Single-shot inspection of one still image.
//!
//! Shares the aggregator and annotator with the live stream; the only
//! differences are the input (one decoded image) and the output shape (a
//! flat detection list next to the annotated image).

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::RgbImage;
use serde::Serialize;

use crate::annotate::Annotator;
use crate::compliance::{ComplianceAggregator, ComplianceRecord, PpeCategory};
use crate::config::MonitorConfig;
use crate::detect::{model_artifact_exists, PpeDetector};
use crate::encode::encode_jpeg;
use crate::error::PipelineError;

/// One detection as reported to clients.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetectionSummary {
    /// Detector class name, as the model reports it.
    pub class: String,
    /// Rounded to two decimals.
    pub confidence: f32,
}

pub struct Inspection {
    pub annotated: RgbImage,
    pub detections: Vec<DetectionSummary>,
    pub record: ComplianceRecord,
}

/// JSON body of a successful `POST /detect`.
#[derive(Debug, Serialize)]
pub struct DetectResponse {
    pub image: String,
    pub detections: Vec<DetectionSummary>,
    pub compliant: bool,
    pub missing: Vec<PpeCategory>,
}

impl Inspection {
    pub fn to_response(&self, jpeg_quality: u8) -> Result<DetectResponse, PipelineError> {
        Ok(DetectResponse {
            image: encode_data_url(&self.annotated, jpeg_quality)?,
            detections: self.detections.clone(),
            compliant: self.record.compliant,
            missing: self.record.missing.clone(),
        })
    }
}

#[derive(Clone, Debug, Default)]
pub struct Inspector {
    aggregator: ComplianceAggregator,
    annotator: Annotator,
}

impl Inspector {
    pub fn new(aggregator: ComplianceAggregator, annotator: Annotator) -> Self {
        Self {
            aggregator,
            annotator,
        }
    }

    pub fn inspect(
        &self,
        detector: &mut PpeDetector,
        image: &RgbImage,
        confidence_threshold: f32,
    ) -> Result<Inspection, PipelineError> {
        let raw = detector.infer_with_threshold(image, confidence_threshold)?;
        let detector: &PpeDetector = detector;

        let detections = raw
            .iter()
            .map(|detection| DetectionSummary {
                class: detector
                    .class_name(detection.class_id())
                    .map(str::to_owned)
                    .unwrap_or_else(|| format!("class_{}", detection.class_id())),
                confidence: round2(detection.confidence()),
            })
            .collect();
        let record = self
            .aggregator
            .aggregate(&raw, move |id| detector.class_name(id));
        let annotated = self.annotator.annotate(image, &record);

        Ok(Inspection {
            annotated,
            detections,
            record,
        })
    }
}

fn round2(value: f32) -> f32 {
    (value * 100.0).round() / 100.0
}

/// Decode a `data:image/...;base64,` URL (or bare base64) into RGB pixels.
pub fn decode_data_url(data: &str) -> Result<RgbImage, PipelineError> {
    let payload = match data.split_once(',') {
        Some((_, payload)) => payload,
        None => data,
    };
    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| PipelineError::Encoding(format!("invalid base64 image: {e}")))?;
    decode_image(&bytes)
}

pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, PipelineError> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

pub fn encode_data_url(image: &RgbImage, jpeg_quality: u8) -> Result<String, PipelineError> {
    let jpeg = encode_jpeg(image, jpeg_quality)?;
    Ok(format!("data:image/jpeg;base64,{}", STANDARD.encode(jpeg)))
}

/// JSON body of `GET /status`.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub status: &'static str,
    pub model_path: String,
    pub model_exists: bool,
    pub device: String,
    pub confidence_threshold: f32,
    pub required_ppe: Vec<PpeCategory>,
}

impl StatusReport {
    pub fn from_config(config: &MonitorConfig) -> Self {
        let model_exists = model_artifact_exists(&config.model.path);
        Self {
            status: if model_exists { "ready" } else { "model_not_found" },
            model_path: config.model.path.display().to_string(),
            model_exists,
            device: config.model.device.clone(),
            confidence_threshold: config.model.confidence_threshold,
            required_ppe: config.required.categories().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, RawDetection, StubBackend};
    use image::Rgb;

    fn detector(script: Vec<Vec<RawDetection>>) -> PpeDetector {
        let names = vec!["helmet".into(), "safety glasses".into(), "gloves".into()];
        PpeDetector::with_backend(Box::new(StubBackend::scripted(names, script)), 0.5).unwrap()
    }

    fn det(class_id: usize, confidence: f32) -> RawDetection {
        let bbox = BoundingBox::new(4.0, 70.0, 30.0, 90.0).unwrap();
        RawDetection::new(class_id, confidence, bbox).unwrap()
    }

    #[test]
    fn inspect_reports_flat_list_and_verdict() {
        let mut detector = detector(vec![vec![det(0, 0.876), det(1, 0.61)]]);
        let image = RgbImage::from_pixel(120, 100, Rgb([40, 40, 40]));
        let inspection = Inspector::default()
            .inspect(&mut detector, &image, 0.5)
            .unwrap();

        assert_eq!(
            inspection.detections,
            vec![
                DetectionSummary {
                    class: "helmet".into(),
                    confidence: 0.88
                },
                DetectionSummary {
                    class: "safety glasses".into(),
                    confidence: 0.61
                },
            ]
        );
        assert!(!inspection.record.compliant);
        assert_eq!(inspection.record.missing, vec![PpeCategory::Gloves]);
        assert_eq!(inspection.annotated.dimensions(), image.dimensions());

        let response = inspection.to_response(80).unwrap();
        assert!(response.image.starts_with("data:image/jpeg;base64,"));
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["missing"], serde_json::json!(["gloves"]));
        assert_eq!(json["detections"][0]["class"], "helmet");
    }

    #[test]
    fn data_url_round_trip_preserves_size() {
        let image = RgbImage::from_pixel(24, 16, Rgb([200, 10, 10]));
        let url = encode_data_url(&image, 90).unwrap();
        let decoded = decode_data_url(&url).unwrap();
        assert_eq!(decoded.dimensions(), (24, 16));
    }

    #[test]
    fn garbage_data_url_is_rejected() {
        assert!(matches!(
            decode_data_url("data:image/png;base64,@@@"),
            Err(PipelineError::Encoding(_))
        ));
        assert!(decode_data_url("data:image/png;base64,aGVsbG8=").is_err());
    }

    #[test]
    fn status_reports_missing_model() {
        let mut config = MonitorConfig::default();
        config.model.path = "/nonexistent/best.onnx".into();
        let report = StatusReport::from_config(&config);
        assert_eq!(report.status, "model_not_found");
        assert!(!report.model_exists);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(
            json["required_ppe"],
            serde_json::json!(["helmet", "safety_glasses", "gloves"])
        );
    }
}
