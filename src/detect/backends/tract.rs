#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::{imageops, imageops::FilterType, Rgb, RgbImage};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::nms::non_max_suppression;
use crate::detect::result::{BoundingBox, RawDetection};

const IOU_THRESHOLD: f32 = 0.45;
const LETTERBOX_FILL: u8 = 114;

/// Tract-based backend for YOLOv8 ONNX exports.
///
/// Expects a single output of shape `[1, 4 + classes, anchors]` (or its
/// transpose) with boxes as centre/size in model-input pixels.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_size: u32,
    class_names: Vec<String>,
}

struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
    width: f32,
    height: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for square `input_size` input.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32, class_names: Vec<String>) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            class_names,
        })
    }

    fn build_input(&self, image: &RgbImage) -> (Tensor, Letterbox) {
        let side = self.input_size;
        let (w, h) = image.dimensions();
        let scale = side as f32 / w.max(h) as f32;
        let nw = ((w as f32 * scale).round() as u32).clamp(1, side);
        let nh = ((h as f32 * scale).round() as u32).clamp(1, side);
        let resized = imageops::resize(image, nw, nh, FilterType::Triangle);

        let pad_x = (side - nw) / 2;
        let pad_y = (side - nh) / 2;
        let mut canvas = RgbImage::from_pixel(side, side, Rgb([LETTERBOX_FILL; 3]));
        imageops::replace(&mut canvas, &resized, pad_x as i64, pad_y as i64);

        let side = side as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            canvas.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });

        (
            input.into_tensor(),
            Letterbox {
                scale,
                pad_x: pad_x as f32,
                pad_y: pad_y as f32,
                width: w as f32,
                height: h as f32,
            },
        )
    }

    fn decode(
        &self,
        outputs: TVec<TValue>,
        letterbox: &Letterbox,
        confidence_threshold: f32,
    ) -> Result<Vec<RawDetection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 {
            return Err(anyhow!("unexpected model output shape {:?}", shape));
        }

        // YOLOv8 exports [1, features, anchors]; some tools transpose it.
        let features_first = shape[1] < shape[2];
        let (features, anchors) = if features_first {
            (shape[1], shape[2])
        } else {
            (shape[2], shape[1])
        };
        if features <= 4 {
            return Err(anyhow!("model output has no class scores: {:?}", shape));
        }
        let at = |feature: usize, anchor: usize| -> f32 {
            if features_first {
                view[[0, feature, anchor]]
            } else {
                view[[0, anchor, feature]]
            }
        };

        let mut candidates = Vec::new();
        for anchor in 0..anchors {
            let (class_id, score) = (4..features)
                .map(|f| (f - 4, at(f, anchor)))
                .fold((0usize, f32::NEG_INFINITY), |best, cur| {
                    if cur.1 > best.1 {
                        cur
                    } else {
                        best
                    }
                });
            if !score.is_finite() || score < confidence_threshold {
                continue;
            }

            let (cx, cy, bw, bh) = (at(0, anchor), at(1, anchor), at(2, anchor), at(3, anchor));
            let unmap_x = |v: f32| ((v - letterbox.pad_x) / letterbox.scale).clamp(0.0, letterbox.width);
            let unmap_y = |v: f32| ((v - letterbox.pad_y) / letterbox.scale).clamp(0.0, letterbox.height);
            let Ok(bbox) = BoundingBox::new(
                unmap_x(cx - bw / 2.0),
                unmap_y(cy - bh / 2.0),
                unmap_x(cx + bw / 2.0),
                unmap_y(cy + bh / 2.0),
            ) else {
                continue;
            };
            if let Ok(detection) = RawDetection::new(class_id, score.min(1.0), bbox) {
                candidates.push(detection);
            }
        }

        Ok(non_max_suppression(candidates, IOU_THRESHOLD))
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn infer(&mut self, image: &RgbImage, confidence_threshold: f32) -> Result<Vec<RawDetection>> {
        let (input, letterbox) = self.build_input(image);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, &letterbox, confidence_threshold)
    }

    fn class_name(&self, class_id: usize) -> Option<&str> {
        self.class_names.get(class_id).map(String::as_str)
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = RgbImage::new(self.input_size, self.input_size);
        self.infer(&blank, 1.0).map(|_| ())
    }
}
