use crate::detect::result::RawDetection;

/// Per-class non-maximum suppression.
///
/// Output is ordered by descending confidence. Boxes of different classes
/// never suppress each other.
pub fn non_max_suppression(mut detections: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
    detections.sort_by(|a, b| b.confidence().total_cmp(&a.confidence()));

    let mut kept: Vec<RawDetection> = Vec::with_capacity(detections.len().min(100));
    for candidate in detections {
        let suppressed = kept.iter().any(|k| {
            k.class_id() == candidate.class_id() && k.bbox().iou(&candidate.bbox()) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}
