//! Compliance aggregation.
//!
//! Raw detections are resolved to the closed `PpeCategory` set once, here,
//! and folded into a fresh `ComplianceRecord` per frame. Nothing is carried
//! across calls: the same detections always produce the same record.

use serde::Serialize;

use crate::detect::{BoundingBox, RawDetection};
use crate::error::PipelineError;

/// Protective equipment classes the monitor knows how to require.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PpeCategory {
    Helmet,
    SafetyGlasses,
    Gloves,
    SafetyVest,
    FaceMask,
    SafetyBoots,
}

impl PpeCategory {
    pub const ALL: [PpeCategory; 6] = [
        PpeCategory::Helmet,
        PpeCategory::SafetyGlasses,
        PpeCategory::Gloves,
        PpeCategory::SafetyVest,
        PpeCategory::FaceMask,
        PpeCategory::SafetyBoots,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PpeCategory::Helmet => "helmet",
            PpeCategory::SafetyGlasses => "safety_glasses",
            PpeCategory::Gloves => "gloves",
            PpeCategory::SafetyVest => "safety_vest",
            PpeCategory::FaceMask => "face_mask",
            PpeCategory::SafetyBoots => "safety_boots",
        }
    }

    /// Resolve a detector class name, e.g. `"Safety Glasses"`.
    pub fn from_class_name(name: &str) -> Option<Self> {
        let normalized = normalize_class_name(name);
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == normalized)
    }
}

impl std::fmt::Display for PpeCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lower-case, spaces to underscores.
pub fn normalize_class_name(name: &str) -> String {
    name.to_lowercase().replace(' ', "_")
}

/// Ordered, non-empty, duplicate-free list of required categories.
///
/// The order is the order `missing` is reported in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequiredSet {
    categories: Vec<PpeCategory>,
}

impl RequiredSet {
    pub fn new(categories: Vec<PpeCategory>) -> Result<Self, PipelineError> {
        if categories.is_empty() {
            return Err(PipelineError::config("required PPE set must not be empty"));
        }
        for (i, category) in categories.iter().enumerate() {
            if categories[..i].contains(category) {
                return Err(PipelineError::config(format!(
                    "required PPE category '{}' listed twice",
                    category
                )));
            }
        }
        Ok(Self { categories })
    }

    pub fn categories(&self) -> &[PpeCategory] {
        &self.categories
    }

    fn position(&self, category: PpeCategory) -> Option<usize> {
        self.categories.iter().position(|c| *c == category)
    }
}

impl Default for RequiredSet {
    fn default() -> Self {
        Self {
            categories: vec![
                PpeCategory::Helmet,
                PpeCategory::SafetyGlasses,
                PpeCategory::Gloves,
            ],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BoxEntry {
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Per-frame state of one category.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CategoryState {
    pub detected: bool,
    /// Maximum confidence over `boxes`; `0.0` when nothing was seen.
    pub best_confidence: f32,
    /// Boxes in detection arrival order.
    pub boxes: Vec<BoxEntry>,
}

impl CategoryState {
    fn push(&mut self, confidence: f32, bbox: BoundingBox) {
        self.detected = true;
        // Strict comparison keeps the first maximum.
        if confidence > self.best_confidence {
            self.best_confidence = confidence;
        }
        self.boxes.push(BoxEntry { confidence, bbox });
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ComplianceRecord {
    /// One entry per required category, in required order.
    per_category: Vec<(PpeCategory, CategoryState)>,
    pub compliant: bool,
    pub missing: Vec<PpeCategory>,
}

impl ComplianceRecord {
    pub fn state(&self, category: PpeCategory) -> Option<&CategoryState> {
        self.per_category
            .iter()
            .find(|(c, _)| *c == category)
            .map(|(_, state)| state)
    }

    /// Categories with their states, in required order.
    pub fn categories(&self) -> impl Iterator<Item = (PpeCategory, &CategoryState)> {
        self.per_category.iter().map(|(c, state)| (*c, state))
    }

    pub fn box_count(&self) -> usize {
        self.per_category.iter().map(|(_, s)| s.boxes.len()).sum()
    }
}

/// Folds raw detections into a `ComplianceRecord` for a fixed required set.
#[derive(Clone, Debug, Default)]
pub struct ComplianceAggregator {
    required: RequiredSet,
}

impl ComplianceAggregator {
    pub fn new(required: RequiredSet) -> Self {
        Self { required }
    }

    /// Build the record for one frame.
    ///
    /// Detections whose class id has no name, or whose name is not a required
    /// category, are ignored.
    pub fn aggregate<F, S>(&self, detections: &[RawDetection], class_name_lookup: F) -> ComplianceRecord
    where
        F: Fn(usize) -> Option<S>,
        S: AsRef<str>,
    {
        let mut per_category: Vec<(PpeCategory, CategoryState)> = self
            .required
            .categories()
            .iter()
            .map(|c| (*c, CategoryState::default()))
            .collect();

        for detection in detections {
            let Some(name) = class_name_lookup(detection.class_id()) else {
                continue;
            };
            let Some(category) = PpeCategory::from_class_name(name.as_ref()) else {
                continue;
            };
            if let Some(idx) = self.required.position(category) {
                per_category[idx]
                    .1
                    .push(detection.confidence(), detection.bbox());
            }
        }

        let missing: Vec<PpeCategory> = per_category
            .iter()
            .filter(|(_, state)| !state.detected)
            .map(|(c, _)| *c)
            .collect();

        ComplianceRecord {
            compliant: missing.is_empty(),
            missing,
            per_category,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAMES: [&str; 4] = ["helmet", "Safety Glasses", "gloves", "person"];

    fn lookup(id: usize) -> Option<&'static str> {
        NAMES.get(id).copied()
    }

    fn det(class_id: usize, confidence: f32) -> RawDetection {
        let bbox = BoundingBox::new(10.0, 20.0, 50.0, 80.0).unwrap();
        RawDetection::new(class_id, confidence, bbox).unwrap()
    }

    fn aggregator(categories: Vec<PpeCategory>) -> ComplianceAggregator {
        ComplianceAggregator::new(RequiredSet::new(categories).unwrap())
    }

    #[test]
    fn missing_gloves_is_non_compliant() {
        let agg = aggregator(vec![PpeCategory::Helmet, PpeCategory::Gloves]);
        let record = agg.aggregate(&[det(0, 0.9)], lookup);
        assert!(!record.compliant);
        assert_eq!(record.missing, vec![PpeCategory::Gloves]);
        let helmet = record.state(PpeCategory::Helmet).unwrap();
        assert!(helmet.detected);
        assert_eq!(helmet.best_confidence, 0.9);
    }

    #[test]
    fn all_required_present_is_compliant() {
        let agg = ComplianceAggregator::default();
        let record = agg.aggregate(&[det(2, 0.7), det(1, 0.6), det(0, 0.8)], lookup);
        assert!(record.compliant);
        assert!(record.missing.is_empty());
    }

    #[test]
    fn best_confidence_is_maximum_of_boxes() {
        let agg = ComplianceAggregator::default();
        let record = agg.aggregate(&[det(0, 0.3), det(0, 0.81), det(0, 0.5)], lookup);
        let helmet = record.state(PpeCategory::Helmet).unwrap();
        assert_eq!(helmet.best_confidence, 0.81);
        let order: Vec<f32> = helmet.boxes.iter().map(|b| b.confidence).collect();
        assert_eq!(order, vec![0.3, 0.81, 0.5]);
    }

    #[test]
    fn absent_categories_keep_defaults() {
        let agg = ComplianceAggregator::default();
        let record = agg.aggregate(&[], lookup);
        assert!(!record.compliant);
        assert_eq!(
            record.missing,
            vec![PpeCategory::Helmet, PpeCategory::SafetyGlasses, PpeCategory::Gloves]
        );
        for (_, state) in record.categories() {
            assert_eq!(state, &CategoryState::default());
        }
    }

    #[test]
    fn missing_order_follows_configuration_not_arrival() {
        let agg = ComplianceAggregator::default();
        // glasses only, arriving after an unknown class
        let record = agg.aggregate(&[det(3, 0.9), det(1, 0.9)], lookup);
        assert_eq!(record.missing, vec![PpeCategory::Helmet, PpeCategory::Gloves]);

        let agg = aggregator(vec![
            PpeCategory::Gloves,
            PpeCategory::SafetyGlasses,
            PpeCategory::Helmet,
        ]);
        let record = agg.aggregate(&[], lookup);
        assert_eq!(
            record.missing,
            vec![PpeCategory::Gloves, PpeCategory::SafetyGlasses, PpeCategory::Helmet]
        );
    }

    #[test]
    fn aggregate_is_idempotent() {
        let agg = ComplianceAggregator::default();
        let detections = [det(2, 0.4), det(0, 0.95), det(2, 0.6)];
        let first = agg.aggregate(&detections, lookup);
        let second = agg.aggregate(&detections, lookup);
        assert_eq!(first, second);
    }

    #[test]
    fn unknown_ids_and_unrequired_classes_are_ignored() {
        let agg = aggregator(vec![PpeCategory::Helmet]);
        let record = agg.aggregate(&[det(3, 0.9), det(42, 0.9), det(2, 0.9)], lookup);
        assert_eq!(record.box_count(), 0);
        assert!(record.state(PpeCategory::Gloves).is_none());
    }

    #[test]
    fn required_set_rejects_duplicates_and_empty() {
        assert!(RequiredSet::new(vec![]).is_err());
        assert!(RequiredSet::new(vec![PpeCategory::Helmet, PpeCategory::Helmet]).is_err());
    }

    #[test]
    fn class_names_normalize() {
        assert_eq!(
            PpeCategory::from_class_name("Safety Glasses"),
            Some(PpeCategory::SafetyGlasses)
        );
        assert_eq!(PpeCategory::from_class_name("safety-glasses"), None);
        assert_eq!(PpeCategory::from_class_name("FACE MASK"), Some(PpeCategory::FaceMask));
    }
}
