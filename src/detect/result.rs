use serde::{Deserialize, Serialize};

/// Whole-image classification output above a confidence threshold.
///
/// `bbox` is `[x0, y0, x1, y1]` in pixels and always spans the full frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: [u32; 4],
    pub confidence: f32,
    pub class_name: String,
    pub class_id: usize,
    pub classification_type: String,
}

/// Probability for one class, kept for diagnostic display.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassProbability {
    pub class_name: String,
    pub class_id: usize,
    pub probability: f32,
}

/// Result of one `classify` call: zero or one detection plus every class probability.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub detections: Vec<Detection>,
    pub all_predictions: Vec<ClassProbability>,
}

impl Classification {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty() && self.all_predictions.is_empty()
    }
}

pub(crate) const FULL_IMAGE: &str = "full_image";

/// Round to 3 decimals for display.
pub(crate) fn round3(value: f32) -> f32 {
    (value * 1000.0).round() / 1000.0
}
