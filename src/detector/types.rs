//! Detector request/response types

use serde::{Deserialize, Serialize};

/// Per-job detection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectParams {
    /// Detections below this confidence are discarded
    pub confidence_threshold: f32,
    /// Only these labels are kept (None = all)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classes: Option<Vec<String>>,
    /// Model hint forwarded to the inference server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_type: Option<String>,
}

impl Default for DetectParams {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.4,
            classes: None,
            model_type: None,
        }
    }
}

/// Raw detection as returned by the inference server
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WireDetection {
    #[serde(alias = "class", alias = "class_name")]
    pub label: String,
    #[serde(alias = "score", alias = "conf")]
    pub confidence: f32,
    /// [x1, y1, x2, y2], pixels or normalized
    pub bbox: [f64; 4],
    #[serde(default)]
    pub gender: Option<String>,
}

/// Inference server response
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct DetectResponse {
    #[serde(default)]
    pub detections: Vec<WireDetection>,
    #[serde(default)]
    pub image_width: Option<u32>,
    #[serde(default)]
    pub image_height: Option<u32>,
    /// Set when bbox values are already 0-1
    #[serde(default)]
    pub normalized: Option<bool>,
}

/// Class names of COCO-trained models, indexed by class id
pub const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
    "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
    "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];

/// Label for a numeric class id; negative ids mean "all classes"
pub fn coco_label(class_id: i64) -> Option<&'static str> {
    usize::try_from(class_id)
        .ok()
        .and_then(|i| COCO_CLASSES.get(i).copied())
}
