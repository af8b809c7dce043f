//! Detector - external inference adapter
//!
//! ## Responsibilities
//!
//! - Frame -> detections seam used by every counting job
//! - HTTP adapter for the inference server (multipart JPEG upload)
//! - Normalizing pixel boxes to 0-1 frame coordinates
//!
//! The model itself lives outside this process. A detector call may be
//! slow; the job loop waits on it frame by frame.

mod types;

pub use types::{coco_label, DetectParams, COCO_CLASSES};

use crate::error::{Error, Result};
use crate::frame_source::Frame;
use crate::models::{BBox, Detection};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use std::time::Duration;
use types::DetectResponse;

/// Opaque frame -> detections function
#[async_trait]
pub trait Detector: Send + Sync {
    /// Run detection on one frame. Returned boxes are normalized.
    async fn detect(&self, frame: &Frame, params: &DetectParams) -> Result<Vec<Detection>>;

    /// Whether the inference backend is reachable
    async fn health_check(&self) -> bool;
}

/// Inference server over HTTP
pub struct HttpDetector {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDetector {
    /// Create new detector client with a per-request timeout
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Detector for HttpDetector {
    async fn detect(&self, frame: &Frame, params: &DetectParams) -> Result<Vec<Detection>> {
        let url = format!("{}/v1/detect", self.base_url);

        let mut form = Form::new()
            .part(
                "image",
                Part::bytes(frame.jpeg.to_vec())
                    .file_name(format!("frame_{}.jpg", frame.index))
                    .mime_str("image/jpeg")
                    .map_err(|e| Error::Detector(e.to_string()))?,
            )
            .text("confidence", params.confidence_threshold.to_string());

        if let Some(classes) = &params.classes {
            form = form.text("classes", classes.join(","));
        }
        if let Some(model) = &params.model_type {
            form = form.text("model_type", model.clone());
        }

        let resp = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Detector(format!("request failed: {}", e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Detector(format!(
                "inference failed: {} - {}",
                status, body
            )));
        }

        let parsed: DetectResponse = resp
            .json()
            .await
            .map_err(|e| Error::Detector(format!("invalid response: {}", e)))?;

        normalize_response(parsed, frame.width, frame.height)
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/healthz", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

/// Convert a wire response to normalized detections.
///
/// Boxes count as pixels when the server says so, or when any coordinate
/// exceeds 1. Pixel boxes need a frame size from the response or the frame.
fn normalize_response(resp: DetectResponse, frame_w: u32, frame_h: u32) -> Result<Vec<Detection>> {
    let width = resp.image_width.unwrap_or(frame_w) as f64;
    let height = resp.image_height.unwrap_or(frame_h) as f64;

    resp.detections
        .into_iter()
        .map(|d| {
            let [x1, y1, x2, y2] = d.bbox;
            let is_pixels = match resp.normalized {
                Some(n) => !n,
                None => d.bbox.iter().any(|v| *v > 1.0),
            };
            let bbox = if is_pixels {
                if width <= 0.0 || height <= 0.0 {
                    return Err(Error::Detector(
                        "pixel boxes returned but frame size is unknown".to_string(),
                    ));
                }
                BBox::from_pixels(x1, y1, x2, y2, width, height)
            } else {
                BBox::new(x1, y1, x2, y2)
            };
            Ok(Detection {
                label: d.label,
                confidence: d.confidence,
                bbox,
                gender: d.gender,
            })
        })
        .collect()
}

/// Keep detections that pass the confidence threshold and class filter
pub fn filter_detections(detections: Vec<Detection>, params: &DetectParams) -> Vec<Detection> {
    detections
        .into_iter()
        .filter(|d| d.confidence >= params.confidence_threshold)
        .filter(|d| match &params.classes {
            Some(classes) => classes.iter().any(|c| c.eq_ignore_ascii_case(&d.label)),
            None => true,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(json: serde_json::Value) -> DetectResponse {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_pixel_boxes_normalized_with_frame_size() {
        let resp = response(serde_json::json!({
            "detections": [{"label": "person", "confidence": 0.9, "bbox": [64, 48, 128, 96]}]
        }));
        let dets = normalize_response(resp, 640, 480).unwrap();
        assert_eq!(dets[0].bbox, BBox::new(0.1, 0.1, 0.2, 0.2));
    }

    #[test]
    fn test_response_dimensions_win() {
        let resp = response(serde_json::json!({
            "detections": [{"class": "car", "score": 0.5, "bbox": [100, 100, 200, 200]}],
            "image_width": 1000,
            "image_height": 1000
        }));
        let dets = normalize_response(resp, 640, 480).unwrap();
        assert_eq!(dets[0].label, "car");
        assert_eq!(dets[0].bbox, BBox::new(0.1, 0.1, 0.2, 0.2));
    }

    #[test]
    fn test_normalized_boxes_pass_through() {
        let resp = response(serde_json::json!({
            "detections": [{"label": "person", "confidence": 0.7, "bbox": [0.1, 0.2, 0.3, 0.4], "gender": "female"}]
        }));
        let dets = normalize_response(resp, 0, 0).unwrap();
        assert_eq!(dets[0].bbox, BBox::new(0.1, 0.2, 0.3, 0.4));
        assert_eq!(dets[0].gender.as_deref(), Some("female"));
    }

    #[test]
    fn test_pixel_boxes_without_size_fail() {
        let resp = response(serde_json::json!({
            "detections": [{"label": "person", "confidence": 0.7, "bbox": [10, 10, 20, 20]}]
        }));
        assert!(matches!(normalize_response(resp, 0, 0), Err(Error::Detector(_))));
    }

    #[test]
    fn test_filter_detections() {
        let b = BBox::new(0.0, 0.0, 0.1, 0.1);
        let dets = vec![
            Detection::new("person", 0.9, b),
            Detection::new("person", 0.2, b),
            Detection::new("dog", 0.9, b),
        ];
        let params = DetectParams {
            confidence_threshold: 0.5,
            classes: Some(vec!["Person".to_string()]),
            model_type: None,
        };
        let kept = filter_detections(dets, &params);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].label, "person");
    }

    #[test]
    fn test_coco_label() {
        assert_eq!(coco_label(0), Some("person"));
        assert_eq!(coco_label(2), Some("car"));
        assert_eq!(coco_label(-1), None);
        assert_eq!(coco_label(80), None);
    }
}
