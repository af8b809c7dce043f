//! Shared models and types
//!
//! This module contains types shared across multiple modules
//! to avoid circular dependencies.

use crate::geometry::Point;
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box in normalized (0-1) frame coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Center point of the box
    pub fn centroid(&self) -> Point {
        Point::new((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// Box from pixel coordinates, scaled by frame size
    pub fn from_pixels(x1: f64, y1: f64, x2: f64, y2: f64, width: f64, height: f64) -> Self {
        Self {
            x1: x1 / width,
            y1: y1 / height,
            x2: x2 / width,
            y2: y2 / height,
        }
    }
}

/// Single detection produced by the external inference component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Class label ("person", "car", ...)
    pub label: String,
    pub confidence: f32,
    pub bbox: BBox,
    /// Optional attribute (gender) when the detector supplies one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BBox) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
            gender: None,
        }
    }

    pub fn centroid(&self) -> Point {
        self.bbox.centroid()
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_sec: u64,
    pub detector_connected: bool,
    pub active_streams: usize,
    pub running_jobs: usize,
    pub push_connections: u64,
    /// Push messages lost to full subscriber queues since start
    pub push_dropped: u64,
    /// `None` when running without a database
    pub db_connected: Option<bool>,
}
