//! ConfigStore types

use crate::error::{Error, Result};
use crate::geometry::{self, EntryDirection, Point};
use crate::stream_manager::StreamSource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Registered camera
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Camera {
    pub camera_id: String,
    pub name: String,
    pub source: StreamSource,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Camera upsert request
#[derive(Debug, Clone, Deserialize)]
pub struct UpsertCameraRequest {
    #[serde(default)]
    pub name: Option<String>,
    pub source: StreamSource,
    #[serde(default)]
    pub enabled: Option<bool>,
}

/// Saved counting zone
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    pub id: u64,
    pub camera_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "polygon_json")]
    pub polygon: Vec<Point>,
    #[serde(rename = "direction_line_json")]
    pub direction_line: Option<Vec<Point>>,
    pub entry_direction: EntryDirection,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Zone create request (persistence format)
#[derive(Debug, Clone, Deserialize)]
pub struct CreateZoneRequest {
    pub camera_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "polygon_json")]
    pub polygon: Vec<Point>,
    #[serde(rename = "direction_line_json", default)]
    pub direction_line: Option<Vec<Point>>,
    pub entry_direction: EntryDirection,
    #[serde(default)]
    pub active: Option<bool>,
}

/// Zone replace request. The camera binding and id never change.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateZoneRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "polygon_json")]
    pub polygon: Vec<Point>,
    #[serde(rename = "direction_line_json", default)]
    pub direction_line: Option<Vec<Point>>,
    pub entry_direction: EntryDirection,
    #[serde(default)]
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZoneStatusRequest {
    pub active: bool,
}

impl CreateZoneRequest {
    /// Reject malformed zones before they can reach a counting job
    pub fn validate(&self) -> Result<()> {
        if self.camera_id.trim().is_empty() {
            return Err(Error::Validation("camera_id is required".to_string()));
        }
        validate_zone_shape(
            &self.polygon,
            self.direction_line.as_deref(),
            self.entry_direction,
        )
    }
}

impl UpdateZoneRequest {
    pub fn validate(&self) -> Result<()> {
        validate_zone_shape(
            &self.polygon,
            self.direction_line.as_deref(),
            self.entry_direction,
        )
    }
}

impl Zone {
    /// Same rules as on create; rows edited by hand in the database go
    /// through this on load
    pub fn validate(&self) -> Result<()> {
        if self.camera_id.trim().is_empty() {
            return Err(Error::Validation("camera_id is required".to_string()));
        }
        validate_zone_shape(
            &self.polygon,
            self.direction_line.as_deref(),
            self.entry_direction,
        )
    }
}

fn validate_zone_shape(
    polygon: &[Point],
    direction_line: Option<&[Point]>,
    entry_direction: EntryDirection,
) -> Result<()> {
    if polygon.len() < 3 {
        return Err(Error::Validation(format!(
            "polygon must have at least 3 vertices, got {}",
            polygon.len()
        )));
    }
    if let Some(p) = polygon.iter().find(|p| !p.is_normalized()) {
        return Err(Error::Validation(format!(
            "polygon vertex ({}, {}) is outside the normalized 0-1 range",
            p.x, p.y
        )));
    }
    if let Some(line) = direction_line {
        if line.len() < 2 {
            return Err(Error::Validation(format!(
                "direction line must have at least 2 points, got {}",
                line.len()
            )));
        }
        if let Some(p) = line.iter().find(|p| !p.is_normalized()) {
            return Err(Error::Validation(format!(
                "direction line point ({}, {}) is outside the normalized 0-1 range",
                p.x, p.y
            )));
        }
        geometry::entry_side_of_polyline(line, entry_direction)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CreateZoneRequest {
        serde_json::from_value(serde_json::json!({
            "camera_id": "cam-1",
            "polygon_json": [{"x": 0.1, "y": 0.1}, {"x": 0.9, "y": 0.1}, {"x": 0.5, "y": 0.9}],
            "direction_line_json": null,
            "entry_direction": "DOWN"
        }))
        .unwrap()
    }

    #[test]
    fn test_valid_zone() {
        assert!(request().validate().is_ok());
    }

    #[test]
    fn test_polygon_needs_three_vertices() {
        let mut req = request();
        req.polygon.pop();
        assert!(matches!(req.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_coordinates_must_be_normalized() {
        let mut req = request();
        req.polygon[0] = Point::new(120.0, 40.0);
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_direction_line_rules() {
        let mut req = request();
        req.direction_line = Some(vec![Point::new(0.0, 0.5)]);
        assert!(req.validate().is_err());

        // horizontal line with DOWN entry is fine
        req.direction_line = Some(vec![Point::new(0.0, 0.5), Point::new(1.0, 0.5)]);
        assert!(req.validate().is_ok());

        // but RIGHT runs parallel to it
        req.entry_direction = EntryDirection::Right;
        assert!(req.validate().is_err());
    }
}
