//! Counting boundaries
//!
//! A boundary is an axis line, a zone direction polyline, or a zone
//! polygon, each with the side that counts as "entered".

use super::types::LineConfig;
use crate::config_store::Zone;
use crate::error::{Error, Result};
use crate::geometry::{
    self, AxisSide, Containment, EntryDirection, Orientation, Point, SideReading,
};
use serde::Serialize;

/// Shape a boundary is evaluated against
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BoundaryShape {
    Axis {
        orientation: Orientation,
        position: f64,
    },
    Polyline {
        points: Vec<Point>,
    },
    Polygon {
        points: Vec<Point>,
    },
}

/// Line or zone a track can cross
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Boundary {
    pub id: String,
    pub shape: BoundaryShape,
    /// Reading that means the track is on the entered side
    pub entry_side: SideReading,
}

impl Boundary {
    /// Axis-aligned line. Default entry: RIGHT for vertical, DOWN for horizontal.
    pub fn axis(
        id: impl Into<String>,
        orientation: Orientation,
        position: f64,
        entry_direction: Option<EntryDirection>,
    ) -> Result<Self> {
        if !position.is_finite() || !(0.0..=1.0).contains(&position) {
            return Err(Error::Validation(format!(
                "line_position {} is outside the normalized 0-1 range",
                position
            )));
        }
        let direction = entry_direction.unwrap_or(match orientation {
            Orientation::Vertical => EntryDirection::Right,
            Orientation::Horizontal => EntryDirection::Down,
        });
        let entry = geometry::entry_side_of_axis(orientation, direction)?;
        Ok(Self {
            id: id.into(),
            shape: BoundaryShape::Axis {
                orientation,
                position,
            },
            entry_side: SideReading::Axis(entry),
        })
    }

    /// Direction polyline with an entry direction
    pub fn polyline(id: impl Into<String>, points: Vec<Point>, direction: EntryDirection) -> Result<Self> {
        let entry = geometry::entry_side_of_polyline(&points, direction)?;
        Ok(Self {
            id: id.into(),
            shape: BoundaryShape::Polyline { points },
            entry_side: SideReading::Line(entry),
        })
    }

    /// Polygon zone; outside -> inside is an entry
    pub fn polygon(id: impl Into<String>, points: Vec<Point>) -> Result<Self> {
        if points.len() < 3 {
            return Err(Error::Validation(format!(
                "polygon must have at least 3 vertices, got {}",
                points.len()
            )));
        }
        Ok(Self {
            id: id.into(),
            shape: BoundaryShape::Polygon { points },
            entry_side: SideReading::Zone(Containment::Inside),
        })
    }

    /// Boundary for a saved zone: line mode when it has a direction line
    pub fn from_zone(zone: &Zone) -> Result<Self> {
        let id = format!("zone-{}", zone.id);
        match &zone.direction_line {
            Some(line) => Self::polyline(id, line.clone(), zone.entry_direction),
            None => Self::polygon(id, zone.polygon.clone()),
        }
    }

    /// Whether a movement `from -> to` passes through the boundary.
    /// Axis lines span the frame and polygons are judged by containment;
    /// a direction polyline only counts movements through its segments.
    pub fn crossed(&self, from: Point, to: Point) -> bool {
        match &self.shape {
            BoundaryShape::Polyline { points } => geometry::polyline_crossed(from, to, points),
            BoundaryShape::Axis { .. } | BoundaryShape::Polygon { .. } => true,
        }
    }

    /// Classify a point against this boundary
    pub fn classify(&self, point: Point, tolerance: f64) -> SideReading {
        match &self.shape {
            BoundaryShape::Axis {
                orientation,
                position,
            } => SideReading::Axis(geometry::side_of_axis(point, *orientation, *position, tolerance)),
            BoundaryShape::Polyline { points } => {
                SideReading::Line(geometry::side_of_polyline(point, points))
            }
            BoundaryShape::Polygon { points } => {
                SideReading::Zone(geometry::containment(point, points))
            }
        }
    }
}

/// Boundaries for a job: the explicit line, then each active zone.
/// Falls back to a vertical mid-frame line entered moving right.
pub fn build_boundaries(line: Option<&LineConfig>, zones: &[Zone]) -> Result<Vec<Boundary>> {
    let mut boundaries = Vec::new();

    if let Some(line) = line {
        boundaries.push(Boundary::axis(
            "line",
            line.line_type,
            line.line_position,
            line.entry_direction,
        )?);
    }

    for zone in zones.iter().filter(|z| z.active) {
        boundaries.push(Boundary::from_zone(zone)?);
    }

    if boundaries.is_empty() {
        boundaries.push(Boundary::axis("line", Orientation::Vertical, 0.5, None)?);
    }

    Ok(boundaries)
}
