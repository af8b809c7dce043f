//! Geometry primitives

use serde::{Deserialize, Serialize};

/// 2-D point. Frame coordinates: x grows right, y grows down.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    /// True when both coordinates are within the normalized 0..=1 range
    pub fn is_normalized(&self) -> bool {
        self.x.is_finite()
            && self.y.is_finite()
            && (0.0..=1.0).contains(&self.x)
            && (0.0..=1.0).contains(&self.y)
    }
}

/// Side of a directed line segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
    On,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
            Side::On => Side::On,
        }
    }
}

/// Side of an axis-aligned counting line
///
/// `Before` is the smaller coordinate (left of a vertical line, above a
/// horizontal one).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisSide {
    Before,
    After,
    On,
}

/// Polygon containment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Containment {
    Inside,
    Outside,
}

/// Orientation of an axis-aligned counting line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Horizontal,
    Vertical,
}

/// Configured direction of travel that counts as an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntryDirection {
    #[serde(alias = "up")]
    Up,
    #[serde(alias = "down")]
    Down,
    #[serde(alias = "left")]
    Left,
    #[serde(alias = "right")]
    Right,
}

impl EntryDirection {
    /// Unit vector of travel in frame coordinates
    pub fn vector(self) -> Point {
        match self {
            EntryDirection::Up => Point::new(0.0, -1.0),
            EntryDirection::Down => Point::new(0.0, 1.0),
            EntryDirection::Left => Point::new(-1.0, 0.0),
            EntryDirection::Right => Point::new(1.0, 0.0),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntryDirection::Up => "UP",
            EntryDirection::Down => "DOWN",
            EntryDirection::Left => "LEFT",
            EntryDirection::Right => "RIGHT",
        }
    }
}

impl std::str::FromStr for EntryDirection {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "UP" => Ok(EntryDirection::Up),
            "DOWN" => Ok(EntryDirection::Down),
            "LEFT" => Ok(EntryDirection::Left),
            "RIGHT" => Ok(EntryDirection::Right),
            other => Err(crate::Error::Validation(format!(
                "unknown entry direction: {}",
                other
            ))),
        }
    }
}

/// Result of comparing two side readings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Crossing {
    Entry,
    Exit,
    None,
}

/// Any side classification that can sit exactly on a boundary
pub trait SideClass: Copy + PartialEq {
    fn is_on(self) -> bool;
}

impl SideClass for Side {
    fn is_on(self) -> bool {
        self == Side::On
    }
}

impl SideClass for AxisSide {
    fn is_on(self) -> bool {
        self == AxisSide::On
    }
}

impl SideClass for Containment {
    fn is_on(self) -> bool {
        false
    }
}

/// Reading of a point against one boundary, whatever its shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "side", rename_all = "snake_case")]
pub enum SideReading {
    Line(Side),
    Axis(AxisSide),
    Zone(Containment),
}

impl SideClass for SideReading {
    fn is_on(self) -> bool {
        match self {
            SideReading::Line(s) => s.is_on(),
            SideReading::Axis(s) => s.is_on(),
            SideReading::Zone(s) => s.is_on(),
        }
    }
}
