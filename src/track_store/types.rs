//! Track store types

use crate::geometry::{Crossing, Point, SideReading};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Association tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Max centroid distance (normalized) for a detection to continue a track
    pub match_radius: f64,
    /// Consecutive unmatched frames tolerated before a track expires
    pub max_missed: u32,
    /// Matched frames needed before a track may register a crossing
    pub min_hits: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            match_radius: 0.08,
            max_missed: 15,
            min_hits: 2,
        }
    }
}

/// Per-boundary crossing state of a track
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrossingState {
    /// Last non-`On` reading against the boundary
    pub last_side: Option<SideReading>,
    /// Where `last_side` was read
    pub last_point: Option<Point>,
    /// Set once the track has registered its crossing for this boundary
    pub consumed: Option<Crossing>,
}

/// Provisional identity of one physical object within a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub id: u64,
    pub centroid: Point,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    pub confidence: f32,
    pub first_frame: u64,
    pub last_frame: u64,
    pub last_seen: DateTime<Utc>,
    /// Frames on which the track was matched (including creation)
    pub hits: u32,
    /// Consecutive frames without a match
    pub misses: u32,
    #[serde(skip)]
    pub crossings: HashMap<String, CrossingState>,
}

impl Track {
    /// Crossing state for a boundary, created on first use
    pub fn crossing_mut(&mut self, boundary_id: &str) -> &mut CrossingState {
        self.crossings.entry(boundary_id.to_string()).or_default()
    }

    pub fn crossing(&self, boundary_id: &str) -> Option<&CrossingState> {
        self.crossings.get(boundary_id)
    }
}

/// What one association step did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssociationOutcome {
    /// Tracks observed this frame (continued or new), in detection order
    pub observed: Vec<u64>,
    /// Subset of `observed` created this frame
    pub created: Vec<u64>,
    /// Tracks removed after exceeding the miss threshold
    pub expired: Vec<u64>,
}
