//! Counting engine types

use crate::geometry::{Crossing, EntryDirection, Orientation, Point};
use crate::track_store::TrackerConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Explicit axis-aligned counting line from a job request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineConfig {
    pub line_type: Orientation,
    /// Normalized position of the line (x for vertical, y for horizontal)
    pub line_position: f64,
    /// Defaults to RIGHT for vertical lines and DOWN for horizontal ones
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_direction: Option<EntryDirection>,
}

/// Engine tunables for one job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountingConfig {
    pub tracker: TrackerConfig,
    /// Readings within this distance of an axis line count as `On`
    pub side_tolerance: f64,
}

impl Default for CountingConfig {
    fn default() -> Self {
        Self {
            tracker: TrackerConfig::default(),
            side_tolerance: 0.0,
        }
    }
}

/// Entry/exit pair used by the breakdowns
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectionCounts {
    pub entries: u64,
    pub exits: u64,
}

/// Running totals for one job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CountAggregate {
    pub entries: u64,
    pub exits: u64,
    /// entries - exits, floored at 0
    pub inside: u64,
    /// Detections accepted by the confidence/class filter
    pub total_detections: u64,
    pub per_class: BTreeMap<String, DirectionCounts>,
    pub per_boundary: BTreeMap<String, DirectionCounts>,
}

impl CountAggregate {
    pub(crate) fn record(&mut self, label: &str, boundary_id: &str, direction: Crossing) {
        let bump = |c: &mut DirectionCounts| match direction {
            Crossing::Entry => c.entries += 1,
            Crossing::Exit => c.exits += 1,
            Crossing::None => {}
        };
        match direction {
            Crossing::Entry => self.entries += 1,
            Crossing::Exit => self.exits += 1,
            Crossing::None => return,
        }
        bump(self.per_class.entry(label.to_string()).or_default());
        bump(self.per_boundary.entry(boundary_id.to_string()).or_default());
        self.inside = self.entries.saturating_sub(self.exits);
    }

    /// Total confirmed crossings
    pub fn total_count(&self) -> u64 {
        self.entries + self.exits
    }
}

/// One confirmed crossing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountEvent {
    pub track_id: u64,
    pub boundary_id: String,
    pub direction: Crossing,
    pub label: String,
    pub confidence: f32,
    pub frame_index: u64,
    pub timestamp: DateTime<Utc>,
    pub position: Point,
}

/// Object visible in the latest frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedObject {
    pub id: u64,
    pub cx: f64,
    pub cy: f64,
    pub label: String,
}

/// Result of processing one frame
#[derive(Debug, Clone, Default)]
pub struct FrameOutcome {
    pub events: Vec<CountEvent>,
    /// Accepted detections on this frame
    pub detections: usize,
    /// Whether entries/exits moved
    pub changed: bool,
}
