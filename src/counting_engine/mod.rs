//! CountingEngine - detections to exactly-once crossing counts
//!
//! ## Responsibilities
//!
//! - Feed each frame's detections through the TrackStore
//! - Evaluate every track against every boundary via the geometry module
//! - Register at most one crossing per track per boundary
//! - Maintain the job's CountAggregate
//!
//! One engine per job, driven only by that job's loop.

mod boundary;
mod types;

pub use boundary::{build_boundaries, Boundary, BoundaryShape};
pub use types::*;

use crate::geometry::{self, Crossing, SideClass};
use crate::models::Detection;
use crate::track_store::TrackStore;
use chrono::{DateTime, Utc};

/// Counting state of one job
#[derive(Debug)]
pub struct CountingEngine {
    boundaries: Vec<Boundary>,
    tracks: TrackStore,
    aggregate: CountAggregate,
    side_tolerance: f64,
    min_hits: u32,
    visible: Vec<u64>,
}

impl CountingEngine {
    pub fn new(boundaries: Vec<Boundary>, config: CountingConfig) -> Self {
        let min_hits = config.tracker.min_hits;
        Self {
            boundaries,
            tracks: TrackStore::new(config.tracker),
            aggregate: CountAggregate::default(),
            side_tolerance: config.side_tolerance,
            min_hits,
            visible: Vec::new(),
        }
    }

    pub fn boundaries(&self) -> &[Boundary] {
        &self.boundaries
    }

    pub fn aggregate(&self) -> &CountAggregate {
        &self.aggregate
    }

    pub fn tracks(&self) -> &TrackStore {
        &self.tracks
    }

    /// Process one frame's (already filtered) detections
    pub fn process_frame(
        &mut self,
        frame_index: u64,
        timestamp: DateTime<Utc>,
        detections: &[Detection],
    ) -> FrameOutcome {
        self.aggregate.total_detections += detections.len() as u64;

        let association = self.tracks.associate(detections, frame_index, timestamp);
        let mut events = Vec::new();

        for &track_id in &association.observed {
            let Some(track) = self.tracks.get_mut(track_id) else {
                continue;
            };
            let confirmed = track.hits >= self.min_hits;
            let centroid = track.centroid;

            for boundary in &self.boundaries {
                let reading = boundary.classify(centroid, self.side_tolerance);
                // An on-line reading never replaces the stored side
                if reading.is_on() {
                    continue;
                }
                let state = track.crossing_mut(&boundary.id);
                let prev = state.last_side.replace(reading);
                let prev_point = state.last_point.replace(centroid);
                if state.consumed.is_some() || !confirmed {
                    continue;
                }
                let (Some(prev), Some(from)) = (prev, prev_point) else {
                    continue;
                };
                let direction = geometry::crossing_direction(prev, reading, boundary.entry_side);
                // A side change around the end of a finite line is not a crossing
                if direction == Crossing::None || !boundary.crossed(from, centroid) {
                    continue;
                }
                state.consumed = Some(direction);

                self.aggregate.record(&track.label, &boundary.id, direction);
                tracing::debug!(
                    track_id = track.id,
                    boundary_id = %boundary.id,
                    direction = ?direction,
                    frame_index,
                    "Crossing registered"
                );
                events.push(CountEvent {
                    track_id: track.id,
                    boundary_id: boundary.id.clone(),
                    direction,
                    label: track.label.clone(),
                    confidence: track.confidence,
                    frame_index,
                    timestamp,
                    position: centroid,
                });
            }
        }

        self.visible = association.observed;

        FrameOutcome {
            changed: !events.is_empty(),
            detections: detections.len(),
            events,
        }
    }

    /// Tracks observed on the latest frame
    pub fn visible_objects(&self) -> Vec<TrackedObject> {
        self.visible
            .iter()
            .filter_map(|id| self.tracks.get(*id))
            .map(|t| TrackedObject {
                id: t.id,
                cx: t.centroid.x,
                cy: t.centroid.y,
                label: t.label.clone(),
            })
            .collect()
    }
}
