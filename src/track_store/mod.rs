//! TrackStore - per-job object identities
//!
//! ## Responsibilities
//!
//! - Greedy nearest-centroid association of detections to tracks
//! - Monotonic track id allocation (ids are never reused)
//! - Miss counting and expiry
//!
//! Owned by exactly one job loop, so it needs no locking.

mod types;

pub use types::*;

use crate::models::Detection;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

/// Active tracks of one job
#[derive(Debug)]
pub struct TrackStore {
    config: TrackerConfig,
    tracks: BTreeMap<u64, Track>,
    next_id: u64,
}

impl TrackStore {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            tracks: BTreeMap::new(),
            next_id: 1,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Associate one frame's detections with the current tracks.
    ///
    /// Candidate pairs are every (track, detection) with the same label
    /// and centroid distance within `match_radius`. Pairs are taken
    /// closest first; ties go to the older track, then the earlier
    /// detection. Leftover detections start new tracks, leftover tracks
    /// accumulate a miss.
    pub fn associate(
        &mut self,
        detections: &[Detection],
        frame_index: u64,
        timestamp: DateTime<Utc>,
    ) -> AssociationOutcome {
        let radius = self.config.match_radius;

        let mut pairs: Vec<(f64, u64, usize)> = Vec::new();
        for (track_id, track) in &self.tracks {
            for (det_idx, det) in detections.iter().enumerate() {
                if det.label != track.label {
                    continue;
                }
                let d = track.centroid.distance(&det.centroid());
                if d <= radius {
                    pairs.push((d, *track_id, det_idx));
                }
            }
        }
        pairs.sort_by(|a, b| {
            a.0.total_cmp(&b.0)
                .then(a.1.cmp(&b.1))
                .then(a.2.cmp(&b.2))
        });

        let mut det_to_track: HashMap<usize, u64> = HashMap::new();
        let mut matched_tracks: HashMap<u64, usize> = HashMap::new();
        for (_, track_id, det_idx) in pairs {
            if matched_tracks.contains_key(&track_id) || det_to_track.contains_key(&det_idx) {
                continue;
            }
            matched_tracks.insert(track_id, det_idx);
            det_to_track.insert(det_idx, track_id);
        }

        let mut outcome = AssociationOutcome::default();

        // Unmatched tracks age out
        let mut expired = Vec::new();
        for (track_id, track) in self.tracks.iter_mut() {
            if matched_tracks.contains_key(track_id) {
                continue;
            }
            track.misses += 1;
            if track.misses > self.config.max_missed {
                expired.push(*track_id);
            }
        }
        for id in &expired {
            self.tracks.remove(id);
            tracing::trace!(track_id = id, "Track expired");
        }
        outcome.expired = expired;

        for (det_idx, det) in detections.iter().enumerate() {
            let id = match det_to_track.get(&det_idx) {
                Some(&track_id) => {
                    if let Some(track) = self.tracks.get_mut(&track_id) {
                        track.centroid = det.centroid();
                        track.confidence = det.confidence;
                        if det.gender.is_some() {
                            track.gender = det.gender.clone();
                        }
                        track.last_frame = frame_index;
                        track.last_seen = timestamp;
                        track.hits += 1;
                        track.misses = 0;
                    }
                    track_id
                }
                None => {
                    let id = self.spawn(det, frame_index, timestamp);
                    outcome.created.push(id);
                    id
                }
            };
            outcome.observed.push(id);
        }

        outcome
    }

    fn spawn(&mut self, det: &Detection, frame_index: u64, timestamp: DateTime<Utc>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.tracks.insert(
            id,
            Track {
                id,
                centroid: det.centroid(),
                label: det.label.clone(),
                gender: det.gender.clone(),
                confidence: det.confidence,
                first_frame: frame_index,
                last_frame: frame_index,
                last_seen: timestamp,
                hits: 1,
                misses: 0,
                crossings: HashMap::new(),
            },
        );
        id
    }

    pub fn get(&self, id: u64) -> Option<&Track> {
        self.tracks.get(&id)
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut Track> {
        self.tracks.get_mut(&id)
    }

    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BBox;

    fn det(label: &str, cx: f64, cy: f64) -> Detection {
        Detection::new(label, 0.9, BBox::new(cx - 0.02, cy - 0.02, cx + 0.02, cy + 0.02))
    }

    fn store() -> TrackStore {
        TrackStore::new(TrackerConfig {
            match_radius: 0.1,
            max_missed: 2,
            min_hits: 2,
        })
    }

    #[test]
    fn test_new_detections_spawn_tracks() {
        let mut s = store();
        let out = s.associate(&[det("person", 0.2, 0.2), det("person", 0.7, 0.7)], 0, Utc::now());
        assert_eq!(out.created, vec![1, 2]);
        assert_eq!(out.observed, vec![1, 2]);
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn test_nearest_match_continues_track() {
        let mut s = store();
        s.associate(&[det("person", 0.2, 0.2)], 0, Utc::now());
        let out = s.associate(&[det("person", 0.25, 0.2)], 1, Utc::now());
        assert!(out.created.is_empty());
        assert_eq!(out.observed, vec![1]);
        let t = s.get(1).unwrap();
        assert_eq!(t.hits, 2);
        assert_eq!(t.last_frame, 1);
        assert!((t.centroid.x - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_greedy_prefers_closest_pair() {
        let mut s = store();
        s.associate(&[det("person", 0.30, 0.5), det("person", 0.40, 0.5)], 0, Utc::now());
        // Detection at 0.38 is closest to track 2 even though track 1 is also in range
        let out = s.associate(&[det("person", 0.38, 0.5), det("person", 0.31, 0.5)], 1, Utc::now());
        assert_eq!(out.observed, vec![2, 1]);
    }

    #[test]
    fn test_label_must_match() {
        let mut s = store();
        s.associate(&[det("person", 0.5, 0.5)], 0, Utc::now());
        let out = s.associate(&[det("car", 0.5, 0.5)], 1, Utc::now());
        assert_eq!(out.created, vec![2]);
    }

    #[test]
    fn test_expiry_and_no_resurrection() {
        let mut s = store();
        s.associate(&[det("person", 0.5, 0.5)], 0, Utc::now());
        for i in 1..=2 {
            let out = s.associate(&[], i, Utc::now());
            assert!(out.expired.is_empty());
        }
        let out = s.associate(&[], 3, Utc::now());
        assert_eq!(out.expired, vec![1]);
        assert!(s.is_empty());

        let out = s.associate(&[det("person", 0.5, 0.5)], 4, Utc::now());
        assert_eq!(out.created, vec![2]);
    }

    #[test]
    fn test_out_of_radius_spawns_new_track() {
        let mut s = store();
        s.associate(&[det("person", 0.1, 0.5)], 0, Utc::now());
        let out = s.associate(&[det("person", 0.5, 0.5)], 1, Utc::now());
        assert_eq!(out.created, vec![2]);
        assert_eq!(s.get(1).unwrap().misses, 1);
    }
}
