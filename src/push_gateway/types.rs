//! Push message types

use crate::counting_engine::{CountAggregate, TrackedObject};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Messages sent to live subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushMessage {
    /// First message on every connection
    Connection { message: String },
    /// Count update for a live job
    PeopleCount(PeopleCountMessage),
}

/// Compact count update
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeopleCountMessage {
    pub job_id: String,
    pub inside: u64,
    pub entered: u64,
    pub exited: u64,
    pub timestamp: DateTime<Utc>,
    pub objects: Vec<TrackedObject>,
}

impl PeopleCountMessage {
    pub fn from_aggregate(job_id: &str, aggregate: &CountAggregate, objects: Vec<TrackedObject>) -> Self {
        Self {
            job_id: job_id.to_string(),
            inside: aggregate.inside,
            entered: aggregate.entries,
            exited: aggregate.exits,
            timestamp: Utc::now(),
            objects,
        }
    }
}

/// Delivery summary of one publish
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    /// Subscribers whose queue was full
    pub dropped: usize,
    /// Subscribers found disconnected and removed
    pub removed: usize,
}
