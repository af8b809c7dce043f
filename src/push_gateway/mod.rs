//! PushGateway - live count fan-out
//!
//! ## Responsibilities
//!
//! - Topic (job id or stream id) -> subscriber registry
//! - Serialize each update once, fan out without blocking the producer
//! - Slow-consumer isolation: full queues drop the message for that subscriber only
//! - Lazy removal of disconnected subscribers

mod types;

pub use types::*;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Subscriber connection
struct Subscriber {
    id: Uuid,
    tx: mpsc::Sender<String>,
}

/// PushGateway instance
pub struct PushGateway {
    topics: RwLock<HashMap<String, Vec<Subscriber>>>,
    buffer: usize,
    connection_count: AtomicU64,
    dropped_total: AtomicU64,
}

impl PushGateway {
    /// Gateway with a per-subscriber queue of `buffer` messages
    pub fn new(buffer: usize) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            buffer: buffer.max(1),
            connection_count: AtomicU64::new(0),
            dropped_total: AtomicU64::new(0),
        }
    }

    /// Register a subscriber for a topic
    pub async fn subscribe(&self, topic: &str) -> (Uuid, mpsc::Receiver<String>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.buffer);

        self.topics
            .write()
            .await
            .entry(topic.to_string())
            .or_default()
            .push(Subscriber { id, tx });

        self.connection_count.fetch_add(1, Ordering::Relaxed);
        tracing::info!(connection_id = %id, topic = %topic, "Push subscriber connected");

        (id, rx)
    }

    /// Remove a subscriber
    pub async fn unsubscribe(&self, topic: &str, id: &Uuid) {
        let mut topics = self.topics.write().await;
        let Some(subs) = topics.get_mut(topic) else {
            return;
        };
        let before = subs.len();
        subs.retain(|s| s.id != *id);
        if subs.len() < before {
            self.connection_count.fetch_sub(1, Ordering::Relaxed);
            tracing::info!(connection_id = %id, topic = %topic, "Push subscriber disconnected");
        }
        if subs.is_empty() {
            topics.remove(topic);
        }
    }

    /// Send a message to every subscriber of a topic
    pub async fn publish(&self, topic: &str, message: &PushMessage) -> PublishReport {
        let json = match serde_json::to_string(message) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize push message");
                return PublishReport::default();
            }
        };
        self.publish_raw(topic, json).await
    }

    /// Publish the same message on several topics
    pub async fn publish_many(&self, topics: &[&str], message: &PushMessage) -> PublishReport {
        let json = match serde_json::to_string(message) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize push message");
                return PublishReport::default();
            }
        };
        let mut total = PublishReport::default();
        for topic in topics {
            let r = self.publish_raw(topic, json.clone()).await;
            total.delivered += r.delivered;
            total.dropped += r.dropped;
            total.removed += r.removed;
        }
        total
    }

    async fn publish_raw(&self, topic: &str, json: String) -> PublishReport {
        let mut report = PublishReport::default();
        let mut closed = Vec::new();

        {
            let topics = self.topics.read().await;
            let Some(subs) = topics.get(topic) else {
                return report;
            };
            for sub in subs {
                match sub.tx.try_send(json.clone()) {
                    Ok(()) => report.delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        report.dropped += 1;
                        tracing::debug!(connection_id = %sub.id, topic = %topic, "Subscriber queue full, message dropped");
                    }
                    Err(TrySendError::Closed(_)) => closed.push(sub.id),
                }
            }
        }

        if report.dropped > 0 {
            self.dropped_total
                .fetch_add(report.dropped as u64, Ordering::Relaxed);
        }

        if !closed.is_empty() {
            for id in &closed {
                self.unsubscribe(topic, id).await;
            }
            report.removed = closed.len();
        }

        report
    }

    /// Number of subscribers of a topic
    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .await
            .get(topic)
            .map(|s| s.len())
            .unwrap_or(0)
    }

    /// Get connection count
    pub fn connection_count(&self) -> u64 {
        self.connection_count.load(Ordering::Relaxed)
    }

    /// Messages dropped for slow subscribers since startup
    pub fn dropped_total(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }
}

impl Default for PushGateway {
    fn default() -> Self {
        Self::new(32)
    }
}
