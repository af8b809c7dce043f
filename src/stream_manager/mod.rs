//! StreamManager - live camera stream lifecycle
//!
//! ## Responsibilities
//!
//! - Start streams behind a bounded-time reachability probe
//! - One background read loop per stream, with bounded exponential backoff
//! - Fan frames out to job loops and proxy viewers
//! - Snapshots of the most recent frame
//! - Concurrency cap on simultaneously open streams
//!
//! ## Design
//!
//! - Registry: `RwLock<HashMap>` owned by the manager, scoped to process lifetime
//! - Status via `watch`, frames via `broadcast`
//! - Stop is idempotent and purges the entry

mod connector;
mod subscription;
mod types;

pub use connector::{live_decode_args, FrameReader, MediaConnector, StreamConnector};
pub use subscription::StreamFrameSource;
pub use types::*;

use crate::error::{Error, Result};
use crate::frame_source::Frame;
use axum::body::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, RwLock};

/// Registry entry for one stream
struct StreamEntry {
    camera_id: Option<String>,
    protocol: StreamProtocol,
    source_url: String,
    created_at: DateTime<Utc>,
    frames: broadcast::Sender<Frame>,
    status: Arc<watch::Sender<StreamStatus>>,
    latest: Arc<watch::Sender<Option<Frame>>>,
    stop: watch::Sender<bool>,
    frames_read: Arc<AtomicU64>,
}

impl StreamEntry {
    fn status(&self) -> StreamStatus {
        self.status.borrow().clone()
    }

    fn info(&self, stream_id: &str, proxy_url: String) -> StreamInfo {
        let status = self.status();
        StreamInfo {
            stream_id: stream_id.to_string(),
            camera_id: self.camera_id.clone(),
            protocol: self.protocol,
            source_url: mask_credentials(&self.source_url),
            proxy_url,
            state: status.state,
            last_error: status.last_error,
            frames_read: self.frames_read.load(Ordering::Relaxed),
            created_at: self.created_at,
        }
    }
}

/// Channels handed to a read loop
struct ReadLoop {
    stream_id: String,
    url: String,
    protocol: StreamProtocol,
    config: StreamManagerConfig,
    connector: Arc<dyn StreamConnector>,
    frames: broadcast::Sender<Frame>,
    status: Arc<watch::Sender<StreamStatus>>,
    latest: Arc<watch::Sender<Option<Frame>>>,
    stop: watch::Receiver<bool>,
    frames_read: Arc<AtomicU64>,
}

enum SessionEnd {
    Stopped,
    Failed(String),
}

impl ReadLoop {
    async fn run(mut self) {
        let masked = mask_credentials(&self.url);
        let mut attempt: u32 = 0;
        let mut next_index: u64 = 0;

        loop {
            if *self.stop.borrow() {
                break;
            }

            let reason = match self.session(&mut next_index, &mut attempt).await {
                SessionEnd::Stopped => break,
                SessionEnd::Failed(reason) => reason,
            };

            attempt += 1;
            if attempt > self.config.max_retries {
                tracing::error!(
                    stream_id = %self.stream_id,
                    url = %masked,
                    error = %reason,
                    retries = self.config.max_retries,
                    "Stream failed permanently"
                );
                self.status.send_modify(|s| {
                    s.state = StreamState::Error;
                    s.last_error = Some(reason);
                    s.terminal = true;
                });
                return;
            }

            let delay = self.config.backoff(attempt);
            tracing::warn!(
                stream_id = %self.stream_id,
                url = %masked,
                error = %reason,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Stream read failed, reconnecting"
            );
            self.status.send_modify(|s| {
                s.state = StreamState::Error;
                s.last_error = Some(reason);
            });

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.stop.changed() => break,
            }
        }

        tracing::debug!(stream_id = %self.stream_id, "Read loop exited");
    }

    /// One connection: open, then read until failure or stop
    async fn session(&mut self, next_index: &mut u64, attempt: &mut u32) -> SessionEnd {
        if *self.stop.borrow() {
            return SessionEnd::Stopped;
        }

        let opened = tokio::select! {
            r = self.connector.open(&self.url, self.protocol, self.config.fps) => r,
            _ = self.stop.changed() => return SessionEnd::Stopped,
        };
        let mut reader = match opened {
            Ok(reader) => reader,
            Err(e) => return SessionEnd::Failed(e.to_string()),
        };

        loop {
            let read = tokio::select! {
                r = reader.read_frame() => r,
                _ = self.stop.changed() => return SessionEnd::Stopped,
            };
            match read {
                Ok(Some(jpeg)) => {
                    *attempt = 0;
                    let frame = Frame::from_jpeg(*next_index, jpeg);
                    *next_index += 1;
                    self.frames_read.fetch_add(1, Ordering::Relaxed);

                    if self.status.borrow().state != StreamState::Active {
                        tracing::info!(stream_id = %self.stream_id, "Stream active");
                        self.status.send_modify(|s| {
                            s.state = StreamState::Active;
                            s.last_error = None;
                        });
                    }
                    self.latest.send_replace(Some(frame.clone()));
                    // No receivers is fine
                    let _ = self.frames.send(frame);
                }
                Ok(None) => return SessionEnd::Failed("source ended".to_string()),
                Err(e) => return SessionEnd::Failed(e.to_string()),
            }
        }
    }
}

/// StreamManager instance
pub struct StreamManager {
    config: StreamManagerConfig,
    connector: Arc<dyn StreamConnector>,
    streams: RwLock<HashMap<String, StreamEntry>>,
}

impl StreamManager {
    pub fn new(config: StreamManagerConfig, connector: Arc<dyn StreamConnector>) -> Self {
        Self {
            config,
            connector,
            streams: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &StreamManagerConfig {
        &self.config
    }

    pub fn proxy_url(&self, stream_id: &str) -> String {
        format!(
            "{}/camera/proxy/{}",
            self.config.public_base_url.trim_end_matches('/'),
            urlencoding::encode(stream_id)
        )
    }

    /// Start a stream and return immediately with its proxy URL.
    ///
    /// Restarting an id that is still live returns the existing stream.
    pub async fn start_stream(&self, req: StartStream) -> Result<StreamHandle> {
        let url = req.source.build_url()?;
        let protocol = req.source.protocol;
        let stream_id = req
            .stream_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        // Reserve the slot before probing so concurrent starts respect the cap
        let (stop_rx, frames, status, latest, frames_read) = {
            let mut streams = self.streams.write().await;

            if let Some(existing) = streams.get(&stream_id) {
                if existing.status().is_live() {
                    tracing::info!(stream_id = %stream_id, "Stream already running, reusing");
                    return Ok(StreamHandle {
                        stream_id: stream_id.clone(),
                        proxy_url: self.proxy_url(&stream_id),
                        source_url: existing.source_url.clone(),
                        created: false,
                    });
                }
                streams.remove(&stream_id);
            }

            let live = streams.values().filter(|e| e.status().is_live()).count();
            if live >= self.config.max_streams {
                return Err(Error::ResourceExhausted(format!(
                    "stream limit reached ({}/{})",
                    live, self.config.max_streams
                )));
            }

            let (frames, _) = broadcast::channel(self.config.frame_buffer.max(1));
            let (status, _) = watch::channel(StreamStatus::new(StreamState::Connecting));
            let (latest, _) = watch::channel(None);
            let (stop, stop_rx) = watch::channel(false);
            let entry = StreamEntry {
                camera_id: req.camera_id.clone(),
                protocol,
                source_url: url.clone(),
                created_at: Utc::now(),
                frames: frames.clone(),
                status: Arc::new(status),
                latest: Arc::new(latest),
                stop,
                frames_read: Arc::new(AtomicU64::new(0)),
            };
            let handles = (
                stop_rx,
                frames,
                entry.status.clone(),
                entry.latest.clone(),
                entry.frames_read.clone(),
            );
            streams.insert(stream_id.clone(), entry);
            handles
        };

        let masked = mask_credentials(&url);
        tracing::info!(stream_id = %stream_id, url = %masked, "Probing stream source");

        let probe = tokio::time::timeout(
            self.config.probe_timeout,
            self.connector.probe(&url, protocol),
        )
        .await;
        let probe_error = match probe {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!(
                "probe timed out after {}ms",
                self.config.probe_timeout.as_millis()
            )),
        };
        if let Some(reason) = probe_error {
            self.streams.write().await.remove(&stream_id);
            tracing::warn!(stream_id = %stream_id, url = %masked, error = %reason, "Stream probe failed");
            return Err(Error::ConnectionFailed(format!("{}: {}", masked, reason)));
        }

        let read_loop = ReadLoop {
            stream_id: stream_id.clone(),
            url: url.clone(),
            protocol,
            config: self.config.clone(),
            connector: self.connector.clone(),
            frames,
            status,
            latest,
            stop: stop_rx,
            frames_read,
        };
        tokio::spawn(read_loop.run());

        tracing::info!(stream_id = %stream_id, camera_id = ?req.camera_id, "Stream started");

        Ok(StreamHandle {
            proxy_url: self.proxy_url(&stream_id),
            stream_id,
            source_url: url,
            created: true,
        })
    }

    /// Stop and purge a stream. Unknown ids succeed.
    pub async fn stop_stream(&self, stream_id: &str) -> Result<()> {
        let removed = self.streams.write().await.remove(stream_id);
        match removed {
            Some(entry) => {
                entry.status.send_modify(|s| s.state = StreamState::Stopped);
                entry.stop.send_replace(true);
                tracing::info!(stream_id = %stream_id, "Stream stopped");
            }
            None => {
                tracing::debug!(stream_id = %stream_id, "Stop requested for unknown stream");
            }
        }
        Ok(())
    }

    /// Stop every stream (shutdown)
    pub async fn stop_all(&self) {
        let ids: Vec<String> = self.streams.read().await.keys().cloned().collect();
        for id in ids {
            let _ = self.stop_stream(&id).await;
        }
    }

    /// Most recent frame of an active stream
    pub async fn snapshot(&self, stream_id: &str) -> Result<Bytes> {
        let streams = self.streams.read().await;
        let entry = streams
            .get(stream_id)
            .ok_or_else(|| Error::NotActive(format!("stream {} is not active", stream_id)))?;
        if entry.status().state != StreamState::Active {
            return Err(Error::NotActive(format!(
                "stream {} is {:?}",
                stream_id,
                entry.status().state
            )));
        }
        let latest = entry.latest.borrow().clone();
        latest
            .map(|f| f.jpeg)
            .ok_or_else(|| Error::NotActive(format!("stream {} has no frame yet", stream_id)))
    }

    /// Frame source for a job bound to this stream
    pub async fn subscribe(&self, stream_id: &str) -> Result<StreamFrameSource> {
        let streams = self.streams.read().await;
        let entry = streams
            .get(stream_id)
            .ok_or_else(|| Error::NotActive(format!("stream {} is not active", stream_id)))?;
        if !entry.status().is_live() {
            return Err(Error::NotActive(format!(
                "stream {} is not active ({:?})",
                stream_id,
                entry.status().state
            )));
        }
        Ok(StreamFrameSource::new(
            stream_id.to_string(),
            entry.frames.subscribe(),
            entry.status.subscribe(),
        ))
    }

    /// Latest frame plus a live receiver, for the MJPEG proxy
    pub async fn watch_frames(&self, stream_id: &str) -> Result<(Option<Frame>, broadcast::Receiver<Frame>)> {
        let streams = self.streams.read().await;
        let entry = streams
            .get(stream_id)
            .ok_or_else(|| Error::NotFound(format!("stream {} not found", stream_id)))?;
        let latest = entry.latest.borrow().clone();
        Ok((latest, entry.frames.subscribe()))
    }

    pub async fn get_stream(&self, stream_id: &str) -> Result<StreamInfo> {
        self.streams
            .read()
            .await
            .get(stream_id)
            .map(|e| e.info(stream_id, self.proxy_url(stream_id)))
            .ok_or_else(|| Error::NotFound(format!("stream {} not found", stream_id)))
    }

    pub async fn list_streams(&self) -> Vec<StreamInfo> {
        let streams = self.streams.read().await;
        let mut infos: Vec<StreamInfo> = streams
            .iter()
            .map(|(id, e)| e.info(id, self.proxy_url(id)))
            .collect();
        infos.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        infos
    }

    /// Live stream already serving a camera
    pub async fn find_by_camera(&self, camera_id: &str) -> Option<StreamHandle> {
        let streams = self.streams.read().await;
        streams
            .iter()
            .find(|(_, e)| e.camera_id.as_deref() == Some(camera_id) && e.status().is_live())
            .map(|(id, e)| StreamHandle {
                stream_id: id.clone(),
                proxy_url: self.proxy_url(id),
                source_url: e.source_url.clone(),
                created: false,
            })
    }

    pub async fn active_count(&self) -> usize {
        self.streams
            .read()
            .await
            .values()
            .filter(|e| e.status().is_live())
            .count()
    }

    pub async fn health(&self) -> StreamHealth {
        StreamHealth {
            status: "ok".to_string(),
            active_stream_count: self.active_count().await,
        }
    }
}
