//! Live stream as a job frame source

use super::types::{StreamState, StreamStatus};
use crate::error::{Error, Result};
use crate::frame_source::{Frame, FrameSource};
use async_trait::async_trait;
use tokio::sync::{broadcast, watch};

/// Frames of one live stream, in arrival order.
///
/// Frames missed while the consumer was busy (detector latency) are
/// skipped; a job always works on recent frames.
pub struct StreamFrameSource {
    stream_id: String,
    frames: broadcast::Receiver<Frame>,
    status: watch::Receiver<StreamStatus>,
}

impl StreamFrameSource {
    pub(crate) fn new(
        stream_id: String,
        frames: broadcast::Receiver<Frame>,
        status: watch::Receiver<StreamStatus>,
    ) -> Self {
        Self {
            stream_id,
            frames,
            status,
        }
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Terminal outcome if the stream is done
    fn check_status(&self) -> Option<Result<Option<Frame>>> {
        let status = self.status.borrow();
        if status.terminal && status.state == StreamState::Error {
            return Some(Err(Error::ConnectionFailed(format!(
                "stream {} failed: {}",
                self.stream_id,
                status.last_error.as_deref().unwrap_or("read loop gave up")
            ))));
        }
        if status.state == StreamState::Stopped {
            return Some(Ok(None));
        }
        None
    }
}

#[async_trait]
impl FrameSource for StreamFrameSource {
    async fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            if let Some(outcome) = self.check_status() {
                return outcome;
            }
            tokio::select! {
                received = self.frames.recv() => match received {
                    Ok(frame) => return Ok(Some(frame)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(stream_id = %self.stream_id, skipped, "Consumer lagging, frames skipped");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return self.check_status().unwrap_or(Ok(None));
                    }
                },
                changed = self.status.changed() => {
                    if changed.is_err() {
                        // status sender gone: stream purged
                        return Ok(None);
                    }
                }
            }
        }
    }
}
