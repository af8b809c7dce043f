//! FrameSource - "next decoded frame" abstraction
//!
//! ## Responsibilities
//!
//! - `Frame`: one JPEG-encoded image with its sequence index
//! - `FrameSource`: pulled by job loops, satisfied by uploaded files and live streams
//! - `UploadDecoder`: turns an uploaded video file into a finite frame source
//! - MJPEG framing shared by ffmpeg pipes and HTTP cameras

pub mod ffmpeg;
pub mod mjpeg;

pub use ffmpeg::{FfmpegDecoder, PipeReader};
pub use mjpeg::{jpeg_dimensions, MjpegSplitter};

use crate::error::Result;
use async_trait::async_trait;
use axum::body::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One decoded frame
#[derive(Debug, Clone)]
pub struct Frame {
    /// Position in the source, starting at 0
    pub index: u64,
    pub captured_at: DateTime<Utc>,
    /// 0 when the JPEG header could not be read
    pub width: u32,
    pub height: u32,
    pub jpeg: Bytes,
}

impl Frame {
    /// Wrap JPEG bytes, reading dimensions from the header
    pub fn from_jpeg(index: u64, jpeg: Bytes) -> Self {
        let (width, height) = jpeg_dimensions(&jpeg).unwrap_or((0, 0));
        Self {
            index,
            captured_at: Utc::now(),
            width,
            height,
            jpeg,
        }
    }
}

/// Ordered supply of frames for one job
#[async_trait]
pub trait FrameSource: Send {
    /// Next frame, or `None` once the source is exhausted
    async fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Total frame count when known up front (uploaded files)
    fn total_frames(&self) -> Option<u64> {
        None
    }
}

/// Container metadata of an uploaded video
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    pub width: u32,
    pub height: u32,
    /// Frames in the container at its native rate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_frames: Option<u64>,
}

impl VideoInfo {
    /// Frames a decode at `sample_fps` will yield (native count when None)
    pub fn expected_frames(&self, sample_fps: Option<f64>) -> Option<u64> {
        match (sample_fps, self.duration_secs) {
            (Some(fps), Some(duration)) if fps > 0.0 => Some((duration * fps).ceil() as u64),
            _ => self.total_frames,
        }
    }
}

/// Opens uploaded files as frame sources
#[async_trait]
pub trait UploadDecoder: Send + Sync {
    /// Read container metadata
    async fn probe(&self, path: &Path) -> Result<VideoInfo>;

    /// Start decoding, optionally resampled to `sample_fps`
    async fn open(
        &self,
        path: &Path,
        info: &VideoInfo,
        sample_fps: Option<f64>,
    ) -> Result<Box<dyn FrameSource>>;
}
