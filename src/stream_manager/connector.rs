//! Stream connectors
//!
//! RTSP/RTMP sources are decoded by ffmpeg into an MJPEG pipe. HTTP and
//! MJPEG cameras already serve JPEG frames and are read directly.

use super::types::StreamProtocol;
use crate::error::{Error, Result};
use crate::frame_source::{MjpegSplitter, PipeReader};
use async_trait::async_trait;
use axum::body::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::process::Stdio;
use tokio::process::Command;

/// Pulls JPEG frames from one open connection
#[async_trait]
pub trait FrameReader: Send {
    /// Next JPEG; `None` when the source ended cleanly
    async fn read_frame(&mut self) -> Result<Option<Bytes>>;
}

/// Opens connections to camera sources
#[async_trait]
pub trait StreamConnector: Send + Sync {
    /// Reachability check. Callers bound it with a timeout.
    async fn probe(&self, url: &str, protocol: StreamProtocol) -> Result<()>;

    /// Open a frame reader at roughly `fps` frames per second
    async fn open(&self, url: &str, protocol: StreamProtocol, fps: u32) -> Result<Box<dyn FrameReader>>;
}

/// ffmpeg for RTSP/RTMP, reqwest for HTTP/MJPEG
pub struct MediaConnector {
    client: reqwest::Client,
}

impl MediaConnector {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client })
    }
}

fn ffmpeg_input_args(url: &str, protocol: StreamProtocol) -> Vec<String> {
    let mut args = vec!["-loglevel".to_string(), "error".to_string()];
    if protocol == StreamProtocol::Rtsp {
        args.push("-rtsp_transport".to_string());
        args.push("tcp".to_string());
    }
    args.push("-i".to_string());
    args.push(url.to_string());
    args
}

/// ffmpeg arguments turning a live source into an MJPEG pipe
pub fn live_decode_args(url: &str, protocol: StreamProtocol, fps: u32) -> Vec<String> {
    let mut args = ffmpeg_input_args(url, protocol);
    args.extend(
        ["-f", "image2pipe", "-vcodec", "mjpeg", "-q:v", "5", "-r"]
            .iter()
            .map(|s| s.to_string()),
    );
    args.push(fps.max(1).to_string());
    args.push("-".to_string());
    args
}

struct PipeFrameReader(PipeReader);

#[async_trait]
impl FrameReader for PipeFrameReader {
    async fn read_frame(&mut self) -> Result<Option<Bytes>> {
        self.0
            .read_jpeg()
            .await
            .map_err(|e| Error::ConnectionFailed(e.to_string()))
    }
}

struct HttpFrameReader {
    body: BoxStream<'static, reqwest::Result<Bytes>>,
    splitter: MjpegSplitter,
}

#[async_trait]
impl FrameReader for HttpFrameReader {
    async fn read_frame(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some(jpeg) = self.splitter.next_frame() {
                return Ok(Some(jpeg));
            }
            match self.body.next().await {
                Some(Ok(chunk)) => self.splitter.push(&chunk),
                Some(Err(e)) => return Err(Error::ConnectionFailed(e.to_string())),
                None => return Ok(None),
            }
        }
    }
}

#[async_trait]
impl StreamConnector for MediaConnector {
    async fn probe(&self, url: &str, protocol: StreamProtocol) -> Result<()> {
        if protocol.needs_decoder() {
            let mut args = ffmpeg_input_args(url, protocol);
            args.extend(["-vframes", "1", "-f", "null", "-"].iter().map(|s| s.to_string()));

            let status = Command::new("ffmpeg")
                .args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .status()
                .await
                .map_err(|e| Error::Internal(format!("ffmpeg spawn failed: {}", e)))?;

            if !status.success() {
                return Err(Error::ConnectionFailed(format!("probe exited with {}", status)));
            }
            return Ok(());
        }

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::ConnectionFailed(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(Error::ConnectionFailed(format!(
                "camera responded {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn open(&self, url: &str, protocol: StreamProtocol, fps: u32) -> Result<Box<dyn FrameReader>> {
        if protocol.needs_decoder() {
            let reader = PipeReader::spawn(&live_decode_args(url, protocol, fps))?;
            return Ok(Box::new(PipeFrameReader(reader)));
        }

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::ConnectionFailed(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(Error::ConnectionFailed(format!(
                "camera responded {}",
                resp.status()
            )));
        }
        Ok(Box::new(HttpFrameReader {
            body: resp.bytes_stream().boxed(),
            splitter: MjpegSplitter::new(),
        }))
    }
}
