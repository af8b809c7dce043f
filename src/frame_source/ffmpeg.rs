//! ffmpeg-backed decoding
//!
//! Every child process is spawned with `kill_on_drop(true)` so that
//! dropping a reader (job cancelled, stream stopped, timeout fired) also
//! kills the decoder.

use super::mjpeg::MjpegSplitter;
use super::{Frame, FrameSource, UploadDecoder, VideoInfo};
use crate::error::{Error, Result};
use async_trait::async_trait;
use axum::body::Bytes;
use serde_json::Value;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};

const READ_CHUNK: usize = 64 * 1024;

/// ffmpeg child whose stdout is an MJPEG image pipe
pub struct PipeReader {
    child: Child,
    stdout: ChildStdout,
    splitter: MjpegSplitter,
    buf: Vec<u8>,
    frames: u64,
}

impl PipeReader {
    /// Spawn ffmpeg with the given arguments. Output must go to `-`.
    pub fn spawn(args: &[String]) -> Result<Self> {
        let mut child = Command::new("ffmpeg")
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Internal(format!("ffmpeg spawn failed: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("ffmpeg stdout unavailable".to_string()))?;

        Ok(Self {
            child,
            stdout,
            splitter: MjpegSplitter::new(),
            buf: vec![0u8; READ_CHUNK],
            frames: 0,
        })
    }

    /// Next JPEG from the pipe; `None` when ffmpeg exits cleanly
    pub async fn read_jpeg(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some(jpeg) = self.splitter.next_frame() {
                self.frames += 1;
                return Ok(Some(jpeg));
            }

            let n = self.stdout.read(&mut self.buf).await?;
            if n == 0 {
                let status = self.child.wait().await?;
                if !status.success() {
                    return Err(Error::Internal(format!(
                        "ffmpeg exited with {} after {} frames",
                        status, self.frames
                    )));
                }
                return Ok(None);
            }
            self.splitter.push(&self.buf[..n]);
        }
    }
}

/// Arguments for decoding a local file to an MJPEG pipe
pub fn file_decode_args(path: &Path, sample_fps: Option<f64>) -> Vec<String> {
    let mut args = vec![
        "-loglevel".to_string(),
        "error".to_string(),
        "-i".to_string(),
        path.to_string_lossy().into_owned(),
    ];
    if let Some(fps) = sample_fps.filter(|f| *f > 0.0) {
        args.push("-vf".to_string());
        args.push(format!("fps={}", fps));
    }
    args.extend(
        ["-f", "image2pipe", "-vcodec", "mjpeg", "-q:v", "5", "-"]
            .iter()
            .map(|s| s.to_string()),
    );
    args
}

/// Uploaded file decoded by ffmpeg
pub struct FileFrameSource {
    reader: PipeReader,
    next_index: u64,
    total: Option<u64>,
}

#[async_trait]
impl FrameSource for FileFrameSource {
    async fn next_frame(&mut self) -> Result<Option<Frame>> {
        match self.reader.read_jpeg().await? {
            Some(jpeg) => {
                let frame = Frame::from_jpeg(self.next_index, jpeg);
                self.next_index += 1;
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }

    fn total_frames(&self) -> Option<u64> {
        self.total
    }
}

/// ffprobe + ffmpeg decoder for uploaded files
pub struct FfmpegDecoder {
    probe_timeout: Duration,
}

impl FfmpegDecoder {
    pub fn new(probe_timeout: Duration) -> Self {
        Self { probe_timeout }
    }
}

impl Default for FfmpegDecoder {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl UploadDecoder for FfmpegDecoder {
    async fn probe(&self, path: &Path) -> Result<VideoInfo> {
        let child = Command::new("ffprobe")
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height,r_frame_rate,avg_frame_rate,nb_frames:format=duration",
                "-of",
                "json",
            ])
            .arg(path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Internal(format!("ffprobe spawn failed: {}", e)))?;

        let output = match tokio::time::timeout(self.probe_timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(Error::Internal(format!("ffprobe execution failed: {}", e))),
            Err(_) => {
                tracing::warn!(path = %path.display(), "ffprobe timeout, process killed via kill_on_drop");
                return Err(Error::Internal(format!(
                    "ffprobe timeout ({}s)",
                    self.probe_timeout.as_secs()
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Validation(format!(
                "not a readable video: {}",
                stderr.trim()
            )));
        }

        let json: Value = serde_json::from_slice(&output.stdout)?;
        parse_probe_output(&json)
    }

    async fn open(
        &self,
        path: &Path,
        info: &VideoInfo,
        sample_fps: Option<f64>,
    ) -> Result<Box<dyn FrameSource>> {
        let reader = PipeReader::spawn(&file_decode_args(path, sample_fps))?;
        tracing::debug!(
            path = %path.display(),
            sample_fps = ?sample_fps,
            "Decoding upload"
        );
        Ok(Box::new(FileFrameSource {
            reader,
            next_index: 0,
            total: info.expected_frames(sample_fps),
        }))
    }
}

/// "30000/1001" or "25" -> frames per second
fn parse_rate(s: &str) -> Option<f64> {
    let rate = match s.split_once('/') {
        Some((n, d)) => {
            let d: f64 = d.trim().parse().ok()?;
            if d == 0.0 {
                return None;
            }
            n.trim().parse::<f64>().ok()? / d
        }
        None => s.trim().parse().ok()?,
    };
    (rate > 0.0).then_some(rate)
}

fn as_f64(v: &Value) -> Option<f64> {
    v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}

/// Extract `VideoInfo` from ffprobe's JSON output
pub fn parse_probe_output(json: &Value) -> Result<VideoInfo> {
    let stream = json["streams"]
        .get(0)
        .ok_or_else(|| Error::Validation("file has no video stream".to_string()))?;

    let fps = stream["avg_frame_rate"]
        .as_str()
        .and_then(parse_rate)
        .or_else(|| stream["r_frame_rate"].as_str().and_then(parse_rate));
    let duration_secs = as_f64(&json["format"]["duration"]).filter(|d| *d > 0.0);
    let total_frames = as_f64(&stream["nb_frames"])
        .map(|n| n as u64)
        .filter(|n| *n > 0)
        .or_else(|| match (duration_secs, fps) {
            (Some(d), Some(f)) => Some((d * f).round() as u64),
            _ => None,
        });

    Ok(VideoInfo {
        duration_secs,
        fps,
        width: stream["width"].as_u64().unwrap_or(0) as u32,
        height: stream["height"].as_u64().unwrap_or(0) as u32,
        total_frames,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_probe_with_nb_frames() {
        let info = parse_probe_output(&json!({
            "streams": [{"width": 1920, "height": 1080, "r_frame_rate": "30/1", "avg_frame_rate": "30/1", "nb_frames": "900"}],
            "format": {"duration": "30.000000"}
        }))
        .unwrap();
        assert_eq!(info.total_frames, Some(900));
        assert_eq!(info.fps, Some(30.0));
        assert_eq!((info.width, info.height), (1920, 1080));
    }

    #[test]
    fn test_parse_probe_derives_frames_from_duration() {
        // webm/mkv containers usually omit nb_frames
        let info = parse_probe_output(&json!({
            "streams": [{"width": 640, "height": 360, "r_frame_rate": "25/1", "avg_frame_rate": "0/0"}],
            "format": {"duration": "4.0"}
        }))
        .unwrap();
        assert_eq!(info.fps, Some(25.0));
        assert_eq!(info.total_frames, Some(100));
    }

    #[test]
    fn test_parse_probe_without_video() {
        assert!(parse_probe_output(&json!({"streams": [], "format": {}})).is_err());
    }

    #[test]
    fn test_parse_rate() {
        let ntsc = parse_rate("30000/1001").unwrap();
        assert!((ntsc - 29.97).abs() < 0.01);
        assert_eq!(parse_rate("0/0"), None);
        assert_eq!(parse_rate("12"), Some(12.0));
    }

    #[test]
    fn test_file_decode_args_with_sampling() {
        let args = file_decode_args(Path::new("/tmp/in.mp4"), Some(2.0));
        assert!(args.windows(2).any(|w| w[0] == "-vf" && w[1] == "fps=2"));
        assert_eq!(args.last().map(String::as_str), Some("-"));
    }
}
