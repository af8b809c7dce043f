//! Job orchestrator types

use crate::counting_engine::{CountAggregate, CountEvent, CountingConfig, LineConfig};
use crate::detector::DetectParams;
use crate::error::{Error, Result};
use crate::frame_source::VideoInfo;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Job kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Upload,
    Stream,
}

/// Job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Processing)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

fn default_confidence() -> f32 {
    0.4
}

/// Counting parameters of one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Explicit counting line; zones of `camera_id` are added to it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<LineConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_id: Option<String>,
    #[serde(default = "default_confidence")]
    pub confidence_threshold: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_filter: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_type: Option<String>,
    /// Resample uploads to this rate (native rate when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_fps: Option<f64>,
    /// Stream jobs complete after this many seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u64>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            line: None,
            camera_id: None,
            confidence_threshold: default_confidence(),
            class_filter: None,
            model_type: None,
            sample_fps: None,
            duration_secs: None,
        }
    }
}

impl JobConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(Error::Validation(format!(
                "confidence must be within [0, 1], got {}",
                self.confidence_threshold
            )));
        }
        if let Some(line) = &self.line {
            if !(0.0..=1.0).contains(&line.line_position) {
                return Err(Error::Validation(format!(
                    "line_position must be within [0, 1], got {}",
                    line.line_position
                )));
            }
        }
        if matches!(self.sample_fps, Some(fps) if fps <= 0.0 || !fps.is_finite()) {
            return Err(Error::Validation("sample_fps must be positive".to_string()));
        }
        if self.duration_secs == Some(0) {
            return Err(Error::Validation("duration must be positive".to_string()));
        }
        Ok(())
    }

    pub fn detect_params(&self) -> DetectParams {
        DetectParams {
            confidence_threshold: self.confidence_threshold,
            classes: self.class_filter.clone(),
            model_type: self.model_type.clone(),
        }
    }
}

/// Final (or partial, when cancelled) outcome of a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: String,
    pub aggregate: CountAggregate,
    pub events: Vec<CountEvent>,
    pub frames_processed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_frames: Option<u64>,
    pub processing_time_secs: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_info: Option<VideoInfo>,
}

/// A unit of counting work
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub job_id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    /// Upload jobs only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
    /// Original file name of an upload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
    pub config: JobConfig,
    pub counts: CountAggregate,
    pub frames_processed: u64,
    pub total_frames: Option<u64>,
    pub result: Option<JobResult>,
    #[serde(skip)]
    pub(crate) upload_path: Option<PathBuf>,
}

impl Job {
    pub(crate) fn new(job_id: String, kind: JobKind, config: JobConfig) -> Self {
        Self {
            job_id,
            kind,
            status: JobStatus::Queued,
            progress: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error_message: None,
            camera_id: config.camera_id.clone(),
            stream_id: None,
            source_file: None,
            config,
            counts: CountAggregate::default(),
            frames_processed: 0,
            total_frames: None,
            result: None,
            upload_path: None,
        }
    }
}

/// ListJobs filter
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub kind: Option<JobKind>,
    pub camera_id: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl JobFilter {
    pub(crate) fn matches(&self, job: &Job) -> bool {
        self.status.map_or(true, |s| job.status == s)
            && self.kind.map_or(true, |k| job.kind == k)
            && self
                .camera_id
                .as_deref()
                .map_or(true, |c| job.camera_id.as_deref() == Some(c))
    }
}

/// Aggregate statistics over all known jobs
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JobStats {
    pub total_jobs: usize,
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub total_entries: u64,
    pub total_exits: u64,
    pub total_frames_processed: u64,
    /// Mean over jobs that produced a result
    pub avg_processing_time_secs: Option<f64>,
}

/// Orchestrator tunables
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_running_jobs: usize,
    /// Max interval between live pushes while objects are visible
    pub push_interval: Duration,
    pub counting: CountingConfig,
    pub upload_dir: PathBuf,
    pub results_dir: PathBuf,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_running_jobs: 4,
            push_interval: Duration::from_millis(500),
            counting: CountingConfig::default(),
            upload_dir: PathBuf::from("/var/lib/countgate/uploads"),
            results_dir: PathBuf::from("/var/lib/countgate/results"),
        }
    }
}

/// Caller-supplied job ids end up in file names
pub(crate) fn validate_job_id(job_id: &str) -> Result<()> {
    let valid = !job_id.is_empty()
        && job_id.len() <= 64
        && job_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::Validation(format!("invalid job_id: {:?}", job_id)))
    }
}

/// Upload progress, held below 100 until the job completes
pub(crate) fn progress_percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    (done.saturating_mul(100) / total).min(99) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_percent() {
        assert_eq!(progress_percent(0, 10), 0);
        assert_eq!(progress_percent(5, 10), 50);
        assert_eq!(progress_percent(10, 10), 99);
        assert_eq!(progress_percent(12, 10), 99);
        assert_eq!(progress_percent(3, 0), 0);
    }

    #[test]
    fn test_job_id_validation() {
        assert!(validate_job_id("job-2024_01").is_ok());
        assert!(validate_job_id("").is_err());
        assert!(validate_job_id("../etc/passwd").is_err());
        assert!(validate_job_id(&"a".repeat(65)).is_err());
    }

    #[test]
    fn test_config_validation() {
        assert!(JobConfig::default().validate().is_ok());
        let bad = JobConfig {
            confidence_threshold: 1.5,
            ..JobConfig::default()
        };
        assert!(matches!(bad.validate(), Err(Error::Validation(_))));
        let zero = JobConfig {
            duration_secs: Some(0),
            ..JobConfig::default()
        };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_config_defaults_from_json() {
        let config: JobConfig = serde_json::from_str(r#"{"camera_id": "cam-1"}"#).unwrap();
        assert_eq!(config.confidence_threshold, 0.4);
        assert_eq!(config.camera_id.as_deref(), Some("cam-1"));
        assert_eq!(config.detect_params().confidence_threshold, 0.4);
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_value(JobStatus::Processing).unwrap(), "processing");
        assert!(JobStatus::Queued.is_active());
        assert!(JobStatus::Cancelled.is_terminal());
    }
}
