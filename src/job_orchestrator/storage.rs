//! Job file storage
//!
//! Uploaded videos live under `upload_dir` as `{millis}-{uuid}.{ext}`;
//! results are JSON snapshots at `results_dir/{job_id}.json`.

use super::types::{validate_job_id, JobResult};
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Accepted upload containers
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "webm"];

/// Lower-cased extension of an accepted video file name
pub fn video_extension(file_name: &str) -> Result<String> {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .ok_or_else(|| Error::Validation(format!("{} has no file extension", file_name)))?;
    if !VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        return Err(Error::Validation(format!(
            "unsupported video format .{} (allowed: {})",
            ext,
            VIDEO_EXTENSIONS.join(", ")
        )));
    }
    Ok(ext)
}

/// Filesystem layout for uploads and results
#[derive(Debug, Clone)]
pub struct JobStorage {
    upload_dir: PathBuf,
    results_dir: PathBuf,
}

impl JobStorage {
    pub fn new(upload_dir: impl Into<PathBuf>, results_dir: impl Into<PathBuf>) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            results_dir: results_dir.into(),
        }
    }

    /// Create both directories
    pub async fn ensure_dirs(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.upload_dir).await?;
        tokio::fs::create_dir_all(&self.results_dir).await?;
        Ok(())
    }

    /// Fresh destination path for an upload named `original_name`
    pub fn upload_path(&self, original_name: &str) -> Result<PathBuf> {
        let ext = video_extension(original_name)?;
        let name = format!(
            "{}-{}.{}",
            chrono::Utc::now().timestamp_millis(),
            uuid::Uuid::new_v4(),
            ext
        );
        Ok(self.upload_dir.join(name))
    }

    /// Result file of a job. Ids outside the job id alphabet have none.
    pub fn result_path(&self, job_id: &str) -> Result<PathBuf> {
        validate_job_id(job_id)
            .map_err(|_| Error::NotFound(format!("no result for job {:?}", job_id)))?;
        Ok(self.results_dir.join(format!("{}.json", job_id)))
    }

    pub async fn save_result(&self, result: &JobResult) -> Result<PathBuf> {
        let path = self.result_path(&result.job_id)?;
        tokio::fs::create_dir_all(&self.results_dir).await?;
        let json = serde_json::to_vec_pretty(result)?;
        tokio::fs::write(&path, json).await?;
        Ok(path)
    }

    pub async fn load_result(&self, job_id: &str) -> Result<JobResult> {
        let path = self.result_path(job_id)?;
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("no result for job {}", job_id)));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&data)?)
    }

    /// Remove a job's files; missing files are fine
    pub async fn purge(&self, job_id: &str, upload: Option<&Path>) {
        let mut paths: Vec<PathBuf> = self.result_path(job_id).into_iter().collect();
        paths.extend(upload.map(Path::to_path_buf));
        for path in paths {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => tracing::debug!(job_id = %job_id, path = %path.display(), "Removed job file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(job_id = %job_id, path = %path.display(), error = %e, "Failed to remove job file")
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counting_engine::CountAggregate;

    fn temp_storage() -> JobStorage {
        let root = std::env::temp_dir().join(format!("countgate-storage-{}", uuid::Uuid::new_v4()));
        JobStorage::new(root.join("uploads"), root.join("results"))
    }

    #[test]
    fn test_video_extension() {
        assert_eq!(video_extension("Lobby.MP4").unwrap(), "mp4");
        assert_eq!(video_extension("clip.webm").unwrap(), "webm");
        assert!(matches!(video_extension("notes.txt"), Err(Error::Validation(_))));
        assert!(video_extension("noext").is_err());
    }

    #[test]
    fn test_upload_path_shape() {
        let storage = temp_storage();
        let path = storage.upload_path("entrance.mov").unwrap();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.ends_with(".mov"));
        let (millis, _) = name.split_once('-').unwrap();
        assert!(millis.parse::<i64>().is_ok());
    }

    #[tokio::test]
    async fn test_result_save_load_purge() {
        let storage = temp_storage();
        let result = JobResult {
            job_id: "job-1".to_string(),
            aggregate: CountAggregate::default(),
            events: vec![],
            frames_processed: 12,
            total_frames: Some(12),
            processing_time_secs: 0.5,
            video_info: None,
        };
        storage.save_result(&result).await.unwrap();
        assert_eq!(storage.load_result("job-1").await.unwrap().frames_processed, 12);

        storage.purge("job-1", None).await;
        assert!(matches!(storage.load_result("job-1").await, Err(Error::NotFound(_))));
        // second purge is a no-op
        storage.purge("job-1", None).await;
    }

    #[tokio::test]
    async fn test_result_ids_cannot_leave_results_dir() {
        let storage = temp_storage();
        storage.ensure_dirs().await.unwrap();
        let outside = storage.results_dir.parent().unwrap().join("leak.json");
        tokio::fs::write(&outside, b"{}").await.unwrap();

        for id in ["../leak", "..%2Fleak", "a/b", "", "..", "x.json"] {
            assert!(matches!(storage.result_path(id), Err(Error::NotFound(_))), "{}", id);
            assert!(matches!(storage.load_result(id).await, Err(Error::NotFound(_))), "{}", id);
        }
        storage.purge("../leak", None).await;
        assert!(outside.exists());
    }
}
