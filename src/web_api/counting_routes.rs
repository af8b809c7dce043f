//! Object counting job routes
//!
//! - POST   /object-counting/upload            multipart `video` + config fields
//! - POST   /object-counting/stream            live job on a camera or stream
//! - GET    /object-counting/jobs              list (status/kind/camera_id/limit/offset)
//! - GET    /object-counting/stats
//! - GET    /object-counting/job/:id
//! - DELETE /object-counting/job/:id
//! - POST   /object-counting/job/:id/cancel
//! - GET    /object-counting/job/:id/download  ?format=json|video

use axum::{
    body::{Body, Bytes},
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::counting_engine::LineConfig;
use crate::detector::coco_label;
use crate::error::{Error, Result};
use crate::geometry::{EntryDirection, Orientation};
use crate::job_orchestrator::{Job, JobConfig, JobFilter};
use crate::state::AppState;

/// Counting routes; `upload_limit` bounds the multipart body
pub fn counting_routes(upload_limit: usize) -> Router<AppState> {
    Router::new()
        .route(
            "/object-counting/upload",
            post(upload_video).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/object-counting/stream", post(start_stream_job))
        .route("/object-counting/jobs", get(list_jobs))
        .route("/object-counting/stats", get(job_stats))
        .route(
            "/object-counting/job/:id",
            get(get_job).delete(delete_job),
        )
        .route("/object-counting/job/:id/cancel", post(cancel_job))
        .route("/object-counting/job/:id/download", get(download))
}

/// Job parameters, as JSON body or multipart text fields
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CountingRequest {
    pub job_id: Option<String>,
    pub camera_id: Option<String>,
    pub stream_id: Option<String>,
    pub line_type: Option<Orientation>,
    pub line_position: Option<f64>,
    pub entry_direction: Option<EntryDirection>,
    #[serde(alias = "confidence_threshold")]
    pub confidence: Option<f32>,
    /// COCO class id; negative = all classes
    pub class_id: Option<i64>,
    /// Label filter, takes precedence over `class_id`
    pub classes: Option<Vec<String>>,
    pub model_type: Option<String>,
    pub sample_fps: Option<f64>,
    /// Seconds
    #[serde(alias = "duration_secs")]
    pub duration: Option<u64>,
}

fn parse_field<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Validation(format!("invalid value for {}: {:?}", name, value)))
}

fn parse_orientation(value: &str) -> Result<Orientation> {
    match value.trim().to_ascii_lowercase().as_str() {
        "horizontal" => Ok(Orientation::Horizontal),
        "vertical" => Ok(Orientation::Vertical),
        other => Err(Error::Validation(format!(
            "line_type must be horizontal or vertical, got {:?}",
            other
        ))),
    }
}

impl CountingRequest {
    /// Apply one multipart text field; unknown fields are ignored
    pub fn set_field(&mut self, name: &str, value: &str) -> Result<()> {
        if value.trim().is_empty() {
            return Ok(());
        }
        match name {
            "job_id" => self.job_id = Some(value.trim().to_string()),
            "camera_id" => self.camera_id = Some(value.trim().to_string()),
            "stream_id" => self.stream_id = Some(value.trim().to_string()),
            "line_type" => self.line_type = Some(parse_orientation(value)?),
            "line_position" => self.line_position = Some(parse_field(name, value)?),
            "entry_direction" => self.entry_direction = Some(value.parse()?),
            "confidence" | "confidence_threshold" => {
                self.confidence = Some(parse_field(name, value)?)
            }
            "class_id" => self.class_id = Some(parse_field(name, value)?),
            "classes" => {
                self.classes = Some(
                    value
                        .split(',')
                        .map(|c| c.trim().to_string())
                        .filter(|c| !c.is_empty())
                        .collect(),
                )
            }
            "model_type" => self.model_type = Some(value.trim().to_string()),
            "sample_fps" => self.sample_fps = Some(parse_field(name, value)?),
            "duration" | "duration_secs" => self.duration = Some(parse_field(name, value)?),
            other => tracing::debug!(field = %other, "Ignoring unknown form field"),
        }
        Ok(())
    }

    /// Job config plus the caller-supplied job id
    pub fn into_config(self) -> Result<(JobConfig, Option<String>)> {
        let line = match (self.line_type, self.line_position) {
            (None, None) => {
                if self.entry_direction.is_some() {
                    return Err(Error::Validation(
                        "entry_direction requires line_type or line_position".to_string(),
                    ));
                }
                None
            }
            (line_type, line_position) => Some(LineConfig {
                line_type: line_type.unwrap_or(Orientation::Vertical),
                line_position: line_position.unwrap_or(0.5),
                entry_direction: self.entry_direction,
            }),
        };

        let class_filter = match (self.classes, self.class_id) {
            (Some(classes), _) if !classes.is_empty() => Some(classes),
            (_, Some(id)) if id >= 0 => {
                let label = coco_label(id)
                    .ok_or_else(|| Error::Validation(format!("unknown class_id {}", id)))?;
                Some(vec![label.to_string()])
            }
            _ => None,
        };

        let config = JobConfig {
            line,
            camera_id: self.camera_id,
            confidence_threshold: self.confidence.unwrap_or(0.4),
            class_filter,
            model_type: self.model_type,
            sample_fps: self.sample_fps,
            duration_secs: self.duration,
        };
        config.validate()?;
        Ok((config, self.job_id))
    }
}

fn accepted(job: &Job) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::ACCEPTED,
        Json(json!({
            "jobId": job.job_id,
            "status": job.status,
            "streamId": job.stream_id,
        })),
    )
}

fn bad_multipart(e: MultipartError) -> Error {
    Error::Validation(format!("invalid multipart body: {}", e))
}

/// Store the `video` field on disk and collect the config fields
async fn read_upload(
    state: &AppState,
    multipart: &mut Multipart,
    req: &mut CountingRequest,
    saved: &mut Option<(PathBuf, String)>,
) -> Result<()> {
    while let Some(mut field) = multipart.next_field().await.map_err(bad_multipart)? {
        let name = field.name().unwrap_or_default().to_string();

        if name != "video" {
            let value = field.text().await.map_err(bad_multipart)?;
            req.set_field(&name, &value)?;
            continue;
        }
        if saved.is_some() {
            return Err(Error::Validation("only one video file per job".to_string()));
        }

        let file_name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| Error::Validation("video field must be a file".to_string()))?;
        let path = state.jobs.storage().upload_path(&file_name)?;
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        let mut file = tokio::fs::File::create(&path).await?;
        *saved = Some((path.clone(), file_name.clone()));

        let mut written: u64 = 0;
        while let Some(chunk) = field.chunk().await.map_err(bad_multipart)? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        if written == 0 {
            return Err(Error::Validation("uploaded video is empty".to_string()));
        }
        tracing::info!(file = %file_name, bytes = written, path = %path.display(), "Video uploaded");
    }
    Ok(())
}

/// POST /object-counting/upload
async fn upload_video(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse> {
    let mut req = CountingRequest::default();
    let mut saved = None;

    let read = read_upload(&state, &mut multipart, &mut req, &mut saved).await;
    let (path, file_name) = match (read, saved) {
        (Ok(()), Some(saved)) => saved,
        (Ok(()), None) => {
            return Err(Error::Validation("missing video file field".to_string()));
        }
        (Err(e), saved) => {
            if let Some((path, _)) = saved {
                let _ = tokio::fs::remove_file(&path).await;
            }
            return Err(e);
        }
    };

    let (config, job_id) = match req.into_config() {
        Ok(parsed) => parsed,
        Err(e) => {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e);
        }
    };

    let job = state
        .jobs
        .submit_upload(path, Some(file_name), config, job_id)
        .await?;
    Ok(accepted(&job))
}

/// POST /object-counting/stream
async fn start_stream_job(
    State(state): State<AppState>,
    Json(req): Json<CountingRequest>,
) -> Result<impl IntoResponse> {
    let stream_id = req.stream_id.clone();
    let (config, job_id) = req.into_config()?;

    let job = match (stream_id, config.camera_id.clone()) {
        (Some(stream_id), _) => state.jobs.submit_stream(&stream_id, config, job_id).await?,
        (None, Some(camera_id)) => state.jobs.submit_camera(&camera_id, config, job_id).await?,
        (None, None) => {
            return Err(Error::Validation(
                "camera_id or stream_id is required".to_string(),
            ))
        }
    };
    Ok(accepted(&job))
}

/// GET /object-counting/jobs
async fn list_jobs(
    State(state): State<AppState>,
    Query(filter): Query<JobFilter>,
) -> impl IntoResponse {
    let jobs = state.jobs.list_jobs(&filter).await;
    Json(json!({
        "count": jobs.len(),
        "jobs": jobs,
    }))
}

/// GET /object-counting/stats
async fn job_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.jobs.stats().await)
}

async fn get_job(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Job>> {
    Ok(Json(state.jobs.get_job(&id).await?))
}

async fn cancel_job(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Job>> {
    Ok(Json(state.jobs.cancel_job(&id).await?))
}

async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    state.jobs.delete_job(&id).await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
struct DownloadQuery {
    format: Option<String>,
}

fn video_content_type(path: &std::path::Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).unwrap_or_default() {
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "mkv" => "video/x-matroska",
        _ => "application/octet-stream",
    }
}

/// File body read in 64 KiB chunks
fn file_body(file: tokio::fs::File) -> Body {
    let chunks = futures::stream::unfold(Some(file), |file| async move {
        let mut file = file?;
        let mut buf = vec![0u8; 64 * 1024];
        match file.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some((Ok(Bytes::from(buf)), Some(file)))
            }
            Err(e) => Some((Err(e), None)),
        }
    });
    Body::from_stream(chunks)
}

/// GET /object-counting/job/:id/download
async fn download(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response> {
    match query.format.as_deref().unwrap_or("json") {
        "json" => {
            let result = state.jobs.result(&id).await?;
            let body = serde_json::to_vec_pretty(&result)?;
            Ok((
                [
                    (header::CONTENT_TYPE, "application/json".to_string()),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=\"{}.json\"", id),
                    ),
                ],
                body,
            )
                .into_response())
        }
        "video" => {
            let path = state.jobs.video_path(&id).await?;
            let file = match tokio::fs::File::open(&path).await {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(Error::NotFound(format!("video for job {} is gone", id)));
                }
                Err(e) => return Err(e.into()),
            };
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("bin")
                .to_string();
            Ok((
                [
                    (header::CONTENT_TYPE, video_content_type(&path).to_string()),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=\"{}.{}\"", id, ext),
                    ),
                ],
                file_body(file),
            )
                .into_response())
        }
        other => Err(Error::Validation(format!(
            "format must be json or video, got {:?}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_form_fields_build_config() {
        let mut req = CountingRequest::default();
        req.set_field("line_type", "Horizontal").unwrap();
        req.set_field("line_position", "0.3").unwrap();
        req.set_field("entry_direction", "UP").unwrap();
        req.set_field("confidence", "0.6").unwrap();
        req.set_field("class_id", "2").unwrap();
        req.set_field("job_id", "gate-7").unwrap();
        req.set_field("unrelated", "x").unwrap();

        let (config, job_id) = req.into_config().unwrap();
        assert_eq!(job_id.as_deref(), Some("gate-7"));
        let line = config.line.unwrap();
        assert_eq!(line.line_type, Orientation::Horizontal);
        assert_eq!(line.line_position, 0.3);
        assert_eq!(line.entry_direction, Some(EntryDirection::Up));
        assert_eq!(config.confidence_threshold, 0.6);
        assert_eq!(config.class_filter, Some(vec!["car".to_string()]));
    }

    #[test]
    fn test_bad_fields_rejected() {
        let mut req = CountingRequest::default();
        assert!(matches!(
            req.set_field("line_position", "left"),
            Err(Error::Validation(_))
        ));
        assert!(req.set_field("line_type", "diagonal").is_err());

        let out_of_range = CountingRequest {
            line_position: Some(1.5),
            ..CountingRequest::default()
        };
        assert!(out_of_range.into_config().is_err());
    }

    #[test]
    fn test_all_classes_and_default_line() {
        let req: CountingRequest =
            serde_json::from_value(json!({"camera_id": "cam-1", "class_id": -1})).unwrap();
        let (config, _) = req.into_config().unwrap();
        assert!(config.class_filter.is_none());
        assert!(config.line.is_none());
        assert_eq!(config.camera_id.as_deref(), Some("cam-1"));
    }

    #[test]
    fn test_video_content_type() {
        assert_eq!(video_content_type(std::path::Path::new("a.mp4")), "video/mp4");
        assert_eq!(video_content_type(std::path::Path::new("a.mov")), "video/quicktime");
    }
}
