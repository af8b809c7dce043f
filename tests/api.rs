//! HTTP API tests against in-process fakes (no ffmpeg, camera or database)

use async_trait::async_trait;
use axum::{
    body::{Body, Bytes},
    http::{header, Request, StatusCode},
    Router,
};
use countgate::{
    config_store::ConfigStore,
    detector::{DetectParams, Detector},
    frame_source::{Frame, FrameSource, UploadDecoder, VideoInfo},
    models::{BBox, Detection},
    push_gateway::PushMessage,
    state::{AppConfig, AppState},
    stream_manager::{FrameReader, StreamConnector, StreamProtocol},
    web_api, Result,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn fake_jpeg(width: u16, height: u16) -> Vec<u8> {
    let mut v = vec![0xFF, 0xD8];
    v.extend_from_slice(&[0xFF, 0xC0, 0x00, 0x0B, 0x08]);
    v.extend_from_slice(&height.to_be_bytes());
    v.extend_from_slice(&width.to_be_bytes());
    v.extend_from_slice(&[0x01, 0x01, 0x11, 0x00]);
    v.extend_from_slice(&[0xFF, 0xD9]);
    v
}

/// One person walking left to right, restarting every 15 frames
struct WalkingPerson;

#[async_trait]
impl Detector for WalkingPerson {
    async fn detect(&self, frame: &Frame, _params: &DetectParams) -> Result<Vec<Detection>> {
        let cx = (0.0625 * (frame.index % 15 + 1) as f64).min(0.9375);
        Ok(vec![Detection::new(
            "person",
            0.9,
            BBox::new(cx - 0.0625, 0.4375, cx + 0.0625, 0.5625),
        )])
    }

    async fn health_check(&self) -> bool {
        true
    }
}

struct CountedFrames {
    next: u64,
    total: u64,
}

#[async_trait]
impl FrameSource for CountedFrames {
    async fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.next >= self.total {
            return Ok(None);
        }
        let frame = Frame::from_jpeg(self.next, Bytes::from(fake_jpeg(64, 48)));
        self.next += 1;
        Ok(Some(frame))
    }

    fn total_frames(&self) -> Option<u64> {
        Some(self.total)
    }
}

struct FakeDecoder {
    frames: u64,
}

#[async_trait]
impl UploadDecoder for FakeDecoder {
    async fn probe(&self, _path: &Path) -> Result<VideoInfo> {
        Ok(VideoInfo {
            duration_secs: Some(self.frames as f64 / 10.0),
            fps: Some(10.0),
            width: 64,
            height: 48,
            total_frames: Some(self.frames),
        })
    }

    async fn open(
        &self,
        _path: &Path,
        _info: &VideoInfo,
        _sample_fps: Option<f64>,
    ) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(CountedFrames {
            next: 0,
            total: self.frames,
        }))
    }
}

/// Camera that never ends, one frame every 10ms
struct EndlessReader;

#[async_trait]
impl FrameReader for EndlessReader {
    async fn read_frame(&mut self) -> Result<Option<Bytes>> {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(Some(Bytes::from(fake_jpeg(320, 240))))
    }
}

struct FakeConnector;

#[async_trait]
impl StreamConnector for FakeConnector {
    async fn probe(&self, url: &str, _protocol: StreamProtocol) -> Result<()> {
        if url.contains("unreachable") {
            return Err(countgate::Error::ConnectionFailed("no route to host".to_string()));
        }
        Ok(())
    }

    async fn open(
        &self,
        _url: &str,
        _protocol: StreamProtocol,
        _fps: u32,
    ) -> Result<Box<dyn FrameReader>> {
        Ok(Box::new(EndlessReader))
    }
}

fn test_state() -> AppState {
    let root = std::env::temp_dir().join(format!("countgate-api-{}", uuid::Uuid::new_v4()));
    let config = AppConfig {
        database_url: None,
        upload_dir: root.join("uploads"),
        results_dir: root.join("results"),
        stream_probe_timeout: Duration::from_millis(500),
        push_interval: Duration::from_millis(10),
        ..AppConfig::default()
    };
    AppState::new(
        config,
        Arc::new(ConfigStore::in_memory()),
        Arc::new(WalkingPerson),
        Arc::new(FakeDecoder { frames: 12 }),
        Arc::new(FakeConnector),
    )
}

fn app(state: &AppState) -> Router {
    web_api::create_router(state.clone())
}

async fn send(state: &AppState, req: Request<Body>) -> (StatusCode, Bytes) {
    let resp = app(state).oneshot(req).await.unwrap();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    (status, body)
}

async fn send_json(state: &AppState, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let (status, bytes) = send(state, req).await;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn wait_status(state: &AppState, job_id: &str, wanted: &str) -> Value {
    for _ in 0..500 {
        let (status, job) = send_json(state, "GET", &format!("/object-counting/job/{}", job_id), None).await;
        assert_eq!(status, StatusCode::OK);
        if job["status"] == wanted {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {} never reached {}", job_id, wanted);
}

fn multipart_upload(boundary: &str, fields: &[(&str, &str)], file_name: &str, video: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                boundary, name, value
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"video\"; filename=\"{}\"\r\nContent-Type: video/mp4\r\n\r\n",
            boundary, file_name
        )
        .as_bytes(),
    );
    body.extend_from_slice(video);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}

fn upload_request(fields: &[(&str, &str)], file_name: &str) -> Request<Body> {
    let boundary = "countgate-test-boundary";
    Request::builder()
        .method("POST")
        .uri("/object-counting/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", boundary),
        )
        .body(Body::from(multipart_upload(boundary, fields, file_name, b"not really a video")))
        .unwrap()
}

#[tokio::test]
async fn test_healthz() {
    let state = test_state();
    let (status, body) = send_json(&state, "GET", "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["detector_connected"], true);
    // no database configured
    assert!(body["db_connected"].is_null());
    assert_eq!(body["push_dropped"], 0);
    assert_eq!(body["active_streams"], 0);
}

#[tokio::test]
async fn test_stop_unknown_stream_is_idempotent() {
    let state = test_state();
    for _ in 0..2 {
        let (status, body) = send_json(&state, "POST", "/camera/stop/nope", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
    }
}

#[tokio::test]
async fn test_stream_start_snapshot_and_stop() {
    let state = test_state();
    let (status, body) = send_json(
        &state,
        "POST",
        "/camera/stream",
        Some(json!({
            "stream_id": "lobby",
            "source": {"protocol": "mjpeg", "url": "http://10.0.0.5/video.cgi"}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["streamId"], "lobby");
    assert_eq!(body["created"], true);
    assert!(body["streamUrl"].as_str().unwrap().ends_with("/camera/proxy/lobby"));

    let mut snapshot = None;
    for _ in 0..200 {
        let req = Request::builder()
            .uri("/camera/snapshot/lobby")
            .body(Body::empty())
            .unwrap();
        let resp = app(&state).oneshot(req).await.unwrap();
        if resp.status() == StatusCode::OK {
            assert_eq!(resp.headers()[header::CONTENT_TYPE], "image/jpeg");
            snapshot = Some(resp.into_body().collect().await.unwrap().to_bytes());
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let snapshot = snapshot.expect("stream never produced a frame");
    assert_eq!(&snapshot[..2], &[0xFF, 0xD8]);

    let (_, health) = send_json(&state, "GET", "/camera/health", None).await;
    assert_eq!(health["active_stream_count"], 1);

    let (status, _) = send_json(&state, "POST", "/camera/stop/lobby", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = send_json(&state, "GET", "/camera/snapshot/lobby", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error_code"], "NOT_ACTIVE");
}

#[tokio::test]
async fn test_unreachable_stream_is_bad_gateway() {
    let state = test_state();
    let (status, body) = send_json(
        &state,
        "POST",
        "/camera/stream",
        Some(json!({"source": {"protocol": "rtsp", "url": "rtsp://unreachable/live"}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error_code"], "CONNECTION_FAILED");
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let state = test_state();
    let (status, body) = send_json(&state, "GET", "/object-counting/job/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error_code"], "NOT_FOUND");

    let (status, _) = send_json(&state, "POST", "/object-counting/job/missing/cancel", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_zone_rejected() {
    let state = test_state();
    let (status, body) = send_json(
        &state,
        "POST",
        "/zones",
        Some(json!({
            "camera_id": "cam-1",
            "polygon_json": [{"x": 0.1, "y": 0.1}, {"x": 0.9, "y": 0.1}],
            "entry_direction": "up"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "VALIDATION_ERROR");

    let (_, zones) = send_json(&state, "GET", "/zones/camera/cam-1", None).await;
    assert_eq!(zones, json!([]));
}

#[tokio::test]
async fn test_zone_update_toggle_and_delete() {
    let state = test_state();
    let (status, zone) = send_json(
        &state,
        "POST",
        "/zones",
        Some(json!({
            "camera_id": "cam-1",
            "polygon_json": [{"x": 0.1, "y": 0.1}, {"x": 0.9, "y": 0.1}, {"x": 0.5, "y": 0.9}],
            "entry_direction": "down"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = zone["id"].as_u64().unwrap();

    let (status, zone) = send_json(
        &state,
        "PUT",
        &format!("/zones/{}/status", id),
        Some(json!({"active": false})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(zone["active"], false);
    assert!(state.config_store.active_zones("cam-1").await.is_empty());

    let (status, zone) = send_json(
        &state,
        "PUT",
        &format!("/zones/{}", id),
        Some(json!({
            "name": "Entrance",
            "polygon_json": [{"x": 0.2, "y": 0.2}, {"x": 0.8, "y": 0.2}, {"x": 0.8, "y": 0.8}, {"x": 0.2, "y": 0.8}],
            "direction_line_json": [{"x": 0.2, "y": 0.5}, {"x": 0.8, "y": 0.5}],
            "entry_direction": "DOWN",
            "active": true
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(zone["id"], id);
    assert_eq!(zone["camera_id"], "cam-1");
    assert_eq!(zone["name"], "Entrance");
    assert_eq!(zone["polygon_json"].as_array().unwrap().len(), 4);
    assert_eq!(state.config_store.active_zones("cam-1").await.len(), 1);

    // a direction parallel to the line is rejected and leaves the zone as it was
    let (status, body) = send_json(
        &state,
        "PUT",
        &format!("/zones/{}", id),
        Some(json!({
            "polygon_json": [{"x": 0.2, "y": 0.2}, {"x": 0.8, "y": 0.2}, {"x": 0.8, "y": 0.8}],
            "direction_line_json": [{"x": 0.2, "y": 0.5}, {"x": 0.8, "y": 0.5}],
            "entry_direction": "LEFT"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "VALIDATION_ERROR");
    let (_, zones) = send_json(&state, "GET", "/zones/camera/cam-1", None).await;
    assert_eq!(zones[0]["polygon_json"].as_array().unwrap().len(), 4);

    let (status, body) = send_json(&state, "DELETE", &format!("/zones/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let (_, zones) = send_json(&state, "GET", "/zones/camera/cam-1", None).await;
    assert_eq!(zones, json!([]));

    for (method, uri, body) in [
        ("DELETE", format!("/zones/{}", id), None),
        ("PUT", format!("/zones/{}/status", id), Some(json!({"active": true}))),
    ] {
        let (status, body) = send_json(&state, method, &uri, body).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{} {}", method, uri);
        assert_eq!(body["error_code"], "NOT_FOUND");
    }
}

#[tokio::test]
async fn test_healthz_reports_dropped_push_messages() {
    let state = test_state();
    // subscriber that never reads
    let (_id, _rx) = state.push.subscribe("stalled").await;
    let message = PushMessage::Connection {
        message: "tick".to_string(),
    };
    for _ in 0..state.config.push_buffer + 3 {
        state.push.publish("stalled", &message).await;
    }

    let (status, body) = send_json(&state, "GET", "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["push_dropped"], 3);
    assert_eq!(body["push_connections"], 1);
}

#[tokio::test]
async fn test_upload_job_counts_and_downloads() {
    let state = test_state();
    state.jobs.storage().ensure_dirs().await.unwrap();

    let req = upload_request(
        &[
            ("job_id", "walk-1"),
            ("line_type", "vertical"),
            ("line_position", "0.5"),
            ("entry_direction", "right"),
        ],
        "walk.mp4",
    );
    let (status, body) = send(&state, req).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let accepted: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(accepted["jobId"], "walk-1");

    let job = wait_status(&state, "walk-1", "completed").await;
    assert_eq!(job["progress"], 100);
    assert_eq!(job["frames_processed"], 12);
    assert_eq!(job["counts"]["entries"], 1);

    let (status, result) = send_json(&state, "GET", "/object-counting/job/walk-1/download", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["job_id"], "walk-1");
    assert_eq!(result["aggregate"]["entries"], 1);

    let req = Request::builder()
        .uri("/object-counting/job/walk-1/download?format=video")
        .body(Body::empty())
        .unwrap();
    let resp = app(&state).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "video/mp4");
    let video = resp.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&video[..], b"not really a video");

    let (_, stats) = send_json(&state, "GET", "/object-counting/stats", None).await;
    assert_eq!(stats["completed"], 1);
    assert_eq!(stats["total_entries"], 1);

    let (status, _) = send_json(&state, "DELETE", "/object-counting/job/walk-1", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send_json(&state, "GET", "/object-counting/job/walk-1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_upload_rejects_non_video() {
    let state = test_state();
    state.jobs.storage().ensure_dirs().await.unwrap();

    let (status, body) = send(&state, upload_request(&[], "notes.txt")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["error_code"], "VALIDATION_ERROR");

    let (_, jobs) = send_json(&state, "GET", "/object-counting/jobs", None).await;
    assert_eq!(jobs["count"], 0);
}

#[tokio::test]
async fn test_camera_job_runs_until_cancelled() {
    let state = test_state();
    let (status, _) = send_json(
        &state,
        "PUT",
        "/cameras/door",
        Some(json!({
            "name": "Front door",
            "source": {"protocol": "http", "url": "http://10.0.0.9/mjpg"}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, accepted) = send_json(
        &state,
        "POST",
        "/object-counting/stream",
        Some(json!({"camera_id": "door", "line_type": "vertical", "job_id": "door-live"})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(accepted["jobId"], "door-live");

    wait_status(&state, "door-live", "processing").await;
    let (_, jobs) = send_json(&state, "GET", "/object-counting/jobs?status=processing", None).await;
    assert_eq!(jobs["count"], 1);

    let (status, job) = send_json(&state, "POST", "/object-counting/job/door-live/cancel", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["status"], "cancelled");

    let (status, body) = send_json(&state, "POST", "/object-counting/job/door-live/cancel", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error_code"], "NOT_RUNNING");
}

#[tokio::test]
async fn test_stream_job_needs_target() {
    let state = test_state();
    let (status, body) = send_json(&state, "POST", "/object-counting/stream", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "VALIDATION_ERROR");

    let (status, body) = send_json(
        &state,
        "POST",
        "/object-counting/stream",
        Some(json!({"stream_id": "ghost"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error_code"], "NOT_ACTIVE");
}

#[tokio::test]
async fn test_download_stays_inside_results_dir() {
    let state = test_state();
    state.jobs.storage().ensure_dirs().await.unwrap();
    let results_dir = state.jobs.config().results_dir.clone();
    let leaked = results_dir.parent().unwrap().join("leak.json");
    tokio::fs::write(&leaked, br#"{"job_id":"secret"}"#).await.unwrap();

    for uri in [
        "/object-counting/job/..%2Fleak/download?format=json",
        "/object-counting/job/..%2F..%2Fleak/download",
        "/object-counting/job/unknown/download",
    ] {
        let (status, body) = send_json(&state, "GET", uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{}", uri);
        assert_eq!(body["error_code"], "NOT_FOUND");
        assert!(body.get("job_id").is_none());
    }
}
