//! API Routes

use axum::{
    body::{Body, Bytes},
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use tokio::sync::broadcast;

use crate::config_store::{
    CreateZoneRequest, UpdateZoneRequest, UpsertCameraRequest, ZoneStatusRequest,
};
use crate::error::{Error, Result};
use crate::push_gateway::PushMessage;
use crate::state::AppState;
use crate::stream_manager::{StartStream, StreamHandle, StreamSource};

const MJPEG_BOUNDARY: &str = "frame";

/// Create API router
pub fn create_router(state: AppState) -> Router {
    let upload_limit = state.config.max_upload_bytes;

    Router::new()
        // Health
        .route("/healthz", get(super::health_check))
        // Camera streams
        .route("/camera/stream", post(start_stream))
        .route("/camera/stop/:stream_id", post(stop_stream))
        .route("/camera/snapshot/:stream_id", get(snapshot))
        .route("/camera/proxy/:stream_id", get(proxy_stream))
        .route("/camera/health", get(stream_health))
        .route("/camera/streams", get(list_streams))
        // Camera / zone configuration
        .route("/cameras", get(list_cameras))
        .route("/cameras/:camera_id", put(upsert_camera))
        .route("/zones/camera/:camera_id", get(zones_for_camera))
        .route("/zones", post(create_zone))
        .route("/zones/:zone_id", put(update_zone).delete(delete_zone))
        .route("/zones/:zone_id/status", put(set_zone_status))
        // Live counts
        .route("/ws/people-count/:id", get(people_count_ws))
        .merge(super::counting_routes(upload_limit))
        .with_state(state)
}

// ========================================
// Stream Handlers
// ========================================

#[derive(Debug, Deserialize)]
struct StartStreamRequest {
    camera_id: Option<String>,
    stream_id: Option<String>,
    source: Option<StreamSource>,
}

fn stream_response(handle: &StreamHandle) -> Json<serde_json::Value> {
    Json(json!({
        "success": true,
        "streamId": handle.stream_id,
        "streamUrl": handle.proxy_url,
        "cameraStreamUrl": handle.source_url,
        "created": handle.created,
    }))
}

/// POST /camera/stream
async fn start_stream(
    State(state): State<AppState>,
    Json(req): Json<StartStreamRequest>,
) -> Result<Json<serde_json::Value>> {
    let handle = match (req.camera_id, req.source) {
        (camera_id, Some(source)) => {
            state
                .streams
                .start_stream(StartStream {
                    stream_id: req.stream_id,
                    camera_id,
                    source,
                })
                .await?
        }
        (Some(camera_id), None) => {
            if let Some(existing) = state.streams.find_by_camera(&camera_id).await {
                existing
            } else {
                let camera = state.config_store.get_camera(&camera_id).await?;
                if !camera.enabled {
                    return Err(Error::NotActive(format!("camera {} is disabled", camera_id)));
                }
                state
                    .streams
                    .start_stream(StartStream {
                        stream_id: req.stream_id,
                        camera_id: Some(camera_id),
                        source: camera.source,
                    })
                    .await?
            }
        }
        (None, None) => {
            return Err(Error::Validation(
                "either camera_id or source is required".to_string(),
            ))
        }
    };

    Ok(stream_response(&handle))
}

/// POST /camera/stop/:stream_id
async fn stop_stream(
    State(state): State<AppState>,
    Path(stream_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    state.streams.stop_stream(&stream_id).await?;
    Ok(Json(json!({ "success": true })))
}

/// GET /camera/snapshot/:stream_id
async fn snapshot(
    State(state): State<AppState>,
    Path(stream_id): Path<String>,
) -> Result<Response> {
    let jpeg = state.streams.snapshot(&stream_id).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "image/jpeg"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        jpeg,
    )
        .into_response())
}

fn mjpeg_part(jpeg: &Bytes) -> Bytes {
    let head = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        MJPEG_BOUNDARY,
        jpeg.len()
    );
    let mut part = Vec::with_capacity(head.len() + jpeg.len() + 2);
    part.extend_from_slice(head.as_bytes());
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    Bytes::from(part)
}

/// GET /camera/proxy/:stream_id (multipart MJPEG)
async fn proxy_stream(
    State(state): State<AppState>,
    Path(stream_id): Path<String>,
) -> Result<Response> {
    let (latest, rx) = state.streams.watch_frames(&stream_id).await?;
    tracing::debug!(stream_id = %stream_id, "Proxy viewer attached");

    let parts = futures::stream::unfold((latest, rx), |(pending, mut rx)| async move {
        if let Some(frame) = pending {
            return Some((Ok::<_, Infallible>(mjpeg_part(&frame.jpeg)), (None, rx)));
        }
        loop {
            match rx.recv().await {
                Ok(frame) => return Some((Ok(mjpeg_part(&frame.jpeg)), (None, rx))),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    Response::builder()
        .header(
            header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace; boundary={}", MJPEG_BOUNDARY),
        )
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(parts))
        .map_err(|e| Error::Internal(e.to_string()))
}

/// GET /camera/health
async fn stream_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.streams.health().await)
}

/// GET /camera/streams
async fn list_streams(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.streams.list_streams().await)
}

// ========================================
// Camera / Zone Handlers
// ========================================

async fn list_cameras(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.config_store.list_cameras().await)
}

async fn upsert_camera(
    State(state): State<AppState>,
    Path(camera_id): Path<String>,
    Json(req): Json<UpsertCameraRequest>,
) -> Result<impl IntoResponse> {
    let camera = state.config_store.upsert_camera(&camera_id, req).await?;
    Ok(Json(camera))
}

async fn zones_for_camera(
    State(state): State<AppState>,
    Path(camera_id): Path<String>,
) -> impl IntoResponse {
    Json(state.config_store.zones_for_camera(&camera_id).await)
}

async fn create_zone(
    State(state): State<AppState>,
    Json(req): Json<CreateZoneRequest>,
) -> Result<impl IntoResponse> {
    let zone = state.config_store.create_zone(req).await?;
    Ok((StatusCode::CREATED, Json(zone)))
}

async fn update_zone(
    State(state): State<AppState>,
    Path(zone_id): Path<u64>,
    Json(req): Json<UpdateZoneRequest>,
) -> Result<impl IntoResponse> {
    let zone = state.config_store.update_zone(zone_id, req).await?;
    Ok(Json(zone))
}

async fn set_zone_status(
    State(state): State<AppState>,
    Path(zone_id): Path<u64>,
    Json(req): Json<ZoneStatusRequest>,
) -> Result<impl IntoResponse> {
    let zone = state.config_store.set_zone_active(zone_id, req.active).await?;
    Ok(Json(zone))
}

async fn delete_zone(
    State(state): State<AppState>,
    Path(zone_id): Path<u64>,
) -> Result<impl IntoResponse> {
    state.config_store.delete_zone(zone_id).await?;
    Ok(Json(json!({ "success": true, "zone_id": zone_id })))
}

// ========================================
// WebSocket Handler
// ========================================

/// WebSocket upgrade handler; `id` is a stream id or a job id
async fn people_count_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_people_count(socket, state, id))
}

/// Handle WebSocket connection
async fn handle_people_count(socket: WebSocket, state: AppState, topic: String) {
    let (sender, receiver) = socket.split();
    forward_people_count(sender, receiver, state, topic).await;
}

/// Pump gateway messages to one client until either side goes away
async fn forward_people_count<S, R>(mut sender: S, mut receiver: R, state: AppState, topic: String)
where
    S: Sink<Message> + Unpin + Send + 'static,
    R: Stream<Item = std::result::Result<Message, axum::Error>> + Unpin + Send + 'static,
{
    // Subscribe before greeting so no update is lost in between
    let (conn_id, mut rx) = state.push.subscribe(&topic).await;

    let hello = PushMessage::Connection {
        message: format!("Connected to people count feed {}", topic),
    };
    let greeted = match serde_json::to_string(&hello) {
        Ok(json) => sender.send(Message::Text(json)).await.is_ok(),
        Err(_) => false,
    };
    if !greeted {
        state.push.unsubscribe(&topic, &conn_id).await;
        return;
    }

    // Forward gateway messages to the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    // Drain client frames until close
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Close(_)) => {
                    tracing::info!(connection_id = %conn_id, "WebSocket client disconnected");
                    break;
                }
                Err(e) => {
                    tracing::warn!(connection_id = %conn_id, error = %e, "WebSocket error");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.push.unsubscribe(&topic, &conn_id).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_store::ConfigStore;
    use crate::counting_engine::CountAggregate;
    use crate::detector::{DetectParams, Detector};
    use crate::frame_source::{Frame, FrameSource, UploadDecoder, VideoInfo};
    use crate::models::Detection;
    use crate::push_gateway::PeopleCountMessage;
    use crate::state::AppConfig;
    use crate::stream_manager::tests::FakeConnector;
    use futures::channel::mpsc;
    use std::sync::Arc;
    use std::time::Duration;

    struct NoDetector;

    #[async_trait::async_trait]
    impl Detector for NoDetector {
        async fn detect(&self, _frame: &Frame, _params: &DetectParams) -> Result<Vec<Detection>> {
            Ok(Vec::new())
        }

        async fn health_check(&self) -> bool {
            true
        }
    }

    struct NoDecoder;

    #[async_trait::async_trait]
    impl UploadDecoder for NoDecoder {
        async fn probe(&self, _path: &std::path::Path) -> Result<VideoInfo> {
            Err(Error::Validation("no decoder".to_string()))
        }

        async fn open(
            &self,
            _path: &std::path::Path,
            _info: &VideoInfo,
            _sample_fps: Option<f64>,
        ) -> Result<Box<dyn FrameSource>> {
            Err(Error::Validation("no decoder".to_string()))
        }
    }

    fn state() -> AppState {
        AppState::new(
            AppConfig::default(),
            Arc::new(ConfigStore::in_memory()),
            Arc::new(NoDetector),
            Arc::new(NoDecoder),
            Arc::new(FakeConnector::endless()),
        )
    }

    async fn next_text(rx: &mut mpsc::Receiver<Message>) -> serde_json::Value {
        let msg = tokio::time::timeout(Duration::from_secs(2), rx.next())
            .await
            .unwrap()
            .unwrap();
        match msg {
            Message::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("unexpected frame {:?}", other),
        }
    }

    async fn wait_subscribers(state: &AppState, topic: &str, expected: usize) {
        for _ in 0..200 {
            if state.push.subscriber_count(topic).await == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("{} never had {} subscribers", topic, expected);
    }

    #[tokio::test]
    async fn test_ws_feed_delivers_counts_and_unsubscribes_on_close() {
        let state = state();
        let (to_client, mut client_rx) = mpsc::channel::<Message>(16);
        let (mut client_tx, from_client) = mpsc::channel::<std::result::Result<Message, axum::Error>>(16);

        let feed = tokio::spawn(forward_people_count(
            to_client,
            from_client,
            state.clone(),
            "stream-7".to_string(),
        ));

        let hello = next_text(&mut client_rx).await;
        assert_eq!(hello["type"], "connection");
        assert_eq!(state.push.subscriber_count("stream-7").await, 1);

        let aggregate = CountAggregate {
            entries: 2,
            exits: 1,
            ..CountAggregate::default()
        };
        let update = PushMessage::PeopleCount(PeopleCountMessage::from_aggregate(
            "job-1",
            &aggregate,
            Vec::new(),
        ));
        state.push.publish("stream-7", &update).await;

        let counted = next_text(&mut client_rx).await;
        assert_eq!(counted["type"], "people_count");
        assert_eq!(counted["job_id"], "job-1");

        client_tx.send(Ok(Message::Close(None))).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), feed).await.unwrap().unwrap();
        assert_eq!(state.push.subscriber_count("stream-7").await, 0);
    }

    #[tokio::test]
    async fn test_ws_feed_stops_forwarding_after_client_leaves() {
        let state = state();
        let (to_client, mut client_rx) = mpsc::channel::<Message>(16);
        let (client_tx, from_client) = mpsc::channel::<std::result::Result<Message, axum::Error>>(16);

        let feed = tokio::spawn(forward_people_count(
            to_client,
            from_client,
            state.clone(),
            "job-9".to_string(),
        ));
        next_text(&mut client_rx).await;
        wait_subscribers(&state, "job-9", 1).await;

        // client stream ends without a close frame
        drop(client_tx);
        tokio::time::timeout(Duration::from_secs(2), feed).await.unwrap().unwrap();
        assert_eq!(state.push.subscriber_count("job-9").await, 0);

        // the forwarding task was aborted with the connection and dropped its sink
        let hello = PushMessage::Connection {
            message: "late".to_string(),
        };
        let report = state.push.publish("job-9", &hello).await;
        assert_eq!(report.delivered, 0);
        let tail = tokio::time::timeout(Duration::from_secs(2), client_rx.next())
            .await
            .unwrap();
        assert!(tail.is_none());
    }

    #[test]
    fn test_mjpeg_part_framing() {
        let part = mjpeg_part(&Bytes::from_static(&[0xFF, 0xD8, 0xFF, 0xD9]));
        let text = String::from_utf8_lossy(&part);
        assert!(text.starts_with("--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 4\r\n\r\n"));
        assert!(part.ends_with(&[0xFF, 0xD9, b'\r', b'\n']));
    }
}
