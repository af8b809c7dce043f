//! Application state
//!
//! Holds all shared components and state

use crate::config_store::ConfigStore;
use crate::counting_engine::CountingConfig;
use crate::detector::Detector;
use crate::frame_source::UploadDecoder;
use crate::job_orchestrator::{JobOrchestrator, OrchestratorConfig};
use crate::push_gateway::PushGateway;
use crate::stream_manager::{StreamConnector, StreamManager, StreamManagerConfig};
use crate::track_store::TrackerConfig;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_millis(key: &str, default: u64) -> Duration {
    Duration::from_millis(env_or(key, default))
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Prefix for browser-playable proxy URLs
    pub public_base_url: String,
    /// MySQL for cameras/zones; in-memory when unset
    pub database_url: Option<String>,
    /// Inference server URL
    pub detector_url: String,
    pub detector_timeout: Duration,
    pub upload_dir: PathBuf,
    pub results_dir: PathBuf,
    /// Multipart body limit
    pub max_upload_bytes: usize,
    pub max_streams: usize,
    pub max_running_jobs: usize,
    pub stream_probe_timeout: Duration,
    /// Decode rate for live sources
    pub stream_fps: u32,
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
    pub reconnect_max_retries: u32,
    pub track_match_radius: f64,
    pub track_max_missed: u32,
    pub track_min_hits: u32,
    /// Per-subscriber push queue
    pub push_buffer: usize,
    pub push_interval: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        let port = env_or("PORT", 8080u16);
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port,
            public_base_url: std::env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| format!("http://localhost:{}", port)),
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            detector_url: std::env::var("DETECTOR_URL")
                .unwrap_or_else(|_| "http://localhost:9000".to_string()),
            detector_timeout: env_millis("DETECTOR_TIMEOUT_MS", 10_000),
            upload_dir: std::env::var("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/var/lib/countgate/uploads")),
            results_dir: std::env::var("RESULTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/var/lib/countgate/results")),
            max_upload_bytes: env_or("MAX_UPLOAD_BYTES", 500 * 1024 * 1024),
            max_streams: env_or("MAX_STREAMS", 8),
            max_running_jobs: env_or("MAX_RUNNING_JOBS", 4),
            stream_probe_timeout: env_millis("STREAM_PROBE_TIMEOUT_MS", 5_000),
            stream_fps: env_or("STREAM_FPS", 5),
            reconnect_base: env_millis("RECONNECT_BASE_MS", 500),
            reconnect_max: env_millis("RECONNECT_MAX_MS", 8_000),
            reconnect_max_retries: env_or("RECONNECT_MAX_RETRIES", 5),
            track_match_radius: env_or("TRACK_MATCH_RADIUS", 0.08),
            track_max_missed: env_or("TRACK_MAX_MISSED", 15),
            track_min_hits: env_or("TRACK_MIN_HITS", 2),
            push_buffer: env_or("PUSH_BUFFER", 32),
            push_interval: env_millis("PUSH_INTERVAL_MS", 500),
        }
    }
}

impl AppConfig {
    pub fn stream_manager_config(&self) -> StreamManagerConfig {
        StreamManagerConfig {
            max_streams: self.max_streams,
            probe_timeout: self.stream_probe_timeout,
            fps: self.stream_fps,
            reconnect_base: self.reconnect_base,
            reconnect_max: self.reconnect_max,
            max_retries: self.reconnect_max_retries,
            public_base_url: self.public_base_url.clone(),
            ..StreamManagerConfig::default()
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_running_jobs: self.max_running_jobs,
            push_interval: self.push_interval,
            counting: CountingConfig {
                tracker: TrackerConfig {
                    match_radius: self.track_match_radius,
                    max_missed: self.track_max_missed,
                    min_hits: self.track_min_hits,
                },
                ..CountingConfig::default()
            },
            upload_dir: self.upload_dir.clone(),
            results_dir: self.results_dir.clone(),
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// Cameras and zones
    pub config_store: Arc<ConfigStore>,
    /// Inference adapter
    pub detector: Arc<dyn Detector>,
    /// Live camera streams
    pub streams: Arc<StreamManager>,
    /// Counting jobs
    pub jobs: Arc<JobOrchestrator>,
    /// Live count fan-out
    pub push: Arc<PushGateway>,
    pub started_at: Instant,
}

impl AppState {
    /// Wire every component from the config and the external adapters
    pub fn new(
        config: AppConfig,
        config_store: Arc<ConfigStore>,
        detector: Arc<dyn Detector>,
        decoder: Arc<dyn UploadDecoder>,
        connector: Arc<dyn StreamConnector>,
    ) -> Self {
        let streams = Arc::new(StreamManager::new(config.stream_manager_config(), connector));
        let push = Arc::new(PushGateway::new(config.push_buffer));
        let jobs = Arc::new(JobOrchestrator::new(
            config.orchestrator_config(),
            detector.clone(),
            decoder,
            streams.clone(),
            config_store.clone(),
            push.clone(),
        ));

        Self {
            config,
            config_store,
            detector,
            streams,
            jobs,
            push,
            started_at: Instant::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_configs_follow_app_config() {
        let config = AppConfig {
            max_streams: 3,
            track_match_radius: 0.1,
            public_base_url: "https://counts.example".to_string(),
            ..AppConfig::default()
        };
        let streams = config.stream_manager_config();
        assert_eq!(streams.max_streams, 3);
        assert_eq!(streams.public_base_url, "https://counts.example");
        assert_eq!(config.orchestrator_config().counting.tracker.match_radius, 0.1);
    }

    #[test]
    fn test_env_or_falls_back_on_garbage() {
        std::env::set_var("COUNTGATE_TEST_NUMBER", "not-a-number");
        assert_eq!(env_or("COUNTGATE_TEST_NUMBER", 7u32), 7);
        std::env::set_var("COUNTGATE_TEST_NUMBER", " 12 ");
        assert_eq!(env_or("COUNTGATE_TEST_NUMBER", 7u32), 12);
    }
}
