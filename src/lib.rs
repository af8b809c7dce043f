//! countgate - object tracking and line/zone counting server
//!
//! ## Architecture
//!
//! 1. Geometry - boxes, lines, polygons, crossing tests
//! 2. TrackStore - frame-to-frame identity for detections
//! 3. CountingEngine - boundary crossings and zone occupancy per frame
//! 4. Detector - external inference adapter
//! 5. FrameSource - uploaded-video and live-stream frame supply
//! 6. StreamManager - live camera sessions, snapshots, MJPEG proxy
//! 7. JobOrchestrator - counting job lifecycle and result persistence
//! 8. PushGateway - live count fan-out to WebSocket subscribers
//! 9. ConfigStore - cameras and counting zones
//! 10. WebAPI - REST and WebSocket endpoints
//!
//! ## Design Principles
//!
//! - One counting engine, fed by any frame source
//! - Jobs own their tracker state; nothing is shared between jobs
//! - Slow consumers drop updates instead of stalling producers

pub mod config_store;
pub mod counting_engine;
pub mod detector;
pub mod error;
pub mod frame_source;
pub mod geometry;
pub mod job_orchestrator;
pub mod models;
pub mod push_gateway;
pub mod state;
pub mod stream_manager;
pub mod track_store;
pub mod web_api;

pub use error::{Error, Result};
pub use state::{AppConfig, AppState};
