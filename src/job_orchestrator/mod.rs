//! JobOrchestrator - upload and stream counting jobs
//!
//! ## Responsibilities
//!
//! - Admission: job cap, one active worker per job id, one active job per stream
//! - One spawned worker per job driving the counting loop
//! - Status/progress/result queries, cancellation, deletion
//! - Result snapshots on disk
//!
//! ## Design
//!
//! - Registry: `RwLock<HashMap>` mutated by API handlers and workers
//! - Worker writes carry a run id; stale runs cannot touch a job
//! - Terminal statuses are never overwritten

mod storage;
mod types;
mod worker;

pub use storage::{video_extension, JobStorage, VIDEO_EXTENSIONS};
pub use types::*;

use crate::config_store::ConfigStore;
use crate::counting_engine::{build_boundaries, Boundary, CountingEngine};
use crate::detector::Detector;
use crate::error::{Error, Result};
use crate::frame_source::UploadDecoder;
use crate::push_gateway::PushGateway;
use crate::stream_manager::{StartStream, StreamManager};
use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use worker::{JobHandle, JobInput, Worker, WorkerContext};

struct JobEntry {
    job: Job,
    cancel: watch::Sender<bool>,
    run_id: u64,
}

type Registry = Arc<RwLock<HashMap<String, JobEntry>>>;

/// JobOrchestrator instance
pub struct JobOrchestrator {
    config: OrchestratorConfig,
    config_store: Arc<ConfigStore>,
    ctx: WorkerContext,
    jobs: Registry,
    next_run: AtomicU64,
}

impl JobOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        detector: Arc<dyn Detector>,
        decoder: Arc<dyn UploadDecoder>,
        streams: Arc<StreamManager>,
        config_store: Arc<ConfigStore>,
        push: Arc<PushGateway>,
    ) -> Self {
        let ctx = WorkerContext {
            detector,
            decoder,
            streams,
            push,
            storage: JobStorage::new(config.upload_dir.clone(), config.results_dir.clone()),
            push_interval: config.push_interval,
        };
        Self {
            config,
            config_store,
            ctx,
            jobs: Arc::new(RwLock::new(HashMap::new())),
            next_run: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn storage(&self) -> &JobStorage {
        &self.ctx.storage
    }

    async fn boundaries(&self, config: &JobConfig) -> Result<Vec<Boundary>> {
        config.validate()?;
        let zones = match &config.camera_id {
            Some(camera_id) => self.config_store.active_zones(camera_id).await,
            None => Vec::new(),
        };
        build_boundaries(config.line.as_ref(), &zones)
    }

    fn resolve_job_id(job_id: Option<String>) -> Result<String> {
        match job_id.filter(|id| !id.trim().is_empty()) {
            Some(id) => {
                validate_job_id(&id)?;
                Ok(id)
            }
            None => Ok(uuid::Uuid::new_v4().to_string()),
        }
    }

    /// Register a queued job, enforcing every admission rule under one lock
    async fn admit(&self, job: Job) -> Result<(JobHandle, watch::Receiver<bool>)> {
        let job_id = job.job_id.clone();
        let upload_path = job.upload_path.clone();
        let mut jobs = self.jobs.write().await;

        if let Some(existing) = jobs.get(&job_id) {
            if existing.job.status.is_active() {
                return Err(Error::Conflict(format!(
                    "job {} is already {:?}",
                    job_id, existing.job.status
                )));
            }
        }

        let running = jobs.values().filter(|e| e.job.status.is_active()).count();
        if running >= self.config.max_running_jobs {
            return Err(Error::ResourceExhausted(format!(
                "job limit reached ({}/{})",
                running, self.config.max_running_jobs
            )));
        }

        if let Some(stream_id) = &job.stream_id {
            let bound = jobs.values().find(|e| {
                e.job.status.is_active() && e.job.stream_id.as_deref() == Some(stream_id)
            });
            if let Some(other) = bound {
                return Err(Error::Conflict(format!(
                    "stream {} is already bound to job {}",
                    stream_id, other.job.job_id
                )));
            }
        }

        let run_id = self.next_run.fetch_add(1, Ordering::Relaxed);
        let (cancel, cancel_rx) = watch::channel(false);
        let replaced = jobs.insert(
            job_id.clone(),
            JobEntry {
                job,
                cancel,
                run_id,
            },
        );
        drop(jobs);

        // The new run overwrites the result file; only a stale upload is removed
        if let Some(old) = replaced {
            tracing::info!(job_id = %job_id, "Replacing finished job");
            if let Some(path) = old.job.upload_path.filter(|p| Some(p) != upload_path.as_ref()) {
                let _ = tokio::fs::remove_file(&path).await;
            }
        }

        let handle = JobHandle {
            registry: self.jobs.clone(),
            job_id,
            run_id,
        };
        Ok((handle, cancel_rx))
    }

    fn spawn_worker(
        &self,
        handle: JobHandle,
        cancel: watch::Receiver<bool>,
        kind: JobKind,
        input: JobInput,
        boundaries: Vec<Boundary>,
        config: &JobConfig,
    ) {
        let engine = CountingEngine::new(boundaries, self.config.counting.clone());
        let worker = Worker::new(
            handle,
            kind,
            input,
            engine,
            config.detect_params(),
            config.sample_fps,
            config.duration_secs.map(Duration::from_secs),
            cancel,
            self.ctx.clone(),
        );
        tokio::spawn(worker.run());
    }

    /// Queue a counting job over an uploaded file.
    ///
    /// The file is removed if the job cannot be admitted.
    pub async fn submit_upload(
        &self,
        path: PathBuf,
        original_name: Option<String>,
        config: JobConfig,
        job_id: Option<String>,
    ) -> Result<Job> {
        let submitted = self
            .try_submit_upload(path.clone(), original_name, config, job_id)
            .await;
        if submitted.is_err() {
            let _ = tokio::fs::remove_file(&path).await;
        }
        submitted
    }

    async fn try_submit_upload(
        &self,
        path: PathBuf,
        original_name: Option<String>,
        config: JobConfig,
        job_id: Option<String>,
    ) -> Result<Job> {
        let job_id = Self::resolve_job_id(job_id)?;
        let boundaries = self.boundaries(&config).await?;

        let mut job = Job::new(job_id.clone(), JobKind::Upload, config.clone());
        job.source_file = original_name;
        job.upload_path = Some(path.clone());
        let snapshot = job.clone();

        let (handle, cancel) = self.admit(job).await?;
        self.spawn_worker(
            handle,
            cancel,
            JobKind::Upload,
            JobInput::Upload(path),
            boundaries,
            &config,
        );

        tracing::info!(
            job_id = %job_id,
            file = ?snapshot.source_file,
            "Upload job queued"
        );
        Ok(snapshot)
    }

    /// Queue a live counting job on a running stream
    pub async fn submit_stream(
        &self,
        stream_id: &str,
        mut config: JobConfig,
        job_id: Option<String>,
    ) -> Result<Job> {
        let job_id = Self::resolve_job_id(job_id)?;
        let source = self.ctx.streams.subscribe(stream_id).await?;

        if config.camera_id.is_none() {
            config.camera_id = self
                .ctx
                .streams
                .get_stream(stream_id)
                .await
                .ok()
                .and_then(|info| info.camera_id);
        }
        let boundaries = self.boundaries(&config).await?;

        let mut job = Job::new(job_id.clone(), JobKind::Stream, config.clone());
        job.stream_id = Some(stream_id.to_string());
        let snapshot = job.clone();

        let (handle, cancel) = self.admit(job).await?;
        self.spawn_worker(
            handle,
            cancel,
            JobKind::Stream,
            JobInput::Stream(source),
            boundaries,
            &config,
        );

        tracing::info!(
            job_id = %job_id,
            stream_id = %stream_id,
            camera_id = ?snapshot.camera_id,
            "Stream job queued"
        );
        Ok(snapshot)
    }

    /// Queue a live job for a configured camera, starting its stream if needed
    pub async fn submit_camera(
        &self,
        camera_id: &str,
        mut config: JobConfig,
        job_id: Option<String>,
    ) -> Result<Job> {
        config.camera_id = Some(camera_id.to_string());

        let (stream, created) = match self.ctx.streams.find_by_camera(camera_id).await {
            Some(handle) => (handle, false),
            None => {
                let camera = self.config_store.get_camera(camera_id).await?;
                if !camera.enabled {
                    return Err(Error::NotActive(format!("camera {} is disabled", camera_id)));
                }
                let handle = self
                    .ctx
                    .streams
                    .start_stream(StartStream {
                        stream_id: None,
                        camera_id: Some(camera_id.to_string()),
                        source: camera.source,
                    })
                    .await?;
                (handle, true)
            }
        };

        match self.submit_stream(&stream.stream_id, config, job_id).await {
            Ok(job) => Ok(job),
            Err(e) => {
                if created {
                    let _ = self.ctx.streams.stop_stream(&stream.stream_id).await;
                }
                Err(e)
            }
        }
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Job> {
        self.jobs
            .read()
            .await
            .get(job_id)
            .map(|e| e.job.clone())
            .ok_or_else(|| Error::NotFound(format!("job {} not found", job_id)))
    }

    /// Jobs matching `filter`, most recent first
    pub async fn list_jobs(&self, filter: &JobFilter) -> Vec<Job> {
        let jobs = self.jobs.read().await;
        let mut matched: Vec<&JobEntry> = jobs.values().filter(|e| filter.matches(&e.job)).collect();
        matched.sort_by(|a, b| {
            b.job
                .created_at
                .cmp(&a.job.created_at)
                .then(b.run_id.cmp(&a.run_id))
        });
        matched
            .into_iter()
            .skip(filter.offset.unwrap_or(0))
            .take(filter.limit.unwrap_or(50))
            .map(|e| e.job.clone())
            .collect()
    }

    /// Request cooperative cancellation; the worker stops at the next frame boundary
    pub async fn cancel_job(&self, job_id: &str) -> Result<Job> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs
            .get_mut(job_id)
            .ok_or_else(|| Error::NotFound(format!("job {} not found", job_id)))?;
        if !entry.job.status.is_active() {
            return Err(Error::NotRunning(format!(
                "job {} is {:?}",
                job_id, entry.job.status
            )));
        }
        entry.job.status = JobStatus::Cancelled;
        entry.job.finished_at = Some(Utc::now());
        entry.cancel.send_replace(true);

        tracing::info!(job_id = %job_id, "Job cancelled");
        Ok(entry.job.clone())
    }

    /// Cancel if running, then purge the job and its files
    pub async fn delete_job(&self, job_id: &str) -> Result<()> {
        let entry = {
            let mut jobs = self.jobs.write().await;
            let mut entry = jobs
                .remove(job_id)
                .ok_or_else(|| Error::NotFound(format!("job {} not found", job_id)))?;
            if entry.job.status.is_active() {
                entry.job.status = JobStatus::Cancelled;
                entry.job.finished_at = Some(Utc::now());
                entry.cancel.send_replace(true);
                tracing::info!(job_id = %job_id, "Job cancelled for deletion");
            }
            entry
        };

        self.ctx
            .storage
            .purge(job_id, entry.job.upload_path.as_deref())
            .await;
        tracing::info!(job_id = %job_id, "Job deleted");
        Ok(())
    }

    /// Final or partial result of a known job, from memory or its result file
    pub async fn result(&self, job_id: &str) -> Result<JobResult> {
        {
            let jobs = self.jobs.read().await;
            let entry = jobs
                .get(job_id)
                .ok_or_else(|| Error::NotFound(format!("job {} not found", job_id)))?;
            if let Some(result) = &entry.job.result {
                return Ok(result.clone());
            }
            if entry.job.status.is_active() {
                return Err(Error::NotActive(format!(
                    "job {} has no result yet ({:?})",
                    job_id, entry.job.status
                )));
            }
        }
        self.ctx.storage.load_result(job_id).await
    }

    /// Stored upload of a job
    pub async fn video_path(&self, job_id: &str) -> Result<PathBuf> {
        self.jobs
            .read()
            .await
            .get(job_id)
            .and_then(|e| e.job.upload_path.clone())
            .ok_or_else(|| Error::NotFound(format!("no video for job {}", job_id)))
    }

    pub async fn stats(&self) -> JobStats {
        let jobs = self.jobs.read().await;
        let mut stats = JobStats {
            total_jobs: jobs.len(),
            ..JobStats::default()
        };
        let mut time_sum = 0.0;
        let mut timed = 0usize;

        for entry in jobs.values() {
            let job = &entry.job;
            match job.status {
                JobStatus::Queued => stats.queued += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
            }
            stats.total_entries += job.counts.entries;
            stats.total_exits += job.counts.exits;
            stats.total_frames_processed += job.frames_processed;
            if let Some(result) = &job.result {
                time_sum += result.processing_time_secs;
                timed += 1;
            }
        }

        if timed > 0 {
            stats.avg_processing_time_secs = Some(time_sum / timed as f64);
        }
        stats
    }

    pub async fn running_count(&self) -> usize {
        self.jobs
            .read()
            .await
            .values()
            .filter(|e| e.job.status.is_active())
            .count()
    }

    /// Cancel every active job (shutdown)
    pub async fn cancel_all(&self) {
        let ids: Vec<String> = self
            .jobs
            .read()
            .await
            .iter()
            .filter(|(_, e)| e.job.status.is_active())
            .map(|(id, _)| id.clone())
            .collect();
        for id in ids {
            let _ = self.cancel_job(&id).await;
        }
    }
}
