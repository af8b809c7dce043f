//! Per-job detection/counting loop
//!
//! pull frame -> detect -> filter -> track/count -> publish progress,
//! until the source is exhausted, the job is cancelled, the duration
//! elapses, or the detector/source fails.

use super::storage::JobStorage;
use super::types::{progress_percent, Job, JobKind, JobResult, JobStatus};
use super::Registry;
use crate::counting_engine::{CountEvent, CountingEngine, TrackedObject};
use crate::detector::{filter_detections, DetectParams, Detector};
use crate::error::{Error, Result};
use crate::frame_source::{FrameSource, UploadDecoder, VideoInfo};
use crate::push_gateway::{PeopleCountMessage, PushGateway, PushMessage};
use crate::stream_manager::{StreamFrameSource, StreamManager};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Shared collaborators of every worker
#[derive(Clone)]
pub(super) struct WorkerContext {
    pub detector: Arc<dyn Detector>,
    pub decoder: Arc<dyn UploadDecoder>,
    pub streams: Arc<StreamManager>,
    pub push: Arc<PushGateway>,
    pub storage: JobStorage,
    pub push_interval: Duration,
}

/// Where a job's frames come from
pub(super) enum JobInput {
    Upload(PathBuf),
    Stream(StreamFrameSource),
}

/// Write access to one job entry, scoped to one run
#[derive(Clone)]
pub(super) struct JobHandle {
    pub registry: Registry,
    pub job_id: String,
    pub run_id: u64,
}

impl JobHandle {
    /// Mutate the job while it is active and still owned by this run
    async fn update(&self, f: impl FnOnce(&mut Job)) -> bool {
        let mut jobs = self.registry.write().await;
        match jobs.get_mut(&self.job_id) {
            Some(entry) if entry.run_id == self.run_id && entry.job.status.is_active() => {
                f(&mut entry.job);
                true
            }
            _ => false,
        }
    }

    /// Terminal transition. A job already cancelled by a caller keeps that
    /// status and only receives its partial result. Counters on the job are
    /// taken from the attached result so both agree, including the frame
    /// whose detection was in flight when the cancel landed.
    ///
    /// Returns the final status and whether the result was attached, or
    /// `None` if the job is gone or owned by another run.
    async fn finish(
        &self,
        status: JobStatus,
        error: Option<String>,
        result: &JobResult,
    ) -> Option<(JobStatus, bool)> {
        let mut jobs = self.registry.write().await;
        let entry = jobs
            .get_mut(&self.job_id)
            .filter(|e| e.run_id == self.run_id)?;
        let job = &mut entry.job;

        if job.status.is_active() {
            job.status = status;
            job.finished_at = Some(Utc::now());
            job.error_message = error;
            if status == JobStatus::Completed && job.kind == JobKind::Upload {
                job.progress = Some(100);
            }
        }

        let attach = matches!(job.status, JobStatus::Completed | JobStatus::Cancelled)
            && job.result.is_none();
        if attach {
            job.frames_processed = result.frames_processed;
            job.counts = result.aggregate.clone();
            job.result = Some(result.clone());
        }
        Some((job.status, attach))
    }

    async fn exists(&self) -> bool {
        self.registry
            .read()
            .await
            .get(&self.job_id)
            .is_some_and(|e| e.run_id == self.run_id)
    }

    /// Another active job is bound to the same stream
    async fn stream_shared(&self, stream_id: &str) -> bool {
        self.registry.read().await.values().any(|e| {
            e.job.job_id != self.job_id
                && e.job.status.is_active()
                && e.job.stream_id.as_deref() == Some(stream_id)
        })
    }
}

enum Ending {
    Exhausted,
    DurationElapsed,
    Cancelled,
}

pub(super) struct Worker {
    handle: JobHandle,
    kind: JobKind,
    input: Option<JobInput>,
    stream_id: Option<String>,
    engine: CountingEngine,
    params: DetectParams,
    sample_fps: Option<f64>,
    duration: Option<Duration>,
    cancel: watch::Receiver<bool>,
    ctx: WorkerContext,
    frames: u64,
    total_frames: Option<u64>,
    events: Vec<CountEvent>,
    video_info: Option<VideoInfo>,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        handle: JobHandle,
        kind: JobKind,
        input: JobInput,
        engine: CountingEngine,
        params: DetectParams,
        sample_fps: Option<f64>,
        duration: Option<Duration>,
        cancel: watch::Receiver<bool>,
        ctx: WorkerContext,
    ) -> Self {
        let stream_id = match &input {
            JobInput::Stream(source) => Some(source.stream_id().to_string()),
            JobInput::Upload(_) => None,
        };
        Self {
            handle,
            kind,
            input: Some(input),
            stream_id,
            engine,
            params,
            sample_fps,
            duration,
            cancel,
            ctx,
            frames: 0,
            total_frames: None,
            events: Vec::new(),
            video_info: None,
        }
    }

    pub(super) async fn run(mut self) {
        let started = std::time::Instant::now();
        let kind = self.kind;

        let claimed = self
            .handle
            .update(|job| {
                job.status = JobStatus::Processing;
                job.started_at = Some(Utc::now());
                if kind == JobKind::Upload {
                    job.progress = Some(0);
                }
            })
            .await;

        let outcome = if claimed {
            tracing::info!(
                job_id = %self.handle.job_id,
                kind = ?self.kind,
                boundaries = self.engine.boundaries().len(),
                "Job processing"
            );
            self.drive().await
        } else {
            Ok(Ending::Cancelled)
        };

        self.finish(outcome, started.elapsed()).await;
    }

    async fn drive(&mut self) -> Result<Ending> {
        let input = self
            .input
            .take()
            .ok_or_else(|| Error::Internal("job input already consumed".to_string()))?;

        let mut source: Box<dyn FrameSource> = match input {
            JobInput::Upload(path) => {
                let info = self.ctx.decoder.probe(&path).await?;
                let source = self.ctx.decoder.open(&path, &info, self.sample_fps).await?;
                self.total_frames = info
                    .expected_frames(self.sample_fps)
                    .or_else(|| source.total_frames());
                self.video_info = Some(info);
                let total = self.total_frames;
                self.handle.update(|job| job.total_frames = total).await;
                source
            }
            JobInput::Stream(source) => Box::new(source),
        };

        let deadline = self.duration.map(|d| Instant::now() + d);
        let mut last_push = Instant::now();

        loop {
            if *self.cancel.borrow() {
                return Ok(Ending::Cancelled);
            }

            let next = tokio::select! {
                biased;
                _ = self.cancel.changed() => return Ok(Ending::Cancelled),
                _ = wait_until(deadline) => return Ok(Ending::DurationElapsed),
                frame = source.next_frame() => frame?,
            };
            let Some(frame) = next else {
                return Ok(Ending::Exhausted);
            };

            let detections = self
                .ctx
                .detector
                .detect(&frame, &self.params)
                .await
                .map_err(|e| match e {
                    Error::Detector(_) => e,
                    other => Error::Detector(other.to_string()),
                })?;
            let detections = filter_detections(detections, &self.params);
            let outcome = self
                .engine
                .process_frame(frame.index, frame.captured_at, &detections);

            self.frames += 1;
            self.events.extend(outcome.events);

            let frames = self.frames;
            let counts = self.engine.aggregate().clone();
            let progress = self.total_frames.map(|t| progress_percent(frames, t));
            let owned = self
                .handle
                .update(|job| {
                    job.frames_processed = frames;
                    job.counts = counts;
                    if let Some(p) = progress {
                        job.progress = Some(job.progress.unwrap_or(0).max(p));
                    }
                })
                .await;
            if !owned {
                return Ok(Ending::Cancelled);
            }

            if self.kind == JobKind::Stream {
                let objects = self.engine.visible_objects();
                let due = !objects.is_empty() && last_push.elapsed() >= self.ctx.push_interval;
                if outcome.changed || due {
                    self.publish(objects).await;
                    last_push = Instant::now();
                }
            }
        }
    }

    async fn publish(&self, objects: Vec<TrackedObject>) {
        let Some(stream_id) = &self.stream_id else {
            return;
        };
        let message = PushMessage::PeopleCount(PeopleCountMessage::from_aggregate(
            &self.handle.job_id,
            self.engine.aggregate(),
            objects,
        ));
        self.ctx
            .push
            .publish_many(&[stream_id.as_str(), self.handle.job_id.as_str()], &message)
            .await;
    }

    async fn finish(mut self, outcome: Result<Ending>, elapsed: Duration) {
        let job_id = self.handle.job_id.clone();
        let (status, error) = match outcome {
            Ok(Ending::Exhausted) | Ok(Ending::DurationElapsed) => (JobStatus::Completed, None),
            Ok(Ending::Cancelled) => (JobStatus::Cancelled, None),
            Err(e) => (JobStatus::Failed, Some(e.to_string())),
        };

        let result = JobResult {
            job_id: job_id.clone(),
            aggregate: self.engine.aggregate().clone(),
            events: std::mem::take(&mut self.events),
            frames_processed: self.frames,
            total_frames: self.total_frames,
            processing_time_secs: elapsed.as_secs_f64(),
            video_info: self.video_info.take(),
        };

        match self.handle.finish(status, error.clone(), &result).await {
            Some((final_status, attached)) => {
                match final_status {
                    JobStatus::Failed => tracing::warn!(
                        job_id = %job_id,
                        error = error.as_deref().unwrap_or(""),
                        frames = self.frames,
                        "Job failed"
                    ),
                    _ => tracing::info!(
                        job_id = %job_id,
                        status = ?final_status,
                        entries = result.aggregate.entries,
                        exits = result.aggregate.exits,
                        frames = self.frames,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Job finished"
                    ),
                }
                if attached {
                    self.persist(&result).await;
                }
            }
            None => {
                tracing::debug!(job_id = %job_id, "Job removed before its run finished");
            }
        }

        if let Some(stream_id) = self.stream_id.clone() {
            self.publish(self.engine.visible_objects()).await;
            if !self.handle.stream_shared(&stream_id).await {
                let _ = self.ctx.streams.stop_stream(&stream_id).await;
            }
        }
    }

    async fn persist(&self, result: &JobResult) {
        let job_id = &self.handle.job_id;
        match self.ctx.storage.save_result(result).await {
            Ok(path) => {
                tracing::debug!(job_id = %job_id, path = %path.display(), "Job result saved");
                // deleted while writing
                if !self.handle.exists().await {
                    self.ctx.storage.purge(job_id, None).await;
                }
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Failed to persist job result");
            }
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => futures::future::pending::<()>().await,
    }
}
