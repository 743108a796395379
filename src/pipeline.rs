//! Turns one uploaded file into its full rendition set.
//!
//! Stages run in order: fallback rendition and thumbnail, then the silent
//! tiers and standalone audio, then the manifest. Each stage starts only after
//! every job of the previous one has finished, successfully or not. Jobs inside
//! a stage have no ordering among themselves.

use crate::barrier::StageBarrier;
use crate::config::Config;
use crate::error::PipelineError;
use crate::job::{Job, JOBS_PER_SUBMISSION, OutputLayout, Rendition, Tier};
use crate::manifest::{RenditionStatus, manifest_job};
use crate::queue::{QueueDepth, WorkQueue};
use crate::transcoder::Transcoder;
use parking_lot::Mutex;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Clone, Debug)]
pub struct ConversionReport {
    pub video_id: String,
    pub status: RenditionStatus,
    pub manifest_written: bool,
    pub intermediates_pruned: bool,
}

#[derive(Clone)]
pub struct Pipeline {
    config: Arc<Config>,
    queue: WorkQueue,
}

impl Pipeline {
    pub fn new(config: Arc<Config>, transcoder: Arc<dyn Transcoder>) -> Self {
        Self {
            config,
            queue: WorkQueue::new(transcoder, QueueDepth::default()),
        }
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.depth().get()
    }

    /// Start converting in the background and return immediately.
    pub fn submit(
        &self,
        source: PathBuf,
        video_id: String,
    ) -> JoinHandle<Result<ConversionReport, PipelineError>> {
        let pipeline = self.clone();
        tokio::spawn(async move {
            let result = pipeline.convert(&source, &video_id).await;
            match &result {
                Ok(report) => info!(
                    video_id = %report.video_id,
                    failed_jobs = report.status.failures().count(),
                    with_audio = report.status.succeeded(Rendition::Audio),
                    manifest_written = report.manifest_written,
                    intermediates_pruned = report.intermediates_pruned,
                    "conversion finished"
                ),
                Err(e) => error!(video_id = %video_id, error = %e, "conversion aborted"),
            }
            result
        })
    }

    pub async fn convert(
        &self,
        source: &Path,
        video_id: &str,
    ) -> Result<ConversionReport, PipelineError> {
        let video = &self.config.video;
        let layout = OutputLayout::new(&self.config.paths.convert_path, video_id, &video.container);

        fs::create_dir(layout.dir())
            .await
            .map_err(|source| PipelineError::Setup {
                path: layout.dir().to_path_buf(),
                source,
            })?;

        self.queue.depth().add(JOBS_PER_SUBMISSION);
        self.queue.ensure_started();
        info!(video_id = %video_id, source = ?source, "conversion started");

        let status = Arc::new(Mutex::new(RenditionStatus::default()));

        let fast = vec![Job::fallback(&layout, source, video), Job::thumbnail(&layout, source)];
        self.run_stage("fast", fast, &status).await;

        let mut full: Vec<Job> = Tier::ALL
            .iter()
            .map(|tier| Job::silent(&layout, source, video, *tier))
            .collect();
        full.push(Job::audio_extraction(&layout, source, video));
        self.run_stage("full", full, &status).await;

        let snapshot = status.lock().clone();
        let manifest = manifest_job(&layout, source, &snapshot, video).await;
        let manifest_outcome = self.queue.submit(manifest).await;
        let manifest_written = manifest_outcome.is_success();
        status.lock().record(Rendition::Manifest, manifest_outcome);

        if !manifest_written {
            let err = PipelineError::Manifest {
                video_id: video_id.to_string(),
                message: "packager failed, renditions kept".to_string(),
            };
            error!(error = %err, "manifest missing");
        }

        let intermediates_pruned = manifest_written && prune_intermediates(&layout).await;

        if video.delete_source_after_conversion {
            if let Err(e) = fs::remove_file(source).await {
                let err = PipelineError::Cleanup {
                    path: source.to_path_buf(),
                    source: e,
                };
                warn!(error = %err, "could not delete source");
            }
        }

        let status = status.lock().clone();
        Ok(ConversionReport {
            video_id: video_id.to_string(),
            status,
            manifest_written,
            intermediates_pruned,
        })
    }

    /// Submit every job of a stage concurrently and wait until all have finished.
    async fn run_stage(
        &self,
        stage: &'static str,
        jobs: Vec<Job>,
        status: &Arc<Mutex<RenditionStatus>>,
    ) {
        let barrier = Arc::new(StageBarrier::new(jobs.len()));

        for job in jobs {
            let queue = self.queue.clone();
            let barrier = barrier.clone();
            let status = status.clone();
            tokio::spawn(async move {
                let rendition = job.rendition();
                let outcome = queue.submit(job).await;
                status.lock().record(rendition, outcome);
                barrier.arrive();
            });
        }

        debug!(stage, pending = barrier.remaining(), "stage submitted");
        barrier.wait().await;
        info!(stage, "stage complete");
    }
}

/// Remove the per-tier files the packager has already copied into its segments.
async fn prune_intermediates(layout: &OutputLayout) -> bool {
    let mut clean = true;
    for path in layout.intermediates() {
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                clean = false;
                let err = PipelineError::Cleanup { path, source: e };
                warn!(error = %err, "could not remove intermediate rendition");
            }
        }
    }
    clean
}
