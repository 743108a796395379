//! Fake encoder used by the queue and pipeline tests.

use crate::error::EncodeError;
use crate::job::{Job, JobKind, Rendition};
use crate::transcoder::Transcoder;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Start,
    End,
}

#[derive(Clone, Debug)]
pub struct Event {
    pub video_id: String,
    pub rendition: Rendition,
    pub phase: Phase,
}

/// Records every job it is asked to run, optionally failing chosen renditions.
#[derive(Default)]
pub struct RecordingTranscoder {
    events: Mutex<Vec<Event>>,
    jobs: Mutex<Vec<Job>>,
    failing: HashSet<Rendition>,
    delay: Duration,
    write_outputs: bool,
    running: AtomicUsize,
    max_running: AtomicUsize,
    // video id -> whether the no-audio marker existed when its manifest job started
    marker_at_manifest: Mutex<HashMap<String, bool>>,
}

impl RecordingTranscoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay_ms(mut self, ms: u64) -> Self {
        self.delay = Duration::from_millis(ms);
        self
    }

    pub fn failing(mut self, rendition: Rendition) -> Self {
        self.failing.insert(rendition);
        self
    }

    /// Create an empty destination file for every successful job.
    pub fn writing_outputs(mut self) -> Self {
        self.write_outputs = true;
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn events_for(&self, video_id: &str) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.video_id == video_id)
            .collect()
    }

    pub fn starts(&self) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.phase == Phase::Start)
            .collect()
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.jobs.lock().clone()
    }

    pub fn manifest_job(&self, video_id: &str) -> Option<Job> {
        self.jobs()
            .into_iter()
            .find(|j| j.video_id == video_id && j.rendition() == Rendition::Manifest)
    }

    pub fn marker_seen_by_manifest(&self, video_id: &str) -> Option<bool> {
        self.marker_at_manifest.lock().get(video_id).copied()
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    fn record(&self, job: &Job, phase: Phase) {
        self.events.lock().push(Event {
            video_id: job.video_id.clone(),
            rendition: job.rendition(),
            phase,
        });
    }
}

#[async_trait]
impl Transcoder for RecordingTranscoder {
    async fn run(&self, job: &Job) -> Result<(), EncodeError> {
        self.record(job, Phase::Start);
        self.jobs.lock().push(job.clone());
        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now_running, Ordering::SeqCst);

        if let JobKind::Manifest { .. } = job.kind {
            let marker = job
                .destination
                .with_file_name(format!("{}noaudio.txt", job.video_id));
            self.marker_at_manifest
                .lock()
                .insert(job.video_id.clone(), marker.exists());
        }

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let result = if self.failing.contains(&job.rendition()) {
            Err(EncodeError::Failed {
                exit_code: Some(1),
                stderr: "forced failure".to_string(),
            })
        } else if self.write_outputs {
            tokio::fs::write(&job.destination, b"")
                .await
                .map_err(EncodeError::from)
        } else {
            Ok(())
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        self.record(job, Phase::End);
        result
    }
}
