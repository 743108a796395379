//! Chooses the inputs of the DASH packaging job.

use crate::config::VideoConfig;
use crate::job::{Job, JobKind, ManifestInput, OutputLayout, Rendition, Tier, TrackKind};
use crate::transcoder::JobOutcome;
use std::collections::HashMap;
use std::path::Path;
use tokio::fs;
use tracing::debug;

/// Per-run record of how each rendition job ended.
#[derive(Clone, Debug, Default)]
pub struct RenditionStatus {
    outcomes: HashMap<Rendition, JobOutcome>,
}

impl RenditionStatus {
    pub fn record(&mut self, rendition: Rendition, outcome: JobOutcome) {
        self.outcomes.insert(rendition, outcome);
    }

    pub fn get(&self, rendition: Rendition) -> Option<&JobOutcome> {
        self.outcomes.get(&rendition)
    }

    pub fn succeeded(&self, rendition: Rendition) -> bool {
        self.get(rendition).is_some_and(JobOutcome::is_success)
    }

    pub fn failures(&self) -> impl Iterator<Item = (Rendition, &str)> {
        self.outcomes.iter().filter_map(|(r, o)| match o {
            JobOutcome::Failed(msg) => Some((*r, msg.as_str())),
            JobOutcome::Succeeded => None,
        })
    }
}

/// Whether the standalone audio track goes into the manifest.
///
/// The status record decides when it has an audio outcome. Without one, the
/// absence of the no-audio marker on disk means the track is usable.
pub async fn include_audio(layout: &OutputLayout, status: &RenditionStatus) -> bool {
    match status.get(Rendition::Audio) {
        Some(outcome) => outcome.is_success(),
        None => !fs::try_exists(layout.sentinel()).await.unwrap_or(false),
    }
}

/// Video tracks from highest to lowest tier, then the audio track if any.
pub fn manifest_inputs(layout: &OutputLayout, with_audio: bool) -> Vec<ManifestInput> {
    let mut inputs: Vec<ManifestInput> = Tier::ALL
        .iter()
        .rev()
        .map(|tier| ManifestInput {
            path: layout.silent(*tier),
            track: TrackKind::Video,
        })
        .collect();

    if with_audio {
        inputs.push(ManifestInput {
            path: layout.audio(),
            track: TrackKind::Audio,
        });
    }
    inputs
}

pub async fn manifest_job(
    layout: &OutputLayout,
    source: &Path,
    status: &RenditionStatus,
    video: &VideoConfig,
) -> Job {
    let with_audio = include_audio(layout, status).await;
    debug!(video_id = %layout.video_id(), with_audio, "assembling manifest job");

    Job {
        video_id: layout.video_id().to_string(),
        source: source.to_path_buf(),
        destination: layout.manifest(),
        crf: None,
        bitrate: None,
        size: None,
        kind: JobKind::Manifest {
            inputs: manifest_inputs(layout, with_audio),
            segment_duration_secs: video.segment_duration_secs,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video() -> VideoConfig {
        VideoConfig::default()
    }

    fn inputs_of(job: &Job) -> &[ManifestInput] {
        match &job.kind {
            JobKind::Manifest { inputs, .. } => inputs,
            other => panic!("not a manifest job: {:?}", other),
        }
    }

    #[tokio::test]
    async fn audio_included_after_success() {
        let dir = tempfile::tempdir().unwrap();
        let layout = OutputLayout::new(dir.path(), "demo", "webm");
        let mut status = RenditionStatus::default();
        status.record(Rendition::Audio, JobOutcome::Succeeded);

        let job = manifest_job(&layout, Path::new("demo.mp4"), &status, &video()).await;
        let inputs = inputs_of(&job);

        assert_eq!(inputs.len(), 4);
        assert_eq!(inputs[0].path, layout.silent(Tier::High));
        assert_eq!(inputs[2].path, layout.silent(Tier::Low));
        assert_eq!(inputs[3].track, TrackKind::Audio);
        assert_eq!(job.destination, layout.manifest());
    }

    #[tokio::test]
    async fn audio_dropped_after_failure() {
        let dir = tempfile::tempdir().unwrap();
        let layout = OutputLayout::new(dir.path(), "demo", "webm");
        let mut status = RenditionStatus::default();
        status.record(Rendition::Audio, JobOutcome::Failed("no audio stream".into()));

        let job = manifest_job(&layout, Path::new("demo.mp4"), &status, &video()).await;
        let inputs = inputs_of(&job);

        assert_eq!(inputs.len(), 3);
        assert!(inputs.iter().all(|i| i.track == TrackKind::Video));
    }

    #[tokio::test]
    async fn marker_on_disk_decides_without_a_record() {
        let dir = tempfile::tempdir().unwrap();
        let layout = OutputLayout::new(dir.path(), "demo", "webm");
        std::fs::create_dir(layout.dir()).unwrap();
        let status = RenditionStatus::default();

        assert!(include_audio(&layout, &status).await);

        std::fs::write(layout.sentinel(), b"").unwrap();
        assert!(!include_audio(&layout, &status).await);
    }

    #[test]
    fn failures_lists_only_failed_jobs() {
        let mut status = RenditionStatus::default();
        status.record(Rendition::Thumbnail, JobOutcome::Succeeded);
        status.record(Rendition::Silent(Tier::Med), JobOutcome::Failed("boom".into()));

        let failures: Vec<_> = status.failures().collect();
        assert_eq!(failures, vec![(Rendition::Silent(Tier::Med), "boom")]);
        assert!(status.succeeded(Rendition::Thumbnail));
        assert!(status.get(Rendition::Audio).is_none());
    }
}
