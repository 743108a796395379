//! Job descriptors and the per-video output layout.

use crate::config::VideoConfig;
use std::fmt;
use std::path::{Path, PathBuf};

/// Seek offset for the thumbnail frame.
pub const THUMBNAIL_SEEK: &str = "00:00:01";
pub const THUMBNAIL_SIZE: FrameSize = FrameSize {
    width: 640,
    height: 480,
};

/// Fallback rendition plus thumbnail.
pub const FAST_STAGE_JOBS: usize = 2;
/// One silent rendition per tier plus the standalone audio track.
pub const FULL_STAGE_JOBS: usize = Tier::ALL.len() + 1;
pub const MANIFEST_JOBS: usize = 1;
/// Queue depth added for each accepted video.
pub const JOBS_PER_SUBMISSION: usize = FAST_STAGE_JOBS + FULL_STAGE_JOBS + MANIFEST_JOBS;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Tier {
    Low,
    Med,
    High,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Low, Tier::Med, Tier::High];

    pub fn prefix(self) -> &'static str {
        match self {
            Tier::Low => "low",
            Tier::Med => "med",
            Tier::High => "high",
        }
    }
}

/// Identifies one output of a pipeline run; key of the status record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Rendition {
    Fallback,
    Thumbnail,
    Silent(Tier),
    Audio,
    Manifest,
}

impl fmt::Display for Rendition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rendition::Fallback => f.write_str("fallback"),
            Rendition::Thumbnail => f.write_str("thumbnail"),
            Rendition::Silent(tier) => write!(f, "{}", tier.prefix()),
            Rendition::Audio => f.write_str("audio"),
            Rendition::Manifest => f.write_str("manifest"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameSize {
    pub width: i32,
    pub height: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestInput {
    pub path: PathBuf,
    pub track: TrackKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobKind {
    /// Low quality rendition that keeps its audio, playable before the manifest exists.
    Fallback,
    Thumbnail,
    Silent(Tier),
    AudioExtraction {
        /// Written when extraction fails.
        sentinel: PathBuf,
    },
    Manifest {
        inputs: Vec<ManifestInput>,
        segment_duration_secs: u32,
    },
}

impl JobKind {
    pub fn rendition(&self) -> Rendition {
        match self {
            JobKind::Fallback => Rendition::Fallback,
            JobKind::Thumbnail => Rendition::Thumbnail,
            JobKind::Silent(tier) => Rendition::Silent(*tier),
            JobKind::AudioExtraction { .. } => Rendition::Audio,
            JobKind::Manifest { .. } => Rendition::Manifest,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Job {
    pub video_id: String,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub crf: Option<String>,
    pub bitrate: Option<String>,
    pub size: Option<FrameSize>,
    pub kind: JobKind,
}

impl Job {
    pub fn fallback(layout: &OutputLayout, source: &Path, video: &VideoConfig) -> Self {
        let tier = video.tier(Tier::Low);
        Self {
            video_id: layout.video_id().to_string(),
            source: source.to_path_buf(),
            destination: layout.fallback(),
            crf: Some(tier.crf.clone()),
            bitrate: None,
            size: Some(FrameSize {
                width: tier.width,
                height: tier.height,
            }),
            kind: JobKind::Fallback,
        }
    }

    pub fn thumbnail(layout: &OutputLayout, source: &Path) -> Self {
        Self {
            video_id: layout.video_id().to_string(),
            source: source.to_path_buf(),
            destination: layout.thumbnail(),
            crf: None,
            bitrate: None,
            size: Some(THUMBNAIL_SIZE),
            kind: JobKind::Thumbnail,
        }
    }

    pub fn silent(layout: &OutputLayout, source: &Path, video: &VideoConfig, tier: Tier) -> Self {
        let tier_cfg = video.tier(tier);
        Self {
            video_id: layout.video_id().to_string(),
            source: source.to_path_buf(),
            destination: layout.silent(tier),
            crf: Some(tier_cfg.crf.clone()),
            bitrate: tier_cfg.bitrate.clone(),
            size: Some(FrameSize {
                width: tier_cfg.width,
                height: tier_cfg.height,
            }),
            kind: JobKind::Silent(tier),
        }
    }

    pub fn audio_extraction(layout: &OutputLayout, source: &Path, video: &VideoConfig) -> Self {
        Self {
            video_id: layout.video_id().to_string(),
            source: source.to_path_buf(),
            destination: layout.audio(),
            crf: None,
            bitrate: Some(video.audio_bitrate.clone()),
            size: None,
            kind: JobKind::AudioExtraction {
                sentinel: layout.sentinel(),
            },
        }
    }

    pub fn rendition(&self) -> Rendition {
        self.kind.rendition()
    }
}

/// File names inside `<convert_root>/<video_id>/`.
#[derive(Clone, Debug)]
pub struct OutputLayout {
    dir: PathBuf,
    video_id: String,
    ext: String,
}

impl OutputLayout {
    pub fn new(convert_root: &Path, video_id: &str, ext: &str) -> Self {
        Self {
            dir: convert_root.join(video_id),
            video_id: video_id.to_string(),
            ext: ext.to_string(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    pub fn fallback(&self) -> PathBuf {
        self.dir.join(format!("low_{}_audio.{}", self.video_id, self.ext))
    }

    pub fn thumbnail(&self) -> PathBuf {
        self.dir.join("output.jpeg")
    }

    pub fn silent(&self, tier: Tier) -> PathBuf {
        self.dir.join(format!("{}_{}.{}", tier.prefix(), self.video_id, self.ext))
    }

    pub fn audio(&self) -> PathBuf {
        self.dir.join(format!("audio_{}.{}", self.video_id, self.ext))
    }

    pub fn sentinel(&self) -> PathBuf {
        self.dir.join(format!("{}noaudio.txt", self.video_id))
    }

    pub fn manifest(&self) -> PathBuf {
        self.dir.join("output.mpd")
    }

    /// Files the packager copies into its own segments.
    pub fn intermediates(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = Tier::ALL.iter().map(|t| self.silent(*t)).collect();
        files.push(self.audio());
        files
    }
}
