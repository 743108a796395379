use crate::config::VideoConfig;
use crate::error::EncodeError;
use crate::job::{FrameSize, Job, JobKind, THUMBNAIL_SEEK, TrackKind};
use crate::queue::QueueDepth;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::{fs, process::Command};
use tracing::{error, info, warn};

/// Keyframe interval for DASH-aligned renditions.
const GOP: &str = "120";

/// Runs the external process behind one job.
#[async_trait]
pub trait Transcoder: Send + Sync + 'static {
    async fn run(&self, job: &Job) -> Result<(), EncodeError>;
}

/// How a finished job ended. Every job ends in one of these, never in a panic or abort.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed(String),
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Succeeded)
    }
}

/// Run a job, account for it in the queue depth, and turn a failed audio
/// extraction into its sentinel marker.
pub async fn invoke(transcoder: &dyn Transcoder, job: &Job, depth: &QueueDepth) -> JobOutcome {
    let outcome = match transcoder.run(job).await {
        Ok(()) => {
            info!(
                video_id = %job.video_id,
                rendition = %job.rendition(),
                source = ?job.source,
                destination = ?job.destination,
                "job finished"
            );
            JobOutcome::Succeeded
        }
        Err(e) => {
            error!(
                video_id = %job.video_id,
                rendition = %job.rendition(),
                error = %e,
                "job failed"
            );
            if let JobKind::AudioExtraction { sentinel } = &job.kind {
                write_sentinel(sentinel, &e).await;
            }
            JobOutcome::Failed(e.to_string())
        }
    };

    depth.complete_one();
    outcome
}

async fn write_sentinel(sentinel: &Path, cause: &EncodeError) {
    if let Err(e) = fs::write(sentinel, format!("{}\n", cause)).await {
        error!(path = ?sentinel, error = %e, "Failed to write no-audio marker");
    } else {
        warn!(path = ?sentinel, "audio extraction failed, manifest will be video only");
    }
}

pub struct FfmpegTranscoder {
    video: VideoConfig,
}

impl FfmpegTranscoder {
    pub fn new(video: VideoConfig) -> Self {
        Self { video }
    }

    /// Program to spawn and its arguments, with the sandbox launcher in front when configured.
    pub fn command_line(&self, job: &Job) -> (String, Vec<String>) {
        let args = build_args(job, &self.video);
        match &self.video.sandbox {
            Some(sandbox) => {
                let mut wrapped = Vec::with_capacity(args.len() + 1);
                wrapped.push(self.video.ffmpeg_path.clone());
                wrapped.extend(args);
                (sandbox.clone(), wrapped)
            }
            None => (self.video.ffmpeg_path.clone(), args),
        }
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn run(&self, job: &Job) -> Result<(), EncodeError> {
        let (program, args) = self.command_line(job);
        tracing::debug!("Running: {} {}", program, args.join(" "));

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match self.video.job_timeout_secs {
            Some(secs) => match tokio::time::timeout(Duration::from_secs(secs), cmd.output()).await
            {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        video_id = %job.video_id,
                        "encoder timed out after {} seconds, killing process", secs
                    );
                    return Err(EncodeError::Timeout(secs));
                }
            },
            None => cmd.output().await,
        }
        .map_err(|source| EncodeError::Spawn {
            program: program.clone(),
            source,
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(EncodeError::Failed {
                exit_code: output.status.code(),
                stderr,
            });
        }

        Ok(())
    }
}

fn scale(size: Option<FrameSize>) -> Option<String> {
    size.map(|s| format!("scale={}:{}", s.width, s.height))
}

#[derive(Default)]
struct ArgList(Vec<String>);

impl ArgList {
    fn arg(&mut self, arg: impl Into<String>) -> &mut Self {
        self.0.push(arg.into());
        self
    }

    fn opt(&mut self, flag: &str, value: impl Into<String>) -> &mut Self {
        self.arg(flag).arg(value)
    }

    fn opt_if(&mut self, flag: &str, value: Option<impl Into<String>>) -> &mut Self {
        if let Some(value) = value {
            self.opt(flag, value);
        }
        self
    }

    fn input(&mut self, path: &Path) -> &mut Self {
        self.opt("-i", path.to_string_lossy())
    }
}

/// ffmpeg arguments for a job, without the program name.
pub fn build_args(job: &Job, video: &VideoConfig) -> Vec<String> {
    let mut args = ArgList::default();
    args.opt("-loglevel", "error").arg("-y");
    let webm_dash = video.container == "webm";

    match &job.kind {
        JobKind::Fallback => {
            args.input(&job.source)
                .opt("-map_metadata", "-1")
                .opt("-threads", video.threads.to_string())
                .opt("-c:v", video.codec.as_str())
                .opt("-b:v", "0")
                .opt_if("-crf", job.crf.as_deref())
                .opt_if("-preset", video.preset.as_deref())
                .opt_if("-vf", scale(job.size))
                .opt("-c:a", "libopus")
                .opt("-b:a", video.audio_bitrate.as_str());
        }
        JobKind::Thumbnail => {
            args.opt("-ss", THUMBNAIL_SEEK)
                .input(&job.source)
                .opt("-map_metadata", "-1")
                .opt("-vframes", "1")
                .opt_if("-s", job.size.map(|s| format!("{}x{}", s.width, s.height)))
                .opt("-f", "image2");
        }
        JobKind::Silent(_) => {
            args.input(&job.source)
                .opt("-map_metadata", "-1")
                .opt("-threads", video.threads.to_string())
                .opt("-c:v", video.codec.as_str())
                .opt_if("-crf", job.crf.as_deref())
                .opt("-b:v", job.bitrate.as_deref().unwrap_or("0"))
                .opt_if("-preset", video.preset.as_deref())
                .opt_if("-vf", scale(job.size))
                .opt("-g", GOP)
                .opt("-keyint_min", GOP)
                .arg("-an")
                .opt("-f", video.container.as_str());
            if webm_dash {
                args.opt("-dash", "1");
            }
        }
        JobKind::AudioExtraction { .. } => {
            args.input(&job.source)
                .opt("-map_metadata", "-1")
                .opt("-threads", video.threads.to_string())
                .arg("-vn")
                .opt("-c:a", "libopus")
                .opt_if("-b:a", job.bitrate.as_deref())
                .opt("-f", video.container.as_str());
            if webm_dash {
                args.opt("-dash", "1");
            }
        }
        JobKind::Manifest {
            inputs,
            segment_duration_secs,
        } => {
            for input in inputs {
                args.input(&input.path);
            }
            for index in 0..inputs.len() {
                args.opt("-map", format!("{}:0", index));
            }
            let has_audio = inputs.iter().any(|i| i.track == TrackKind::Audio);
            let sets = if has_audio {
                "id=0,streams=v id=1,streams=a"
            } else {
                "id=0,streams=v"
            };
            args.opt("-c", "copy")
                .opt("-f", "dash")
                .opt("-seg_duration", segment_duration_secs.to_string())
                .opt("-adaptation_sets", sets);
        }
    }

    args.arg(job.destination.to_string_lossy());
    args.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{ManifestInput, OutputLayout, Tier};
    use std::path::PathBuf;

    fn layout() -> OutputLayout {
        OutputLayout::new(Path::new("/srv/converted"), "demo", "webm")
    }

    fn pair(args: &[String], flag: &str) -> Option<String> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1).cloned())
    }

    #[test]
    fn silent_rendition_drops_audio_and_scales() {
        let video = VideoConfig::default();
        let job = Job::silent(&layout(), Path::new("/srv/uploads/demo.mp4"), &video, Tier::Med);
        let args = build_args(&job, &video);

        assert!(args.contains(&"-an".to_string()));
        assert_eq!(pair(&args, "-vf").as_deref(), Some("scale=1280:-1"));
        assert_eq!(pair(&args, "-crf").as_deref(), Some("34"));
        assert_eq!(pair(&args, "-b:v").as_deref(), Some("1000k"));
        assert_eq!(pair(&args, "-dash").as_deref(), Some("1"));
        assert_eq!(
            args.last().map(String::as_str),
            Some("/srv/converted/demo/med_demo.webm")
        );
    }

    #[test]
    fn thumbnail_is_one_frame_at_one_second() {
        let video = VideoConfig::default();
        let job = Job::thumbnail(&layout(), Path::new("/srv/uploads/demo.mp4"));
        let args = build_args(&job, &video);

        assert_eq!(pair(&args, "-ss").as_deref(), Some("00:00:01"));
        assert_eq!(pair(&args, "-vframes").as_deref(), Some("1"));
        assert_eq!(pair(&args, "-s").as_deref(), Some("640x480"));
        assert_eq!(pair(&args, "-f").as_deref(), Some("image2"));
    }

    #[test]
    fn fallback_keeps_audio() {
        let video = VideoConfig::default();
        let job = Job::fallback(&layout(), Path::new("/srv/uploads/demo.mp4"), &video);
        let args = build_args(&job, &video);

        assert!(!args.contains(&"-an".to_string()));
        assert_eq!(pair(&args, "-c:a").as_deref(), Some("libopus"));
        assert_eq!(pair(&args, "-threads").as_deref(), Some("1"));
    }

    #[test]
    fn manifest_maps_every_input() {
        let video = VideoConfig::default();
        let job = Job {
            video_id: "demo".into(),
            source: PathBuf::from("/srv/uploads/demo.mp4"),
            destination: PathBuf::from("/srv/converted/demo/output.mpd"),
            crf: None,
            bitrate: None,
            size: None,
            kind: JobKind::Manifest {
                inputs: vec![
                    ManifestInput {
                        path: PathBuf::from("high.webm"),
                        track: TrackKind::Video,
                    },
                    ManifestInput {
                        path: PathBuf::from("audio.webm"),
                        track: TrackKind::Audio,
                    },
                ],
                segment_duration_secs: 4,
            },
        };
        let args = build_args(&job, &video);

        assert_eq!(args.iter().filter(|a| *a == "-i").count(), 2);
        assert!(args.contains(&"1:0".to_string()));
        assert_eq!(pair(&args, "-f").as_deref(), Some("dash"));
        assert_eq!(pair(&args, "-seg_duration").as_deref(), Some("4"));
        assert_eq!(
            pair(&args, "-adaptation_sets").as_deref(),
            Some("id=0,streams=v id=1,streams=a")
        );
    }

    #[test]
    fn sandbox_wraps_the_encoder() {
        let video = VideoConfig {
            sandbox: Some("/usr/bin/firejail".into()),
            ..VideoConfig::default()
        };
        let transcoder = FfmpegTranscoder::new(video);
        let job = Job::thumbnail(&layout(), Path::new("in.mp4"));
        let (program, args) = transcoder.command_line(&job);

        assert_eq!(program, "/usr/bin/firejail");
        assert_eq!(args.first().map(String::as_str), Some("ffmpeg"));
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let video = VideoConfig {
            ffmpeg_path: "/nonexistent/ffmpeg-for-tests".into(),
            ..VideoConfig::default()
        };
        let transcoder = FfmpegTranscoder::new(video);
        let job = Job::thumbnail(&layout(), Path::new("in.mp4"));

        let err = transcoder.run(&job).await.unwrap_err();
        assert!(matches!(err, EncodeError::Spawn { .. }));
    }

    #[tokio::test]
    async fn failed_audio_leaves_a_marker_and_counts_down() {
        let dir = tempfile::tempdir().unwrap();
        let layout = OutputLayout::new(dir.path(), "demo", "webm");
        std::fs::create_dir(layout.dir()).unwrap();

        let video = VideoConfig {
            ffmpeg_path: "/nonexistent/ffmpeg-for-tests".into(),
            ..VideoConfig::default()
        };
        let transcoder = FfmpegTranscoder::new(video.clone());
        let depth = QueueDepth::default();
        depth.add(1);

        let job = Job::audio_extraction(&layout, Path::new("in.mp4"), &video);
        let outcome = invoke(&transcoder, &job, &depth).await;

        assert!(!outcome.is_success());
        assert_eq!(depth.get(), 0);
        assert!(layout.sentinel().exists());
    }

    /// Runs `script` through `sh` in place of ffmpeg; it receives the ffmpeg
    /// arguments as `$@`.
    fn scripted(dir: &Path, script: &str, timeout: Option<u64>) -> FfmpegTranscoder {
        let path = dir.join("fake-ffmpeg.sh");
        std::fs::write(&path, script).unwrap();
        FfmpegTranscoder::new(VideoConfig {
            sandbox: Some("sh".into()),
            ffmpeg_path: path.to_string_lossy().into_owned(),
            job_timeout_secs: timeout,
            ..VideoConfig::default()
        })
    }

    #[tokio::test]
    async fn hung_encoder_is_killed_after_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let transcoder = scripted(dir.path(), "sleep 30\n", Some(1));
        let job = Job::thumbnail(&layout(), Path::new("in.mp4"));

        let started = std::time::Instant::now();
        let err = transcoder.run(&job).await.unwrap_err();

        assert!(matches!(err, EncodeError::Timeout(1)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn nonzero_exit_carries_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let transcoder = scripted(dir.path(), "echo 'no audio stream' >&2\nexit 3\n", None);
        let job = Job::thumbnail(&layout(), Path::new("in.mp4"));

        let err = transcoder.run(&job).await.unwrap_err();
        match err {
            EncodeError::Failed { exit_code, stderr } => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(stderr, "no audio stream");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn quick_encoder_beats_the_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let transcoder = scripted(dir.path(), "exit 0\n", Some(5));
        let job = Job::thumbnail(&layout(), Path::new("in.mp4"));

        transcoder.run(&job).await.unwrap();
    }
}
