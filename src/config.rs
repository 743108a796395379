use crate::job::Tier;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::warn;

const DEFAULT_CHECK_EVERY: Duration = Duration::from_secs(60 * 60);

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub video: VideoConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound for a single upload, in bytes.
    pub max_upload_size: u64,
    pub max_videos_per_hour: u32,
    pub max_video_name_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_upload_size: 500 * 1024 * 1024,
            max_videos_per_hour: 10,
            max_video_name_len: 64,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub upload_path: PathBuf,
    pub convert_path: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            upload_path: PathBuf::from("uploads"),
            convert_path: PathBuf::from("converted"),
        }
    }
}

/// Encoding parameters for one silent quality tier.
#[derive(Clone, Debug, Deserialize)]
pub struct TierConfig {
    pub width: i32,
    #[serde(default = "keep_aspect")]
    pub height: i32,
    pub crf: String,
    #[serde(default)]
    pub bitrate: Option<String>,
}

fn keep_aspect() -> i32 {
    -1
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub ffmpeg_path: String,
    /// Optional launcher the encoder runs under, e.g. `/usr/bin/firejail`.
    pub sandbox: Option<String>,
    pub codec: String,
    pub preset: Option<String>,
    pub threads: u32,
    pub container: String,
    pub audio_bitrate: String,
    pub segment_duration_secs: u32,
    /// Kill an encoder invocation after this many seconds. Unset means no limit.
    pub job_timeout_secs: Option<u64>,
    pub delete_source_after_conversion: bool,
    pub low: TierConfig,
    pub med: TierConfig,
    pub high: TierConfig,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            sandbox: None,
            codec: "libvpx-vp9".to_string(),
            preset: None,
            threads: 1,
            container: "webm".to_string(),
            audio_bitrate: "64k".to_string(),
            segment_duration_secs: 4,
            job_timeout_secs: None,
            delete_source_after_conversion: false,
            low: TierConfig {
                width: 640,
                height: -1,
                crf: "40".to_string(),
                bitrate: Some("500k".to_string()),
            },
            med: TierConfig {
                width: 1280,
                height: -1,
                crf: "34".to_string(),
                bitrate: Some("1000k".to_string()),
            },
            high: TierConfig {
                width: 1920,
                height: -1,
                crf: "31".to_string(),
                bitrate: Some("2000k".to_string()),
            },
        }
    }
}

impl VideoConfig {
    pub fn tier(&self, tier: Tier) -> &TierConfig {
        match tier {
            Tier::Low => &self.low,
            Tier::Med => &self.med,
            Tier::High => &self.high,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub enabled: bool,
    pub days_old: u64,
    /// Sweep interval in humantime notation ("1h", "30m").
    pub check_every: String,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            days_old: 7,
            check_every: "1h".to_string(),
        }
    }
}

impl RetentionConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.days_old.saturating_mul(24 * 60 * 60))
    }

    /// Falls back to one hour when the configured value does not parse.
    pub fn check_interval(&self) -> Duration {
        match humantime::parse_duration(&self.check_every) {
            Ok(d) if !d.is_zero() => d,
            Ok(_) => {
                warn!("retention.check_every is zero, using {:?}", DEFAULT_CHECK_EVERY);
                DEFAULT_CHECK_EVERY
            }
            Err(e) => {
                warn!(
                    value = %self.check_every,
                    error = %e,
                    "Error parsing retention.check_every, using default (1h)"
                );
                DEFAULT_CHECK_EVERY
            }
        }
    }
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Config =
            serde_yaml::from_str(content).context("Failed to parse config file")?;
        Ok(config)
    }
}
