//! Decides whether an upload may enter the pipeline.

use crate::config::Config;
use crate::error::AdmissionError;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::debug;

static SAFE_FILE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9_-]+(\.[a-zA-Z0-9_]+)*$").expect("file name pattern is valid")
});

/// Counts uploads accepted in the current hour window.
#[derive(Clone, Default)]
pub struct UploadRateLimiter {
    accepted: Arc<RwLock<u32>>,
}

impl UploadRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more upload unless `max` have already been accepted this window.
    pub async fn check_and_increment(&self, max: u32) -> Result<(), AdmissionError> {
        let mut accepted = self.accepted.write().await;
        if *accepted >= max {
            return Err(AdmissionError::RateLimited { max });
        }
        *accepted += 1;
        Ok(())
    }

    /// Give back a slot taken by an upload that never made it to disk.
    pub async fn release(&self) {
        let mut accepted = self.accepted.write().await;
        *accepted = accepted.saturating_sub(1);
    }

    pub async fn reset_window(&self) {
        *self.accepted.write().await = 0;
    }

    pub async fn accepted(&self) -> u32 {
        *self.accepted.read().await
    }
}

/// Video ids with an upload or conversion still running.
#[derive(Clone, Debug, Default)]
pub struct InFlightUploads {
    ids: Arc<Mutex<HashSet<String>>>,
}

impl InFlightUploads {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `video_id` until the returned guard is dropped.
    pub fn reserve(&self, video_id: &str) -> Option<Reservation> {
        if !self.ids.lock().insert(video_id.to_string()) {
            return None;
        }
        Some(Reservation {
            ids: self.ids.clone(),
            video_id: video_id.to_string(),
        })
    }
}

#[derive(Debug)]
pub struct Reservation {
    ids: Arc<Mutex<HashSet<String>>>,
    video_id: String,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.ids.lock().remove(&self.video_id);
    }
}

pub fn is_safe_file_name(name: &str) -> bool {
    SAFE_FILE_NAME.is_match(name)
}

/// Logical id of an upload: its file name without the final extension.
pub fn video_id_for(file_name: &str) -> String {
    Path::new(file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string())
}

#[derive(Debug)]
pub struct Admission {
    pub file_name: String,
    pub video_id: String,
    pub source_path: PathBuf,
    /// Keeps other uploads of the same video id out while this one is alive.
    pub reservation: Reservation,
}

/// Name checks first, then collisions, then the hourly quota, so a rejected
/// upload never consumes a slot.
pub async fn admit(
    file_name: &str,
    config: &Config,
    limiter: &UploadRateLimiter,
    in_flight: &InFlightUploads,
) -> Result<Admission, AdmissionError> {
    let max_len = config.server.max_video_name_len;
    if file_name.len() > max_len || !is_safe_file_name(file_name) {
        return Err(AdmissionError::InvalidName { max_len });
    }

    let video_id = video_id_for(file_name);
    let reservation = in_flight
        .reserve(&video_id)
        .ok_or_else(|| AdmissionError::AlreadyExists(video_id.clone()))?;

    let source_path = config.paths.upload_path.join(file_name);
    if fs::try_exists(&source_path).await? {
        return Err(AdmissionError::AlreadyExists(file_name.to_string()));
    }
    if fs::try_exists(config.paths.convert_path.join(&video_id)).await? {
        return Err(AdmissionError::AlreadyExists(video_id));
    }

    limiter
        .check_and_increment(config.server.max_videos_per_hour)
        .await?;

    debug!(file_name, video_id = %video_id, "upload admitted");
    Ok(Admission {
        file_name: file_name.to_string(),
        video_id,
        source_path,
        reservation,
    })
}
