use crate::error::AdmissionError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

/// An upload being streamed to a hidden temporary file beside its final path.
pub struct PartialUpload {
    temp_path: PathBuf,
    dest: PathBuf,
    file: fs::File,
    written: u64,
    max_size: u64,
}

impl PartialUpload {
    pub async fn create(dest: &Path, max_size: u64) -> Result<Self, AdmissionError> {
        let dir = dest.parent().unwrap_or_else(|| Path::new("."));
        let temp_path = dir.join(format!(".{}.part", Uuid::new_v4()));
        let file = fs::File::create(&temp_path).await?;
        Ok(Self {
            temp_path,
            dest: dest.to_path_buf(),
            file,
            written: 0,
            max_size,
        })
    }

    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), AdmissionError> {
        let total = self.written + chunk.len() as u64;
        if total > self.max_size {
            return Err(AdmissionError::TooLarge {
                name: self.file_name(),
                max: self.max_size,
            });
        }
        self.file.write_all(chunk).await?;
        self.written = total;
        Ok(())
    }

    /// Move the finished upload into place and return its size. Never
    /// replaces an existing file; the partial file is removed either way.
    pub async fn commit(mut self) -> Result<u64, AdmissionError> {
        if let Err(e) = self.file.flush().await {
            self.discard().await;
            return Err(e.into());
        }
        if let Err(e) = self.file.sync_all().await {
            self.discard().await;
            return Err(e.into());
        }

        let linked = fs::hard_link(&self.temp_path, &self.dest).await;
        let (name, written) = (self.file_name(), self.written);
        self.discard().await;

        match linked {
            Ok(()) => {
                debug!(file_name = %name, bytes = written, "upload stored");
                Ok(written)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(AdmissionError::AlreadyExists(name))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn discard(self) {
        drop(self.file);
        if let Err(e) = fs::remove_file(&self.temp_path).await {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = ?self.temp_path, error = %e, "failed to remove partial upload");
            }
        }
    }

    fn file_name(&self) -> String {
        self.dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Remove a converted video's whole output directory. Returns `false` when
/// there was nothing to remove.
pub async fn delete_video(convert_root: &Path, video_id: &str) -> std::io::Result<bool> {
    let dir = convert_root.join(video_id);
    match fs::remove_dir_all(&dir).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
