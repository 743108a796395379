//! Error types for the transcoding pipeline and upload admission.

use std::path::PathBuf;
use thiserror::Error;

/// Failure of a single external encoder invocation.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("encoder exited with status {}: {stderr}", exit_status(.exit_code))]
    Failed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("encoder timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn exit_status(code: &Option<i32>) -> String {
    code.map_or_else(|| "signal".to_string(), |c| c.to_string())
}

/// Errors surfaced by a coordinator run. Only `Setup` aborts the run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to create output directory {path:?}: {source}")]
    Setup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("manifest for {video_id} was not produced: {message}")]
    Manifest { video_id: String, message: String },

    #[error("cleanup of {path:?} failed: {source}")]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Reasons an upload is turned away before it reaches the pipeline.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error(
        "Invalid file name: either it contains invalid characters or it's longer than {max_len} characters"
    )]
    InvalidName { max_len: usize },

    #[error("Can't upload more than {max} videos per hour")]
    RateLimited { max: u32 },

    #[error("File already exists: {0}")]
    AlreadyExists(String),

    #[error("The uploaded file is too big: {name}. Max size allowed: {max}")]
    TooLarge { name: String, max: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
