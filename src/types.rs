use crate::admission::{InFlightUploads, UploadRateLimiter};
use crate::config::Config;
use crate::pipeline::Pipeline;
use serde::Serialize;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pipeline: Pipeline,
    pub upload_limiter: UploadRateLimiter,
    pub in_flight: InFlightUploads,
}

#[derive(Clone, Debug, Serialize)]
pub struct UploadAccepted {
    pub file_name: String,
    pub video_id: String,
    pub queue_size: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct QueueDepthResponse {
    pub queue_size: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct DeleteVideoResponse {
    pub video_id: String,
    pub message: String,
}
