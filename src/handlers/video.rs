use crate::admission::is_safe_file_name;
use crate::handlers::common::internal_err;
use crate::storage;
use crate::types::{AppState, DeleteVideoResponse};

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use tracing::info;

pub async fn delete_video(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteVideoResponse>, (StatusCode, String)> {
    if !is_safe_file_name(&id) {
        return Err((StatusCode::BAD_REQUEST, "invalid video id".to_string()));
    }

    let removed = storage::delete_video(&state.config.paths.convert_path, &id)
        .await
        .map_err(|e| internal_err(e.into()))?;

    if !removed {
        return Err((StatusCode::NOT_FOUND, format!("video {} not found", id)));
    }

    info!(video_id = %id, "video deleted");
    Ok(Json(DeleteVideoResponse {
        message: format!("video {} deleted", id),
        video_id: id,
    }))
}
