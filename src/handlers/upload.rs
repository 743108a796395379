use crate::admission::admit;
use crate::handlers::common::admission_err;
use crate::storage::PartialUpload;
use crate::types::{AppState, QueueDepthResponse, UploadAccepted};

use axum::{
    Json,
    extract::{Multipart, State},
    http::StatusCode,
};
use tracing::info;

const VIDEO_FIELD: &str = "video";

/// Accept one video upload, store it, and start its conversion in the background.
pub async fn upload_video(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadAccepted>), (StatusCode, String)> {
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| (e.status(), e.body_text()))?
    {
        if field.name() != Some(VIDEO_FIELD) {
            continue;
        }

        let file_name = field
            .file_name()
            .map(|s| s.to_string())
            .ok_or_else(|| (StatusCode::BAD_REQUEST, "missing file name".to_string()))?;

        let admission = admit(
            &file_name,
            &state.config,
            &state.upload_limiter,
            &state.in_flight,
        )
        .await
        .map_err(admission_err)?;

        let mut upload = match PartialUpload::create(
            &admission.source_path,
            state.config.server.max_upload_size,
        )
        .await
        {
            Ok(upload) => upload,
            Err(e) => {
                state.upload_limiter.release().await;
                return Err(admission_err(e));
            }
        };

        let streamed: Result<(), (StatusCode, String)> = async {
            while let Some(chunk) = field
                .chunk()
                .await
                .map_err(|e| (e.status(), e.body_text()))?
            {
                upload.write_chunk(&chunk).await.map_err(admission_err)?;
            }
            Ok(())
        }
        .await;

        if let Err(rejection) = streamed {
            upload.discard().await;
            state.upload_limiter.release().await;
            return Err(rejection);
        }

        let bytes = match upload.commit().await {
            Ok(bytes) => bytes,
            Err(e) => {
                state.upload_limiter.release().await;
                return Err(admission_err(e));
            }
        };

        let accepted_this_hour = state.upload_limiter.accepted().await;
        info!(
            file_name = %admission.file_name,
            video_id = %admission.video_id,
            bytes,
            accepted_this_hour,
            "upload stored, queueing conversion"
        );

        // The video id stays reserved until its conversion has finished.
        let conversion = state
            .pipeline
            .submit(admission.source_path, admission.video_id.clone());
        let reservation = admission.reservation;
        tokio::spawn(async move {
            let _ = conversion.await;
            drop(reservation);
        });

        return Ok((
            StatusCode::ACCEPTED,
            Json(UploadAccepted {
                file_name: admission.file_name,
                video_id: admission.video_id,
                queue_size: state.pipeline.queue_depth(),
            }),
        ));
    }

    Err((
        StatusCode::BAD_REQUEST,
        format!("missing file field '{}'", VIDEO_FIELD),
    ))
}

pub async fn get_queue(State(state): State<AppState>) -> Json<QueueDepthResponse> {
    Json(QueueDepthResponse {
        queue_size: state.pipeline.queue_depth(),
    })
}
