mod admission;
mod barrier;
mod config;
mod error;
mod handlers;
mod job;
mod manifest;
mod pipeline;
mod queue;
mod storage;
mod sweeper;
#[cfg(test)]
mod test_support;
mod transcoder;
mod types;

use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::{
    Router,
    routing::{delete, get, post},
};
use config::Config;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::fs;
use tower_http::services::ServeDir;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use admission::{InFlightUploads, UploadRateLimiter};
use pipeline::Pipeline;
use transcoder::FfmpegTranscoder;
use types::AppState;

const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60 * 60);

// Multipart framing on top of the largest accepted file.
const BODY_LIMIT_SLACK: u64 = 1024 * 1024;

fn app(state: AppState) -> Router {
    let body_limit = state
        .config
        .server
        .max_upload_size
        .saturating_add(BODY_LIMIT_SLACK);
    let body_limit = usize::try_from(body_limit).unwrap_or(usize::MAX);

    let api_routes = Router::new()
        .route("/upload", post(handlers::upload_video))
        .route("/queue", get(handlers::get_queue))
        .route("/videos/{id}", delete(handlers::delete_video));

    Router::new()
        .nest("/api", api_routes)
        .nest_service("/converted", ServeDir::new(&state.config.paths.convert_path))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tubecast=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::load("config.yml").await?);

    for dir in [&config.paths.upload_path, &config.paths.convert_path] {
        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {:?}", dir))?;
    }

    let transcoder = Arc::new(FfmpegTranscoder::new(config.video.clone()));
    let pipeline = Pipeline::new(config.clone(), transcoder);

    sweeper::spawn_retention_task(config.clone());

    let upload_limiter = UploadRateLimiter::new();
    // Spawn hourly reset for the upload quota
    let limiter_clone = upload_limiter.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(RATE_LIMIT_WINDOW).await;
            limiter_clone.reset_window().await;
        }
    });

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server.host / server.port")?;

    let state = AppState {
        config,
        pipeline,
        upload_limiter,
        in_flight: InFlightUploads::new(),
    };

    info!("listening on {}", addr);
    axum::serve(tokio::net::TcpListener::bind(addr).await?, app(state))
        .await
        .context("server error")?;

    Ok(())
}
