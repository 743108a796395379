use axum::http::StatusCode;
use tracing::{error, warn};

use crate::error::AdmissionError;

pub fn internal_err(e: anyhow::Error) -> (StatusCode, String) {
    error!(error = ?e, "internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal server error".to_string(),
    )
}

pub fn admission_err(e: AdmissionError) -> (StatusCode, String) {
    let status = match &e {
        AdmissionError::InvalidName { .. } => StatusCode::BAD_REQUEST,
        AdmissionError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        AdmissionError::AlreadyExists(_) => StatusCode::CONFLICT,
        AdmissionError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        AdmissionError::Io(_) => return internal_err(e.into()),
    };
    warn!(error = %e, "upload rejected");
    (status, e.to_string())
}
