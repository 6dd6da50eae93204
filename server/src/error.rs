use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chime_core::{ChimeError, ComposeError, QueueError};
use serde::Serialize;
use thiserror::Error;

/// API Error types
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Unable to generate audio: {0}")]
    Compose(String),

    #[error("Playback error: {0}")]
    Playback(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl From<ChimeError> for ApiError {
    fn from(e: ChimeError) -> Self {
        match e {
            ChimeError::Queue(QueueError::Timeout(_)) => ApiError::Timeout(e.to_string()),
            ChimeError::Compose(ComposeError::NoAudio | ComposeError::ZeroDuration) => {
                ApiError::Compose(e.to_string())
            }
            ChimeError::Playback(_) => ApiError::Playback(e.to_string()),
            other => ApiError::InternalError(other.to_string()),
        }
    }
}

/// Error response structure
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Timeout(msg) => {
                tracing::warn!("Request timed out: {}", msg);
                (StatusCode::GATEWAY_TIMEOUT, msg)
            }
            ApiError::Compose(msg) => {
                tracing::error!("Composition failed: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
            ApiError::Playback(msg) => {
                tracing::error!("Playback failed: {}", msg);
                (StatusCode::BAD_GATEWAY, msg)
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(ErrorResponse {
            error: error_message,
            code: status.as_u16(),
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn status_of(e: ChimeError) -> StatusCode {
        ApiError::from(e).into_response().status()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_of(QueueError::Timeout(Duration::from_secs(1)).into()),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status_of(ComposeError::NoAudio.into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(chime_core::PlaybackError::ServiceNotFound.into()),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::InvalidInput("x".into()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
    }
}
