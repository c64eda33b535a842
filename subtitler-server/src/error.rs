use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::warn;

/// Request failures, rendered as `{"detail": ...}` with a matching status.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("a file list and a client id are required")]
    MissingInput,

    #[error("unknown model size: {0}")]
    UnknownModel(String),

    #[error("file is outside the media library: {0}")]
    OutsideMediaRoot(String),

    #[error("not a file: {0}")]
    NotAFile(String),

    #[error("a batch is already running for this client; wait for it to finish or stop it first")]
    BatchActive,

    #[error("invalid request body: {0}")]
    BadBody(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingInput
            | Self::UnknownModel(_)
            | Self::OutsideMediaRoot(_)
            | Self::NotAFile(_)
            | Self::BadBody(_) => StatusCode::BAD_REQUEST,
            Self::BatchActive => StatusCode::CONFLICT,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        warn!(status = status.as_u16(), error = %self, "request rejected");
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}
