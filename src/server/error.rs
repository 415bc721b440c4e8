use crate::error::Error;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
}

impl ErrorBody {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetails {
                code: code.into(),
                message: message.into(),
            },
        }
    }
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::RateLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Http(_) | Self::Api { .. } | Self::Parse(_) => StatusCode::BAD_GATEWAY,
            Self::MissingCredentials { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Config(_) | Self::Cache(_) | Self::Template(_) | Self::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.to_string();
        if status.is_server_error() {
            tracing::error!(error = %message, code = self.code(), status = status.as_u16(), "server error");
        } else {
            tracing::warn!(error = %message, code = self.code(), status = status.as_u16(), "client error");
        }
        (status, Json(ErrorBody::new(self.code(), message))).into_response()
    }
}

/// JSON 404 for unmatched routes.
pub async fn not_found() -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody::new("NOT_FOUND", "no such route")),
    )
}
