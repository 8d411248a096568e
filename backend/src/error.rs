use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Failures surfaced by the artifact lifecycle and the download path.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("source is {duration_seconds}s long, the limit is {limit_seconds}s")]
    SourceRejected {
        duration_seconds: u64,
        limit_seconds: u64,
    },

    #[error("extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("artifact not found: {0}")]
    NotFound(String),

    #[error("storage failure while {context}: {source}")]
    StorageFailure {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ServiceError>;

impl ServiceError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn storage(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::StorageFailure {
            context: context.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub code: Option<&'static str>,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            code: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
            code: Some("NOT_FOUND"),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
            code: None,
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(error: ServiceError) -> Self {
        match error {
            ServiceError::InvalidInput(message) => Self {
                code: Some("INVALID_INPUT"),
                ..Self::bad_request(message)
            },
            ServiceError::SourceRejected { limit_seconds, .. } => Self {
                code: Some("SOURCE_REJECTED"),
                ..Self::bad_request(format!(
                    "Videos longer than {} minutes cannot be downloaded.",
                    limit_seconds / 60
                ))
            },
            ServiceError::ExtractionFailed(message) => Self {
                code: Some("EXTRACTION_FAILED"),
                ..Self::bad_request(format!("Download error: {message}"))
            },
            ServiceError::NotFound(_) => Self::not_found("File not found."),
            error @ ServiceError::StorageFailure { .. } => {
                error!("Storage failure surfaced to client: {error}");
                Self {
                    code: Some("STORAGE_FAILURE"),
                    ..Self::internal("Server storage error.")
                }
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
            code: self.code,
        });

        (self.status, body).into_response()
    }
}
