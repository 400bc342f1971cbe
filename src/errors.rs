use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::{fmt, io};
use thiserror::Error;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Validation(_) | PipelineError::Decode(_) => {
                AppError::bad_request(err.to_string())
            }
            PipelineError::Infrastructure(infra) => infra.into(),
            other => AppError::internal(other.to_string()),
        }
    }
}

impl From<InfraError> for AppError {
    fn from(err: InfraError) -> Self {
        match err {
            InfraError::BlobNotFound { .. } => AppError::not_found(err.to_string()),
            InfraError::InvalidKey(_) => AppError::bad_request(err.to_string()),
            other => AppError::internal(other.to_string()),
        }
    }
}

/// Failures raised by the storage, ledger and queue backends.
#[derive(Debug, Error)]
pub enum InfraError {
    #[error("object `{key}` not found in bucket `{bucket}`")]
    BlobNotFound { bucket: String, key: String },
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    #[error("corrupt ledger item `{pk}`/`{sk}`: {reason}")]
    CorruptItem {
        pk: String,
        sk: String,
        reason: String,
    },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl InfraError {
    /// Client-side faults (bad keys, unreadable rows) will fail the same way
    /// on every attempt.
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            InfraError::InvalidKey(_) | InfraError::CorruptItem { .. } | InfraError::Json(_)
        )
    }
}

pub type InfraResult<T> = Result<T, InfraError>;

/// Everything that can fail a single ingest request or queue message.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0}")]
    Validation(String),
    #[error("invalid base64 file content: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("malformed message body: {0}")]
    MalformedMessage(#[from] serde_json::Error),
    #[error(transparent)]
    Infrastructure(#[from] InfraError),
    #[error("media API returned {status}: {body}")]
    ExternalApi { status: u16, body: String },
    #[error("media API request failed: {0}")]
    MediaTransport(#[from] reqwest::Error),
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("receiptHandle missing from message")]
    MissingReceiptHandle,
}

impl PipelineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        PipelineError::Validation(msg.into())
    }

    /// Stable name reported as `errorType` in batch summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Validation(_) => "ValidationError",
            PipelineError::Decode(_) => "DecodeError",
            PipelineError::MalformedMessage(_) => "MalformedMessageError",
            PipelineError::Infrastructure(err) if err.is_transient() => {
                "TransientInfrastructureError"
            }
            PipelineError::Infrastructure(_) => "InfrastructureError",
            PipelineError::ExternalApi { .. } => "ExternalAPIError",
            PipelineError::MediaTransport(_) => "ExternalAPIError",
            PipelineError::Authentication(_) => "AuthenticationError",
            PipelineError::MissingReceiptHandle => "MissingReceiptHandleError",
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_and_decode_map_to_bad_request() {
        let err: AppError = PipelineError::validation("Missing required parameters").into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "Missing required parameters");

        let decode = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, "@@@")
            .unwrap_err();
        let err: AppError = PipelineError::from(decode).into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn infrastructure_failures_map_to_internal() {
        let err: AppError = PipelineError::from(InfraError::Io(io::Error::other("disk"))).into();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn only_backend_faults_are_transient() {
        assert!(InfraError::Io(io::Error::other("boom")).is_transient());
        assert!(
            InfraError::BlobNotFound {
                bucket: "b".into(),
                key: "k".into()
            }
            .is_transient()
        );
        assert!(!InfraError::InvalidKey("../x".into()).is_transient());
    }

    #[test]
    fn kinds_follow_the_taxonomy() {
        assert_eq!(PipelineError::validation("x").kind(), "ValidationError");
        assert_eq!(
            PipelineError::ExternalApi {
                status: 403,
                body: String::new()
            }
            .kind(),
            "ExternalAPIError"
        );
        assert_eq!(
            PipelineError::Authentication("no key".into()).kind(),
            "AuthenticationError"
        );
    }

    #[test]
    fn only_transient_backend_faults_are_reported_as_transient() {
        let transient = PipelineError::from(InfraError::Io(io::Error::other("disk")));
        assert_eq!(transient.kind(), "TransientInfrastructureError");

        let bad_key = PipelineError::from(InfraError::InvalidKey("a/../b".into()));
        assert_eq!(bad_key.kind(), "InfrastructureError");
        let err: AppError = bad_key.into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }
}
