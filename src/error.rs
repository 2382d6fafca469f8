//! Error taxonomy shared by the protocol handlers and the HTTP surface.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Every failure a single request or message can produce.
///
/// None of these tear down a socket except [`AppError::ProtocolViolation`];
/// handlers turn the rest into typed error responses on the same channel.
#[derive(Error, Debug)]
pub enum AppError {
    /// Path escapes the sandbox root. Raised before any filesystem access.
    #[error("access denied: path is outside the allowed root")]
    AccessDenied,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("read failed: {0}")]
    ReadFailure(String),

    /// An external process exceeded its time budget and was killed.
    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("file too large ({size} bytes, limit {limit})")]
    Oversize { size: u64, limit: u64 },

    #[error("binary file")]
    BinaryContent,

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("unknown session '{0}'")]
    UnknownSession(String),

    #[error("unknown recording '{0}'")]
    UnknownRecording(String),

    #[error("llm call failed: {0}")]
    Llm(String),

    #[error("pty error: {0}")]
    Pty(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl AppError {
    /// Maps an `io::Error` from a read into the taxonomy, keeping the
    /// not-found case distinct so the UI can tell it apart from denial.
    pub fn from_io(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            _ => Self::ReadFailure(err.to_string()),
        }
    }

    /// Short, stable identifier for the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AccessDenied => "access-denied",
            Self::NotFound(_) => "not-found",
            Self::ReadFailure(_) => "read-failure",
            Self::Timeout { .. } => "timeout",
            Self::Oversize { .. } => "oversize",
            Self::BinaryContent => "binary-content",
            Self::ProtocolViolation(_) => "protocol-violation",
            Self::UnknownSession(_) => "unknown-session",
            Self::UnknownRecording(_) => "unknown-recording",
            Self::Llm(_) => "llm-failure",
            Self::Pty(_) => "pty-failure",
            Self::Storage(_) => "storage-failure",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::AccessDenied => StatusCode::FORBIDDEN,
            Self::NotFound(_) | Self::UnknownSession(_) | Self::UnknownRecording(_) => {
                StatusCode::NOT_FOUND
            }
            Self::Oversize { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::BinaryContent => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::ProtocolViolation(_) => StatusCode::BAD_REQUEST,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Llm(_) => StatusCode::BAD_GATEWAY,
            Self::ReadFailure(_) | Self::Pty(_) | Self::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.to_string(),
            "code": self.code(),
        });
        (self.status(), Json(body)).into_response()
    }
}

pub type AppResult<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_not_found_stays_distinct() {
        let err = AppError::from_io(std::io::Error::from(std::io::ErrorKind::NotFound));
        assert_eq!(err.code(), "not-found");

        let err = AppError::from_io(std::io::Error::from(std::io::ErrorKind::PermissionDenied));
        assert_eq!(err.code(), "read-failure");
    }

    #[test]
    fn test_timeout_message_is_explicit() {
        let err = AppError::Timeout { secs: 30 };
        assert!(err.is_timeout());
        assert!(err.to_string().contains("timed out"));
        assert_ne!(err.to_string(), AppError::Llm("boom".into()).to_string());
    }

    #[test]
    fn test_access_denied_hides_path() {
        let msg = AppError::AccessDenied.to_string();
        assert!(!msg.contains('/'));
    }
}
