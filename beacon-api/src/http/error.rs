// HTTP error handling

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for HTTP handlers
pub type AppResult<T> = Result<T, AppError>;

/// Application error with HTTP status code
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    /// Machine-readable error kind
    pub kind: &'static str,
}

impl AppError {
    pub fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            kind,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_input", message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for AppError {}

/// Error response JSON structure
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
    pub status: u16,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            error: self.message,
            kind: self.kind.to_string(),
            status: status.as_u16(),
        });

        (status, body).into_response()
    }
}

/// Convert beacon_core errors to HTTP errors
impl From<beacon_core::Error> for AppError {
    fn from(err: beacon_core::Error) -> Self {
        use beacon_core::Error;

        let kind = err.kind();
        match err {
            Error::NotFound(_) => Self::new(StatusCode::NOT_FOUND, kind, err.to_string()),
            Error::NoInstancesAvailable(_) | Error::NoHealthyInstance(_) => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, kind, err.to_string())
            }
            Error::LockConflict(_) | Error::AlreadyExists(_) => {
                Self::new(StatusCode::CONFLICT, kind, err.to_string())
            }
            Error::Configuration(_) | Error::InvalidInput(_) => {
                Self::new(StatusCode::BAD_REQUEST, kind, err.to_string())
            }
            Error::ProbeFailure(_) | Error::Cache(_) | Error::Serialization(_) | Error::Internal(_) => {
                tracing::error!(kind, "Request failed: {}", err);
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, kind, "Internal server error")
            }
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(format!("JSON error: {}", rejection.body_text()))
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(format!("Query error: {}", rejection.body_text()))
    }
}

/// Convert anyhow errors to HTTP errors
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("Anyhow error: {}", err);
        Self::internal_server_error("Internal server error")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_error_status_mapping() {
        use beacon_core::Error;

        let cases = [
            (Error::NotFound("s".into()), StatusCode::NOT_FOUND),
            (Error::NoInstancesAvailable("s".into()), StatusCode::SERVICE_UNAVAILABLE),
            (Error::NoHealthyInstance("s".into()), StatusCode::SERVICE_UNAVAILABLE),
            (Error::LockConflict("s".into()), StatusCode::CONFLICT),
            (Error::Configuration("s".into()), StatusCode::BAD_REQUEST),
            (Error::InvalidInput("s".into()), StatusCode::BAD_REQUEST),
            (Error::AlreadyExists("s".into()), StatusCode::CONFLICT),
            (Error::Internal("s".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status, status);
        }
    }

    #[test]
    fn test_internal_detail_is_not_leaked() {
        let err = AppError::from(beacon_core::Error::Internal("redis password wrong".into()));
        assert_eq!(err.message, "Internal server error");
        assert_eq!(err.kind, "internal");
    }
}
