//! Centralized error handling module
//!
//! Provides unified error types and HTTP response mapping for the entire application.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

use crate::normalizer::IngestError;
use crate::profiles::ProfileError;

/// Application-wide error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Malformed sensor message: {0}")]
    MalformedInput(String),

    #[error("Unknown activity profile: {0}")]
    UnknownProfile(String),

    #[error("No monitoring session for user: {0}")]
    SessionNotFound(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl From<IngestError> for AppError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::Malformed(msg) => AppError::MalformedInput(msg),
        }
    }
}

impl From<ProfileError> for AppError {
    fn from(e: ProfileError) -> Self {
        match e {
            ProfileError::UnknownProfile(name) => AppError::UnknownProfile(name),
            other => AppError::InternalError(other.to_string()),
        }
    }
}

impl From<actix::MailboxError> for AppError {
    fn from(e: actix::MailboxError) -> Self {
        AppError::InternalError(format!("monitor session unavailable: {}", e))
    }
}

/// Standardized error response format
#[derive(Serialize)]
pub struct ErrorResponse {
    /// Unique correlation ID for tracing
    pub correlation_id: String,
    /// Error type classification
    pub error_type: String,
    /// Human-readable error message (safe for clients)
    pub message: String,
    /// HTTP status code
    pub status_code: u16,
    /// Timestamp of the error
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error_type: &str, message: &str, status_code: StatusCode) -> Self {
        Self {
            correlation_id: Uuid::new_v4().to_string(),
            error_type: error_type.to_string(),
            message: message.to_string(),
            status_code: status_code.as_u16(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error_type, self.message)
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AppError::ValidationError(msg) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.as_str())
            }
            AppError::MalformedInput(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "MALFORMED_INPUT", msg.as_str())
            }
            AppError::UnknownProfile(msg) => {
                (StatusCode::NOT_FOUND, "UNKNOWN_PROFILE", msg.as_str())
            }
            AppError::SessionNotFound(msg) => {
                (StatusCode::NOT_FOUND, "SESSION_NOT_FOUND", msg.as_str())
            }
            AppError::InternalError(msg) => {
                // Log internal errors but return safe message to client
                error!(error = %msg, "Internal server error occurred");
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", "An internal error occurred")
            }
        };

        let error_response = ErrorResponse::new(error_type, message, status);

        error!(
            correlation_id = %error_response.correlation_id,
            error_type = %error_type,
            status_code = %status.as_u16(),
            "Error response generated"
        );

        HttpResponse::build(status).json(error_response)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::MalformedInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::UnknownProfile(_) => StatusCode::NOT_FOUND,
            AppError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            AppError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;
