use axum::{
    http::StatusCode,
    response::{IntoResponse, Json as AxumJson, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::utils::security::ValidationError;

/// Failures of the chunked-transfer protocol itself
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Transfer not found: {0}")]
    NotFound(String),

    #[error("Transfer {transfer_id} incomplete: {received}/{expected} chunks received")]
    Incomplete {
        transfer_id: String,
        received: u64,
        expected: u64,
        /// First few indices still outstanding
        missing: Vec<u64>,
    },

    #[error("File too large: {size} bytes exceeds limit of {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("Checksum mismatch for chunk {index}")]
    ChecksumMismatch { index: u64 },

    #[error("Storage failure: {context}")]
    Storage {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl TransferError {
    pub fn storage(context: impl Into<String>, source: std::io::Error) -> Self {
        TransferError::Storage {
            context: context.into(),
            source,
        }
    }
}

impl From<ValidationError> for TransferError {
    fn from(err: ValidationError) -> Self {
        TransferError::InvalidInput(format!("filename rejected: {}", err))
    }
}

pub type TransferResult<T> = Result<T, TransferError>;

/// Structured error types for HTTP status code mapping
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Storage error: {0}")]
    Storage(String),

    /// Catch-all for unexpected errors - logs full context internally
    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl From<TransferError> for AppError {
    fn from(err: TransferError) -> Self {
        let message = err.to_string();
        match err {
            TransferError::InvalidInput(_) | TransferError::ChecksumMismatch { .. } => {
                AppError::BadRequest(message)
            }
            TransferError::NotFound(_) => AppError::NotFound(message),
            TransferError::Incomplete { ref missing, .. } if !missing.is_empty() => {
                let listed: Vec<String> = missing.iter().map(u64::to_string).collect();
                AppError::Conflict(format!("{} (missing: {})", message, listed.join(",")))
            }
            TransferError::Incomplete { .. } => AppError::Conflict(message),
            TransferError::FileTooLarge { .. } => AppError::PayloadTooLarge(message),
            TransferError::Storage { ref source, .. } => {
                tracing::error!(error = %source, "{}", message);
                AppError::Storage(message)
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            AppError::PayloadTooLarge(msg) => {
                (StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", msg)
            }
            AppError::Storage(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error", msg),
            AppError::Internal(ref err) => {
                tracing::error!(
                    error = ?err,
                    backtrace = ?err.backtrace(),
                    "Internal server error"
                );
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = AxumJson(json!({
            "error": {
                "type": error_type,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}
