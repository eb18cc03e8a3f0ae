//! Error types and handling
//!
//! Crate-level error type aggregating the subsystem errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capture::CaptureError;
use crate::net::ServiceError;
use crate::recorder::RecorderError;

/// Pipeline-wide error type
#[derive(Error, Debug)]
pub enum ProctorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Recorder error: {0}")]
    Recorder(#[from] RecorderError),

    #[error("Grading failed: {0}")]
    Grading(String),

    #[error("Session error: {0}")]
    Session(String),
}

/// Error response for an embedding UI
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<ProctorError> for ErrorResponse {
    fn from(error: ProctorError) -> Self {
        let code = match &error {
            ProctorError::Io(_) => "IO_ERROR",
            ProctorError::Serialization(_) => "SERIALIZATION_ERROR",
            ProctorError::Capture(CaptureError::PermissionDenied(_)) => "PERMISSION_DENIED",
            ProctorError::Capture(CaptureError::DeviceNotFound(_)) => "DEVICE_NOT_FOUND",
            ProctorError::Capture(_) => "CAPTURE_ERROR",
            ProctorError::Service(_) => "SERVICE_ERROR",
            ProctorError::Recorder(_) => "RECORDER_ERROR",
            ProctorError::Grading(_) => "GRADING_FAILED",
            ProctorError::Session(_) => "SESSION_ERROR",
        };

        ErrorResponse {
            code: code.to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using ProctorError
pub type ProctorResult<T> = Result<T, ProctorError>;
