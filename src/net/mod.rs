//! HTTP clients for the remote services
//!
//! Two collaborators: the anti-cheat analysis service (frames, audio,
//! session lifecycle) and the exam service (paper, grading, video upload).
//! Per-chunk uploads are best-effort channels: failures are logged and
//! dropped, never retried.

pub mod analysis;
pub mod exam;

pub use analysis::{AnalysisClient, AnalysisResponse};
pub use exam::ExamClient;

use thiserror::Error;

/// Remote service errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Service returned {status}: {body}")]
    Status { status: u16, body: String },
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Fail a response that is not 2xx, capturing the body for the log line.
pub(crate) async fn check(response: reqwest::Response) -> ServiceResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(ServiceError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

/// Best-effort send: log and swallow the failure.
///
/// Keeps fire-and-forget channels explicitly non-propagating so they never
/// turn into blocking or retrying calls.
pub(crate) fn best_effort<T>(what: &str, result: ServiceResult<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("{what} failed (ignored): {e}");
            None
        }
    }
}
