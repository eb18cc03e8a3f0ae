//! Events surfaced to the embedding UI
//!
//! The controller broadcasts these over a `tokio::sync::broadcast` channel;
//! the UI renders warnings, the confirmation dialog, and the final grade
//! from them. Per-chunk streaming failures never appear here.

use crate::exam::Grade;
use crate::monitor::{ViolationEvent, ViolationKind};

/// Events emitted during a proctored session
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Remote session and media pipeline came up
    MonitoringStarted,
    /// Anti-cheat bring-up failed; the exam continues without it
    MonitoringUnavailable { reason: String },
    /// Whether the camera preview overlay should be shown
    CameraPreview { visible: bool },
    /// Informational alerts returned by the analysis service
    Alerts { alerts: Vec<String> },
    /// Below-threshold behavioral signal
    IntegrityWarning {
        kind: ViolationKind,
        count: u32,
        limit: u32,
    },
    /// A violation was latched; forced submission is underway
    ViolationDetected(ViolationEvent),
    /// Manual submit needs confirmation; shows remaining time
    ConfirmSubmit { remaining: String },
    /// Grading succeeded
    Graded(Grade),
    /// Grading failed; terminal and user-visible
    GradingFailed { message: String },
    /// Local recording upload finished
    VideoUploaded { url: String },
    /// Local recording upload failed (best-effort artifact)
    VideoUploadFailed { message: String },
    /// Session is over; the UI should leave the exam route
    NavigateTo { route: String },
}
