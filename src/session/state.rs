//! Session state machine
//!
//! Phase tracking for one proctored attempt plus the submission latch.
//! The latch is the single point of mutual exclusion in the pipeline:
//! timer expiry, violations, and manual submission race for it and exactly
//! one wins.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::monitor::ViolationEvent;

/// Lifecycle phase of the session controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    /// Nothing started yet
    Idle,
    /// Fetching the paper and bringing up monitoring
    Initializing,
    /// Student is answering; any trigger may request submission
    Active,
    /// Terminal submission logic is executing
    Submitting,
    /// Grading finished (successfully or not); session cannot resume
    Terminated,
}

impl Default for SessionPhase {
    fn default() -> Self {
        Self::Idle
    }
}

/// One proctored attempt at one exam by one student
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Server-issued id (locally generated until session start succeeds)
    pub session_id: String,
    pub exam_id: i64,
    pub student_id: i64,
    pub started_at: DateTime<Utc>,
}

/// What requested the submission
#[derive(Debug, Clone)]
pub enum SubmitTrigger {
    /// Student clicked submit and confirmed
    Manual,
    /// Countdown reached zero
    TimerExpired,
    /// Integrity violation forced it
    Violation(ViolationEvent),
}

/// Idempotent entry latch for the terminal submission.
///
/// `try_enter` succeeds for exactly one caller; every later attempt is a
/// silent no-op, which is how double submission is prevented rather than
/// surfaced as an error.
#[derive(Debug, Default)]
pub struct SubmitGate {
    entered: AtomicBool,
}

impl SubmitGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true only for the first caller.
    pub fn try_enter(&self) -> bool {
        self.entered
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn is_entered(&self) -> bool {
        self.entered.load(Ordering::SeqCst)
    }
}
