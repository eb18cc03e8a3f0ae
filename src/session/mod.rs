//! Session orchestration
//!
//! The controller composes capture, streaming, recording, monitoring, and
//! the countdown, and arbitrates the single terminal submission.

pub mod controller;
pub mod events;
pub mod state;

pub use controller::{SessionController, SubmitOutcome};
pub use events::SessionEvent;
pub use state::{Session, SessionPhase, SubmitGate, SubmitTrigger};
