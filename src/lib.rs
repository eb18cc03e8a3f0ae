//! Invigil - proctored exam session pipeline.
//!
//! While a student takes a timed exam, this crate captures camera and
//! microphone input, streams it to a remote integrity-analysis service,
//! reacts to violation signals, tracks tab/focus behavior, records a local
//! video backup, and coordinates the single, idempotent act of submitting
//! the exam. The visible exam UI is an external host embedding
//! [`session::SessionController`].

pub mod capture;
pub mod config;
pub mod exam;
pub mod logging;
pub mod monitor;
pub mod net;
pub mod recorder;
pub mod session;
pub mod storage;
pub mod streamer;
pub mod timer;
pub mod utils;

pub use config::PipelineConfig;
pub use session::{SessionController, SessionEvent, SessionPhase, SubmitOutcome};
pub use utils::error::{ProctorError, ProctorResult};
