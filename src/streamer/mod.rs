//! Best-effort upload channels
//!
//! Periodic JPEG frame uploads and PCM audio uploads to the analysis
//! service. Both are fire-and-forget: a slow or failed POST never blocks
//! or skips the next capture, and failures are logged, not surfaced.

pub mod audio;
pub mod frame;

pub use audio::AudioStreamer;
pub use frame::FrameStreamer;
