//! Pipeline configuration
//!
//! Tunables for the proctoring pipeline. Defaults mirror the reference
//! deployment (local analysis service on 8081, exam service on 8080).

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for one proctored exam session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    /// Base URL of the anti-cheat analysis service
    pub analysis_base_url: String,

    /// Base URL of the exam/grading service
    pub exam_base_url: String,

    /// Bearer token attached to every request when set
    pub bearer_token: Option<String>,

    /// Interval between frame captures in milliseconds
    pub frame_interval_ms: u64,

    /// JPEG quality for uploaded frames (0-100)
    pub jpeg_quality: u8,

    /// Target sample rate for uploaded audio
    pub audio_target_rate: u32,

    /// Tab-switch count that forces submission
    pub tab_switch_limit: u32,

    /// Focus-loss count that forces submission
    pub focus_loss_limit: u32,

    /// How long submission waits for the recording upload to be dispatched
    pub recorder_flush_ms: u64,

    /// Route the student lands on after submission
    pub exit_route: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            analysis_base_url: "http://localhost:8081/api/anti-cheat".to_string(),
            exam_base_url: "http://localhost:8080".to_string(),
            bearer_token: None,
            frame_interval_ms: 700,
            jpeg_quality: 80,
            audio_target_rate: 16_000,
            tab_switch_limit: 3,
            focus_loss_limit: 5,
            recorder_flush_ms: 2_000,
            exit_route: "/main/test-history".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn recorder_flush(&self) -> Duration {
        Duration::from_millis(self.recorder_flush_ms)
    }
}
