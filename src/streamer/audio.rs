//! Microphone audio upload
//!
//! Consumes the stream's audio subscription (mono blocks at the source
//! rate), downsamples each block to the analysis rate by block averaging,
//! converts to signed 16-bit little-endian PCM, and posts the bytes as a
//! best-effort channel.

use crate::capture::MediaStream;
use crate::monitor::MonitorHandle;
use crate::net::{best_effort, AnalysisClient};
use crate::session::SessionEvent;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Downsample by block averaging: output sample `i` is the mean of the
/// input samples in `[round(i*r), round((i+1)*r))` for `r = src/target`.
pub fn downsample(input: &[f32], src_rate: u32, target_rate: u32) -> Vec<f32> {
    if src_rate == target_rate || input.is_empty() {
        return input.to_vec();
    }

    let ratio = f64::from(src_rate) / f64::from(target_rate);
    let out_len = (input.len() as f64 / ratio).round() as usize;
    let mut output = Vec::with_capacity(out_len);

    let mut start = 0usize;
    for i in 0..out_len {
        let end = (((i + 1) as f64) * ratio).round() as usize;
        let end = end.min(input.len());
        let slice = &input[start.min(end)..end];
        let mean = if slice.is_empty() {
            0.0
        } else {
            slice.iter().sum::<f32>() / slice.len() as f32
        };
        output.push(mean);
        start = end;
    }
    output
}

/// Convert float samples to PCM16-LE bytes. Samples are clamped to
/// `[-1, 1]` and scaled asymmetrically (32768 negative, 32767 positive)
/// to cover the full 16-bit range.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        let value = if clamped < 0.0 {
            (clamped * 32768.0) as i16
        } else {
            (clamped * 32767.0) as i16
        };
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Audio subscription consumer and uploader
pub struct AudioStreamer {
    target_rate: u32,
    running: Arc<AtomicBool>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl AudioStreamer {
    pub fn new(target_rate: u32) -> Self {
        Self {
            target_rate,
            running: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        }
    }

    /// Start consuming the stream's audio subscription. Each block posts
    /// detached; alert responses feed the integrity monitor.
    pub fn start(
        &self,
        stream: Arc<MediaStream>,
        session_id: String,
        client: Arc<AnalysisClient>,
        monitor: MonitorHandle,
        events: broadcast::Sender<SessionEvent>,
    ) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("Audio streamer already running");
            return;
        }

        let target_rate = self.target_rate;
        let running = self.running.clone();
        let mut rx = stream.subscribe_audio();
        let task = tokio::spawn(async move {
            loop {
                let block = match rx.recv().await {
                    Ok(block) => block,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!("Audio consumer lagged, dropped {skipped} blocks");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if !running.load(Ordering::SeqCst) {
                    break;
                }

                let resampled = downsample(&block.samples, block.sample_rate, target_rate);
                let pcm = encode_pcm16(&resampled);

                let client = client.clone();
                let session_id = session_id.clone();
                let monitor = monitor.clone();
                let events = events.clone();
                tokio::spawn(async move {
                    let response =
                        best_effort("audio upload", client.post_audio(&session_id, pcm).await);
                    if let Some(response) = response {
                        if let Some(alerts) = response.alerts.filter(|a| !a.is_empty()) {
                            monitor.remote_alerts(alerts.clone());
                            let _ = events.send(SessionEvent::Alerts { alerts });
                        }
                    }
                });
            }
        });
        *self.task.lock() = Some(task);
        tracing::info!("Audio streaming started (target rate {}Hz)", target_rate);
    }

    /// Release the subscription. Safe to call repeatedly or when never
    /// started.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            if let Some(task) = self.task.lock().take() {
                task.abort();
            }
            tracing::info!("Audio streaming stopped");
        }
    }
}

impl Drop for AudioStreamer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downsample_length_matches_rate_ratio() {
        let input = vec![0.5; 4096];
        let output = downsample(&input, 48_000, 16_000);
        let expected = (4096.0_f64 * 16_000.0 / 48_000.0).round() as usize;
        assert_eq!(output.len(), expected);
    }

    #[test]
    fn constant_signal_survives_averaging() {
        let input = vec![0.25; 4800];
        let output = downsample(&input, 48_000, 16_000);
        assert!(output.iter().all(|&s| (s - 0.25).abs() < 1e-6));
    }

    #[test]
    fn matching_rates_pass_through() {
        let input = vec![0.1, -0.2, 0.3];
        assert_eq!(downsample(&input, 16_000, 16_000), input);
    }

    #[test]
    fn pcm16_encodes_full_scale_values() {
        let bytes = encode_pcm16(&[1.0, -1.0, 0.0]);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), 32767);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), -32768);
        assert_eq!(i16::from_le_bytes([bytes[4], bytes[5]]), 0);
    }

    #[test]
    fn pcm16_clamps_out_of_range_input() {
        let bytes = encode_pcm16(&[2.0, -3.0]);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), 32767);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), -32768);
    }

    #[tokio::test]
    async fn stop_without_start_is_a_no_op() {
        let streamer = AudioStreamer::new(16_000);
        streamer.stop();
        streamer.stop();
    }
}
