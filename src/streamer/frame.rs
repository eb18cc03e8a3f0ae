//! Periodic frame capture and upload
//!
//! Samples the latest camera frame on a fixed interval, scales it to
//! 640x480, JPEG-encodes it, and posts it to the analysis service. Each
//! post runs detached so network latency never skews the capture cadence;
//! responses may arrive out of order and each alert set is handled
//! independently.

use crate::capture::{Frame, MediaStream};
use crate::monitor::MonitorHandle;
use crate::net::{best_effort, AnalysisClient};
use crate::session::SessionEvent;
use image::codecs::jpeg::JpegEncoder;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Upload resolution expected by the analysis service
const UPLOAD_WIDTH: u32 = 640;
const UPLOAD_HEIGHT: u32 = 480;

/// Scale a frame to the upload resolution and encode it as JPEG.
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let img = image::RgbImage::from_raw(frame.width, frame.height, frame.rgb.clone())
        .ok_or_else(|| {
            image::ImageError::Parameter(image::error::ParameterError::from_kind(
                image::error::ParameterErrorKind::DimensionMismatch,
            ))
        })?;

    let scaled = if frame.width == UPLOAD_WIDTH && frame.height == UPLOAD_HEIGHT {
        img
    } else {
        image::imageops::resize(
            &img,
            UPLOAD_WIDTH,
            UPLOAD_HEIGHT,
            image::imageops::FilterType::Triangle,
        )
    };

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality).encode(
        scaled.as_raw(),
        UPLOAD_WIDTH,
        UPLOAD_HEIGHT,
        image::ColorType::Rgb8,
    )?;
    Ok(jpeg)
}

/// Periodic JPEG uploader
pub struct FrameStreamer {
    interval: Duration,
    jpeg_quality: u8,
    running: Arc<AtomicBool>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl FrameStreamer {
    pub fn new(interval: Duration, jpeg_quality: u8) -> Self {
        Self {
            interval,
            jpeg_quality,
            running: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        }
    }

    /// Start the capture interval. Alerts returned by the service are
    /// forwarded to the integrity monitor and surfaced as UI events.
    pub fn start(
        &self,
        stream: Arc<MediaStream>,
        session_id: String,
        client: Arc<AnalysisClient>,
        monitor: MonitorHandle,
        events: broadcast::Sender<SessionEvent>,
    ) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("Frame streamer already running");
            return;
        }

        let interval = self.interval;
        let quality = self.jpeg_quality;
        let running = self.running.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            while running.load(Ordering::SeqCst) {
                ticker.tick().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                let Some(frame) = stream.latest_frame() else {
                    continue;
                };
                let jpeg = match encode_jpeg(&frame, quality) {
                    Ok(jpeg) => jpeg,
                    Err(e) => {
                        tracing::debug!("Frame encode failed: {e}");
                        continue;
                    }
                };

                // Fire-and-forget: the next tick never waits on this post
                let client = client.clone();
                let session_id = session_id.clone();
                let monitor = monitor.clone();
                let events = events.clone();
                tokio::spawn(async move {
                    let response =
                        best_effort("frame upload", client.post_frame(&session_id, jpeg).await);
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
        tracing::info!("Frame streaming started ({}ms interval)", interval.as_millis());
    }

    /// Cancel the interval. Safe to call when not running; in-flight posts
    /// are left to finish on their own.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            if let Some(task) = self.task.lock().take() {
                task.abort();
            }
            tracing::info!("Frame streaming stopped");
        }
    }
}

impl Drop for FrameStreamer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_scales_to_upload_resolution() {
        let frame = Frame {
            width: 320,
            height: 240,
            rgb: vec![128; 320 * 240 * 3],
        };
        let jpeg = encode_jpeg(&frame, 80).unwrap();
        // JPEG SOI marker
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!(decoded.width(), UPLOAD_WIDTH);
        assert_eq!(decoded.height(), UPLOAD_HEIGHT);
    }

    #[test]
    fn encode_rejects_mismatched_buffer() {
        let frame = Frame {
            width: 640,
            height: 480,
            rgb: vec![0; 10],
        };
        assert!(encode_jpeg(&frame, 80).is_err());
    }

    #[tokio::test]
    async fn stop_without_start_is_a_no_op() {
        let streamer = FrameStreamer::new(Duration::from_millis(700), 80);
        streamer.stop();
        streamer.stop();
    }
}
