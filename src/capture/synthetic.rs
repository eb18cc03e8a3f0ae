//! Synthetic media source
//!
//! Deterministic frames and audio for development hosts without devices
//! and for tests. Frames are a flat gradient; audio is a constant-value
//! signal, which makes the downsampler's averaging invariant visible.

use super::{CaptureResult, Frame, MediaConstraints, MediaSource, StreamSink};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const FRAME_PERIOD: Duration = Duration::from_millis(33);
const AUDIO_PERIOD: Duration = Duration::from_millis(40);
const AUDIO_SAMPLE_RATE: u32 = 48_000;
const AUDIO_BLOCK_SAMPLES: usize = 4096;

/// Constant sample value pushed by the synthetic microphone
pub const SYNTHETIC_AUDIO_LEVEL: f32 = 0.25;

pub struct SyntheticSource {
    constraints: MediaConstraints,
    running: Arc<AtomicBool>,
    video_thread: Option<std::thread::JoinHandle<()>>,
    audio_thread: Option<std::thread::JoinHandle<()>>,
}

impl SyntheticSource {
    pub fn new(constraints: MediaConstraints) -> Self {
        Self {
            constraints,
            running: Arc::new(AtomicBool::new(false)),
            video_thread: None,
            audio_thread: None,
        }
    }

    fn gradient_frame(width: u32, height: u32, tick: u64) -> Frame {
        let mut rgb = Vec::with_capacity((width * height * 3) as usize);
        let shift = (tick % 256) as u8;
        for y in 0..height {
            for x in 0..width {
                rgb.push((x % 256) as u8 ^ shift);
                rgb.push((y % 256) as u8);
                rgb.push(shift);
            }
        }
        Frame { width, height, rgb }
    }
}

impl MediaSource for SyntheticSource {
    fn start(&mut self, sink: StreamSink) -> CaptureResult<()> {
        self.running.store(true, Ordering::SeqCst);

        let width = self.constraints.width;
        let height = self.constraints.height;
        let running = self.running.clone();
        let video_sink = sink.clone();
        self.video_thread = Some(std::thread::spawn(move || {
            let mut tick: u64 = 0;
            while running.load(Ordering::SeqCst) && video_sink.is_live() {
                video_sink.push_frame(Self::gradient_frame(width, height, tick));
                tick += 1;
                std::thread::sleep(FRAME_PERIOD);
            }
        }));

        if self.constraints.audio {
            let running = self.running.clone();
            self.audio_thread = Some(std::thread::spawn(move || {
                while running.load(Ordering::SeqCst) && sink.is_live() {
                    sink.push_audio(
                        AUDIO_SAMPLE_RATE,
                        vec![SYNTHETIC_AUDIO_LEVEL; AUDIO_BLOCK_SAMPLES],
                    );
                    std::thread::sleep(AUDIO_PERIOD);
                }
            }));
        }

        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.video_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.audio_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SyntheticSource {
    fn drop(&mut self) {
        self.stop();
    }
}
