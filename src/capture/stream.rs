//! Owned media stream handle
//!
//! A [`MediaStream`] is the single owned handle to a running capture
//! source. Consumers sample the latest frame or subscribe to audio blocks;
//! only the stream itself may stop the underlying tracks, and release is
//! guaranteed idempotent.

use super::MediaSource;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// One captured video frame in packed RGB
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    /// Packed RGB8 pixel data, `width * height * 3` bytes
    pub rgb: Vec<u8>,
}

/// One block of mono audio samples at the source rate
#[derive(Debug, Clone)]
pub struct AudioBlock {
    pub sample_rate: u32,
    pub samples: Arc<Vec<f32>>,
}

/// Producer side handed to a [`MediaSource`].
///
/// Frames overwrite a latest-frame slot (consumers sample, they do not
/// queue); audio blocks fan out over a broadcast channel.
#[derive(Clone)]
pub struct StreamSink {
    frame_slot: Arc<Mutex<Option<Arc<Frame>>>>,
    audio_tx: broadcast::Sender<AudioBlock>,
    live: Arc<AtomicBool>,
}

impl StreamSink {
    pub fn push_frame(&self, frame: Frame) {
        if !self.is_live() {
            return;
        }
        *self.frame_slot.lock() = Some(Arc::new(frame));
    }

    pub fn push_audio(&self, sample_rate: u32, samples: Vec<f32>) {
        if !self.is_live() {
            return;
        }
        // Send fails only when nobody is subscribed, which is fine
        let _ = self.audio_tx.send(AudioBlock {
            sample_rate,
            samples: Arc::new(samples),
        });
    }

    /// Whether the owning stream still wants data. Sources use this as
    /// their loop condition.
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

/// Owned handle to an acquired camera/microphone stream
pub struct MediaStream {
    frame_slot: Arc<Mutex<Option<Arc<Frame>>>>,
    audio_tx: broadcast::Sender<AudioBlock>,
    live: Arc<AtomicBool>,
    source: Mutex<Option<Box<dyn MediaSource>>>,
}

impl MediaStream {
    pub(crate) fn new() -> Arc<Self> {
        let (audio_tx, _) = broadcast::channel(32);
        Arc::new(Self {
            frame_slot: Arc::new(Mutex::new(None)),
            audio_tx,
            live: Arc::new(AtomicBool::new(true)),
            source: Mutex::new(None),
        })
    }

    pub(crate) fn sink(&self) -> StreamSink {
        StreamSink {
            frame_slot: self.frame_slot.clone(),
            audio_tx: self.audio_tx.clone(),
            live: self.live.clone(),
        }
    }

    pub(crate) fn attach(&self, source: Box<dyn MediaSource>) {
        *self.source.lock() = Some(source);
    }

    /// Most recent captured frame, if any
    pub fn latest_frame(&self) -> Option<Arc<Frame>> {
        self.frame_slot.lock().clone()
    }

    /// Subscribe to mono audio blocks at the source rate
    pub fn subscribe_audio(&self) -> broadcast::Receiver<AudioBlock> {
        self.audio_tx.subscribe()
    }

    /// Stop every track. Idempotent: repeated calls and calls racing each
    /// other are no-ops after the first.
    pub fn release(&self) {
        if self.live.swap(false, Ordering::SeqCst) {
            if let Some(mut source) = self.source.lock().take() {
                source.stop();
            }
            self.frame_slot.lock().take();
            tracing::debug!("Media stream released");
        }
    }

    pub fn is_released(&self) -> bool {
        !self.live.load(Ordering::SeqCst)
    }
}

impl Drop for MediaStream {
    fn drop(&mut self) {
        self.release();
    }
}
