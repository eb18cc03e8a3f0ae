//! Media acquisition
//!
//! Camera and microphone access for the proctoring pipeline. The
//! [`CaptureManager`] is the exclusive owner of device lifetimes: it hands
//! out [`MediaStream`] handles that expose frame samples and audio
//! subscriptions, never the underlying device objects, and guarantees
//! idempotent release.

pub mod device;
pub mod stream;
pub mod synthetic;

pub use stream::{AudioBlock, Frame, MediaStream, StreamSink};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Capture-related errors
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Capture backend error: {0}")]
    Backend(String),
}

pub type CaptureResult<T> = Result<T, CaptureError>;

/// Requested capture parameters, the `getUserMedia` constraints analogue
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaConstraints {
    /// Requested video width
    pub width: u32,

    /// Requested video height
    pub height: u32,

    /// Whether to capture the microphone
    pub audio: bool,

    /// Camera device ID (None = default camera)
    pub camera_id: Option<String>,

    /// Microphone device ID (None = default input)
    pub microphone_id: Option<String>,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            audio: true,
            camera_id: None,
            microphone_id: None,
        }
    }
}

/// Information about a camera
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraInfo {
    pub id: String,
    pub name: String,
}

/// Information about an audio input device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioDeviceInfo {
    pub id: String,
    pub name: String,
    pub is_default: bool,
}

/// A source of media pushing into a [`StreamSink`].
///
/// Implementations run their device loops on dedicated threads; `stop`
/// must be safe to call more than once.
pub trait MediaSource: Send {
    fn start(&mut self, sink: StreamSink) -> CaptureResult<()>;
    fn stop(&mut self);
}

enum Backend {
    Device,
    Synthetic,
    Denied,
}

/// Acquires and releases media streams
pub struct CaptureManager {
    backend: Backend,
}

impl CaptureManager {
    /// Manager backed by real camera/microphone devices
    pub fn new() -> Self {
        Self {
            backend: Backend::Device,
        }
    }

    /// Manager backed by the deterministic synthetic source
    pub fn synthetic() -> Self {
        Self {
            backend: Backend::Synthetic,
        }
    }

    /// Manager that refuses every acquisition, behaving like a host where
    /// camera access was denied
    pub fn denied() -> Self {
        Self {
            backend: Backend::Denied,
        }
    }

    /// Acquire a media stream satisfying `constraints`.
    ///
    /// Fails with [`CaptureError::PermissionDenied`] or
    /// [`CaptureError::DeviceNotFound`] when access is refused or no device
    /// exists. The returned stream is the exclusive owner of the devices.
    pub fn acquire(&self, constraints: &MediaConstraints) -> CaptureResult<Arc<MediaStream>> {
        let stream = MediaStream::new();
        let mut source: Box<dyn MediaSource> = match self.backend {
            Backend::Device => Box::new(device::DeviceSource::new(constraints.clone())),
            Backend::Synthetic => Box::new(synthetic::SyntheticSource::new(constraints.clone())),
            Backend::Denied => {
                return Err(CaptureError::PermissionDenied(
                    "camera access denied".to_string(),
                ));
            }
        };

        source.start(stream.sink())?;
        stream.attach(source);

        tracing::info!(
            "Media stream acquired ({}x{}, audio={})",
            constraints.width,
            constraints.height,
            constraints.audio
        );
        Ok(stream)
    }

    /// Stop every track of `stream`. Safe to call on an already-released
    /// stream and safe to call twice.
    pub fn release(&self, stream: &MediaStream) {
        stream.release();
    }
}

impl Default for CaptureManager {
    fn default() -> Self {
        Self::new()
    }
}

/// List available cameras
pub fn cameras() -> Vec<CameraInfo> {
    device::enumerate_cameras()
}

/// List available audio input devices
pub fn microphones() -> Vec<AudioDeviceInfo> {
    device::enumerate_microphones()
}
