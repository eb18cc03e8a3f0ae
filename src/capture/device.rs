//! Device-backed media source
//!
//! Camera capture via nokhwa and microphone capture via cpal. Both devices
//! live on dedicated threads because the underlying handles are not `Send`;
//! acquisition errors are reported back over a one-shot channel so
//! `acquire` can fail with the right error.

use super::{
    AudioDeviceInfo, CameraInfo, CaptureError, CaptureResult, Frame, MediaConstraints,
    MediaSource, StreamSink,
};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{ApiBackend, CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

/// Mono samples per pushed audio block, matching the original 4096-sample
/// processing callback
const AUDIO_BLOCK_SAMPLES: usize = 4096;

/// List available cameras
pub fn enumerate_cameras() -> Vec<CameraInfo> {
    match nokhwa::query(ApiBackend::Auto) {
        Ok(cameras) => cameras
            .into_iter()
            .map(|info| {
                let id = match info.index() {
                    CameraIndex::Index(i) => i.to_string(),
                    CameraIndex::String(s) => s.to_string(),
                };
                CameraInfo {
                    id,
                    name: info.human_name().to_string(),
                }
            })
            .collect(),
        Err(e) => {
            tracing::warn!("Failed to enumerate cameras: {:?}", e);
            Vec::new()
        }
    }
}

/// List available audio input devices
pub fn enumerate_microphones() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let default_name = host
        .default_input_device()
        .and_then(|d| d.name().ok());

    match host.input_devices() {
        Ok(devices) => devices
            .filter_map(|d| d.name().ok())
            .map(|name| AudioDeviceInfo {
                id: name.clone(),
                is_default: Some(&name) == default_name.as_ref(),
                name,
            })
            .collect(),
        Err(e) => {
            tracing::warn!("Failed to enumerate microphones: {:?}", e);
            Vec::new()
        }
    }
}

fn camera_index(device_id: &Option<String>) -> CameraIndex {
    match device_id {
        Some(id) => match id.parse::<u32>() {
            Ok(idx) => CameraIndex::Index(idx),
            Err(_) => CameraIndex::String(id.clone()),
        },
        None => CameraIndex::Index(0),
    }
}

fn map_camera_error(e: nokhwa::NokhwaError) -> CaptureError {
    let text = format!("{e}");
    let lowered = text.to_lowercase();
    if lowered.contains("permission") || lowered.contains("denied") || lowered.contains("authoriz")
    {
        CaptureError::PermissionDenied(text)
    } else if lowered.contains("not found") || lowered.contains("no device") {
        CaptureError::DeviceNotFound(text)
    } else {
        CaptureError::Backend(text)
    }
}

/// Camera + microphone source backed by real devices
pub struct DeviceSource {
    constraints: MediaConstraints,
    running: Arc<AtomicBool>,
    camera_thread: Option<std::thread::JoinHandle<()>>,
    audio_thread: Option<std::thread::JoinHandle<()>>,
}

impl DeviceSource {
    pub fn new(constraints: MediaConstraints) -> Self {
        Self {
            constraints,
            running: Arc::new(AtomicBool::new(false)),
            camera_thread: None,
            audio_thread: None,
        }
    }

    fn start_camera(&mut self, sink: StreamSink) -> CaptureResult<()> {
        let index = camera_index(&self.constraints.camera_id);
        let running = self.running.clone();
        let (ready_tx, ready_rx) = mpsc::channel::<CaptureResult<()>>();

        let handle = std::thread::spawn(move || {
            let format =
                RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestResolution);

            let mut camera = match Camera::new(index.clone(), format) {
                Ok(c) => c,
                Err(e) => {
                    let _ = ready_tx.send(Err(map_camera_error(e)));
                    return;
                }
            };
            if let Err(e) = camera.open_stream() {
                let _ = ready_tx.send(Err(map_camera_error(e)));
                return;
            }
            let _ = ready_tx.send(Ok(()));

            let resolution = camera.camera_format().resolution();
            tracing::info!(
                "Camera opened: {}x{} @ {}fps",
                resolution.width(),
                resolution.height(),
                camera.camera_format().frame_rate()
            );

            while running.load(Ordering::SeqCst) && sink.is_live() {
                match camera.frame() {
                    Ok(frame) => match frame.decode_image::<RgbFormat>() {
                        Ok(image) => {
                            sink.push_frame(Frame {
                                width: image.width(),
                                height: image.height(),
                                rgb: image.into_raw(),
                            });
                        }
                        Err(e) => tracing::debug!("Failed to decode frame: {:?}", e),
                    },
                    Err(e) => tracing::debug!("Failed to capture frame: {:?}", e),
                }
            }

            if let Err(e) = camera.stop_stream() {
                tracing::warn!("Error stopping camera stream: {:?}", e);
            }
            tracing::debug!("Camera capture thread stopped");
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.camera_thread = Some(handle);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(CaptureError::Backend("camera thread died".to_string()))
            }
        }
    }

    fn start_microphone(&mut self, sink: StreamSink) -> CaptureResult<()> {
        let running = self.running.clone();
        let requested_id = self.constraints.microphone_id.clone();
        let (ready_tx, ready_rx) = mpsc::channel::<CaptureResult<()>>();

        let handle = std::thread::spawn(move || {
            let host = cpal::default_host();
            let device = match &requested_id {
                Some(id) => host
                    .input_devices()
                    .ok()
                    .and_then(|mut devices| devices.find(|d| d.name().ok().as_deref() == Some(id))),
                None => host.default_input_device(),
            };
            let device = match device {
                Some(d) => d,
                None => {
                    let _ = ready_tx.send(Err(CaptureError::DeviceNotFound(
                        "no audio input device".to_string(),
                    )));
                    return;
                }
            };

            let config = match device.default_input_config() {
                Ok(c) => c,
                Err(e) => {
                    let _ = ready_tx.send(Err(CaptureError::Backend(format!(
                        "audio config: {e}"
                    ))));
                    return;
                }
            };
            let sample_rate = config.sample_rate().0;
            let channels = config.channels() as usize;

            // Downmix to mono and regroup into fixed-size blocks
            let mut pending: Vec<f32> = Vec::with_capacity(AUDIO_BLOCK_SAMPLES * 2);
            let block_sink = sink.clone();
            let stream = device.build_input_stream(
                &config.into(),
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    for chunk in data.chunks(channels) {
                        let sum: f32 = chunk.iter().sum();
                        pending.push(sum / channels as f32);
                    }
                    while pending.len() >= AUDIO_BLOCK_SAMPLES {
                        let block: Vec<f32> = pending.drain(..AUDIO_BLOCK_SAMPLES).collect();
                        block_sink.push_audio(sample_rate, block);
                    }
                },
                |err| tracing::warn!("Microphone stream error: {}", err),
                None,
            );

            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    let _ = ready_tx.send(Err(CaptureError::Backend(format!(
                        "audio stream: {e}"
                    ))));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(CaptureError::Backend(format!("audio play: {e}"))));
                return;
            }
            let _ = ready_tx.send(Ok(()));
            tracing::info!("Microphone opened ({}Hz, {}ch)", sample_rate, channels);

            // The cpal stream is not Send; keep it alive on this thread
            while running.load(Ordering::SeqCst) && sink.is_live() {
                std::thread::sleep(std::time::Duration::from_millis(50));
            }
            drop(stream);
            tracing::debug!("Microphone capture thread stopped");
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.audio_thread = Some(handle);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(CaptureError::Backend("microphone thread died".to_string()))
            }
        }
    }
}

impl MediaSource for DeviceSource {
    fn start(&mut self, sink: StreamSink) -> CaptureResult<()> {
        self.running.store(true, Ordering::SeqCst);

        if let Err(e) = self.start_camera(sink.clone()) {
            self.stop();
            return Err(e);
        }
        if self.constraints.audio {
            if let Err(e) = self.start_microphone(sink) {
                self.stop();
                return Err(e);
            }
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.camera_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.audio_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DeviceSource {
    fn drop(&mut self) {
        self.stop();
    }
}
