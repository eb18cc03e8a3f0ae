//! Local video backup recorder
//!
//! Records the session into ~1-second chunks held in memory and, on stop,
//! concatenates them and dispatches a detached upload tagged with
//! examId/studentId. The recording is a best-effort audit artifact: upload
//! failure is reported but never blocks or reverses submission.
//!
//! Encoding sits behind [`ChunkEncoder`] so hosts use the FFmpeg encoder
//! while tests inject a passthrough.

use crate::capture::MediaStream;
use crate::net::ExamClient;
use crate::session::SessionEvent;
use parking_lot::Mutex;
use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

/// Recorder-related errors
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Already recording")]
    AlreadyRecording,

    #[error("Encoder error: {0}")]
    Encoder(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type RecorderResult<T> = Result<T, RecorderError>;

/// Output codec, tried in preference order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Vp9Webm,
    Vp8Webm,
    Default,
}

impl Codec {
    /// Preference order: vp9-in-webm, plain webm, encoder default
    pub const PREFERENCE: [Codec; 3] = [Codec::Vp9Webm, Codec::Vp8Webm, Codec::Default];
}

/// Turns a media stream into an ordered sequence of byte chunks.
///
/// `stop` finalizes the encoder and must be idempotent; the chunk sender
/// is dropped when encoding ends so collectors see the end of the
/// sequence.
pub trait ChunkEncoder: Send + Sync {
    fn supports(&self, codec: Codec) -> bool;
    fn start(
        &self,
        codec: Codec,
        stream: Arc<MediaStream>,
        chunks: mpsc::UnboundedSender<Vec<u8>>,
    ) -> RecorderResult<()>;
    fn stop(&self);
}

/// Records chunks in memory and uploads the concatenated file on stop
pub struct LocalRecorder {
    encoder: Arc<dyn ChunkEncoder>,
    chunks: Arc<Mutex<Vec<Vec<u8>>>>,
    recording: AtomicBool,
    collector: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl LocalRecorder {
    pub fn new(encoder: Arc<dyn ChunkEncoder>) -> Self {
        Self {
            encoder,
            chunks: Arc::new(Mutex::new(Vec::new())),
            recording: AtomicBool::new(false),
            collector: Mutex::new(None),
        }
    }

    /// Begin recording `stream` into in-memory chunks.
    pub fn start(&self, stream: Arc<MediaStream>) -> RecorderResult<()> {
        if self.recording.swap(true, Ordering::SeqCst) {
            return Err(RecorderError::AlreadyRecording);
        }
        self.chunks.lock().clear();

        let codec = Codec::PREFERENCE
            .into_iter()
            .find(|c| self.encoder.supports(*c))
            .unwrap_or(Codec::Default);

        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Err(e) = self.encoder.start(codec, stream, tx) {
            self.recording.store(false, Ordering::SeqCst);
            return Err(e);
        }

        let chunks = self.chunks.clone();
        *self.collector.lock() = Some(tokio::spawn(async move {
            while let Some(chunk) = rx.recv().await {
                if !chunk.is_empty() {
                    chunks.lock().push(chunk);
                }
            }
        }));

        tracing::info!("Local recording started ({codec:?})");
        Ok(())
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    pub fn has_chunks(&self) -> bool {
        !self.chunks.lock().is_empty()
    }

    /// Finalize the recording and dispatch a detached upload of the
    /// concatenated chunks. Returns the upload task handle when anything
    /// was recorded; the caller may wait briefly on it but submission
    /// never depends on the outcome. Chunks are discarded either way.
    pub async fn stop_and_upload(
        &self,
        client: Arc<ExamClient>,
        exam_id: i64,
        student_id: i64,
        events: broadcast::Sender<SessionEvent>,
    ) -> Option<tokio::task::JoinHandle<()>> {
        if !self.recording.swap(false, Ordering::SeqCst) {
            return None;
        }
        self.encoder.stop();

        // The encoder dropped its sender; drain whatever is left. The
        // guard must not be held across the await.
        let collector = self.collector.lock().take();
        if let Some(collector) = collector {
            let _ = collector.await;
        }

        let data: Vec<u8> = {
            let mut chunks = self.chunks.lock();
            let data = chunks.concat();
            chunks.clear();
            data
        };
        if data.is_empty() {
            tracing::debug!("No recorded chunks to upload");
            return None;
        }

        tracing::info!(
            "Uploading session recording ({} bytes, exam {exam_id}, student {student_id})",
            data.len()
        );
        Some(tokio::spawn(async move {
            match client.upload_video(exam_id, student_id, data).await {
                Ok(url) => {
                    tracing::info!("Recording uploaded: {url}");
                    let _ = events.send(SessionEvent::VideoUploaded { url });
                }
                Err(e) => {
                    tracing::warn!("Recording upload failed: {e}");
                    let _ = events.send(SessionEvent::VideoUploadFailed {
                        message: e.to_string(),
                    });
                }
            }
        }))
    }

    /// Tear down without uploading. Safe when never started or already
    /// stopped.
    pub fn abort(&self) {
        if self.recording.swap(false, Ordering::SeqCst) {
            self.encoder.stop();
        }
        if let Some(collector) = self.collector.lock().take() {
            collector.abort();
        }
        self.chunks.lock().clear();
    }
}

/// FFmpeg-backed encoder: feeds raw RGB frames to an ffmpeg child process
/// and chunks its webm output roughly per second of wall time.
pub struct FfmpegEncoder {
    fps: u32,
    running: Arc<AtomicBool>,
    process: Arc<Mutex<Option<Child>>>,
    threads: Mutex<Vec<std::thread::JoinHandle<()>>>,
}

impl FfmpegEncoder {
    pub fn new(fps: u32) -> Self {
        Self {
            fps,
            running: Arc::new(AtomicBool::new(false)),
            process: Arc::new(Mutex::new(None)),
            threads: Mutex::new(Vec::new()),
        }
    }

    fn ffmpeg_available() -> bool {
        Command::new("ffmpeg")
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn video_codec_args(codec: Codec) -> &'static [&'static str] {
        match codec {
            Codec::Vp9Webm => &["-c:v", "libvpx-vp9", "-deadline", "realtime", "-f", "webm"],
            Codec::Vp8Webm => &["-c:v", "libvpx", "-deadline", "realtime", "-f", "webm"],
            Codec::Default => &["-f", "webm"],
        }
    }
}

impl ChunkEncoder for FfmpegEncoder {
    fn supports(&self, codec: Codec) -> bool {
        match codec {
            Codec::Vp9Webm | Codec::Vp8Webm => Self::ffmpeg_available(),
            Codec::Default => Self::ffmpeg_available(),
        }
    }

    fn start(
        &self,
        codec: Codec,
        stream: Arc<MediaStream>,
        chunks: mpsc::UnboundedSender<Vec<u8>>,
    ) -> RecorderResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(RecorderError::AlreadyRecording);
        }

        // Need a frame to size the encoder input
        let first = stream
            .latest_frame()
            .ok_or_else(|| RecorderError::Encoder("no frame available yet".to_string()))?;
        let (width, height) = (first.width, first.height);

        let video_size = format!("{width}x{height}");
        let framerate = self.fps.to_string();
        let mut child = Command::new("ffmpeg")
            .args([
                "-y",
                "-f",
                "rawvideo",
                "-pixel_format",
                "rgb24",
                "-video_size",
                video_size.as_str(),
                "-framerate",
                framerate.as_str(),
                "-i",
                "-",
            ])
            .args(Self::video_codec_args(codec))
            .arg("pipe:1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| RecorderError::Encoder(format!("failed to spawn ffmpeg: {e}")))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| RecorderError::Encoder("no ffmpeg stdin".to_string()))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| RecorderError::Encoder("no ffmpeg stdout".to_string()))?;
        *self.process.lock() = Some(child);

        let frame_period = Duration::from_millis(1000 / u64::from(self.fps.max(1)));
        let running = self.running.clone();
        let feeder = std::thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                if let Some(frame) = stream.latest_frame() {
                    if frame.width == width && frame.height == height {
                        if stdin.write_all(&frame.rgb).is_err() {
                            break;
                        }
                    }
                }
                std::thread::sleep(frame_period);
            }
            // Dropping stdin signals EOF so ffmpeg finalizes the container
            drop(stdin);
        });

        let reader = std::thread::spawn(move || {
            let mut pending: Vec<u8> = Vec::new();
            let mut buf = [0u8; 16 * 1024];
            let mut last_flush = Instant::now();
            loop {
                match stdout.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        pending.extend_from_slice(&buf[..n]);
                        if last_flush.elapsed() >= Duration::from_secs(1) {
                            if chunks.send(std::mem::take(&mut pending)).is_err() {
                                return;
                            }
                            last_flush = Instant::now();
                        }
                    }
                    Err(e) => {
                        tracing::warn!("ffmpeg output read failed: {e}");
                        break;
                    }
                }
            }
            if !pending.is_empty() {
                let _ = chunks.send(pending);
            }
        });

        let mut threads = self.threads.lock();
        threads.push(feeder);
        threads.push(reader);

        tracing::info!("FFmpeg chunk encoder started ({width}x{height} @ {}fps)", self.fps);
        Ok(())
    }

    /// Stops feeding and hands finalization to a dedicated thread so the
    /// caller (the async submission path) never blocks on ffmpeg. The
    /// chunk sender is dropped once the reader thread drains the last
    /// output, which is what collectors wait on.
    fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let threads: Vec<_> = self.threads.lock().drain(..).collect();
        let process = self.process.lock().take();
        std::thread::spawn(move || {
            for thread in threads {
                let _ = thread.join();
            }
            if let Some(mut child) = process {
                match child.wait() {
                    Ok(status) if !status.success() => {
                        tracing::warn!("ffmpeg exited with status {status}");
                    }
                    Err(e) => tracing::warn!("ffmpeg wait failed: {e}"),
                    _ => {}
                }
            }
        });
    }
}

/// Encoder that passes fixed chunks through without touching the stream.
/// For development hosts without ffmpeg and for tests.
pub struct PassthroughEncoder {
    sender: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    chunk: Vec<u8>,
}

impl PassthroughEncoder {
    pub fn new(chunk: Vec<u8>) -> Self {
        Self {
            sender: Mutex::new(None),
            chunk,
        }
    }
}

impl ChunkEncoder for PassthroughEncoder {
    fn supports(&self, _codec: Codec) -> bool {
        true
    }

    fn start(
        &self,
        _codec: Codec,
        _stream: Arc<MediaStream>,
        chunks: mpsc::UnboundedSender<Vec<u8>>,
    ) -> RecorderResult<()> {
        let _ = chunks.send(self.chunk.clone());
        *self.sender.lock() = Some(chunks);
        Ok(())
    }

    fn stop(&self) {
        if let Some(sender) = self.sender.lock().take() {
            let _ = sender.send(self.chunk.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureManager, MediaConstraints};

    #[tokio::test]
    async fn double_start_is_rejected() {
        let manager = CaptureManager::synthetic();
        let stream = manager.acquire(&MediaConstraints::default()).unwrap();
        let recorder = LocalRecorder::new(Arc::new(PassthroughEncoder::new(vec![1, 2, 3])));

        recorder.start(stream.clone()).unwrap();
        assert!(matches!(
            recorder.start(stream.clone()),
            Err(RecorderError::AlreadyRecording)
        ));
        recorder.abort();
        manager.release(&stream);
    }

    #[tokio::test]
    async fn abort_is_idempotent_and_safe_when_never_started() {
        let recorder = LocalRecorder::new(Arc::new(PassthroughEncoder::new(vec![9])));
        recorder.abort();
        recorder.abort();
        assert!(!recorder.is_recording());
    }

    #[tokio::test]
    async fn chunks_accumulate_and_clear_after_stop() {
        let manager = CaptureManager::synthetic();
        let stream = manager.acquire(&MediaConstraints::default()).unwrap();
        let recorder = LocalRecorder::new(Arc::new(PassthroughEncoder::new(vec![7, 7])));
        let (events, _keepalive) = broadcast::channel(16);

        recorder.start(stream.clone()).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(recorder.has_chunks());

        // Upload target does not exist; the task reports failure as an
        // event without propagating an error
        let client = Arc::new(ExamClient::new("http://127.0.0.1:1", None));
        let mut rx = events.subscribe();
        let upload = recorder
            .stop_and_upload(client, 1, 2, events.clone())
            .await
            .expect("chunks were recorded");
        upload.await.unwrap();

        assert!(matches!(
            rx.try_recv(),
            Ok(SessionEvent::VideoUploadFailed { .. })
        ));
        assert!(!recorder.has_chunks());
        manager.release(&stream);
    }

    /// Encoder whose finalization finishes after `stop` has returned,
    /// the way the ffmpeg encoder hands off to its finalizer thread.
    struct DeferredStopEncoder {
        sender: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    }

    impl ChunkEncoder for DeferredStopEncoder {
        fn supports(&self, _codec: Codec) -> bool {
            true
        }

        fn start(
            &self,
            _codec: Codec,
            _stream: Arc<MediaStream>,
            chunks: mpsc::UnboundedSender<Vec<u8>>,
        ) -> RecorderResult<()> {
            *self.sender.lock() = Some(chunks);
            Ok(())
        }

        fn stop(&self) {
            if let Some(sender) = self.sender.lock().take() {
                std::thread::spawn(move || {
                    std::thread::sleep(std::time::Duration::from_millis(100));
                    let _ = sender.send(vec![2; 8]);
                });
            }
        }
    }

    // Submission spawns onto worker tasks, so the whole stop path has to
    // stay a Send future; this fails to compile if a guard is ever held
    // across an await.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_and_upload_runs_on_a_spawned_task() {
        let manager = CaptureManager::synthetic();
        let stream = manager.acquire(&MediaConstraints::default()).unwrap();
        let recorder = Arc::new(LocalRecorder::new(Arc::new(PassthroughEncoder::new(vec![5]))));
        let (events, _keepalive) = broadcast::channel(16);

        recorder.start(stream.clone()).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let client = Arc::new(ExamClient::new("http://127.0.0.1:1", None));
        let spawned = {
            let recorder = recorder.clone();
            tokio::spawn(async move { recorder.stop_and_upload(client, 1, 2, events).await })
        };
        let upload = spawned.await.unwrap().expect("chunks were recorded");
        upload.await.unwrap();

        assert!(!recorder.has_chunks());
        manager.release(&stream);
    }

    #[tokio::test]
    async fn late_encoder_chunks_are_drained_before_upload() {
        let manager = CaptureManager::synthetic();
        let stream = manager.acquire(&MediaConstraints::default()).unwrap();
        let recorder = LocalRecorder::new(Arc::new(DeferredStopEncoder {
            sender: Mutex::new(None),
        }));
        let (events, _keepalive) = broadcast::channel(16);

        recorder.start(stream.clone()).unwrap();
        assert!(!recorder.has_chunks());

        // The only chunk lands after stop returns; getting an upload back
        // proves the drain waited for it
        let client = Arc::new(ExamClient::new("http://127.0.0.1:1", None));
        let upload = recorder
            .stop_and_upload(client, 1, 2, events)
            .await
            .expect("deferred chunk was drained");
        upload.await.unwrap();

        assert!(!recorder.has_chunks());
        manager.release(&stream);
    }

    #[tokio::test]
    async fn stop_without_chunks_skips_upload() {
        let manager = CaptureManager::synthetic();
        let stream = manager.acquire(&MediaConstraints::default()).unwrap();
        let recorder = LocalRecorder::new(Arc::new(PassthroughEncoder::new(Vec::new())));
        let (events, _keepalive) = broadcast::channel(16);

        recorder.start(stream.clone()).unwrap();
        let client = Arc::new(ExamClient::new("http://127.0.0.1:1", None));
        let upload = recorder.stop_and_upload(client, 1, 2, events).await;
        assert!(upload.is_none());
        manager.release(&stream);
    }
}
