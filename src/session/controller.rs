//! Session controller
//!
//! Orchestrates one proctored attempt: fetches the paper, brings up the
//! monitoring pipeline best-effort, owns the selection map and overlay
//! position, and is the sole authority for "submit now". Submission entry
//! is guarded by the [`SubmitGate`] so timer expiry, violations, and the
//! student racing each other execute the terminal logic exactly once.

use super::events::SessionEvent;
use super::state::{Session, SessionPhase, SubmitGate, SubmitTrigger};
use crate::capture::{CaptureManager, MediaConstraints, MediaStream};
use crate::config::PipelineConfig;
use crate::exam::{ExamSnapshot, SelectionMap};
use crate::monitor::{
    IntegrityMonitor, MonitorConfig, MonitorHandle, NavigationGuard, ViolationEvent,
};
use crate::net::{best_effort, AnalysisClient, ExamClient};
use crate::recorder::{ChunkEncoder, LocalRecorder};
use crate::storage::{OverlayPosition, StateStore, Viewport};
use crate::streamer::{AudioStreamer, FrameStreamer};
use crate::timer::{format_clock, ExamTimer};
use crate::utils::error::{ProctorError, ProctorResult};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

/// Outcome of a manual submit request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Time remains; the UI must show a confirmation dialog first
    ConfirmationRequired { remaining: String },
    /// Submission executed (or was already underway)
    Submitted,
}

/// Owns the exam lifecycle and composes the pipeline components
pub struct SessionController {
    config: PipelineConfig,
    capture: CaptureManager,
    analysis: Arc<AnalysisClient>,
    exam_service: Arc<ExamClient>,
    store: Arc<dyn StateStore>,
    viewport: Viewport,

    phase: RwLock<SessionPhase>,
    gate: Arc<SubmitGate>,
    session: Mutex<Option<Session>>,
    snapshot: RwLock<Option<Arc<ExamSnapshot>>>,
    selections: Mutex<SelectionMap>,
    overlay: Mutex<OverlayPosition>,
    stream: Mutex<Option<Arc<MediaStream>>>,

    frame_streamer: FrameStreamer,
    audio_streamer: AudioStreamer,
    recorder: LocalRecorder,
    monitor: Mutex<Option<IntegrityMonitor>>,
    timer: ExamTimer,

    monitoring_active: AtomicBool,
    show_camera_preview: AtomicBool,
    events: broadcast::Sender<SessionEvent>,
    arbiter: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl SessionController {
    pub fn new(
        config: PipelineConfig,
        capture: CaptureManager,
        encoder: Arc<dyn ChunkEncoder>,
        store: Arc<dyn StateStore>,
        viewport: Viewport,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(100);
        let analysis = Arc::new(AnalysisClient::new(
            config.analysis_base_url.clone(),
            config.bearer_token.clone(),
        ));
        let exam_service = Arc::new(ExamClient::new(
            config.exam_base_url.clone(),
            config.bearer_token.clone(),
        ));

        Arc::new(Self {
            frame_streamer: FrameStreamer::new(config.frame_interval(), config.jpeg_quality),
            audio_streamer: AudioStreamer::new(config.audio_target_rate),
            recorder: LocalRecorder::new(encoder),
            timer: ExamTimer::new(),
            config,
            capture,
            analysis,
            exam_service,
            store,
            viewport,
            phase: RwLock::new(SessionPhase::Idle),
            gate: Arc::new(SubmitGate::new()),
            session: Mutex::new(None),
            snapshot: RwLock::new(None),
            selections: Mutex::new(SelectionMap::new()),
            overlay: Mutex::new(OverlayPosition::default_for(viewport)),
            stream: Mutex::new(None),
            monitor: Mutex::new(None),
            monitoring_active: AtomicBool::new(false),
            show_camera_preview: AtomicBool::new(false),
            events,
            arbiter: Mutex::new(None),
        })
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.read()
    }

    pub fn snapshot(&self) -> Option<Arc<ExamSnapshot>> {
        self.snapshot.read().clone()
    }

    pub fn remaining_seconds(&self) -> u64 {
        self.timer.remaining_seconds()
    }

    pub fn remaining_clock(&self) -> String {
        format_clock(self.timer.remaining_seconds())
    }

    pub fn show_camera_preview(&self) -> bool {
        self.show_camera_preview.load(Ordering::SeqCst)
    }

    /// Handle for the host's visibility/focus event handlers. None until
    /// the session has started.
    pub fn monitor_handle(&self) -> Option<MonitorHandle> {
        self.monitor.lock().as_ref().map(|m| m.handle())
    }

    /// Route/unload guard bound to this session's submit latch
    pub fn navigation_guard(&self) -> NavigationGuard {
        NavigationGuard::new(self.gate.clone(), self.config.exit_route.clone())
    }

    /// Start the session: fetch the paper, start the countdown, then
    /// bring up anti-cheat monitoring best-effort. A failed remote
    /// session start or media acquisition never blocks the exam.
    pub async fn start(self: &Arc<Self>, exam_id: i64, student_id: i64) -> ProctorResult<()> {
        {
            let mut phase = self.phase.write();
            if *phase != SessionPhase::Idle {
                return Err(ProctorError::Session(format!(
                    "cannot start from phase {:?}",
                    *phase
                )));
            }
            *phase = SessionPhase::Initializing;
        }

        let local_session_id = uuid::Uuid::new_v4().to_string();
        *self.session.lock() = Some(Session {
            session_id: local_session_id.clone(),
            exam_id,
            student_id,
            started_at: chrono::Utc::now(),
        });
        *self.overlay.lock() = OverlayPosition::load(self.store.as_ref(), self.viewport);

        // The paper is a hard requirement; everything else is best-effort
        let snapshot = Arc::new(self.exam_service.fetch_paper(exam_id).await.map_err(|e| {
            *self.phase.write() = SessionPhase::Idle;
            ProctorError::from(e)
        })?);
        let duration_minutes = snapshot.duration_minutes;
        *self.snapshot.write() = Some(snapshot);

        let (violation_tx, violation_rx) = mpsc::unbounded_channel::<ViolationEvent>();
        let (expired_tx, expired_rx) = mpsc::unbounded_channel::<()>();

        // Local behavioral monitoring runs regardless of remote availability
        let monitor = IntegrityMonitor::start(
            MonitorConfig {
                tab_switch_limit: self.config.tab_switch_limit,
                focus_loss_limit: self.config.focus_loss_limit,
            },
            local_session_id,
            self.gate.clone(),
            violation_tx,
            self.events.clone(),
        );
        let monitor_handle = monitor.handle();
        *self.monitor.lock() = Some(monitor);

        self.timer.start(duration_minutes, expired_tx);
        self.spawn_arbiter(violation_rx, expired_rx);

        self.initialize_anti_cheat(exam_id, student_id, monitor_handle)
            .await;

        {
            // Submission may already have begun (zero-length exams, an
            // instant violation); never walk the phase backwards
            let mut phase = self.phase.write();
            if !self.gate.is_entered() {
                *phase = SessionPhase::Active;
            }
        }
        tracing::info!("Session active (exam {exam_id}, student {student_id}, {duration_minutes} min)");
        Ok(())
    }

    fn spawn_arbiter(
        self: &Arc<Self>,
        mut violation_rx: mpsc::UnboundedReceiver<ViolationEvent>,
        mut expired_rx: mpsc::UnboundedReceiver<()>,
    ) {
        let controller = self.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    violation = violation_rx.recv() => match violation {
                        Some(violation) => {
                            controller
                                .submit_internal(SubmitTrigger::Violation(violation))
                                .await;
                        }
                        None => break,
                    },
                    expired = expired_rx.recv() => match expired {
                        Some(()) => {
                            controller.submit_internal(SubmitTrigger::TimerExpired).await;
                        }
                        None => break,
                    },
                }
            }
        });
        *self.arbiter.lock() = Some(task);
    }

    /// Best-effort anti-cheat bring-up. On remote session-start failure
    /// the media/streaming pipeline is skipped entirely; on capture
    /// failure the exam proceeds without monitoring but the UI is told.
    async fn initialize_anti_cheat(
        &self,
        exam_id: i64,
        student_id: i64,
        monitor_handle: MonitorHandle,
    ) {
        let session_id = match self.analysis.start_session(exam_id, student_id).await {
            Ok(sid) => sid,
            Err(e) => {
                tracing::warn!("Anti-cheat session start failed, exam proceeds unmonitored: {e}");
                let _ = self.events.send(SessionEvent::MonitoringUnavailable {
                    reason: e.to_string(),
                });
                return;
            }
        };
        if let Some(session) = self.session.lock().as_mut() {
            session.session_id = session_id.clone();
        }

        let stream = match self.capture.acquire(&MediaConstraints::default()) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!("Media acquisition failed, exam proceeds unmonitored: {e}");
                let _ = self.events.send(SessionEvent::MonitoringUnavailable {
                    reason: e.to_string(),
                });
                // The remote session was started but cannot be fed
                best_effort(
                    "session stop",
                    self.analysis.stop_session(&session_id).await,
                );
                return;
            }
        };

        self.frame_streamer.start(
            stream.clone(),
            session_id.clone(),
            self.analysis.clone(),
            monitor_handle.clone(),
            self.events.clone(),
        );
        self.audio_streamer.start(
            stream.clone(),
            session_id,
            self.analysis.clone(),
            monitor_handle,
            self.events.clone(),
        );
        if let Err(e) = self.recorder.start(stream.clone()) {
            // Recording is an audit artifact, not a session requirement
            tracing::warn!("Local recording failed to start: {e}");
        }

        *self.stream.lock() = Some(stream);
        self.monitoring_active.store(true, Ordering::SeqCst);
        self.show_camera_preview.store(true, Ordering::SeqCst);
        let _ = self.events.send(SessionEvent::MonitoringStarted);
        let _ = self.events.send(SessionEvent::CameraPreview { visible: true });
    }

    /// Record the student's answer choice. Ignored outside `Active`.
    pub fn select_answer(&self, question_id: i64, answer_id: i64) {
        if *self.phase.read() == SessionPhase::Active {
            self.selections.lock().select(question_id, answer_id);
        }
    }

    pub fn overlay_position(&self) -> OverlayPosition {
        *self.overlay.lock()
    }

    /// Update the overlay position during a drag (clamped, not persisted).
    pub fn drag_overlay(&self, position: OverlayPosition) {
        *self.overlay.lock() = position.clamped(self.viewport);
    }

    /// Finish a drag: clamp, store, and persist.
    pub fn end_overlay_drag(&self, position: OverlayPosition) {
        let clamped = position.clamped(self.viewport);
        *self.overlay.lock() = clamped;
        clamped.save(self.store.as_ref());
    }

    /// Student clicked submit. With time remaining this returns a
    /// confirmation request (and emits the matching event); the UI calls
    /// [`confirm_submit`](Self::confirm_submit) with the student's answer.
    pub async fn request_submit(self: &Arc<Self>) -> SubmitOutcome {
        if self.gate.is_entered() {
            return SubmitOutcome::Submitted;
        }
        let remaining = self.timer.remaining_seconds();
        if remaining > 0 {
            let remaining = format_clock(remaining);
            let _ = self.events.send(SessionEvent::ConfirmSubmit {
                remaining: remaining.clone(),
            });
            return SubmitOutcome::ConfirmationRequired { remaining };
        }
        self.submit_internal(SubmitTrigger::Manual).await;
        SubmitOutcome::Submitted
    }

    /// Resolve the confirmation dialog. `false` keeps the session active.
    pub async fn confirm_submit(self: &Arc<Self>, confirmed: bool) {
        if confirmed {
            self.submit_internal(SubmitTrigger::Manual).await;
        }
    }

    /// The terminal submission path. Latched: every trigger after the
    /// first is a silent no-op.
    async fn submit_internal(&self, trigger: SubmitTrigger) {
        if !self.gate.try_enter() {
            tracing::debug!("Duplicate submission attempt ignored");
            return;
        }
        *self.phase.write() = SessionPhase::Submitting;

        let violation = match &trigger {
            SubmitTrigger::Violation(violation) => {
                let _ = self
                    .events
                    .send(SessionEvent::ViolationDetected(violation.clone()));
                Some(violation.clone())
            }
            _ => None,
        };
        tracing::info!(
            "Submitting exam ({})",
            match &trigger {
                SubmitTrigger::Manual => "manual",
                SubmitTrigger::TimerExpired => "time expired",
                SubmitTrigger::Violation(_) => "violation",
            }
        );

        self.timer.stop();

        let (exam_id, student_id, session_id) = {
            let session = self.session.lock();
            match session.as_ref() {
                Some(s) => (s.exam_id, s.student_id, s.session_id.clone()),
                None => {
                    tracing::error!("Submission with no session");
                    *self.phase.write() = SessionPhase::Terminated;
                    return;
                }
            }
        };

        // Stop the recorder first and give its upload a bounded window to
        // be dispatched; grading never depends on the outcome.
        if let Some(upload) = self
            .recorder
            .stop_and_upload(
                self.exam_service.clone(),
                exam_id,
                student_id,
                self.events.clone(),
            )
            .await
        {
            let _ = tokio::time::timeout(self.config.recorder_flush(), upload).await;
        }

        self.frame_streamer.stop();
        self.audio_streamer.stop();
        if self.monitoring_active.swap(false, Ordering::SeqCst) {
            best_effort("session stop", self.analysis.stop_session(&session_id).await);
        }
        if let Some(stream) = self.stream.lock().take() {
            self.capture.release(&stream);
        }
        self.show_camera_preview.store(false, Ordering::SeqCst);
        let _ = self.events.send(SessionEvent::CameraPreview { visible: false });

        let answers = {
            let snapshot = self.snapshot.read();
            let questions = snapshot.as_ref().map(|s| s.questions.as_slice()).unwrap_or(&[]);
            self.selections.lock().payload(questions)
        };

        let result = match &violation {
            Some(violation) => {
                self.exam_service
                    .force_submit(exam_id, student_id, violation.kind.as_str())
                    .await
            }
            None => self.exam_service.grade(exam_id, student_id, &answers).await,
        };

        match result {
            Ok(grade) => {
                tracing::info!(
                    "Exam graded: {} ({}/{})",
                    grade.score,
                    grade.correct_answers,
                    grade.total_questions
                );
                let _ = self.events.send(SessionEvent::Graded(grade));
            }
            Err(e) => {
                // Terminal: no retry, surfaced to the student
                tracing::error!("Grading failed: {e}");
                let _ = self.events.send(SessionEvent::GradingFailed {
                    message: e.to_string(),
                });
            }
        }

        *self.phase.write() = SessionPhase::Terminated;
        let _ = self.events.send(SessionEvent::NavigateTo {
            route: self.config.exit_route.clone(),
        });
    }

    /// Exhaustive cancellation on page teardown: timers, tasks, tracks,
    /// and listeners all go, and the overlay position is persisted.
    /// Idempotent.
    pub async fn teardown(&self) {
        self.timer.stop();
        self.frame_streamer.stop();
        self.audio_streamer.stop();
        self.recorder.abort();
        if let Some(monitor) = self.monitor.lock().take() {
            monitor.stop();
        }
        if let Some(task) = self.arbiter.lock().take() {
            task.abort();
        }

        let session_id = self.session.lock().as_ref().map(|s| s.session_id.clone());
        if self.monitoring_active.swap(false, Ordering::SeqCst) {
            if let Some(session_id) = session_id {
                best_effort("session stop", self.analysis.stop_session(&session_id).await);
            }
        }
        if let Some(stream) = self.stream.lock().take() {
            self.capture.release(&stream);
        }
        self.show_camera_preview.store(false, Ordering::SeqCst);

        self.overlay.lock().save(self.store.as_ref());
        *self.session.lock() = None;
        tracing::debug!("Session torn down");
    }
}
