// tests/pipeline.rs
//
// Cross-component tests driving the session controller against an
// in-process mock of the analysis and exam services.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use invigil::capture::CaptureManager;
use invigil::exam::NO_ANSWER;
use invigil::recorder::PassthroughEncoder;
use invigil::session::{SessionController, SessionEvent, SessionPhase, SubmitOutcome};
use invigil::storage::{MemoryStore, Viewport};
use invigil::PipelineConfig;

#[derive(Default)]
struct MockState {
    frame_posts: AtomicUsize,
    audio_posts: AtomicUsize,
    grade_calls: AtomicUsize,
    force_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    video_uploads: AtomicUsize,
    fail_session_start: AtomicBool,
    fail_frames: AtomicBool,
    // 0 = never; otherwise frames from this count on carry an alert
    alert_from_frame: AtomicUsize,
    duration_minutes: AtomicU32,
    last_grade_body: Mutex<Option<Value>>,
    last_force_body: Mutex<Option<Value>>,
}

impl MockState {
    fn new() -> Arc<Self> {
        let state = Self::default();
        state.duration_minutes.store(30, Ordering::SeqCst);
        Arc::new(state)
    }
}

async fn session_start(State(state): State<Arc<MockState>>) -> Response {
    if state.fail_session_start.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    Json(json!({ "sessionId": "mock-session-1" })).into_response()
}

async fn session_stop(State(state): State<Arc<MockState>>) -> StatusCode {
    state.stop_calls.fetch_add(1, Ordering::SeqCst);
    StatusCode::OK
}

async fn frame(State(state): State<Arc<MockState>>) -> Response {
    let count = state.frame_posts.fetch_add(1, Ordering::SeqCst) + 1;
    if state.fail_frames.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    let alert_from = state.alert_from_frame.load(Ordering::SeqCst);
    if alert_from > 0 && count >= alert_from {
        return Json(json!({ "alerts": ["Face not visible"] })).into_response();
    }
    Json(json!({})).into_response()
}

async fn audio(State(state): State<Arc<MockState>>) -> Json<Value> {
    state.audio_posts.fetch_add(1, Ordering::SeqCst);
    Json(json!({}))
}

async fn paper(State(state): State<Arc<MockState>>, Path(exam_id): Path<i64>) -> Json<Value> {
    Json(json!({
        "examId": exam_id,
        "examName": "Integration Exam",
        "subjectName": "Rust",
        "durationMinutes": state.duration_minutes.load(Ordering::SeqCst),
        "questions": [
            {
                "questionId": 1,
                "questionText": "First?",
                "answers": [{ "answerId": 11, "answerText": "A" }]
            },
            {
                "questionId": 2,
                "questionText": "Second?",
                "answers": [{ "answerId": 21, "answerText": "A" }]
            },
            {
                "questionId": 3,
                "questionText": "Third?",
                "answers": [{ "answerId": 31, "answerText": "A" }]
            }
        ]
    }))
}

async fn grade(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Json<Value> {
    state.grade_calls.fetch_add(1, Ordering::SeqCst);
    *state.last_grade_body.lock().unwrap() = Some(body);
    Json(json!({ "score": 8.0, "totalQuestions": 3, "correctAnswers": 2 }))
}

async fn force_submit(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Json<Value> {
    state.force_calls.fetch_add(1, Ordering::SeqCst);
    *state.last_force_body.lock().unwrap() = Some(body);
    Json(json!({ "score": 0.0, "totalQuestions": 3, "correctAnswers": 0 }))
}

async fn upload_video(State(state): State<Arc<MockState>>) -> String {
    state.video_uploads.fetch_add(1, Ordering::SeqCst);
    "http://cdn.example/exam-video.webm".to_string()
}

/// Spawn both mock services on one random port and return the base URL.
async fn spawn_services(state: Arc<MockState>) -> String {
    let app = Router::new()
        .route("/session/start", post(session_start))
        .route("/session/stop", post(session_stop))
        .route("/frame", post(frame))
        .route("/audio", post(audio))
        .route("/exam/paper/{exam_id}", get(paper))
        .route("/exam/grade", post(grade))
        .route("/exam/force-submit", post(force_submit))
        .route("/exam/upload-video", post(upload_video))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let address = format!("http://127.0.0.1:{}", listener.local_addr().unwrap().port());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    address
}

fn controller_with(base_url: &str, capture: CaptureManager) -> Arc<SessionController> {
    let config = PipelineConfig {
        analysis_base_url: base_url.to_string(),
        exam_base_url: base_url.to_string(),
        frame_interval_ms: 50,
        recorder_flush_ms: 500,
        ..PipelineConfig::default()
    };
    SessionController::new(
        config,
        capture,
        Arc::new(PassthroughEncoder::new(vec![0xAB; 64])),
        Arc::new(MemoryStore::new()),
        Viewport {
            width: 1280,
            height: 720,
        },
    )
}

fn controller(base_url: &str) -> Arc<SessionController> {
    controller_with(base_url, CaptureManager::synthetic())
}

async fn wait_for(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    condition()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remote_violation_forces_exactly_one_submission() {
    let state = MockState::new();
    state.alert_from_frame.store(2, Ordering::SeqCst);
    let base = spawn_services(state.clone()).await;
    let controller = controller(&base);
    let mut events = controller.subscribe();

    controller.start(7, 42).await.unwrap();
    assert_eq!(controller.phase(), SessionPhase::Active);
    assert!(controller.show_camera_preview());

    let submitted = wait_for(
        || state.force_calls.load(Ordering::SeqCst) >= 1,
        Duration::from_secs(10),
    )
    .await;
    assert!(submitted, "violation never forced a submission");

    // Let any racing triggers settle, then check the latch held
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(state.force_calls.load(Ordering::SeqCst), 1);
    assert_eq!(state.grade_calls.load(Ordering::SeqCst), 0);
    assert_eq!(controller.phase(), SessionPhase::Terminated);
    assert!(!controller.show_camera_preview());

    let body = state.last_force_body.lock().unwrap().clone().unwrap();
    assert_eq!(body["examId"], 7);
    assert_eq!(body["studentId"], 42);
    assert_eq!(body["violationType"], "face_presence");

    // The recorder had chunks, so the backup upload was dispatched
    assert_eq!(state.video_uploads.load(Ordering::SeqCst), 1);
    assert!(state.stop_calls.load(Ordering::SeqCst) >= 1);

    let mut saw_violation = false;
    let mut saw_navigate = false;
    while let Ok(event) = events.try_recv() {
        match event {
            SessionEvent::ViolationDetected(v) => {
                saw_violation = true;
                assert_eq!(v.kind.as_str(), "face_presence");
            }
            SessionEvent::NavigateTo { route } => {
                saw_navigate = true;
                assert_eq!(route, "/main/test-history");
            }
            _ => {}
        }
    }
    assert!(saw_violation);
    assert!(saw_navigate);

    controller.teardown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn session_start_failure_does_not_block_the_exam() {
    let state = MockState::new();
    state.fail_session_start.store(true, Ordering::SeqCst);
    let base = spawn_services(state.clone()).await;
    let controller = controller(&base);
    let mut events = controller.subscribe();

    controller.start(7, 42).await.unwrap();

    assert_eq!(controller.phase(), SessionPhase::Active);
    assert!(!controller.show_camera_preview());
    assert!(controller.snapshot().is_some());
    assert_eq!(controller.remaining_seconds(), 30 * 60);

    let mut saw_unavailable = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, SessionEvent::MonitoringUnavailable { .. }) {
            saw_unavailable = true;
        }
    }
    assert!(saw_unavailable);
    assert_eq!(state.frame_posts.load(Ordering::SeqCst), 0);

    // Manual submit with time remaining needs confirmation first
    controller.select_answer(2, 21);
    let outcome = controller.request_submit().await;
    assert!(matches!(outcome, SubmitOutcome::ConfirmationRequired { .. }));
    assert_eq!(state.grade_calls.load(Ordering::SeqCst), 0);

    controller.confirm_submit(false).await;
    assert_eq!(controller.phase(), SessionPhase::Active);
    assert_eq!(state.grade_calls.load(Ordering::SeqCst), 0);

    controller.confirm_submit(true).await;
    assert_eq!(state.grade_calls.load(Ordering::SeqCst), 1);
    assert_eq!(controller.phase(), SessionPhase::Terminated);

    let body = state.last_grade_body.lock().unwrap().clone().unwrap();
    let answers = body["answers"].as_array().unwrap();
    assert_eq!(answers.len(), 3);
    assert_eq!(answers[0]["answerId"], NO_ANSWER);
    assert_eq!(answers[1]["answerId"], 21);
    assert_eq!(answers[2]["answerId"], NO_ANSWER);

    controller.teardown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn denied_camera_leaves_exam_running_and_stops_the_remote_session() {
    let state = MockState::new();
    let base = spawn_services(state.clone()).await;
    let controller = controller_with(&base, CaptureManager::denied());
    let mut events = controller.subscribe();

    controller.start(7, 42).await.unwrap();

    // Capture failed after the remote session started: the exam proceeds
    // unmonitored and the orphaned session is closed
    assert_eq!(controller.phase(), SessionPhase::Active);
    assert!(!controller.show_camera_preview());
    assert!(controller.snapshot().is_some());

    let stopped = wait_for(
        || state.stop_calls.load(Ordering::SeqCst) >= 1,
        Duration::from_secs(5),
    )
    .await;
    assert!(stopped, "orphaned analysis session was never stopped");
    assert_eq!(state.frame_posts.load(Ordering::SeqCst), 0);
    assert_eq!(state.audio_posts.load(Ordering::SeqCst), 0);

    let mut saw_unavailable = false;
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::MonitoringUnavailable { reason } = event {
            saw_unavailable = true;
            assert!(reason.contains("denied"));
        }
    }
    assert!(saw_unavailable);

    // Submission still works without any media pipeline
    controller.confirm_submit(true).await;
    assert_eq!(state.grade_calls.load(Ordering::SeqCst), 1);
    assert_eq!(controller.phase(), SessionPhase::Terminated);
    assert_eq!(state.video_uploads.load(Ordering::SeqCst), 0);

    controller.teardown().await;
}

#[tokio::test(start_paused = true)]
async fn timer_expiry_submits_unanswered_paper_once() {
    let state = MockState::new();
    state.fail_session_start.store(true, Ordering::SeqCst);
    state.duration_minutes.store(1, Ordering::SeqCst);
    let base = spawn_services(state.clone()).await;
    let controller = controller(&base);

    controller.start(7, 42).await.unwrap();
    assert!(controller.remaining_seconds() <= 60);

    let submitted = wait_for(
        || state.grade_calls.load(Ordering::SeqCst) >= 1,
        Duration::from_secs(120),
    )
    .await;
    assert!(submitted, "countdown never triggered submission");
    assert_eq!(controller.remaining_seconds(), 0);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(state.grade_calls.load(Ordering::SeqCst), 1);
    assert_eq!(controller.phase(), SessionPhase::Terminated);

    let body = state.last_grade_body.lock().unwrap().clone().unwrap();
    let answers = body["answers"].as_array().unwrap();
    assert_eq!(answers.len(), 3);
    assert!(answers.iter().all(|a| a["answerId"] == NO_ANSWER));

    controller.teardown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_frame_posts_do_not_stop_the_stream() {
    let state = MockState::new();
    state.fail_frames.store(true, Ordering::SeqCst);
    let base = spawn_services(state.clone()).await;
    let controller = controller(&base);

    controller.start(7, 42).await.unwrap();

    let kept_going = wait_for(
        || state.frame_posts.load(Ordering::SeqCst) >= 3,
        Duration::from_secs(10),
    )
    .await;
    assert!(kept_going, "frame ticks stopped after failures");

    assert_eq!(controller.phase(), SessionPhase::Active);
    assert_eq!(state.grade_calls.load(Ordering::SeqCst), 0);
    assert_eq!(state.force_calls.load(Ordering::SeqCst), 0);

    controller.teardown().await;
    let settled = state.frame_posts.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(300)).await;
    // Teardown cancels the interval; only in-flight posts may still land
    assert!(state.frame_posts.load(Ordering::SeqCst) <= settled + 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn racing_manual_submissions_grade_once() {
    let state = MockState::new();
    state.fail_session_start.store(true, Ordering::SeqCst);
    let base = spawn_services(state.clone()).await;
    let controller = controller(&base);

    controller.start(7, 42).await.unwrap();

    let first = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.confirm_submit(true).await })
    };
    let second = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.confirm_submit(true).await })
    };
    first.await.unwrap();
    second.await.unwrap();

    assert_eq!(state.grade_calls.load(Ordering::SeqCst), 1);
    assert_eq!(controller.phase(), SessionPhase::Terminated);

    // Signals after termination are swallowed by the latched monitor
    if let Some(handle) = controller.monitor_handle() {
        for _ in 0..10 {
            handle.tab_hidden();
        }
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(state.force_calls.load(Ordering::SeqCst), 0);

    controller.teardown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn audio_chunks_reach_the_analysis_service() {
    let state = MockState::new();
    let base = spawn_services(state.clone()).await;
    let controller = controller(&base);

    controller.start(7, 42).await.unwrap();

    let streamed = wait_for(
        || state.audio_posts.load(Ordering::SeqCst) >= 2,
        Duration::from_secs(10),
    )
    .await;
    assert!(streamed, "no audio chunks arrived");

    controller.teardown().await;
}
