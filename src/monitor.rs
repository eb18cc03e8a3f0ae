//! Integrity monitor
//!
//! Two independent signal sources feed one policy reducer: remote alerts
//! from the analysis service (first one is an immediate violation) and
//! local behavioral signals (tab switches and focus losses, which force
//! submission only at a count threshold). Handlers only enqueue typed
//! signals; all policy lives in the reducer task.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

use crate::session::{SessionEvent, SubmitGate};

/// Category of an integrity violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    EyeGaze,
    Voice,
    FacePresence,
    TabSwitch,
    FocusLoss,
}

impl ViolationKind {
    /// Wire name used by the force-submit endpoint
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EyeGaze => "eye_gaze",
            Self::Voice => "voice",
            Self::FacePresence => "face_presence",
            Self::TabSwitch => "tab_switch",
            Self::FocusLoss => "focus_loss",
        }
    }

    /// Infer the kind from remote alert text. Camera-centric fallback:
    /// unrecognized alerts count as gaze violations.
    fn from_alert(text: &str) -> Self {
        let lowered = text.to_lowercase();
        if lowered.contains("voice") || lowered.contains("audio") || lowered.contains("speak") {
            Self::Voice
        } else if lowered.contains("face") || lowered.contains("person") || lowered.contains("absent")
        {
            Self::FacePresence
        } else {
            Self::EyeGaze
        }
    }
}

/// A violation signal, consumed at most once by the controller
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationEvent {
    pub kind: ViolationKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
}

/// Typed signals enqueued by the thin handlers
#[derive(Debug, Clone)]
pub enum MonitorSignal {
    TabHidden,
    FocusLost,
    RemoteAlerts(Vec<String>),
}

/// Reducer state: `Violated` is terminal and idempotent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Monitoring,
    Violated,
}

/// Behavioral thresholds
#[derive(Debug, Clone, Copy)]
pub struct MonitorConfig {
    pub tab_switch_limit: u32,
    pub focus_loss_limit: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tab_switch_limit: 3,
            focus_loss_limit: 5,
        }
    }
}

/// Cheap cloneable handle for event producers. Handlers only enqueue;
/// they never touch counters or policy.
#[derive(Clone)]
pub struct MonitorHandle {
    tx: mpsc::UnboundedSender<MonitorSignal>,
}

impl MonitorHandle {
    pub fn tab_hidden(&self) {
        let _ = self.tx.send(MonitorSignal::TabHidden);
    }

    pub fn focus_lost(&self) {
        let _ = self.tx.send(MonitorSignal::FocusLost);
    }

    pub fn remote_alerts(&self, alerts: Vec<String>) {
        if !alerts.is_empty() {
            let _ = self.tx.send(MonitorSignal::RemoteAlerts(alerts));
        }
    }
}

struct Shared {
    state: Mutex<MonitorState>,
    tab_switches: AtomicU32,
    focus_losses: AtomicU32,
}

/// Tab-visibility/window-focus tracking and remote-alert policy
pub struct IntegrityMonitor {
    handle: MonitorHandle,
    shared: Arc<Shared>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl IntegrityMonitor {
    /// Start the reducer. Violations are delivered once on `violation_tx`;
    /// below-threshold warnings go out on the session event channel.
    /// Signals arriving after `Violated` or once the submit gate is
    /// entered are ignored.
    pub fn start(
        config: MonitorConfig,
        session_id: String,
        gate: Arc<SubmitGate>,
        violation_tx: mpsc::UnboundedSender<ViolationEvent>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            state: Mutex::new(MonitorState::Monitoring),
            tab_switches: AtomicU32::new(0),
            focus_losses: AtomicU32::new(0),
        });

        let reducer_shared = shared.clone();
        let task = tokio::spawn(async move {
            while let Some(signal) = rx.recv().await {
                if *reducer_shared.state.lock() == MonitorState::Violated || gate.is_entered() {
                    continue;
                }

                let violation = match signal {
                    MonitorSignal::TabHidden => {
                        let count = reducer_shared.tab_switches.fetch_add(1, Ordering::SeqCst) + 1;
                        if count >= config.tab_switch_limit {
                            Some((
                                ViolationKind::TabSwitch,
                                format!("Tab switched {count} times during the exam"),
                            ))
                        } else {
                            let _ = events.send(SessionEvent::IntegrityWarning {
                                kind: ViolationKind::TabSwitch,
                                count,
                                limit: config.tab_switch_limit,
                            });
                            None
                        }
                    }
                    MonitorSignal::FocusLost => {
                        let count = reducer_shared.focus_losses.fetch_add(1, Ordering::SeqCst) + 1;
                        if count >= config.focus_loss_limit {
                            Some((
                                ViolationKind::FocusLoss,
                                format!("Window focus lost {count} times during the exam"),
                            ))
                        } else {
                            let _ = events.send(SessionEvent::IntegrityWarning {
                                kind: ViolationKind::FocusLoss,
                                count,
                                limit: config.focus_loss_limit,
                            });
                            None
                        }
                    }
                    MonitorSignal::RemoteAlerts(alerts) => {
                        // No threshold: the first remote violation is terminal
                        let first = alerts.first().cloned().unwrap_or_default();
                        Some((ViolationKind::from_alert(&first), first))
                    }
                };

                if let Some((kind, message)) = violation {
                    *reducer_shared.state.lock() = MonitorState::Violated;
                    tracing::warn!("Integrity violation ({}): {}", kind.as_str(), message);
                    let _ = violation_tx.send(ViolationEvent {
                        kind,
                        message,
                        timestamp: Utc::now(),
                        session_id: session_id.clone(),
                    });
                }
            }
        });

        Self {
            handle: MonitorHandle { tx },
            shared,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn handle(&self) -> MonitorHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> MonitorState {
        *self.shared.state.lock()
    }

    pub fn tab_switch_count(&self) -> u32 {
        self.shared.tab_switches.load(Ordering::SeqCst)
    }

    pub fn focus_loss_count(&self) -> u32 {
        self.shared.focus_losses.load(Ordering::SeqCst)
    }

    /// Stop the reducer. Safe to call more than once.
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

impl Drop for IntegrityMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Route and unload guards for the exam page.
///
/// Any route change other than the post-submission destination is
/// canceled while the session is live; the unload prompt is suppressed
/// once submission is underway.
pub struct NavigationGuard {
    gate: Arc<SubmitGate>,
    exit_route: String,
}

impl NavigationGuard {
    pub fn new(gate: Arc<SubmitGate>, exit_route: impl Into<String>) -> Self {
        Self {
            gate,
            exit_route: exit_route.into(),
        }
    }

    /// Whether a route change to `target` is allowed.
    pub fn check_navigation(&self, target: &str) -> bool {
        self.gate.is_entered() && target == self.exit_route
    }

    /// Whether the browser-unload confirmation dialog should be shown.
    pub fn confirm_unload(&self) -> bool {
        !self.gate.is_entered()
    }
}
