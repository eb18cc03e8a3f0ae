//! Exam countdown timer
//!
//! A one-second tokio interval decrements the remaining time; reaching
//! zero signals expiry exactly once and stops the interval. The task is
//! independent of any UI render path and of in-flight captures or posts.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Format seconds as a mm:ss clock
pub fn format_clock(total_seconds: u64) -> String {
    format!("{:02}:{:02}", total_seconds / 60, total_seconds % 60)
}

/// Countdown clock driving auto-submit
pub struct ExamTimer {
    remaining: Arc<AtomicU64>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ExamTimer {
    pub fn new() -> Self {
        Self {
            remaining: Arc::new(AtomicU64::new(0)),
            task: Mutex::new(None),
        }
    }

    /// Start counting down from `duration_minutes`. A single message is
    /// sent on `expired_tx` when the clock reaches zero. Restarting an
    /// already-running timer replaces it.
    pub fn start(&self, duration_minutes: u32, expired_tx: mpsc::UnboundedSender<()>) {
        self.stop();

        let seconds = u64::from(duration_minutes) * 60;
        self.remaining.store(seconds, Ordering::SeqCst);

        let remaining = self.remaining.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let now = remaining.load(Ordering::SeqCst);
                if now == 0 {
                    break;
                }
                let left = now - 1;
                remaining.store(left, Ordering::SeqCst);
                if left == 0 {
                    tracing::info!("Exam time expired");
                    let _ = expired_tx.send(());
                    break;
                }
            }
        });
        *self.task.lock() = Some(task);
    }

    pub fn remaining_seconds(&self) -> u64 {
        self.remaining.load(Ordering::SeqCst)
    }

    /// Stop ticking. Safe to call when never started or already stopped.
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

impl Default for ExamTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ExamTimer {
    fn drop(&mut self) {
        self.stop();
    }
}
