//! Task identity and control flags

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// Grace period between a stop request and firing the cancellation token,
/// letting an in-flight model call finish classification cleanly.
const STOP_GRACE: Duration = Duration::from_millis(300);

/// How often a paused loop re-checks its flags.
pub(crate) const PAUSE_POLL: Duration = Duration::from_millis(500);

/// Where a task currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Idle,
    Running,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

/// One task as the engine tracks it.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub instructions: String,
    pub step: usize,
    pub final_answer: Option<String>,
}

impl Task {
    pub fn new(instructions: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            instructions: instructions.into(),
            step: 0,
            final_answer: None,
        }
    }
}

/// Shared pause/stop control for one running task. Cloneable so callers can
/// hold a handle while the loop runs.
#[derive(Debug, Clone, Default)]
pub struct TaskControl {
    paused: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl TaskControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn pause(&self) {
        debug!("pause requested");
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        debug!("resume requested");
        self.paused.store(false, Ordering::SeqCst);
    }

    /// Request a stop. The stop flag is visible immediately; the hard
    /// cancellation token fires after a short grace period.
    pub fn stop(&self) {
        debug!("stop requested");
        self.stopped.store(true, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(STOP_GRACE).await;
            cancel.cancel();
        });
    }

    /// Block while paused, returning early when a stop arrives. Returns
    /// true when execution should continue.
    pub async fn wait_if_paused(&self) -> bool {
        while self.is_paused() {
            if self.is_stopped() {
                return false;
            }
            tokio::time::sleep(PAUSE_POLL).await;
        }
        !self.is_stopped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stop_flag_is_immediate_cancellation_is_deferred() {
        let control = TaskControl::new();
        control.stop();
        assert!(control.is_stopped());
        assert!(!control.cancel_token().is_cancelled());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(control.cancel_token().is_cancelled());
    }

    #[tokio::test]
    async fn stop_while_paused_unblocks_the_loop() {
        let control = TaskControl::new();
        control.pause();
        let waiter = control.clone();
        let handle = tokio::spawn(async move { waiter.wait_if_paused().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        control.stop();
        assert!(!handle.await.unwrap());
    }

    #[tokio::test]
    async fn resume_continues_execution() {
        let control = TaskControl::new();
        control.pause();
        let waiter = control.clone();
        let handle = tokio::spawn(async move { waiter.wait_if_paused().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        control.resume();
        assert!(handle.await.unwrap());
    }
}
