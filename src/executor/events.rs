//! Execution state events
//!
//! Every externally observable lifecycle transition (task, step, action) is
//! fanned out to registered subscribers. Subscribers are synchronous and
//! cheap; anything heavy belongs in its own task.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

/// Which component emitted an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    Manager,
    Planner,
    Navigator,
    Validator,
}

/// Lifecycle transition kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    TaskStart,
    TaskOk,
    TaskFail,
    TaskCancel,
    TaskPause,
    TaskResume,
    StepStart,
    StepOk,
    StepFail,
    ActStart,
    ActOk,
    ActFail,
}

/// One emitted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub state: ExecutionState,
    pub actor: Actor,
    pub task_id: String,
    pub step: usize,
    pub details: String,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionEvent {
    pub fn new(
        state: ExecutionState,
        actor: Actor,
        task_id: impl Into<String>,
        step: usize,
        details: impl Into<String>,
    ) -> Self {
        Self {
            state,
            actor,
            task_id: task_id.into(),
            step,
            details: details.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Subscriber callback.
pub type EventCallback = Arc<dyn Fn(&ExecutionEvent) + Send + Sync>;

/// Fan-out hub for execution events. Cloning shares the subscriber list.
#[derive(Clone, Default)]
pub struct EventManager {
    subscribers: Arc<Mutex<Vec<EventCallback>>>,
}

impl EventManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, callback: EventCallback) {
        self.subscribers
            .lock()
            .expect("event subscriber lock poisoned")
            .push(callback);
    }

    pub fn emit(&self, event: ExecutionEvent) {
        let subscribers = self
            .subscribers
            .lock()
            .expect("event subscriber lock poisoned");
        for subscriber in subscribers.iter() {
            subscriber(&event);
        }
    }
}

/// Subscriber that mirrors every event into the tracing log, matching the
/// severity to the event kind.
pub fn tracing_event_logger() -> EventCallback {
    Arc::new(|event: &ExecutionEvent| {
        match event.state {
            ExecutionState::TaskFail | ExecutionState::StepFail => {
                error!(task = %event.task_id, step = event.step, actor = ?event.actor,
                       state = ?event.state, "{}", event.details);
            }
            ExecutionState::ActFail | ExecutionState::TaskCancel => {
                warn!(task = %event.task_id, step = event.step, actor = ?event.actor,
                      state = ?event.state, "{}", event.details);
            }
            ExecutionState::TaskStart | ExecutionState::TaskOk => {
                info!(task = %event.task_id, step = event.step, actor = ?event.actor,
                      state = ?event.state, "{}", event.details);
            }
            _ => {
                debug!(task = %event.task_id, step = event.step, actor = ?event.actor,
                       state = ?event.state, "{}", event.details);
            }
        }
    })
}
