//! Shared context handed to every action handler

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::browser::{BrowserDriver, ElementRef, PageSnapshot};
use crate::errors::ActionError;
use crate::executor::EventManager;

/// Everything an action handler may touch. The snapshot slot is refreshed
/// by the engine each step; handlers must resolve element indices against
/// it and never cache references across steps.
#[derive(Clone)]
pub struct ActionContext {
    pub driver: Arc<dyn BrowserDriver>,
    pub snapshot: Arc<Mutex<Option<PageSnapshot>>>,
    pub events: EventManager,
    pub cancel: CancellationToken,
    pub task_id: String,
    pub step: usize,
}

impl ActionContext {
    /// Resolve a highlight index against the current snapshot. A missing
    /// snapshot or a stale/unknown index is an input error, not a driver
    /// error.
    pub async fn resolve_element(&self, index: u32) -> Result<ElementRef, ActionError> {
        let snapshot = self.snapshot.lock().await;
        let snapshot = snapshot
            .as_ref()
            .ok_or_else(|| ActionError::InvalidInput("no page snapshot available".into()))?;
        snapshot.resolve(index).ok_or_else(|| {
            ActionError::InvalidInput(format!(
                "element index {index} does not exist in the current page state"
            ))
        })
    }
}
