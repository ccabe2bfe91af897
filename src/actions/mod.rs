//! Action framework
//!
//! A closed registry of named, schema-validated operations. The registry is
//! built once at startup; dispatch is a whitelist lookup, never an
//! arbitrary string. One combined schema lets a model turn name at most one
//! action per entry without per-action calls.

mod builtin;
mod context;

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

pub use builtin::ScrollDirection;
pub use context::ActionContext;

use crate::errors::ActionError;
use crate::executor::{Actor, ExecutionEvent, ExecutionState};

/// Outcome of one executed action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether the result payload should survive follow-up folding. Routine
    /// confirmations are shown to the model once and folded away; extracted
    /// findings stay in memory for the rest of the session.
    pub include_in_memory: bool,
    /// Set by the `done` action to short-circuit the remaining actions of
    /// the same turn.
    #[serde(default)]
    pub is_done: bool,
    /// Highlight index of the element this action interacted with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interacted_index: Option<u32>,
}

impl ActionResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            extracted_content: None,
            error: None,
            include_in_memory: false,
            is_done: false,
            interacted_index: None,
        }
    }

    /// Success with a transient confirmation message.
    pub fn ok_with(content: impl Into<String>) -> Self {
        Self {
            extracted_content: Some(content.into()),
            ..Self::ok()
        }
    }

    /// Success with content worth keeping beyond the current task.
    pub fn ok_retained(content: impl Into<String>) -> Self {
        Self {
            include_in_memory: true,
            ..Self::ok_with(content)
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            extracted_content: None,
            error: Some(error.into()),
            include_in_memory: false,
            is_done: false,
            interacted_index: None,
        }
    }

    pub fn done(text: impl Into<String>, success: bool) -> Self {
        Self {
            success,
            extracted_content: Some(text.into()),
            error: None,
            include_in_memory: true,
            is_done: true,
            interacted_index: None,
        }
    }

    pub fn with_element(mut self, index: u32) -> Self {
        self.interacted_index = Some(index);
        self
    }
}

/// A named, stateless operation. Definitions declare their parameter schema
/// and whether they target a specific element by index; invocation happens
/// through the registry with validated parameters.
#[async_trait::async_trait]
pub trait Action: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// JSON schema of the parameter object.
    fn param_schema(&self) -> Value;

    /// True when the action addresses an element through the selector map.
    fn targets_element(&self) -> bool {
        false
    }

    /// True when a successful run can replace the page (navigation, tab
    /// switches). The executor ends the turn after such an action: the
    /// selector map the model planned against is stale from then on.
    fn changes_page(&self) -> bool {
        false
    }

    async fn execute(&self, params: Value, ctx: &ActionContext)
    -> Result<ActionResult, ActionError>;
}

/// Deserialize raw parameters into an action's typed parameter struct.
/// Failure is `InvalidInput` and never reaches the handler logic.
pub(crate) fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T, ActionError> {
    serde_json::from_value(params).map_err(|e| ActionError::InvalidInput(e.to_string()))
}

/// Closed action registry, built once at startup.
pub struct ActionRegistry {
    actions: BTreeMap<&'static str, Box<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self {
            actions: BTreeMap::new(),
        }
    }

    /// Registry with the full built-in browser action set.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for action in builtin::all() {
            registry.register(action);
        }
        registry
    }

    pub fn register(&mut self, action: Box<dyn Action>) {
        debug!(action = action.name(), "registering action");
        self.actions.insert(action.name(), action);
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.actions.keys().copied().collect()
    }

    pub fn get(&self, name: &str) -> Option<&dyn Action> {
        self.actions.get(name).map(|a| a.as_ref())
    }

    /// Human-readable catalogue for the navigator system prompt.
    pub fn describe(&self) -> String {
        self.actions
            .values()
            .map(|a| {
                let target = if a.targets_element() {
                    " (takes an element index from the interactive list)"
                } else {
                    ""
                };
                format!("- {}: {}{target}", a.name(), a.description())
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// One object schema over the whole action set: every action's
    /// parameter object becomes an optional, nullable property keyed by
    /// action name, so a single model turn names at most one action per
    /// entry.
    pub fn combined_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        for (name, action) in &self.actions {
            properties.insert(
                (*name).to_string(),
                json!({
                    "anyOf": [action.param_schema(), { "type": "null" }],
                    "description": action.description(),
                }),
            );
        }
        json!({
            "type": "object",
            "properties": properties,
            "additionalProperties": false,
        })
    }

    /// Validate and dispatch one action.
    ///
    /// Unknown names and parameter validation failures raise `InvalidInput`
    /// before any handler runs. Lifecycle telemetry (start/ok/fail) wraps
    /// the handler; sentinel errors (cancellation, disallowed navigation)
    /// pass through unmodified.
    pub async fn invoke(
        &self,
        name: &str,
        params: Value,
        ctx: &ActionContext,
    ) -> Result<ActionResult, ActionError> {
        let action = self
            .actions
            .get(name)
            .ok_or_else(|| ActionError::InvalidInput(format!("unknown action: {name}")))?;

        if ctx.cancel.is_cancelled() {
            return Err(ActionError::Cancelled);
        }

        ctx.events.emit(ExecutionEvent::new(
            ExecutionState::ActStart,
            Actor::Navigator,
            &ctx.task_id,
            ctx.step,
            name,
        ));
        debug!(action = name, params = %params, "executing action");

        let outcome = action.execute(params, ctx).await;

        let (state, details) = match &outcome {
            Ok(result) if result.success => (ExecutionState::ActOk, name.to_string()),
            Ok(result) => (
                ExecutionState::ActFail,
                result.error.clone().unwrap_or_else(|| name.to_string()),
            ),
            Err(e) => (ExecutionState::ActFail, e.to_string()),
        };
        ctx.events.emit(ExecutionEvent::new(
            state,
            Actor::Navigator,
            &ctx.task_id,
            ctx.step,
            details,
        ));

        outcome
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::context::ActionContext;
    use crate::browser::{BrowserDriver, ElementRef, PageSnapshot, TabInfo};
    use crate::errors::BrowserResult;
    use crate::executor::EventManager;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    pub(crate) struct NoopDriver;

    #[async_trait::async_trait]
    impl BrowserDriver for NoopDriver {
        async fn navigate_to(&self, _url: &str) -> BrowserResult<()> {
            Ok(())
        }
        async fn get_state(&self, _use_vision: bool) -> BrowserResult<PageSnapshot> {
            unimplemented!("not needed in framework tests")
        }
        async fn click(&self, _element: &ElementRef) -> BrowserResult<()> {
            Ok(())
        }
        async fn input_text(&self, _element: &ElementRef, _text: &str) -> BrowserResult<()> {
            Ok(())
        }
        async fn scroll(&self, _delta_y: i64) -> BrowserResult<()> {
            Ok(())
        }
        async fn get_dropdown_options(&self, _element: &ElementRef) -> BrowserResult<Vec<String>> {
            Ok(vec![])
        }
        async fn select_dropdown_option(
            &self,
            _element: &ElementRef,
            _text: &str,
        ) -> BrowserResult<()> {
            Ok(())
        }
        async fn list_tabs(&self) -> BrowserResult<Vec<TabInfo>> {
            Ok(vec![])
        }
        async fn switch_tab(&self, _tab_id: i64) -> BrowserResult<()> {
            Ok(())
        }
        async fn open_tab(&self, _url: &str) -> BrowserResult<()> {
            Ok(())
        }
        async fn close_tab(&self, _tab_id: i64) -> BrowserResult<()> {
            Ok(())
        }
    }

    pub(crate) fn test_ctx() -> ActionContext {
        ActionContext {
            driver: Arc::new(NoopDriver),
            snapshot: Arc::new(tokio::sync::Mutex::new(None)),
            events: EventManager::new(),
            cancel: CancellationToken::new(),
            task_id: "test".into(),
            step: 0,
        }
    }

    #[tokio::test]
    async fn unknown_action_is_invalid_input() {
        let registry = ActionRegistry::builtin();
        let err = registry
            .invoke("rm_rf", serde_json::json!({}), &test_ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn missing_required_field_never_reaches_handler() {
        let registry = ActionRegistry::builtin();
        // go_to_url requires `url`.
        let err = registry
            .invoke("go_to_url", serde_json::json!({}), &test_ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn cancelled_context_short_circuits() {
        let registry = ActionRegistry::builtin();
        let ctx = test_ctx();
        ctx.cancel.cancel();
        let err = registry
            .invoke(
                "go_to_url",
                serde_json::json!({"url": "https://example.com"}),
                &ctx,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::Cancelled));
    }

    #[test]
    fn combined_schema_has_one_nullable_property_per_action() {
        let registry = ActionRegistry::builtin();
        let schema = registry.combined_schema();
        let properties = schema["properties"].as_object().unwrap();
        assert_eq!(properties.len(), registry.names().len());
        for name in registry.names() {
            let entry = &properties[name];
            let any_of = entry["anyOf"].as_array().unwrap();
            assert!(any_of.iter().any(|s| s["type"] == "null"));
        }
    }
}
