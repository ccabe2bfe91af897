//! Navigator agent
//!
//! Turns one page state into a short sequence of action requests. The raw
//! model output carries actions as single-key objects keyed by action name;
//! interpretation resolves them into typed requests against the registry's
//! whitelist, skipping null placeholders the combined schema permits.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::actions::ActionRegistry;
use crate::agent::invoke::AgentInvoker;
use crate::agent::{AgentOutput, fold_parse_error, schema_of};
use crate::errors::AgentResult;
use crate::memory::Message;
use crate::transport::ModelTransport;

/// The navigator's self-assessment, carried alongside its actions.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NavigatorState {
    /// Judgement of whether the previous goal was achieved.
    pub evaluation_previous_goal: String,
    /// Running notes the navigator keeps for itself.
    pub memory: String,
    /// What the emitted actions are meant to accomplish.
    pub next_goal: String,
}

/// One resolved action request, ready for registry dispatch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionRequest {
    pub name: String,
    pub params: Value,
}

/// A fully interpreted navigator turn.
#[derive(Debug, Clone)]
pub struct NavigatorOutput {
    pub state: NavigatorState,
    pub actions: Vec<ActionRequest>,
}

/// Wire shape of the model output, before action interpretation.
#[derive(Debug, Deserialize)]
struct RawNavigatorOutput {
    current_state: NavigatorState,
    #[serde(default)]
    action: Vec<Value>,
}

/// Flatten the single-key action entries. Nulls and empty objects are
/// skipped; an entry with several keys contributes only its first pair.
fn interpret_actions(raw: Vec<Value>, max_actions: usize) -> Vec<ActionRequest> {
    let mut actions = Vec::new();
    for entry in raw {
        let Value::Object(map) = entry else {
            continue;
        };
        let Some((name, params)) = map.into_iter().find(|(_, v)| !v.is_null()) else {
            continue;
        };
        actions.push(ActionRequest { name, params });
    }
    if actions.len() > max_actions {
        warn!(
            emitted = actions.len(),
            max_actions, "truncating navigator actions to the per-turn cap"
        );
        actions.truncate(max_actions);
    }
    actions
}

pub struct NavigatorAgent {
    invoker: AgentInvoker,
    schema: Value,
    max_actions: usize,
}

impl NavigatorAgent {
    pub fn new(
        transport: Arc<dyn ModelTransport>,
        registry: &ActionRegistry,
        max_actions: usize,
    ) -> Self {
        Self {
            invoker: AgentInvoker::new(transport),
            schema: response_schema(registry),
            max_actions,
        }
    }

    /// Run one navigation turn over the current conversation.
    pub async fn navigate(
        &self,
        messages: &[Message],
        cancel: &CancellationToken,
    ) -> AgentResult<AgentOutput<NavigatorOutput>> {
        let result = self
            .invoker
            .invoke::<RawNavigatorOutput>(messages, &self.schema, cancel)
            .await
            .map(|raw| {
                let actions = interpret_actions(raw.action, self.max_actions);
                debug!(actions = actions.len(), goal = %raw.current_state.next_goal, "navigator turn");
                NavigatorOutput {
                    state: raw.current_state,
                    actions,
                }
            });
        fold_parse_error(result)
    }
}

/// Response schema composed from the fixed state shape and the registry's
/// combined action schema.
fn response_schema(registry: &ActionRegistry) -> Value {
    json!({
        "type": "object",
        "properties": {
            "current_state": schema_of::<NavigatorState>(),
            "action": {
                "type": "array",
                "items": registry.combined_schema(),
            },
        },
        "required": ["current_state", "action"],
        "additionalProperties": false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_entries_are_skipped() {
        let raw = vec![
            json!({"go_to_url": {"url": "https://example.com"}, "click_element": null}),
            json!({"done": null}),
            json!({"click_element": {"index": 3}}),
        ];
        let actions = interpret_actions(raw, 10);
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].name, "go_to_url");
        assert_eq!(actions[1], ActionRequest {
            name: "click_element".into(),
            params: json!({"index": 3}),
        });
    }

    #[test]
    fn overflowing_turns_are_truncated() {
        let raw = (0..6).map(|i| json!({"click_element": {"index": i}})).collect();
        let actions = interpret_actions(raw, 4);
        assert_eq!(actions.len(), 4);
    }

    #[test]
    fn wire_output_parses_without_actions() {
        let raw: RawNavigatorOutput = serde_json::from_str(
            r#"{"current_state": {"evaluation_previous_goal": "n/a", "memory": "", "next_goal": "look around"}}"#,
        )
        .unwrap();
        assert!(raw.action.is_empty());
    }
}
