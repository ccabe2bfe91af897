//! Planner agent

use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::agent::invoke::AgentInvoker;
use crate::agent::{AgentOutput, fold_parse_error, schema_of};
use crate::errors::AgentResult;
use crate::memory::Message;
use crate::transport::ModelTransport;

/// The planner's periodic review of the task.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PlannerOutput {
    /// What has happened so far.
    pub observation: String,
    /// Whether the user's request is fully satisfied.
    pub done: bool,
    /// Obstacles the navigator should know about.
    #[serde(default)]
    pub challenges: String,
    /// Concrete next steps when not done.
    #[serde(default)]
    pub next_steps: String,
    #[serde(default)]
    pub reasoning: String,
    /// Whether the task actually requires the browser.
    #[serde(default = "default_web_task")]
    pub web_task: bool,
    /// The answer to report to the user, only meaningful when done.
    #[serde(default)]
    pub final_answer: Option<String>,
}

fn default_web_task() -> bool {
    true
}

pub struct PlannerAgent {
    invoker: AgentInvoker,
}

impl PlannerAgent {
    pub fn new(transport: Arc<dyn ModelTransport>) -> Self {
        Self {
            invoker: AgentInvoker::new(transport),
        }
    }

    /// Run one planning review over the (planner-view) conversation.
    pub async fn plan(
        &self,
        messages: &[Message],
        cancel: &CancellationToken,
    ) -> AgentResult<AgentOutput<PlannerOutput>> {
        let schema = schema_of::<PlannerOutput>();
        let result = self.invoker.invoke::<PlannerOutput>(messages, &schema, cancel).await;
        if let Ok(output) = &result {
            debug!(done = output.done, "planner reviewed task");
        }
        fold_parse_error(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_optional_fields_default() {
        let output: PlannerOutput =
            serde_json::from_str(r#"{"observation": "fresh start", "done": false}"#).unwrap();
        assert!(output.web_task);
        assert!(output.final_answer.is_none());
        assert!(output.next_steps.is_empty());
    }
}
