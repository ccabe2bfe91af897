//! Validator agent

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

/// The validator's verdict over a claimed completion.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ValidatorOutput {
    /// Whether the claimed result satisfies the task.
    pub is_valid: bool,
    /// Why the verdict was reached.
    pub reason: String,
    /// The confirmed final answer, empty when invalid.
    #[serde(default)]
    pub answer: String,
}

pub struct ValidatorAgent {
    invoker: AgentInvoker,
}

impl ValidatorAgent {
    pub fn new(transport: Arc<dyn ModelTransport>) -> Self {
        Self {
            invoker: AgentInvoker::new(transport),
        }
    }

    /// Judge whether the claimed result satisfies the task. The messages
    /// carry the validator system prompt, final page state, and the answer.
    pub async fn validate(
        &self,
        messages: &[Message],
        cancel: &CancellationToken,
    ) -> AgentResult<AgentOutput<ValidatorOutput>> {
        let schema = schema_of::<ValidatorOutput>();
        let result = self
            .invoker
            .invoke::<ValidatorOutput>(messages, &schema, cancel)
            .await;
        if let Ok(verdict) = &result {
            debug!(is_valid = verdict.is_valid, reason = %verdict.reason, "validated result");
        }
        fold_parse_error(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answer_defaults_to_empty() {
        let verdict: ValidatorOutput =
            serde_json::from_str(r#"{"is_valid": false, "reason": "page never loaded"}"#).unwrap();
        assert!(!verdict.is_valid);
        assert!(verdict.answer.is_empty());
    }
}
