//! Model-backed agents
//!
//! Three cooperating roles share one invocation layer: the planner reviews
//! progress at an interval, the navigator chooses browser actions each step,
//! and the validator checks a claimed completion. Parse failures are folded
//! into recoverable per-call results; transport failures and cancellation
//! propagate.

mod invoke;
mod navigator;
mod planner;
pub mod prompts;
mod validator;

pub use invoke::{
    AgentInvoker, CallStrategy, ExtractJsonObject, RecoveryStrategy, StripCodeFences,
    StripReasoningTags, default_recovery, recover_structured,
};
pub use navigator::{ActionRequest, NavigatorAgent, NavigatorOutput, NavigatorState};
pub use planner::{PlannerAgent, PlannerOutput};
pub use validator::{ValidatorAgent, ValidatorOutput};

use schemars::JsonSchema;
use uuid::Uuid;

use crate::errors::{AgentError, AgentResult};

/// One agent call's outcome. `result` is `Err` when the model answered but
/// its output could not be parsed; the caller decides whether to retry the
/// step. Fatal conditions never appear here.
#[derive(Debug)]
pub struct AgentOutput<T> {
    pub id: String,
    pub result: Result<T, String>,
}

impl<T> AgentOutput<T> {
    pub fn ok(value: T) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            result: Ok(value),
        }
    }

    pub fn parse_failure(message: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            result: Err(message),
        }
    }
}

/// Parse errors become recoverable outputs; everything else propagates.
pub(crate) fn fold_parse_error<T>(result: AgentResult<T>) -> AgentResult<AgentOutput<T>> {
    match result {
        Ok(value) => Ok(AgentOutput::ok(value)),
        Err(AgentError::ResponseParse(message)) => Ok(AgentOutput::parse_failure(message)),
        Err(other) => Err(other),
    }
}

/// JSON schema for a response type, as handed to the transport.
pub(crate) fn schema_of<T: JsonSchema>() -> serde_json::Value {
    serde_json::to_value(schemars::SchemaGenerator::default().into_root_schema_for::<T>())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_errors_fold_into_recoverable_outputs() {
        let folded: AgentResult<AgentOutput<u32>> =
            fold_parse_error(Err(AgentError::ResponseParse("bad json".into())));
        let output = folded.unwrap();
        assert_eq!(output.result, Err("bad json".to_string()));
    }

    #[test]
    fn cancellation_does_not_fold() {
        let folded: AgentResult<AgentOutput<u32>> =
            fold_parse_error(Err(AgentError::RequestCancelled));
        assert!(matches!(folded, Err(AgentError::RequestCancelled)));
    }
}
