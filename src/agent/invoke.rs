//! Generic agent invocation
//!
//! Wraps one model call behind two execution strategies: transport-side
//! structured output with a manual fallback, or manual extraction from free
//! text for models known not to shape output reliably. Cancellation is
//! classified before any other failure.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::{AgentError, AgentResult, TransportError};
use crate::memory::Message;
use crate::transport::ModelTransport;

/// How an agent instance talks to its model. Selected once per agent from
/// the model identity, never re-evaluated per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStrategy {
    /// Ask the transport for schema-shaped output; fall back to manual
    /// recovery on failure.
    Structured,
    /// Plain text call, always recovered manually.
    Manual,
}

/// Model families that emit reasoning prose around their JSON instead of
/// honoring transport-side schemas.
const MANUAL_OUTPUT_MODELS: &[&str] = &["deepseek-r1", "deepseek-reasoner"];

impl CallStrategy {
    pub fn for_transport(transport: &dyn ModelTransport) -> Self {
        let name = transport.model_name().to_ascii_lowercase();
        if !transport.supports_structured_output()
            || MANUAL_OUTPUT_MODELS.iter().any(|m| name.contains(m))
        {
            CallStrategy::Manual
        } else {
            CallStrategy::Structured
        }
    }
}

/// One step of the manual-recovery pipeline. Each strategy either rewrites
/// the text into something closer to parseable JSON or declines.
pub trait RecoveryStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, text: &str) -> Option<String>;
}

/// Removes reasoning spans delimited by configurable tag pairs. A closing
/// tag without an opener (streamed reasoning) keeps only the text after it.
pub struct StripReasoningTags {
    pairs: Vec<(String, String)>,
}

impl StripReasoningTags {
    pub fn new(pairs: Vec<(String, String)>) -> Self {
        Self { pairs }
    }
}

impl Default for StripReasoningTags {
    fn default() -> Self {
        Self::new(vec![("<think>".to_string(), "</think>".to_string())])
    }
}

impl RecoveryStrategy for StripReasoningTags {
    fn name(&self) -> &'static str {
        "strip_reasoning_tags"
    }

    fn apply(&self, text: &str) -> Option<String> {
        let mut current = text.to_string();
        let mut changed = false;
        for (open, close) in &self.pairs {
            loop {
                match (current.find(open.as_str()), current.find(close.as_str())) {
                    (Some(start), Some(end)) if end > start => {
                        current.replace_range(start..end + close.len(), "");
                        changed = true;
                    }
                    (None, Some(end)) => {
                        current = current[end + close.len()..].to_string();
                        changed = true;
                        break;
                    }
                    _ => break,
                }
            }
        }
        changed.then_some(current)
    }
}

/// Unwraps the first bracket-fenced code block, dropping a language tag.
pub struct StripCodeFences;

impl RecoveryStrategy for StripCodeFences {
    fn name(&self) -> &'static str {
        "strip_code_fences"
    }

    fn apply(&self, text: &str) -> Option<String> {
        let start = text.find("```")?;
        let after = &text[start + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after[body_start..];
        let end = body.find("```").unwrap_or(body.len());
        Some(body[..end].to_string())
    }
}

/// Extracts the first balanced JSON object, ignoring braces inside string
/// literals.
pub struct ExtractJsonObject;

impl RecoveryStrategy for ExtractJsonObject {
    fn name(&self) -> &'static str {
        "extract_json_object"
    }

    fn apply(&self, text: &str) -> Option<String> {
        let start = text.find('{')?;
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        for (offset, ch) in text[start..].char_indices() {
            if escaped {
                escaped = false;
                continue;
            }
            match ch {
                '\\' if in_string => escaped = true,
                '"' => in_string = !in_string,
                '{' if !in_string => depth += 1,
                '}' if !in_string => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(text[start..start + offset + ch.len_utf8()].to_string());
                    }
                }
                _ => {}
            }
        }
        None
    }
}

/// Default pipeline, in application order.
pub fn default_recovery() -> Vec<Box<dyn RecoveryStrategy>> {
    vec![
        Box::new(StripReasoningTags::default()),
        Box::new(StripCodeFences),
        Box::new(ExtractJsonObject),
    ]
}

/// Run the recovery pipeline over raw model text until something parses.
pub fn recover_structured<T: DeserializeOwned>(
    raw: &str,
    strategies: &[Box<dyn RecoveryStrategy>],
) -> AgentResult<T> {
    let mut current = raw.trim().to_string();
    if let Ok(value) = serde_json::from_str::<T>(&current) {
        return Ok(value);
    }
    for strategy in strategies {
        if let Some(next) = strategy.apply(&current) {
            debug!(strategy = strategy.name(), "applied recovery strategy");
            current = next.trim().to_string();
            if let Ok(value) = serde_json::from_str::<T>(&current) {
                return Ok(value);
            }
        }
    }
    Err(AgentError::ResponseParse(format!(
        "model output not parseable after {} recovery strategies: {}",
        strategies.len(),
        truncate_for_log(raw)
    )))
}

fn truncate_for_log(text: &str) -> String {
    const LIMIT: usize = 400;
    if text.chars().count() <= LIMIT {
        text.to_string()
    } else {
        let cut: String = text.chars().take(LIMIT).collect();
        format!("{cut}…")
    }
}

/// Invokes one agent's model and extracts a typed value.
pub struct AgentInvoker {
    transport: Arc<dyn ModelTransport>,
    strategy: CallStrategy,
    recovery: Vec<Box<dyn RecoveryStrategy>>,
}

impl AgentInvoker {
    pub fn new(transport: Arc<dyn ModelTransport>) -> Self {
        let strategy = CallStrategy::for_transport(transport.as_ref());
        Self {
            transport,
            strategy,
            recovery: default_recovery(),
        }
    }

    pub fn with_recovery(mut self, recovery: Vec<Box<dyn RecoveryStrategy>>) -> Self {
        self.recovery = recovery;
        self
    }

    pub fn strategy(&self) -> CallStrategy {
        self.strategy
    }

    /// Invoke the model over the given messages and produce a `T`.
    pub async fn invoke<T: DeserializeOwned>(
        &self,
        messages: &[Message],
        schema: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> AgentResult<T> {
        match self.strategy {
            CallStrategy::Structured => {
                let response = self
                    .transport
                    .invoke_structured(messages, schema, cancel)
                    .await
                    .map_err(|e| classify(e, cancel))?;
                if let Some(parsed) = response.parsed
                    && let Ok(value) = serde_json::from_value::<T>(parsed)
                {
                    return Ok(value);
                }
                self.recover(&response.raw, cancel)
            }
            CallStrategy::Manual => {
                let response = self
                    .transport
                    .invoke(messages, cancel)
                    .await
                    .map_err(|e| classify(e, cancel))?;
                self.recover(&response.text, cancel)
            }
        }
    }

    fn recover<T: DeserializeOwned>(
        &self,
        raw: &str,
        cancel: &CancellationToken,
    ) -> AgentResult<T> {
        // Cancellation wins over any parse classification: a partial
        // response from an aborted call must not surface as a parse error.
        if cancel.is_cancelled() {
            return Err(AgentError::RequestCancelled);
        }
        recover_structured(raw, &self.recovery)
    }
}

/// Transport failures mapped into the agent taxonomy; cancellation checked
/// before everything else.
fn classify(err: TransportError, cancel: &CancellationToken) -> AgentError {
    if cancel.is_cancelled() || matches!(err, TransportError::Cancelled) {
        AgentError::RequestCancelled
    } else {
        AgentError::Transport(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Target {
        answer: String,
    }

    #[test]
    fn clean_json_needs_no_recovery() {
        let value: Target = recover_structured(r#"{"answer": "ok"}"#, &default_recovery()).unwrap();
        assert_eq!(value.answer, "ok");
    }

    #[test]
    fn strips_reasoning_then_parses() {
        let raw = "<think>let me reason about this</think>{\"answer\": \"ok\"}";
        let value: Target = recover_structured(raw, &default_recovery()).unwrap();
        assert_eq!(value.answer, "ok");
    }

    #[test]
    fn unmatched_close_tag_keeps_trailing_payload() {
        let raw = "reasoning without opener</think>\n{\"answer\": \"ok\"}";
        let value: Target = recover_structured(raw, &default_recovery()).unwrap();
        assert_eq!(value.answer, "ok");
    }

    #[test]
    fn unwraps_code_fences() {
        let raw = "Here you go:\n```json\n{\"answer\": \"ok\"}\n```\nanything else?";
        let value: Target = recover_structured(raw, &default_recovery()).unwrap();
        assert_eq!(value.answer, "ok");
    }

    #[test]
    fn extracts_balanced_object_from_prose() {
        let raw = r#"Sure. {"answer": "has {braces} in string"} trailing."#;
        let value: Target = recover_structured(raw, &default_recovery()).unwrap();
        assert_eq!(value.answer, "has {braces} in string");
    }

    #[test]
    fn unusable_text_is_a_parse_error() {
        let err = recover_structured::<Target>("no json here at all", &default_recovery())
            .unwrap_err();
        assert!(matches!(err, AgentError::ResponseParse(_)));
    }

    #[test]
    fn cancellation_outranks_transport_classification() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = classify(TransportError::Other("boom".into()), &cancel);
        assert!(matches!(err, AgentError::RequestCancelled));
    }
}
