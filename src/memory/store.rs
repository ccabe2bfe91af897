//! Bounded memory store
//!
//! Ordered message history with a running estimated-token total and a soft
//! budget. Secrets are redacted before token counting; budget overruns are
//! resolved by dropping image parts off the last message first and then
//! trimming a proportional character slice from its end.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::errors::MemoryError;
use crate::memory::message::{IMAGE_TOKENS, Message, MessageCategory, Role};

/// Fraction of the last message above which trimming is refused: the
/// remaining content cannot fit even after discarding almost everything.
const TRIM_FATAL_FRACTION: f64 = 0.99;

/// Ordered, token-accounted message history for one agent context.
///
/// Invariant: `total_tokens == Σ message.tokens` after every mutation.
pub struct MemoryStore {
    messages: Vec<Message>,
    total_tokens: usize,
    budget: usize,
    next_tool_call_id: u64,
    /// key → secret value; values are replaced by `<secret>key</secret>`.
    secrets: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new(budget: usize) -> Self {
        Self {
            messages: Vec::new(),
            total_tokens: 0,
            budget,
            next_tool_call_id: 1,
            secrets: BTreeMap::new(),
        }
    }

    pub fn with_secrets(budget: usize, secrets: BTreeMap<String, String>) -> Self {
        Self {
            secrets,
            ..Self::new(budget)
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn total_tokens(&self) -> usize {
        self.total_tokens
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Append (or splice at `position`) a message.
    ///
    /// Redaction runs before token estimation so secret values never count
    /// toward the budget under their real length.
    pub fn add_message(
        &mut self,
        mut message: Message,
        category: Option<MessageCategory>,
        position: Option<usize>,
    ) {
        self.redact(&mut message);
        message.category = category.or(message.category);
        message.tokens = message.estimate_tokens();
        self.total_tokens += message.tokens;

        match position {
            Some(pos) if pos < self.messages.len() => self.messages.insert(pos, message),
            _ => self.messages.push(message),
        }
    }

    /// Remove and return the last message, restoring the token invariant.
    pub fn remove_last_message(&mut self) -> Option<Message> {
        let message = self.messages.pop()?;
        self.total_tokens -= message.tokens;
        Some(message)
    }

    /// Remove the last message only if it has the given role. Used to drop
    /// the transient page-state message after a navigator turn.
    pub fn remove_last_if(&mut self, role: Role) -> Option<Message> {
        if self.messages.last().map(|m| m.role) == Some(role) {
            self.remove_last_message()
        } else {
            None
        }
    }

    /// Append an assistant tool-call turn and its tool-result partner with
    /// one fresh call id. Models reject dangling tool calls, so the two
    /// always travel together at adjacent positions. A `retained` result
    /// carries extracted findings and survives follow-up folding.
    pub fn add_model_output(
        &mut self,
        output_json: String,
        result_text: String,
        retained: bool,
    ) -> u64 {
        let id = self.next_tool_call_id;
        self.next_tool_call_id += 1;

        let mut call = Message::assistant(output_json);
        call.tool_call_id = Some(id);
        self.add_message(call, Some(MessageCategory::Normal), None);
        let mut result = Message::tool_result(id, result_text);
        if retained {
            result = result.retain();
        }
        self.add_message(result, Some(MessageCategory::Normal), None);
        id
    }

    /// Insert a retrospective plan at an explicit position (or append).
    pub fn add_plan(&mut self, plan: &str, position: Option<usize>) {
        let message = Message::assistant(format!("Current plan:\n{plan}"));
        self.add_message(message, Some(MessageCategory::Normal), position);
    }

    /// Replace every occurrence of each configured secret value with a
    /// placeholder naming its key. Empty secret values are skipped.
    fn redact(&self, message: &mut Message) {
        if self.secrets.is_empty() {
            return;
        }
        for part in &mut message.content {
            if let crate::memory::message::ContentPart::Text { text } = part {
                for (key, value) in &self.secrets {
                    if value.is_empty() {
                        continue;
                    }
                    if text.contains(value.as_str()) {
                        *text = text.replace(value.as_str(), &format!("<secret>{key}</secret>"));
                    }
                }
            }
        }
    }

    /// Bring the store back under budget by shrinking the last message.
    ///
    /// Order of operations is part of the contract: drop image parts first,
    /// then trim a proportional character slice. A required trim fraction
    /// above 0.99 is a hard error rather than corrupting the message.
    pub fn enforce_budget(&mut self) -> Result<(), MemoryError> {
        let mut over = self.overflow();
        if over <= 0 {
            return Ok(());
        }

        // Images on the last message go first; each removal is a fixed win.
        if let Some(last) = self.messages.last_mut()
            && last.has_images()
        {
            let images = last.image_count();
            last.strip_images();
            last.tokens -= images * IMAGE_TOKENS;
            self.total_tokens -= images * IMAGE_TOKENS;
            debug!(images, "dropped image parts from last message");

            over = self.overflow();
            if over <= 0 {
                return Ok(());
            }
        }

        let Some(last) = self.messages.last_mut() else {
            return Ok(());
        };
        if last.tokens == 0 {
            return Ok(());
        }

        let fraction = over as f64 / last.tokens as f64;
        if fraction > TRIM_FATAL_FRACTION {
            return Err(MemoryError::BudgetExhausted {
                required: fraction,
                tokens: last.tokens,
            });
        }

        // Character proportion approximates token proportion; exact
        // tokenizer-accurate trimming is deliberately not required.
        let text = last.text();
        let chars = text.chars().count();
        let keep = ((chars as f64) * (1.0 - fraction)).floor() as usize;
        let trimmed: String = text.chars().take(keep).collect();

        warn!(
            removed_chars = chars - keep,
            fraction, "trimming last message to fit token budget"
        );

        self.total_tokens -= last.tokens;
        last.replace_text(trimmed);
        last.tokens = last.estimate_tokens();
        self.total_tokens += last.tokens;

        Ok(())
    }

    fn overflow(&self) -> i64 {
        self.total_tokens as i64 - self.budget as i64
    }

    /// Fold unretained tool-result payloads out of memory while preserving
    /// the full message history. Run when a follow-up task is appended so
    /// the new task keeps prior context without stale page dumps.
    pub fn fold_tool_results(&mut self) {
        for message in &mut self.messages {
            if message.role == Role::ToolResult && !message.retained && message.char_len() > 0 {
                self.total_tokens -= message.tokens;
                message.replace_text(String::new());
                message.strip_images();
                message.tokens = message.estimate_tokens();
                self.total_tokens += message.tokens;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::message::ContentPart;

    fn sum_tokens(store: &MemoryStore) -> usize {
        store.messages().iter().map(|m| m.tokens).sum()
    }

    #[test]
    fn token_total_matches_sum_after_mutations() {
        let mut store = MemoryStore::new(10_000);
        store.add_message(Message::system("sys prompt"), Some(MessageCategory::Init), None);
        store.add_message(Message::human("do the thing"), None, None);
        store.add_model_output("{\"action\":[]}".to_string(), "ok".to_string(), false);
        store.add_plan("1. open page", Some(1));
        store.remove_last_message();
        store.enforce_budget().unwrap();

        assert_eq!(store.total_tokens(), sum_tokens(&store));
    }

    #[test]
    fn positional_insert_preserves_order() {
        let mut store = MemoryStore::new(10_000);
        store.add_message(Message::system("a"), None, None);
        store.add_message(Message::human("b"), None, None);
        store.add_plan("plan", Some(1));

        assert_eq!(store.messages()[0].text(), "a");
        assert!(store.messages()[1].text().contains("plan"));
        assert_eq!(store.messages()[2].text(), "b");
        assert_eq!(store.total_tokens(), sum_tokens(&store));
    }

    #[test]
    fn redaction_applies_before_counting() {
        let mut secrets = BTreeMap::new();
        secrets.insert("password".to_string(), "hunter2".to_string());
        secrets.insert("empty".to_string(), String::new());

        let mut store = MemoryStore::with_secrets(10_000, secrets);
        store.add_message(Message::human("login with hunter2 please"), None, None);

        let text = store.messages()[0].text();
        assert!(text.contains("<secret>password</secret>"));
        assert!(!text.contains("hunter2"));
        assert_eq!(store.messages()[0].tokens, store.messages()[0].estimate_tokens());
    }

    #[test]
    fn enforce_budget_is_noop_within_budget() {
        let mut store = MemoryStore::new(1_000);
        store.add_message(Message::human("short"), None, None);
        let before = store.total_tokens();
        store.enforce_budget().unwrap();
        assert_eq!(store.total_tokens(), before);
    }

    #[test]
    fn enforce_budget_drops_images_first() {
        let mut store = MemoryStore::new(50);
        let msg = Message::human("a".repeat(120)).with_image("payload", "image/png");
        store.add_message(msg, None, None);
        assert!(store.total_tokens() > store.budget());

        store.enforce_budget().unwrap();

        let last = store.messages().last().unwrap();
        assert!(!last.has_images());
        assert!(store.total_tokens() <= store.budget());
        assert_eq!(store.total_tokens(), sum_tokens(&store));
    }

    #[test]
    fn enforce_budget_trims_proportionally() {
        let mut store = MemoryStore::new(150);
        store.add_message(Message::system("s".repeat(300)), None, None);
        store.add_message(Message::human("x".repeat(300)), None, None);

        store.enforce_budget().unwrap();

        assert!(store.total_tokens() <= store.budget());
        // First message untouched; only the last one shrinks.
        assert_eq!(store.messages()[0].char_len(), 300);
        assert!(store.messages()[1].char_len() < 300);
    }

    #[test]
    fn enforce_budget_refuses_near_total_removal() {
        let mut store = MemoryStore::new(10);
        store.add_message(Message::system("s".repeat(3000)), None, None);
        store.add_message(Message::human("tiny"), None, None);

        let err = store.enforce_budget().unwrap_err();
        assert!(matches!(err, MemoryError::BudgetExhausted { .. }));
        // The message was not corrupted.
        assert_eq!(store.messages()[1].text(), "tiny");
    }

    #[test]
    fn repeated_enforcement_terminates() {
        let mut store = MemoryStore::new(200);
        store.add_message(Message::human("y".repeat(900)), None, None);
        for _ in 0..5 {
            store.enforce_budget().unwrap();
        }
        assert!(store.total_tokens() <= store.budget());
    }

    #[test]
    fn fold_tool_results_empties_payloads_keeps_order() {
        let mut store = MemoryStore::new(10_000);
        store.add_message(Message::system("sys"), Some(MessageCategory::Init), None);
        store.add_model_output("{\"a\":1}".to_string(), "big page dump ".repeat(50), false);

        let len = store.len();
        store.fold_tool_results();

        assert_eq!(store.len(), len);
        let folded = store.messages().last().unwrap();
        assert_eq!(folded.char_len(), 0);
        assert!(matches!(folded.content[0], ContentPart::Text { .. }));
        assert_eq!(store.total_tokens(), sum_tokens(&store));
    }

    #[test]
    fn fold_tool_results_keeps_retained_findings() {
        let mut store = MemoryStore::new(10_000);
        store.add_model_output("{\"a\":1}".to_string(), "page dump ".repeat(50), false);
        store.add_model_output(
            "{\"cache_content\":{}}".to_string(),
            "price is 12.99".to_string(),
            true,
        );

        store.fold_tool_results();

        let tool_results: Vec<&Message> = store
            .messages()
            .iter()
            .filter(|m| m.role == Role::ToolResult)
            .collect();
        assert_eq!(tool_results[0].char_len(), 0);
        assert_eq!(tool_results[1].text(), "price is 12.99");
        assert_eq!(store.total_tokens(), sum_tokens(&store));
    }
}
