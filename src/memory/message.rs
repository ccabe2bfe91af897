//! Conversational message model
//!
//! One `Message` is one turn of agent conversation. Token costs are
//! estimated, not exact: text is counted proportionally to character count
//! and every image part carries a fixed surcharge.

use serde::{Deserialize, Serialize};

/// Characters per estimated token for text content.
pub const ESTIMATED_CHARS_PER_TOKEN: usize = 3;

/// Flat token surcharge for one image part.
pub const IMAGE_TOKENS: usize = 800;

/// Role tag of a conversational turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    Human,
    Assistant,
    ToolResult,
}

/// Category tag carried in message metadata.
///
/// `Init` marks the bootstrap messages (system prompt, task context) that
/// must never be selected for trimming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageCategory {
    Init,
    Normal,
}

/// One piece of message content. Mixed text/image content is how vision
/// snapshots travel alongside the page-state text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Image { base64: String, media_type: String },
}

/// A single conversational turn with token-accounting metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentPart>,

    /// Monotonically increasing id pairing an assistant tool-call turn with
    /// its tool-result turn. Models reject dangling calls, so both sides of
    /// a pair always carry the same id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<u64>,

    /// Estimated token cost, maintained by the store.
    #[serde(default)]
    pub tokens: usize,

    /// A retained tool result carries extracted findings and survives
    /// follow-up folding; unretained payloads are emptied.
    #[serde(default)]
    pub retained: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<MessageCategory>,
}

impl Message {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentPart::Text { text: text.into() }],
            tool_call_id: None,
            tokens: 0,
            retained: false,
            category: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    pub fn human(text: impl Into<String>) -> Self {
        Self::new(Role::Human, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    pub fn tool_result(tool_call_id: u64, text: impl Into<String>) -> Self {
        Self {
            role: Role::ToolResult,
            content: vec![ContentPart::Text { text: text.into() }],
            tool_call_id: Some(tool_call_id),
            tokens: 0,
            retained: false,
            category: None,
        }
    }

    /// Mark this message as surviving follow-up folding.
    pub fn retain(mut self) -> Self {
        self.retained = true;
        self
    }

    /// Attach an image part (base64 payload) to this message.
    pub fn with_image(mut self, base64: impl Into<String>, media_type: impl Into<String>) -> Self {
        self.content.push(ContentPart::Image {
            base64: base64.into(),
            media_type: media_type.into(),
        });
        self
    }

    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for part in &self.content {
            if let ContentPart::Text { text } = part {
                out.push_str(text);
            }
        }
        out
    }

    /// Character count across text parts.
    pub fn char_len(&self) -> usize {
        self.content
            .iter()
            .map(|p| match p {
                ContentPart::Text { text } => text.chars().count(),
                ContentPart::Image { .. } => 0,
            })
            .sum()
    }

    /// Number of image parts.
    pub fn image_count(&self) -> usize {
        self.content
            .iter()
            .filter(|p| matches!(p, ContentPart::Image { .. }))
            .count()
    }

    pub fn has_images(&self) -> bool {
        self.image_count() > 0
    }

    /// Estimated token cost of the current content.
    pub fn estimate_tokens(&self) -> usize {
        let text_tokens = self.char_len().div_ceil(ESTIMATED_CHARS_PER_TOKEN);
        text_tokens + self.image_count() * IMAGE_TOKENS
    }

    /// Drop every image part and collapse the message to pure text.
    pub fn strip_images(&mut self) {
        self.content
            .retain(|p| matches!(p, ContentPart::Text { .. }));
    }

    /// Replace the message text with the given string, keeping role and
    /// metadata. Used by proportional trimming.
    pub fn replace_text(&mut self, text: String) {
        self.content = vec![ContentPart::Text { text }];
    }

    pub fn is_init(&self) -> bool {
        self.category == Some(MessageCategory::Init)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_estimate_counts_text_and_images() {
        let msg = Message::human("a".repeat(300)).with_image("xxxx", "image/png");
        assert_eq!(msg.estimate_tokens(), 100 + IMAGE_TOKENS);
    }

    #[test]
    fn strip_images_collapses_to_text() {
        let mut msg = Message::human("hello").with_image("xxxx", "image/png");
        assert!(msg.has_images());
        msg.strip_images();
        assert!(!msg.has_images());
        assert_eq!(msg.text(), "hello");
    }
}
