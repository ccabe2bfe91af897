//! Content sanitizer collaborator contract
//!
//! All externally-sourced text (page content, user attachments) passes
//! through the sanitizer and is then wrapped in an untrusted-content
//! delimiter pair before entering memory. Order is part of the contract:
//! sanitize first, wrap after — never the reverse, or the delimiters
//! themselves become sanitizable content.

use async_trait::async_trait;

pub const UNTRUSTED_OPEN: &str = "<untrusted_content>";
pub const UNTRUSTED_CLOSE: &str = "</untrusted_content>";

/// Outcome of one sanitization pass.
#[derive(Debug, Clone)]
pub struct Sanitized {
    pub text: String,
    pub threats: Vec<String>,
    pub modified: bool,
}

#[async_trait]
pub trait ContentSanitizer: Send + Sync {
    async fn sanitize(&self, text: &str, strict: bool) -> Sanitized;
}

/// Default collaborator: passes text through untouched. The engine assumes
/// the configured sanitizer is trustworthy; this one simply trusts
/// everything.
pub struct PassthroughSanitizer;

#[async_trait]
impl ContentSanitizer for PassthroughSanitizer {
    async fn sanitize(&self, text: &str, _strict: bool) -> Sanitized {
        Sanitized {
            text: text.to_string(),
            threats: Vec::new(),
            modified: false,
        }
    }
}

/// Sanitize then wrap in the untrusted delimiter pair.
pub async fn sanitize_and_wrap(
    sanitizer: &dyn ContentSanitizer,
    text: &str,
    strict: bool,
) -> String {
    let outcome = sanitizer.sanitize(text, strict).await;
    if !outcome.threats.is_empty() {
        tracing::warn!(
            threats = ?outcome.threats,
            "sanitizer flagged untrusted content"
        );
    }
    format!("{UNTRUSTED_OPEN}\n{}\n{UNTRUSTED_CLOSE}", outcome.text)
}
