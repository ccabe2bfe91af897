//! Model transport collaborator contract
//!
//! The engine delegates every model call through this trait. Transports
//! must classify their own failures (`TransportError`) and honor the
//! cancellation token: an aborted call is `TransportError::Cancelled`,
//! never a parse or auth error.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::errors::TransportError;
use crate::memory::Message;

/// Plain-text model response.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub text: String,
}

/// Response from a schema-shaped invocation. `parsed` is `None` when the
/// transport could not shape the output; `raw` is always available for the
/// manual recovery path.
#[derive(Debug, Clone)]
pub struct StructuredResponse {
    pub parsed: Option<serde_json::Value>,
    pub raw: String,
}

#[async_trait]
pub trait ModelTransport: Send + Sync {
    /// Model identity, used once per agent to select a call strategy.
    fn model_name(&self) -> &str;

    /// Whether this model reliably supports transport-side structured
    /// output.
    fn supports_structured_output(&self) -> bool {
        true
    }

    async fn invoke(
        &self,
        messages: &[Message],
        cancel: &CancellationToken,
    ) -> Result<ChatResponse, TransportError>;

    async fn invoke_structured(
        &self,
        messages: &[Message],
        schema: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<StructuredResponse, TransportError>;
}
