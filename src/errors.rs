//! Crate-wide error taxonomy
//!
//! Errors fall into three behavioral classes the step loop cares about:
//! recoverable (counted against the failure budget and retried), fatal
//! (always re-raised unmodified, retrying cannot succeed), and cancellation
//! (fatal but never counted as a failure).

use thiserror::Error;

/// Errors raised by the browser driver collaborator.
#[derive(Error, Debug)]
pub enum BrowserError {
    /// URL failed the allow/deny policy check. Always fatal to the task.
    #[error("navigation not allowed: {0}")]
    NavigationNotAllowed(String),

    #[error("tab not found: {0}")]
    TabNotFound(i64),

    #[error("page extraction failed: {0}")]
    Extraction(String),

    #[error("browser error: {0}")]
    Driver(String),
}

/// Result type for browser driver operations
pub type BrowserResult<T> = Result<T, BrowserError>;

/// Errors raised by the model transport collaborator.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The underlying call was aborted by the task's cancellation token.
    #[error("request cancelled")]
    Cancelled,

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Transport-classified failures where retrying cannot succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TransportError::Cancelled
                | TransportError::Authentication(_)
                | TransportError::Forbidden(_)
                | TransportError::BadRequest(_)
        )
    }
}

/// Errors raised while invoking an agent.
#[derive(Error, Debug)]
pub enum AgentError {
    /// Model output unusable after every recovery strategy was tried.
    #[error("response parse failed: {0}")]
    ResponseParse(String),

    /// User-initiated cancellation. Never retried, never counted as a failure.
    #[error("request cancelled")]
    RequestCancelled,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl AgentError {
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            AgentError::RequestCancelled | AgentError::Transport(TransportError::Cancelled)
        )
    }

    pub fn is_fatal(&self) -> bool {
        match self {
            AgentError::ResponseParse(_) => false,
            AgentError::RequestCancelled => true,
            AgentError::Transport(e) => e.is_fatal(),
        }
    }
}

/// Result type for agent operations
pub type AgentResult<T> = Result<T, AgentError>;

/// Errors raised by the action framework.
#[derive(Error, Debug)]
pub enum ActionError {
    /// Parameter validation failed. Local to the action, reported in the
    /// ActionResult, never reaches the handler.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Sentinel: must propagate unmodified so the engine fails the task.
    #[error(transparent)]
    NavigationNotAllowed(BrowserError),

    /// Sentinel: task cancellation observed mid-action.
    #[error("action cancelled")]
    Cancelled,
}

/// Errors raised by the bounded memory manager.
#[derive(Error, Debug)]
pub enum MemoryError {
    /// Trimming would discard more than 99% of the last message: the
    /// remaining content cannot fit into the budget at all.
    #[error(
        "token budget exhausted: removing {required:.2} of the last message ({tokens} tokens) still cannot satisfy the budget"
    )]
    BudgetExhausted { required: f64, tokens: usize },
}

/// Top-level engine error surfaced to the caller.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("task cancelled")]
    Cancelled,

    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error("another task is currently running: {0}")]
    TaskInProgress(String),

    #[error("history persistence failed: {0}")]
    History(String),

    #[error("step failed: {0}")]
    StepFailed(String),
}

impl From<ActionError> for EngineError {
    fn from(err: ActionError) -> Self {
        match err {
            ActionError::Cancelled => EngineError::Cancelled,
            ActionError::NavigationNotAllowed(e) => EngineError::Browser(e),
            other => EngineError::StepFailed(other.to_string()),
        }
    }
}

impl EngineError {
    /// True for conditions the step loop must re-raise instead of counting
    /// against the consecutive-failure budget.
    pub fn is_fatal(&self) -> bool {
        match self {
            EngineError::Cancelled => true,
            EngineError::Browser(BrowserError::NavigationNotAllowed(_)) => true,
            EngineError::Agent(e) => e.is_fatal(),
            EngineError::TaskInProgress(_) => true,
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            EngineError::Cancelled => true,
            EngineError::Agent(e) => e.is_cancelled(),
            _ => false,
        }
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
