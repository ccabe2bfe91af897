//! Bounded conversational memory with token-budget enforcement

mod message;
mod store;

pub use message::{
    ContentPart, ESTIMATED_CHARS_PER_TOKEN, IMAGE_TOKENS, Message, MessageCategory, Role,
};
pub use store::MemoryStore;
