// src/types/mod.rs
pub mod messaging;
pub mod timestamp;

pub use messaging::{ConversationHandle, ConversationSummary, Message, SendMessageRequest};
