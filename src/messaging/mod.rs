// src/messaging/mod.rs
pub mod chat;
pub mod client;
pub mod inbox;

pub use chat::{merge_messages, ChatSynchronizer, ChatView, PendingMessage, PendingState, SyncPhase};
pub use client::MessagingClient;
pub use inbox::{Inbox, InboxView};
