// src/messaging/inbox.rs
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

use super::client::MessagingClient;
use crate::core::error::ApiResult;
use crate::core::observable::{Observable, Subscription};
use crate::types::{ConversationHandle, ConversationSummary};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InboxView {
    pub conversations: Vec<ConversationSummary>,
    pub loading: bool,
}

/// Observable conversation list for the signed-in user
#[derive(Clone)]
pub struct Inbox {
    client: MessagingClient,
    view: Observable<InboxView>,
    generation: Arc<AtomicU64>,
}

impl Inbox {
    pub fn new(client: MessagingClient) -> Self {
        Self {
            client,
            view: Observable::new(InboxView::default()),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn snapshot(&self) -> InboxView {
        self.view.get()
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&InboxView) + Send + Sync + 'static,
    {
        self.view.subscribe(callback)
    }

    pub fn watch(&self) -> watch::Receiver<InboxView> {
        self.view.watch()
    }

    /// Reload the list. A failed load shows an empty inbox; a refresh that was
    /// overtaken by a newer one is ignored.
    pub async fn refresh(&self, token: &str) -> Vec<ConversationSummary> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.view.update(|view| view.loading = true);

        let conversations = self.client.list_conversations(token).await;

        if self.generation.load(Ordering::SeqCst) != generation {
            debug!("Discarding superseded conversation list");
            return self.snapshot().conversations;
        }
        self.view.set(InboxView {
            conversations: conversations.clone(),
            loading: false,
        });
        conversations
    }

    pub fn total_unread(&self) -> u32 {
        self.view
            .get()
            .conversations
            .iter()
            .fold(0u32, |total, c| total.saturating_add(c.unread_count))
    }

    pub fn handle_for(&self, conversation_id: &str) -> Option<ConversationHandle> {
        self.view
            .get()
            .conversations
            .iter()
            .find(|c| c.id == conversation_id)
            .map(ConversationHandle::from)
    }

    /// Start (or reopen) a conversation with another user, then reload the list
    /// so it shows up.
    pub async fn open_with(&self, other_user_id: &str, token: &str) -> ApiResult<ConversationHandle> {
        let handle = self
            .client
            .get_or_create_conversation(other_user_id, token)
            .await?;
        self.refresh(token).await;
        Ok(handle)
    }
}
